//! Raster primitives over a single in-memory image.
//!
//! `Raster` wraps the `image` crate and exposes the five operations the
//! pipeline needs: decode, resize, extract, composite, encode. Every
//! operation is a pure function over owned pixel data, so concurrent jobs
//! never contend on engine internals.
//!
//! # Design Decisions
//!
//! - **RGBA8 everywhere**: sources are converted to RGBA8 on decode. Clip
//!   masks need an alpha channel, and a single pixel format keeps composite
//!   logic simple. JPEG output drops alpha at encode time.
//!
//! - **Orientation normalized on decode**: EXIF orientation is applied
//!   immediately, so width/height seen by the pyramid generator and the
//!   record store always describe the visually-correct image.
//!
//! - **No implicit aspect preservation**: `resize` goes to the exact target
//!   dimensions. Callers (the pyramid generator, the clip/blend workers)
//!   compute targets themselves.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, Rgba, RgbaImage};

use crate::error::EngineError;

// =============================================================================
// Blend Modes
// =============================================================================

/// How a composite layer combines with the base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Standard alpha-over painting: the layer draws on top of the base.
    Over,

    /// Alpha extraction: base pixels are kept only where the layer is
    /// opaque (the clip-mask operation, `dest-in` in compositing terms).
    DestIn,
}

/// One layer of a composite operation.
#[derive(Debug, Clone)]
pub struct CompositeLayer {
    /// The layer pixels
    pub raster: Raster,

    /// Horizontal offset of the layer's left edge on the base
    pub left: i64,

    /// Vertical offset of the layer's top edge on the base
    pub top: i64,

    /// Blend mode for this layer
    pub mode: BlendMode,
}

impl CompositeLayer {
    /// Paint `raster` over the base at the given offset.
    pub fn over(raster: Raster, left: i64, top: i64) -> Self {
        Self {
            raster,
            left,
            top,
            mode: BlendMode::Over,
        }
    }

    /// Use `raster` as an alpha mask covering the base from the origin.
    pub fn mask(raster: Raster) -> Self {
        Self {
            raster,
            left: 0,
            top: 0,
            mode: BlendMode::DestIn,
        }
    }
}

// =============================================================================
// Raster
// =============================================================================

/// A decoded image held as RGBA8 pixels.
#[derive(Debug, Clone)]
pub struct Raster {
    inner: RgbaImage,
}

impl Raster {
    /// Decode image bytes, guessing the format from content.
    ///
    /// EXIF orientation metadata is applied here, so the returned raster's
    /// dimensions reflect the visually-correct orientation.
    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| EngineError::Decode {
                message: e.to_string(),
            })?;

        let mut decoder = reader.into_decoder().map_err(|e| EngineError::Decode {
            message: e.to_string(),
        })?;

        // Orientation must be read before the pixel data is consumed.
        let orientation = decoder
            .orientation()
            .unwrap_or(Orientation::NoTransforms);

        let mut img = DynamicImage::from_decoder(decoder).map_err(|e| EngineError::Decode {
            message: e.to_string(),
        })?;
        img.apply_orientation(orientation);

        Ok(Self {
            inner: img.into_rgba8(),
        })
    }

    /// Wrap an existing RGBA buffer.
    pub fn from_rgba(image: RgbaImage) -> Self {
        Self { inner: image }
    }

    /// Create a fully transparent canvas.
    pub fn transparent(width: u32, height: u32) -> Result<Self, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidDimensions { width, height });
        }
        Ok(Self {
            inner: RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0])),
        })
    }

    /// Unwrap into the underlying RGBA buffer.
    pub fn into_rgba(self) -> RgbaImage {
        self.inner
    }

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        self.inner.dimensions()
    }

    /// Read a single pixel. Intended for tests and diagnostics.
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.inner.get_pixel(x, y)
    }

    /// Resize to exactly `width` x `height` (Lanczos3).
    ///
    /// Aspect ratio is NOT preserved automatically; the caller computes the
    /// target dimensions.
    pub fn resize(&self, width: u32, height: u32) -> Result<Self, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidDimensions { width, height });
        }
        if (width, height) == self.inner.dimensions() {
            return Ok(self.clone());
        }
        Ok(Self {
            inner: imageops::resize(&self.inner, width, height, FilterType::Lanczos3),
        })
    }

    /// Extract the rectangular region at (`left`, `top`) of size
    /// `width` x `height`.
    pub fn extract(
        &self,
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    ) -> Result<Self, EngineError> {
        let (image_width, image_height) = self.inner.dimensions();

        let out_of_bounds = width == 0
            || height == 0
            || left.checked_add(width).map_or(true, |r| r > image_width)
            || top.checked_add(height).map_or(true, |b| b > image_height);

        if out_of_bounds {
            return Err(EngineError::RegionOutOfBounds {
                left,
                top,
                width,
                height,
                image_width,
                image_height,
            });
        }

        Ok(Self {
            inner: imageops::crop_imm(&self.inner, left, top, width, height).to_image(),
        })
    }

    /// Apply composite layers in order over this image.
    ///
    /// List order is paint order: later `Over` layers draw on top of earlier
    /// ones. A `DestIn` layer keeps base pixels only where the layer is
    /// opaque; base pixels outside the layer's extent become transparent.
    pub fn composite(&self, layers: &[CompositeLayer]) -> Raster {
        let mut base = self.inner.clone();

        for layer in layers {
            match layer.mode {
                BlendMode::Over => {
                    imageops::overlay(&mut base, &layer.raster.inner, layer.left, layer.top);
                }
                BlendMode::DestIn => {
                    apply_dest_in(&mut base, &layer.raster.inner, layer.left, layer.top);
                }
            }
        }

        Raster { inner: base }
    }

    /// Encode to the given format.
    ///
    /// PNG keeps the alpha channel; JPEG flattens to RGB.
    pub fn encode(&self, format: ImageFormat) -> Result<Bytes, EngineError> {
        let mut out = Cursor::new(Vec::new());

        let result = match format {
            ImageFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgba8(self.inner.clone()).into_rgb8();
                let encoder = JpegEncoder::new(&mut out);
                rgb.write_with_encoder(encoder)
            }
            _ => self.inner.write_to(&mut out, format),
        };

        result.map_err(|e| EngineError::Encode {
            message: e.to_string(),
        })?;

        Ok(Bytes::from(out.into_inner()))
    }
}

/// Multiply the base alpha by the layer alpha (`dest-in`).
///
/// Base pixels with no corresponding layer pixel get alpha 0.
fn apply_dest_in(base: &mut RgbaImage, layer: &RgbaImage, left: i64, top: i64) {
    let (layer_w, layer_h) = layer.dimensions();

    for (x, y, pixel) in base.enumerate_pixels_mut() {
        let lx = x as i64 - left;
        let ly = y as i64 - top;

        let mask_alpha = if lx >= 0 && ly >= 0 && (lx as u32) < layer_w && (ly as u32) < layer_h {
            layer.get_pixel(lx as u32, ly as u32)[3]
        } else {
            0
        };

        pixel[3] = ((pixel[3] as u16 * mask_alpha as u16) / 255) as u8;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> Raster {
        Raster::from_rgba(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    #[test]
    fn test_decode_png_roundtrip() {
        let source = solid(20, 10, [10, 200, 30, 255]);
        let bytes = source.encode(ImageFormat::Png).unwrap();

        let decoded = Raster::decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (20, 10));
        assert_eq!(decoded.pixel(5, 5), Rgba([10, 200, 30, 255]));
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let result = Raster::decode(&[0x00, 0x01, 0x02, 0x03]);
        assert!(matches!(result, Err(EngineError::Decode { .. })));
    }

    #[test]
    fn test_resize_exact_dimensions() {
        let source = solid(100, 40, [255, 0, 0, 255]);

        // Aspect is not preserved: exact target dims.
        let resized = source.resize(30, 30).unwrap();
        assert_eq!(resized.dimensions(), (30, 30));
    }

    #[test]
    fn test_resize_zero_rejected() {
        let source = solid(10, 10, [0, 0, 0, 255]);
        assert!(matches!(
            source.resize(0, 5),
            Err(EngineError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_extract_region() {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        img.put_pixel(4, 3, Rgba([255, 255, 255, 255]));
        let raster = Raster::from_rgba(img);

        let region = raster.extract(3, 2, 4, 4).unwrap();
        assert_eq!(region.dimensions(), (4, 4));
        assert_eq!(region.pixel(1, 1), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_extract_out_of_bounds() {
        let raster = solid(10, 10, [0, 0, 0, 255]);
        let result = raster.extract(8, 8, 4, 4);
        assert!(matches!(result, Err(EngineError::RegionOutOfBounds { .. })));
    }

    #[test]
    fn test_composite_over_paint_order() {
        let base = solid(10, 10, [0, 0, 0, 255]);
        let red = solid(6, 6, [255, 0, 0, 255]);
        let blue = solid(6, 6, [0, 0, 255, 255]);

        // Both layers cover (4,4); the later layer must win.
        let out = base.composite(&[
            CompositeLayer::over(red, 0, 0),
            CompositeLayer::over(blue, 2, 2),
        ]);

        assert_eq!(out.pixel(4, 4), Rgba([0, 0, 255, 255]));
        assert_eq!(out.pixel(1, 1), Rgba([255, 0, 0, 255]));
        assert_eq!(out.pixel(9, 9), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_composite_dest_in_keeps_masked_pixels() {
        let base = solid(8, 8, [50, 60, 70, 255]);

        // Mask opaque only in the top-left 4x4 corner.
        let mut mask = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0]));
        for y in 0..4 {
            for x in 0..4 {
                mask.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }

        let out = base.composite(&[CompositeLayer::mask(Raster::from_rgba(mask))]);

        assert_eq!(out.pixel(1, 1), Rgba([50, 60, 70, 255]));
        assert_eq!(out.pixel(6, 6)[3], 0);
    }

    #[test]
    fn test_dest_in_outside_mask_extent_transparent() {
        let base = solid(8, 8, [1, 2, 3, 255]);
        let small_mask = solid(2, 2, [255, 255, 255, 255]);

        let out = base.composite(&[CompositeLayer::mask(small_mask)]);

        assert_eq!(out.pixel(0, 0)[3], 255);
        assert_eq!(out.pixel(5, 5)[3], 0);
    }

    #[test]
    fn test_encode_jpeg_flattens_alpha() {
        let source = solid(16, 16, [100, 100, 100, 128]);
        let bytes = source.encode(ImageFormat::Jpeg).unwrap();

        // JPEG SOI marker
        assert_eq!(bytes[0], 0xFF);
        assert_eq!(bytes[1], 0xD8);
    }
}
