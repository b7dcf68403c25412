//! Polygon mask rasterization and bounding-box math for the clip worker.
//!
//! A clip request carries an ordered polygon drawn by the client in the
//! coordinate space of a given canvas (the pyramid level visible at draw
//! time). The mask is a canvas-sized RGBA image, fully opaque inside the
//! polygon and transparent outside; composited `DestIn` over the resized
//! source it keeps only the pixels the user circled.

use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point as PixelPoint;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

use super::engine::Raster;

/// Minimum number of vertices a clip polygon must have.
pub const MIN_POLYGON_POINTS: usize = 3;

/// A polygon vertex in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box of a polygon, in whole pixels.
///
/// Width and height are `max - min` of the vertex coordinates, matching the
/// extraction rectangle clients expect; a degenerate polygon yields zero
/// width or height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingRect {
    /// Whether the box encloses a non-empty area.
    pub fn has_area(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Compute the bounding box of the polygon, clamping negatives to zero.
///
/// Returns `None` for an empty point list.
pub fn bounding_rect(points: &[Point]) -> Option<BoundingRect> {
    if points.is_empty() {
        return None;
    }

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    let left = min_x.max(0.0).round() as u32;
    let top = min_y.max(0.0).round() as u32;
    let width = (max_x - min_x).max(0.0).round() as u32;
    let height = (max_y - min_y).max(0.0).round() as u32;

    Some(BoundingRect {
        left,
        top,
        width,
        height,
    })
}

/// Rasterize a filled polygon mask on a transparent canvas.
///
/// Pixels inside the polygon are fully opaque white; everything else is
/// transparent. Vertices are rounded to the pixel grid.
pub fn render_mask(width: u32, height: u32, points: &[Point]) -> Result<Raster, EngineError> {
    if width == 0 || height == 0 {
        return Err(EngineError::InvalidDimensions { width, height });
    }
    if points.len() < MIN_POLYGON_POINTS {
        return Err(EngineError::InvalidPolygon {
            reason: format!(
                "{} point(s) given, at least {} required",
                points.len(),
                MIN_POLYGON_POINTS
            ),
        });
    }

    let mut vertices: Vec<PixelPoint<i32>> = points
        .iter()
        .map(|p| PixelPoint::new(p.x.round() as i32, p.y.round() as i32))
        .collect();

    // The rasterizer closes the polygon itself and rejects an explicit
    // closing vertex; it also rejects consecutive duplicates.
    vertices.dedup();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }

    let mut canvas = Raster::transparent(width, height)?;

    // A polygon that collapses to a single pixel has no interior to fill.
    if vertices.len() >= 2 {
        let mut image = canvas.into_rgba();
        draw_polygon_mut(&mut image, &vertices, image::Rgba([255, 255, 255, 255]));
        canvas = Raster::from_rgba(image);
    }

    Ok(canvas)
}

// =============================================================================
// Tests
// =============================================================================
