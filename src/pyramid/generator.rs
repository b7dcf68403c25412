//! Pyramid generation: resize per level, slice into tiles, write blobs.

use std::sync::Arc;

use image::ImageFormat;
use tracing::debug;

use crate::error::WorkerError;
use crate::raster::Raster;
use crate::store::{tile_key, BlobStore};

use super::{level_count, level_geometry, TILE_SIZE};

/// What a finished pyramid looks like, recorded onto the image record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidSummary {
    pub levels: u32,
    pub width: u32,
    pub height: u32,
    pub tile_count: u32,
}

/// Builds tile pyramids into a blob store.
///
/// Tile writes are unconditional overwrites under deterministic keys, so
/// generation is idempotent and a redelivered job can safely re-run it.
pub struct PyramidGenerator {
    blobs: Arc<dyn BlobStore>,
}

impl PyramidGenerator {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Generate the full pyramid for `source` under `prefix`.
    ///
    /// Emits every tile as `{prefix}/{z}/{x}/{y}.png`, coarsest level first.
    pub async fn generate(
        &self,
        source: &Raster,
        prefix: &str,
    ) -> Result<PyramidSummary, WorkerError> {
        let (width, height) = source.dimensions();
        let levels = level_count(width, height);
        let mut tile_count = 0;

        for z in 0..levels {
            let geometry = level_geometry(width, height, levels, z);
            let level_image = source.resize(geometry.width, geometry.height)?;

            if geometry.max_dim < TILE_SIZE {
                // The whole level fits in one tile, written untrimmed.
                let bytes = level_image.encode(ImageFormat::Png)?;
                self.blobs
                    .put(&tile_key(prefix, z, 0, 0), bytes, "image/png")
                    .await?;
                tile_count += 1;
                continue;
            }

            tile_count += self.write_level_grid(&level_image, prefix, z).await?;
        }

        debug!(prefix, levels, tile_count, "pyramid complete");

        Ok(PyramidSummary {
            levels,
            width,
            height,
            tile_count,
        })
    }

    /// Slice one resized level into its tile grid and write every tile.
    async fn write_level_grid(
        &self,
        level_image: &Raster,
        prefix: &str,
        z: u32,
    ) -> Result<u32, WorkerError> {
        let (level_width, level_height) = level_image.dimensions();
        let columns = level_width.div_ceil(TILE_SIZE);
        let rows = level_height.div_ceil(TILE_SIZE);

        let extract_width = TILE_SIZE.min(level_width - 1);
        let extract_height = TILE_SIZE.min(level_height - 1);

        let mut written = 0;
        for y in 0..rows {
            for x in 0..columns {
                // The last column and row shift back to a full-size tile
                // that overlaps its neighbor instead of a narrow trailing
                // sliver; clients rely on every edge tile having the full
                // 256px edge.
                let left = if x == columns - 1 && level_width - 1 > TILE_SIZE {
                    level_width - TILE_SIZE - 1
                } else {
                    x * TILE_SIZE
                };
                let top = if y == rows - 1 && level_height - 1 > TILE_SIZE {
                    level_height - TILE_SIZE - 1
                } else {
                    y * TILE_SIZE
                };

                let tile = level_image.extract(left, top, extract_width, extract_height)?;
                let bytes = tile.encode(ImageFormat::Png)?;
                self.blobs
                    .put(&tile_key(prefix, z, x, y), bytes, "image/png")
                    .await?;
                written += 1;
            }
        }

        Ok(written)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;
    use image::{Rgba, RgbaImage};

    fn solid(width: u32, height: u32) -> Raster {
        Raster::from_rgba(RgbaImage::from_pixel(width, height, Rgba([80, 120, 160, 255])))
    }

    async fn generate(width: u32, height: u32) -> (Arc<MemoryBlobStore>, PyramidSummary) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let generator = PyramidGenerator::new(blobs.clone());
        let summary = generator.generate(&solid(width, height), "tiles/1/img").await.unwrap();
        (blobs, summary)
    }

    #[tokio::test]
    async fn test_small_image_single_tile_per_level() {
        let (blobs, summary) = generate(100, 80).await;

        // max dim 100 -> 3 levels, all below the tile size.
        assert_eq!(summary.levels, 3);
        assert_eq!(summary.tile_count, 3);

        for z in 0..3 {
            let keys = blobs.list(&format!("tiles/1/img/{}", z)).await.unwrap();
            assert_eq!(keys, vec![format!("tiles/1/img/{}/0/0.png", z)]);
        }
    }

    #[tokio::test]
    async fn test_single_tile_is_untrimmed() {
        let (blobs, _) = generate(100, 80).await;

        // Top level is full resolution; its single tile carries the whole image.
        let bytes = blobs.get("tiles/1/img/2/0/0.png").await.unwrap();
        let tile = Raster::decode(&bytes).unwrap();
        assert_eq!(tile.dimensions(), (100, 80));
    }

    #[tokio::test]
    async fn test_1000x500_pyramid_shape() {
        let (blobs, summary) = generate(1000, 500).await;

        assert_eq!(summary.levels, 4);
        assert_eq!(summary.width, 1000);
        assert_eq!(summary.height, 500);

        // Levels 0..2 have max dims 125, 250, 500. Level 2 (500x250) grids
        // to 2x1; level 3 (1000x500) grids to 4x2.
        assert_eq!(
            blobs.list("tiles/1/img/0").await.unwrap().len(),
            1
        );
        assert_eq!(
            blobs.list("tiles/1/img/1").await.unwrap().len(),
            1
        );
        assert_eq!(
            blobs.list("tiles/1/img/2").await.unwrap().len(),
            2
        );
        assert_eq!(
            blobs.list("tiles/1/img/3").await.unwrap().len(),
            8
        );
        assert_eq!(summary.tile_count, 12);
    }

    #[tokio::test]
    async fn test_last_column_tile_has_full_edge() {
        let (blobs, _) = generate(1000, 500).await;

        // Level 3 is 1000x500: the last column would naturally be 232px
        // wide, but shifts back to a full 256px tile.
        let bytes = blobs.get("tiles/1/img/3/3/0.png").await.unwrap();
        let tile = Raster::decode(&bytes).unwrap();
        assert_eq!(tile.width(), 256);

        // Rows: 500px splits into one full row and a shifted last row.
        let bytes = blobs.get("tiles/1/img/3/0/1.png").await.unwrap();
        let tile = Raster::decode(&bytes).unwrap();
        assert_eq!(tile.height(), 256);
    }

    #[tokio::test]
    async fn test_exact_tile_size_level_trims_one_pixel() {
        // 256x256 source: top level grids 1x1 with extraction size
        // min(256, 255) = 255.
        let (blobs, _) = generate(256, 256).await;
        let keys = blobs.list("tiles/1/img/3").await.unwrap();
        assert_eq!(keys.len(), 1);

        let bytes = blobs.get("tiles/1/img/3/0/0.png").await.unwrap();
        let tile = Raster::decode(&bytes).unwrap();
        assert_eq!(tile.dimensions(), (255, 255));
    }

    #[tokio::test]
    async fn test_degenerate_1x1_source() {
        let (blobs, summary) = generate(1, 1).await;
        assert_eq!(summary.levels, 1);
        assert_eq!(summary.tile_count, 1);
        assert!(blobs.get("tiles/1/img/0/0/0.png").await.is_ok());
    }

    #[tokio::test]
    async fn test_regeneration_overwrites_same_keys() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let generator = PyramidGenerator::new(blobs.clone());

        let first = generator.generate(&solid(300, 300), "t").await.unwrap();
        let count_after_first = blobs.len().await;
        let second = generator.generate(&solid(300, 300), "t").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(blobs.len().await, count_after_first);
    }
}
