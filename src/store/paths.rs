//! Storage key layout shared by everything that reads or writes blobs.
//!
//! Source and derived rasters live under the image root, tiles under the
//! tile root:
//!
//! ```text
//! {image_root}/{owner_id}/{image_id}.{ext}
//! {tile_root}/{owner_id}/{image_id}/{level}/{x}/{y}.png
//! ```

use super::record::MediaType;

/// Key builder for the image/tile storage layout.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    image_root: String,
    tile_root: String,
}

impl StorageLayout {
    pub fn new(image_root: impl Into<String>, tile_root: impl Into<String>) -> Self {
        Self {
            image_root: image_root.into(),
            tile_root: tile_root.into(),
        }
    }

    /// Key of a source or derived raster.
    pub fn image_key(&self, owner_id: u64, image_id: &str, media_type: MediaType) -> String {
        format!(
            "{}/{}/{}.{}",
            self.image_root,
            owner_id,
            image_id,
            media_type.extension()
        )
    }

    /// Prefix under which all tiles of one image live.
    pub fn tile_prefix(&self, owner_id: u64, image_id: &str) -> String {
        format!("{}/{}/{}", self.tile_root, owner_id, image_id)
    }
}

/// Key of a single tile under a pyramid prefix.
pub fn tile_key(prefix: &str, level: u32, x: u32, y: u32) -> String {
    format!("{}/{}/{}/{}.png", prefix, level, x, y)
}
