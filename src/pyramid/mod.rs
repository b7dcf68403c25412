//! Tile pyramid geometry and generation.
//!
//! The level-count and per-level dimension formulas here are the single
//! source of truth for the zoom-level to pixel-dimension mapping. Any
//! client requesting tiles must compute them identically or its tile URLs
//! will miss.

mod generator;

pub use generator::{PyramidGenerator, PyramidSummary};

/// Tile edge length in pixels.
pub const TILE_SIZE: u32 = 256;

/// Number of pyramid levels for an image of the given dimensions.
///
/// `ceil(1 + log10(max(w, h)))`, clamped to at least one level so
/// degenerate 1x1 sources still produce a pyramid.
pub fn level_count(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height).max(1) as f64;
    let levels = (1.0 + max_dim.log10()).ceil() as u32;
    levels.max(1)
}

/// Pixel dimensions of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelGeometry {
    pub width: u32,
    pub height: u32,
    /// The larger of `width` and `height`.
    pub max_dim: u32,
}

/// Dimensions of level `z` (0 = coarsest) for a source of the given size.
///
/// The longer axis halves per level up from `z` to full resolution; the
/// shorter axis follows the aspect ratio, with `ceil` rounding on both.
pub fn level_geometry(width: u32, height: u32, levels: u32, z: u32) -> LevelGeometry {
    let max_dim = width.max(height) as f64;
    let scale = 2u32.pow(levels - 1 - z) as f64;
    let level_max_dim = (max_dim / scale).ceil() as u32;

    let ratio = width as f64 / height as f64;
    let (level_width, level_height) = if ratio > 1.0 {
        (
            level_max_dim,
            ((level_max_dim as f64) / ratio).ceil() as u32,
        )
    } else {
        (
            ((level_max_dim as f64) * ratio).ceil() as u32,
            level_max_dim,
        )
    };

    LevelGeometry {
        width: level_width,
        height: level_height,
        max_dim: level_max_dim,
    }
}
