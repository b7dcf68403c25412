//! Raster engine: decode/resize/extract/composite/encode primitives.

mod engine;
mod mask;

pub use engine::{BlendMode, CompositeLayer, Raster};
pub use mask::{bounding_rect, render_mask, BoundingRect, Point, MIN_POLYGON_POINTS};
