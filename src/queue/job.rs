//! Job payloads.
//!
//! Every message on the wire is a tagged envelope: `{"type": ..., "payload":
//! ...}` with camelCase payload fields. The tag makes a misrouted message an
//! immediate deserialization error instead of a silently misinterpreted one.

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::raster::{Point, MIN_POLYGON_POINTS};

use super::Topic;

// =============================================================================
// Payloads
// =============================================================================

/// Build a tile pyramid for an existing image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileJob {
    pub owner_id: u64,
    pub image_id: String,
    /// File extension of the stored source (`png`, `jpg`, `jpeg`)
    pub media_type: String,
    pub original_name: String,
}

/// Clip a polygon region out of a source image into a new image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipJob {
    pub owner_id: u64,
    pub new_image_id: String,
    pub source_image_id: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub polygon: Vec<Point>,
}

/// One image layered onto a blend canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub image_id: String,
    /// File extension of the placed image
    pub media_type: String,
    pub width: f64,
    pub height: f64,
    pub left: f64,
    pub top: f64,
}

/// Composite a background and a list of placements into a new image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlendJob {
    pub owner_id: u64,
    pub new_image_id: String,
    pub source_image_id: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// List order is z-order: later placements paint over earlier ones.
    pub placements: Vec<Placement>,
}

// =============================================================================
// Envelope
// =============================================================================

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Job {
    #[serde(rename = "tile-image")]
    Tile(TileJob),
    #[serde(rename = "clip-image")]
    Clip(ClipJob),
    #[serde(rename = "blend-image")]
    Blend(BlendJob),
}

impl Job {
    /// The topic this job belongs on.
    pub fn topic(&self) -> Topic {
        match self {
            Job::Tile(_) => Topic::Tile,
            Job::Clip(_) => Topic::Clip,
            Job::Blend(_) => Topic::Blend,
        }
    }

    /// The record this job produces or finalizes, as (owner id, image id).
    pub fn target_image(&self) -> (u64, &str) {
        match self {
            Job::Tile(job) => (job.owner_id, &job.image_id),
            Job::Clip(job) => (job.owner_id, &job.new_image_id),
            Job::Blend(job) => (job.owner_id, &job.new_image_id),
        }
    }

    /// Structural validation, done before any I/O so malformed jobs fail
    /// fast without consuming the retry budget.
    pub fn validate(&self) -> Result<(), WorkerError> {
        match self {
            Job::Tile(_) => Ok(()),
            Job::Clip(job) => {
                if job.canvas_width == 0 || job.canvas_height == 0 {
                    return Err(WorkerError::Input(format!(
                        "clip canvas must be non-empty, got {}x{}",
                        job.canvas_width, job.canvas_height
                    )));
                }
                if job.polygon.len() < MIN_POLYGON_POINTS {
                    return Err(WorkerError::Input(format!(
                        "clip polygon needs at least {} points, got {}",
                        MIN_POLYGON_POINTS,
                        job.polygon.len()
                    )));
                }
                Ok(())
            }
            Job::Blend(job) => {
                if job.canvas_width == 0 || job.canvas_height == 0 {
                    return Err(WorkerError::Input(format!(
                        "blend canvas must be non-empty, got {}x{}",
                        job.canvas_width, job.canvas_height
                    )));
                }
                if job.placements.is_empty() {
                    return Err(WorkerError::Input(
                        "blend job has no placements".to_string(),
                    ));
                }
                for p in &job.placements {
                    if p.width <= 0.0 || p.height <= 0.0 {
                        return Err(WorkerError::Input(format!(
                            "placement {} has non-positive size {}x{}",
                            p.image_id, p.width, p.height
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
