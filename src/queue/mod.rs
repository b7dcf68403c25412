//! Job queue abstraction and backends.
//!
//! Delivery is at-least-once. A claimed job stays invisible to other
//! consumers for a visibility window; if it is neither acked nor nacked
//! within that window it becomes claimable again with an incremented
//! attempt counter. The worker runtime decides between retrying and
//! giving up based on that counter.

mod job;
mod memory;
mod redis;

pub use job::{BlendJob, ClipJob, Job, Placement, TileJob};
pub use memory::MemoryJobQueue;
pub use redis::RedisJobQueue;

use async_trait::async_trait;

use crate::error::QueueError;

// =============================================================================
// Topics
// =============================================================================

/// The three work queues, one per worker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Tile,
    Clip,
    Blend,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Tile, Topic::Clip, Topic::Blend];

    /// Queue name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Tile => "image-tiling",
            Topic::Clip => "image-clipping",
            Topic::Blend => "image-blending",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// A claimed job plus the bookkeeping needed to settle it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: Job,
    /// Backend-specific receipt used to ack or nack this delivery.
    pub token: String,
    /// 1-based delivery attempt, counting redeliveries.
    pub attempt: u32,
}

// =============================================================================
// Queue Trait
// =============================================================================

/// An at-least-once job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to its topic.
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;

    /// Claim the next available job on a topic, waiting briefly if the
    /// topic is empty. Returns `None` on timeout so callers can observe
    /// shutdown signals between polls.
    async fn claim(&self, topic: Topic, consumer: &str) -> Result<Option<Delivery>, QueueError>;

    /// Settle a delivery as done. The job will not be redelivered.
    async fn ack(&self, topic: Topic, token: &str) -> Result<(), QueueError>;

    /// Release a delivery for redelivery after the visibility window.
    async fn nack(&self, topic: Topic, token: &str) -> Result<(), QueueError>;
}
