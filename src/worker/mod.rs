//! Queue-consumer workers: tile, clip, blend.
//!
//! Each worker implements [`JobHandler`] and runs inside a [`WorkerPool`]
//! that claims jobs, invokes the handler, and settles deliveries according
//! to the retry policy. Workers receive their collaborators (blob store,
//! record store, queue) at construction, never through globals.

mod blend;
mod clip;
mod runtime;
mod tile;

pub use blend::BlendWorker;
pub use clip::ClipWorker;
pub use runtime::WorkerPool;
pub use tile::TileWorker;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::queue::{Job, Topic};

// =============================================================================
// Retry Policy
// =============================================================================

/// When to stop redelivering a failing job.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total delivery attempts before a transient failure becomes terminal.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Whether this attempt's failure is terminal.
    ///
    /// Non-retryable errors are terminal on the first attempt; they never
    /// consume the retry budget waiting for an outcome that cannot change.
    pub fn is_final(&self, error: &WorkerError, attempt: u32) -> bool {
        !error.is_retryable() || attempt >= self.max_attempts
    }
}

// =============================================================================
// Job Handler
// =============================================================================

/// One worker role's job processing logic.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The topic this handler consumes.
    fn topic(&self) -> Topic;

    /// Process one job. Must be idempotent under redelivery.
    async fn handle(&self, job: &Job) -> Result<(), WorkerError>;

    /// Called once when a job fails terminally (non-retryable error or
    /// exhausted attempts), before the delivery is settled. Marks the
    /// affected record `Failed` so callers can tell a dead image from one
    /// still in flight.
    async fn on_final_failure(&self, job: &Job, error: &WorkerError);
}
