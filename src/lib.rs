//! # tilery
//!
//! Tile pyramid processing workers for uploaded raster images.
//!
//! Uploaded images are pre-sliced into multi-resolution tile pyramids so
//! viewers can pan and zoom by fetching only the 256px tiles the viewport
//! needs. New images can also be derived from existing ones by polygon
//! clipping or multi-image blending; both derivations feed back into the
//! same tiling pipeline.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`raster`] - Decode/resize/extract/composite/encode primitives
//! - [`pyramid`] - Level geometry and tile pyramid generation
//! - [`store`] - Blob and image-record storage (filesystem/S3, memory/DynamoDB)
//! - [`queue`] - Typed job payloads and queue backends (memory, Redis Streams)
//! - [`worker`] - The tile, clip, and blend queue consumers
//! - [`config`] - CLI and configuration types
//!
//! ## Lifecycle
//!
//! Every image has a record moving through `Pending -> Processing -> Ready`
//! (or `Failed`). Records become `Ready` only when the pyramid exists, at
//! which point width, height, and max zoom level are set atomically.

pub mod config;
pub mod error;
pub mod pyramid;
pub mod queue;
pub mod raster;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use config::{Backend, Config, Role};
pub use error::{EngineError, QueueError, RecordError, StorageError, WorkerError};
pub use pyramid::{level_count, level_geometry, PyramidGenerator, PyramidSummary, TILE_SIZE};
pub use queue::{
    BlendJob, ClipJob, Delivery, Job, JobQueue, MemoryJobQueue, Placement, RedisJobQueue, TileJob,
    Topic,
};
pub use raster::{
    bounding_rect, render_mask, BlendMode, BoundingRect, CompositeLayer, Point, Raster,
};
pub use store::{
    create_s3_client, tile_key, BlobStore, DerivationKind, DynamoRecordStore, FsBlobStore,
    ImageRecord, ImageState, MediaType, MemoryBlobStore, MemoryRecordStore, RecordStore,
    RecordUpdate, S3BlobStore, StorageLayout,
};
pub use worker::{BlendWorker, ClipWorker, JobHandler, RetryPolicy, TileWorker, WorkerPool};
