//! Storage abstractions: blob store and image record store.
//!
//! Both collaborators are external systems; this module defines the
//! operations the pipeline consumes and ships two implementations of each,
//! selected once at process startup and injected into the workers:
//!
//! - local: [`FsBlobStore`] + [`MemoryRecordStore`]
//! - managed: [`S3BlobStore`] + [`DynamoRecordStore`]
//!
//! [`MemoryBlobStore`] exists for tests and ephemeral in-process runs.

mod dynamo;
mod fs;
mod memory;
mod memory_record;
mod paths;
mod record;
mod s3;

pub use dynamo::DynamoRecordStore;
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use memory_record::MemoryRecordStore;
pub use paths::{tile_key, StorageLayout};
pub use record::{
    DerivationKind, Geometry, ImageRecord, ImageState, MediaType, RecordStore, RecordUpdate,
};
pub use s3::{create_s3_client, S3BlobStore};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

/// Byte-blob storage keyed by slash-separated paths.
///
/// Writes are unconditional overwrites; together with deterministic key
/// naming this is what makes at-least-once job redelivery safe to replay.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the object at `key`.
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Write (or overwrite) the object at `key`.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// List all object keys under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Delete every object under `prefix`. Deleting a missing prefix is not
    /// an error.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError>;
}
