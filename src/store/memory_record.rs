//! In-memory record store for the local backend and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::RecordError;

use super::record::{ImageRecord, RecordStore, RecordUpdate};

/// Record store backed by an in-process map keyed by (owner id, image id).
///
/// Enforces the same transition and geometry rules as the persistent
/// backends, so worker behavior under test matches production.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<(u64, String), ImageRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: ImageRecord) -> Result<(), RecordError> {
        let key = (record.owner_id, record.image_id.clone());
        self.records.write().await.insert(key, record);
        Ok(())
    }

    async fn get(
        &self,
        owner_id: u64,
        image_id: &str,
    ) -> Result<Option<ImageRecord>, RecordError> {
        Ok(self
            .records
            .read()
            .await
            .get(&(owner_id, image_id.to_string()))
            .cloned())
    }

    async fn update(
        &self,
        owner_id: u64,
        image_id: &str,
        update: RecordUpdate,
    ) -> Result<(), RecordError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&(owner_id, image_id.to_string()))
            .ok_or_else(|| RecordError::NotFound {
                owner_id,
                image_id: image_id.to_string(),
            })?;

        update.validate(record)?;
        update.apply(record, Utc::now());
        Ok(())
    }
}
