//! In-memory blob store for tests and ephemeral runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::StorageError;

use super::BlobStore;

/// Blob store backed by an in-process map. Cheap to construct, fully
/// isolated per instance; the backing map is ordered so `list` output is
/// deterministic.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<(), StorageError> {
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let slash_prefix = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(&slash_prefix))
            .cloned()
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        let slash_prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.objects
            .write()
            .await
            .retain(|k, _| !k.starts_with(&slash_prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryBlobStore::new();
        store
            .put("a/b/c.png", Bytes::from_static(b"data"), "image/png")
            .await
            .unwrap();

        assert_eq!(store.get("a/b/c.png").await.unwrap(), Bytes::from_static(b"data"));
        assert!(matches!(
            store.get("a/b/missing.png").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete_prefix() {
        let store = MemoryBlobStore::new();
        for key in ["tiles/1/img/0/0/0.png", "tiles/1/img/1/0/0.png", "tiles/1/other/0/0/0.png"] {
            store
                .put(key, Bytes::from_static(b"x"), "image/png")
                .await
                .unwrap();
        }

        let keys = store.list("tiles/1/img").await.unwrap();
        assert_eq!(keys.len(), 2);

        store.delete_prefix("tiles/1/img").await.unwrap();
        assert!(store.list("tiles/1/img").await.unwrap().is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_prefix_does_not_match_sibling_names() {
        let store = MemoryBlobStore::new();
        store
            .put("tiles/1/img-longer/0.png", Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap();

        assert!(store.list("tiles/1/img").await.unwrap().is_empty());
        store.delete_prefix("tiles/1/img").await.unwrap();
        assert_eq!(store.len().await, 1);
    }
}
