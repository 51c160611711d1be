//! BlobStore contract for ceremony artifacts.
//!
//! A persistent, shared key-value store (S3, Redis, a database — whatever
//! an operator deployment already runs) is an external collaborator out of
//! this workspace's scope; this crate owns only the `put`/`get` contract
//! such a store must satisfy, plus an in-memory, TTL'd implementation
//! useful for tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dkg_core::blobstore::BlobStore;
use dkg_core::{Error, Result};
use std::sync::Arc;
use tracing::debug;

pub use dkg_core::blobstore::{keys, BlobStore as BlobStoreTrait};

struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// In-memory, TTL'd [`BlobStore`] for tests and single-process deployments.
/// A blob key here is already the full lookup key, so no further indexing
/// is needed beyond the map itself.
#[derive(Clone)]
pub struct InMemoryBlobStore {
    entries: Arc<DashMap<String, Entry>>,
    ttl_seconds: i64,
}

impl InMemoryBlobStore {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl_seconds,
        }
    }

    /// Drop any entry whose TTL has elapsed. Callers run this on a timer;
    /// it is never invoked implicitly by `put`/`get`.
    pub fn cleanup(&self) {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "evicted expired blobstore entries");
        }
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new(3600)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let expires_at = Utc::now() + chrono::Duration::seconds(self.ttl_seconds);
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.value.clone())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > Utc::now()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryBlobStore::new(3600);
        store.put("k", vec![1, 2, 3]).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn get_missing_key_returns_not_found() {
        let store = InMemoryBlobStore::new(3600);
        match store.get("missing").await {
            Err(Error::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_even_before_cleanup() {
        let store = InMemoryBlobStore::new(-1);
        store.put("k", vec![9]).await.unwrap();
        assert!(!store.exists("k").await.unwrap());
        assert!(store.get("k").await.is_err());
    }

    #[tokio::test]
    async fn cleanup_evicts_expired_entries() {
        let store = InMemoryBlobStore::new(-1);
        store.put("k", vec![9]).await.unwrap();
        store.cleanup();
        assert_eq!(store.entries.len(), 0);
    }
}
