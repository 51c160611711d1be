//! `BlobStore` contract: durable storage for ceremony artifacts an operator
//! wants to survive a process restart (an operator's own encrypted key
//! share, its signed proof, the archived result record).
//!
//! The trait lives here, not in `dkg-blobstore`, because
//! [`crate::switch::Switch`] needs to call it directly; the concrete store
//! (S3, Redis, a database) is the external collaborator, `dkg-blobstore`
//! only ships an in-memory implementation for tests and single-process
//! deployments.

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Canonical blob keys, so callers never hand-format a path: every key is
/// `ceremony/{ceremony_id}/{type}[/{operator_id}]`.
pub mod keys {
    pub fn final_share(ceremony_id: &str, operator_id: u64) -> String {
        format!("ceremony/{ceremony_id}/share/{operator_id}")
    }

    pub fn proof(ceremony_id: &str, operator_id: u64) -> String {
        format!("ceremony/{ceremony_id}/proof/{operator_id}")
    }

    pub fn result(ceremony_id: &str) -> String {
        format!("ceremony/{ceremony_id}/result")
    }
}
