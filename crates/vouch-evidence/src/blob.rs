//! Boundary to file storage.

use async_trait::async_trait;

use crate::Result;

/// File storage. Records keep the returned URL, never the bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return their URL.
    async fn put(&self, bytes: &[u8], content_type: &str) -> Result<String>;

    /// Fetch bytes by URL.
    ///
    /// # Errors
    ///
    /// Returns `EvidenceError::NotFound` for unknown URLs.
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}
