//! In-memory implementations for tests and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use vouch_crypto::Hash256;
use vouch_identity::IdentityId;

use crate::blob::BlobStore;
use crate::extractor::{EvidenceExtractor, Extraction};
use crate::record::{EvidenceContent, EvidenceId, EvidenceKind, EvidenceRecord};
use crate::store::EvidenceStore;
use crate::{EvidenceError, Result};

/// In-memory [`EvidenceStore`].
#[derive(Debug, Default)]
pub struct InMemoryEvidenceStore {
    inner: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<EvidenceId, EvidenceRecord>,
    by_hash: HashMap<Hash256, EvidenceId>,
}

impl InMemoryEvidenceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvidenceStore for InMemoryEvidenceStore {
    async fn insert_if_absent(&self, record: &EvidenceRecord) -> Result<bool> {
        let mut state = self.inner.write().await;
        if state.by_hash.contains_key(&record.content_hash) {
            return Ok(false);
        }
        state.by_hash.insert(record.content_hash.clone(), record.id);
        state.records.insert(record.id, record.clone());
        Ok(true)
    }

    async fn get(&self, id: &EvidenceId) -> Result<Option<EvidenceRecord>> {
        Ok(self.inner.read().await.records.get(id).cloned())
    }

    async fn find_by_hash(&self, hash: &Hash256) -> Result<Option<EvidenceRecord>> {
        let state = self.inner.read().await;
        Ok(state
            .by_hash
            .get(hash)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn list_for_identity(&self, owner: &IdentityId) -> Result<Vec<EvidenceRecord>> {
        let state = self.inner.read().await;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.owner == *owner)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.submitted_at);
        Ok(records)
    }

    async fn update_if_version(&self, record: &EvidenceRecord, expected_version: u64) -> Result<bool> {
        let mut state = self.inner.write().await;
        match state.records.get_mut(&record.id) {
            Some(current) if current.version == expected_version => {
                let mut next = record.clone();
                next.version = expected_version + 1;
                *current = next;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EvidenceError::NotFound(record.id.to_hex())),
        }
    }
}

/// In-memory [`BlobStore`] issuing `mem://` URLs.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    next: AtomicU64,
}

impl InMemoryBlobStore {
    /// Create an empty blob store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, bytes: &[u8], _content_type: &str) -> Result<String> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let url = format!("mem://blob/{}", n);
        self.blobs.write().await.insert(url.clone(), bytes.to_vec());
        Ok(url)
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| EvidenceError::NotFound(url.to_string()))
    }
}

/// An [`EvidenceExtractor`] returning a preset result per kind.
#[derive(Debug, Default)]
pub struct FixedExtractor {
    results: RwLock<HashMap<EvidenceKind, Extraction>>,
}

impl FixedExtractor {
    /// Create an extractor that fails every kind until configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the result returned for `kind`.
    pub async fn set(&self, kind: EvidenceKind, extraction: Extraction) {
        self.results.write().await.insert(kind, extraction);
    }
}

#[async_trait]
impl EvidenceExtractor for FixedExtractor {
    async fn extract(&self, kind: EvidenceKind, _content: &EvidenceContent) -> Result<Extraction> {
        Ok(self
            .results
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_else(Extraction::failed))
    }
}
