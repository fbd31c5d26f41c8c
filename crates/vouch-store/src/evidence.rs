//! Evidence records and uploaded files on sled.

use async_trait::async_trait;
use sled::Transactional;
use vouch_crypto::Hash256;
use vouch_evidence::{BlobStore, EvidenceError, EvidenceId, EvidenceRecord, EvidenceStore, Result};
use vouch_identity::IdentityId;

use crate::codec::{decode, load_indexed, owned_key, settle, txn_encode, update_if_version};
use crate::sled_store::SledStore;
use crate::StoreError;

/// URL scheme of blobs kept in the store itself.
pub const BLOB_URL_PREFIX: &str = "sled://blob/";

#[async_trait]
impl EvidenceStore for SledStore {
    async fn insert_if_absent(&self, record: &EvidenceRecord) -> Result<bool> {
        let id_key = record.id.as_bytes();
        let hash_key = record.content_hash.as_bytes();
        let owner_key = owned_key(record.owner.as_bytes(), record.submitted_at, id_key);
        let result = (&self.evidence, &self.evidence_hashes, &self.evidence_by_owner).transaction(
            |(rows, hashes, owners)| {
                if hashes.get(hash_key)?.is_some() {
                    return Ok(false);
                }
                hashes.insert(hash_key.as_slice(), id_key.as_slice())?;
                owners.insert(owner_key.as_slice(), &b""[..])?;
                rows.insert(id_key.as_slice(), txn_encode::<_, EvidenceError>(record)?)?;
                Ok(true)
            },
        );
        settle(result)
    }

    async fn get(&self, id: &EvidenceId) -> Result<Option<EvidenceRecord>> {
        match self.evidence.get(id.as_bytes()).map_err(StoreError::from)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_hash(&self, hash: &Hash256) -> Result<Option<EvidenceRecord>> {
        let Some(id) = self
            .evidence_hashes
            .get(hash.as_bytes())
            .map_err(StoreError::from)?
        else {
            return Ok(None);
        };
        let id = EvidenceId::from_slice(&id)
            .map_err(|e| StoreError::Corruption(format!("evidence hash index: {}", e)))?;
        EvidenceStore::get(self, &id).await
    }

    async fn list_for_identity(&self, owner: &IdentityId) -> Result<Vec<EvidenceRecord>> {
        Ok(load_indexed(
            &self.evidence_by_owner,
            owner.as_bytes(),
            &self.evidence,
            EvidenceId::SIZE,
        )?)
    }

    async fn update_if_version(&self, record: &EvidenceRecord, expected_version: u64) -> Result<bool> {
        update_if_version(&self.evidence, record.id.as_bytes(), record, expected_version)?
            .ok_or_else(|| EvidenceError::NotFound(record.id.to_hex()))
    }
}

/// Content-addressed files in the store. Identical uploads share one blob.
#[async_trait]
impl BlobStore for SledStore {
    async fn put(&self, bytes: &[u8], _content_type: &str) -> Result<String> {
        let digest = Hash256::hash(bytes);
        self.blobs
            .insert(digest.as_bytes(), bytes)
            .map_err(StoreError::from)?;
        Ok(format!("{}{}", BLOB_URL_PREFIX, digest.to_hex()))
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let digest = url
            .strip_prefix(BLOB_URL_PREFIX)
            .and_then(|hex| Hash256::from_hex(hex).ok())
            .ok_or_else(|| EvidenceError::NotFound(url.to_string()))?;
        self.blobs
            .get(digest.as_bytes())
            .map_err(StoreError::from)?
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| EvidenceError::NotFound(url.to_string()))
    }
}
