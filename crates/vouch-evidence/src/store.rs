//! Evidence repository boundary.

use async_trait::async_trait;
use tracing::info;
use vouch_crypto::Hash256;
use vouch_identity::IdentityId;

use crate::record::{EvidenceId, EvidenceRecord, EvidenceState};
use crate::{EvidenceError, Result};

/// Conditional-write retries for state changes.
const MAX_STATE_RETRIES: usize = 8;

/// Persistence contract for evidence records.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Insert `record` unless a record with the same content hash exists.
    ///
    /// Returns `false` if the hash is already taken. Must be atomic with
    /// respect to the hash so two identical submissions cannot both win.
    async fn insert_if_absent(&self, record: &EvidenceRecord) -> Result<bool>;

    /// Load a record by id.
    async fn get(&self, id: &EvidenceId) -> Result<Option<EvidenceRecord>>;

    /// Load the record holding a content hash.
    async fn find_by_hash(&self, hash: &Hash256) -> Result<Option<EvidenceRecord>>;

    /// Every record submitted by `owner`.
    async fn list_for_identity(&self, owner: &IdentityId) -> Result<Vec<EvidenceRecord>>;

    /// Write `record` if the stored version equals `expected_version`.
    async fn update_if_version(&self, record: &EvidenceRecord, expected_version: u64) -> Result<bool>;
}

/// Change a record's state and fraud flag, the only mutation a record allows.
///
/// Retries on version conflicts. Setting the current values is a no-op that
/// returns the stored record.
pub async fn set_evidence_state(
    store: &dyn EvidenceStore,
    id: &EvidenceId,
    state: EvidenceState,
    fraud: bool,
) -> Result<EvidenceRecord> {
    for _ in 0..MAX_STATE_RETRIES {
        let mut record = store
            .get(id)
            .await?
            .ok_or_else(|| EvidenceError::NotFound(id.to_hex()))?;
        if record.state == state && record.fraud == fraud {
            return Ok(record);
        }
        let expected = record.version;
        record.state = state;
        record.fraud = fraud;
        if store.update_if_version(&record, expected).await? {
            record.version = expected + 1;
            info!(evidence = %id, state = ?state, fraud, "evidence state changed");
            return Ok(record);
        }
    }
    Err(EvidenceError::Conflict(format!("evidence {} kept changing", id)))
}
