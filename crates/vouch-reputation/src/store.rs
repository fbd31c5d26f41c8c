//! Repository boundaries for reputation data.
//!
//! Every trait here is implemented in memory by [`crate::memory`] and on
//! disk by the `vouch-store` crate. Writes to mutable rows are conditional on
//! the row's `version`; limits and deduplication use atomic check-and-insert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vouch_auth::SessionStore;
use vouch_evidence::EvidenceStore;
use vouch_identity::{IdentityDirectory, IdentityId};

use crate::report::{Report, ReportAdmission, ReportId};
use crate::score::TrustScoreSnapshot;
use crate::signal::{RiskSignal, SignalId};
use crate::verification::{MutualVerification, VerificationId};
use crate::Result;

/// Risk signal storage.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Append `signal` unless the identity already has one with the same
    /// fingerprint. Returns `false` when it was a duplicate.
    async fn append_if_new(&self, signal: &RiskSignal) -> Result<bool>;

    /// Load a signal by id.
    async fn get(&self, id: &SignalId) -> Result<Option<RiskSignal>>;

    /// All signals about `identity`, oldest first.
    async fn list_for_identity(&self, identity: &IdentityId) -> Result<Vec<RiskSignal>>;

    /// Write `signal` if the stored version equals `expected_version`.
    async fn update_if_version(&self, signal: &RiskSignal, expected_version: u64) -> Result<bool>;
}

/// Abuse report storage.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert `report` if its reporter filed fewer than `limit` reports after
    /// `since`. The count and the insert must be atomic per reporter.
    async fn insert_within_limit(
        &self,
        report: &Report,
        limit: usize,
        since: DateTime<Utc>,
    ) -> Result<ReportAdmission>;

    /// Load a report by id.
    async fn get(&self, id: &ReportId) -> Result<Option<Report>>;

    /// Write `report` if the stored version equals `expected_version`.
    async fn update_if_version(&self, report: &Report, expected_version: u64) -> Result<bool>;

    /// Reports filed against `identity`.
    async fn list_against(&self, identity: &IdentityId) -> Result<Vec<Report>>;

    /// Reports filed by `identity`.
    async fn list_by_reporter(&self, identity: &IdentityId) -> Result<Vec<Report>>;
}

/// Mutual verification storage.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Insert a new record.
    async fn insert(&self, verification: &MutualVerification) -> Result<()>;

    /// Load a record by id.
    async fn get(&self, id: &VerificationId) -> Result<Option<MutualVerification>>;

    /// Write `verification` if the stored version equals `expected_version`.
    async fn update_if_version(
        &self,
        verification: &MutualVerification,
        expected_version: u64,
    ) -> Result<bool>;

    /// Records where `identity` is either party, oldest first.
    async fn list_for_identity(&self, identity: &IdentityId) -> Result<Vec<MutualVerification>>;
}

/// Trust score snapshot storage. Append-only.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append a snapshot. A snapshot with a period is dropped (returning
    /// `false`) when the identity already has one for that period.
    async fn append(&self, snapshot: &TrustScoreSnapshot) -> Result<bool>;

    /// Up to `limit` most recent snapshots, newest first.
    async fn list_for_identity(&self, identity: &IdentityId, limit: usize) -> Result<Vec<TrustScoreSnapshot>>;

    /// The most recent snapshot.
    async fn latest(&self, identity: &IdentityId) -> Result<Option<TrustScoreSnapshot>> {
        Ok(self.list_for_identity(identity, 1).await?.into_iter().next())
    }
}

/// Every repository the reputation services read or write.
#[derive(Clone)]
pub struct ReputationStores {
    /// Identities.
    pub directory: Arc<dyn IdentityDirectory>,
    /// Evidence records.
    pub evidence: Arc<dyn EvidenceStore>,
    /// Sessions.
    pub sessions: Arc<dyn SessionStore>,
    /// Risk signals.
    pub signals: Arc<dyn SignalStore>,
    /// Reports.
    pub reports: Arc<dyn ReportStore>,
    /// Mutual verifications.
    pub verifications: Arc<dyn VerificationStore>,
    /// Score snapshots.
    pub snapshots: Arc<dyn SnapshotStore>,
}

impl std::fmt::Debug for ReputationStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReputationStores").finish_non_exhaustive()
    }
}
