//! In-memory repositories for tests and development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use vouch_identity::IdentityId;

use crate::report::{Report, ReportAdmission, ReportId};
use crate::score::TrustScoreSnapshot;
use crate::signal::{RiskSignal, SignalId};
use crate::store::{ReportStore, SignalStore, SnapshotStore, VerificationStore};
use crate::verification::{MutualVerification, VerificationId};
use crate::{ReputationError, Result};

/// In-memory [`SignalStore`].
#[derive(Debug, Default)]
pub struct InMemorySignalStore {
    signals: RwLock<Vec<RiskSignal>>,
}

impl InMemorySignalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn append_if_new(&self, signal: &RiskSignal) -> Result<bool> {
        let mut signals = self.signals.write().await;
        if signals
            .iter()
            .any(|s| s.identity == signal.identity && s.fingerprint == signal.fingerprint)
        {
            return Ok(false);
        }
        signals.push(signal.clone());
        Ok(true)
    }

    async fn get(&self, id: &SignalId) -> Result<Option<RiskSignal>> {
        Ok(self.signals.read().await.iter().find(|s| s.id == *id).cloned())
    }

    async fn list_for_identity(&self, identity: &IdentityId) -> Result<Vec<RiskSignal>> {
        Ok(self
            .signals
            .read()
            .await
            .iter()
            .filter(|s| s.identity == *identity)
            .cloned()
            .collect())
    }

    async fn update_if_version(&self, signal: &RiskSignal, expected_version: u64) -> Result<bool> {
        let mut signals = self.signals.write().await;
        let current = signals
            .iter_mut()
            .find(|s| s.id == signal.id)
            .ok_or_else(|| ReputationError::NotFound(format!("signal {}", signal.id)))?;
        if current.version != expected_version {
            return Ok(false);
        }
        let mut next = signal.clone();
        next.version = expected_version + 1;
        *current = next;
        Ok(true)
    }
}

/// In-memory [`ReportStore`].
///
/// A single mutex covers the limit check and the insert.
#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    reports: Mutex<HashMap<ReportId, Report>>,
}

impl InMemoryReportStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn insert_within_limit(
        &self,
        report: &Report,
        limit: usize,
        since: DateTime<Utc>,
    ) -> Result<ReportAdmission> {
        let mut reports = self.reports.lock().await;
        let mut recent: Vec<DateTime<Utc>> = reports
            .values()
            .filter(|r| r.reporter == report.reporter && r.filed_at > since)
            .map(|r| r.filed_at)
            .collect();
        if recent.len() >= limit {
            recent.sort();
            let oldest = recent.first().copied().unwrap_or(report.filed_at);
            return Ok(ReportAdmission::Limited { oldest });
        }
        reports.insert(report.id, report.clone());
        Ok(ReportAdmission::Accepted)
    }

    async fn get(&self, id: &ReportId) -> Result<Option<Report>> {
        Ok(self.reports.lock().await.get(id).cloned())
    }

    async fn update_if_version(&self, report: &Report, expected_version: u64) -> Result<bool> {
        let mut reports = self.reports.lock().await;
        match reports.get_mut(&report.id) {
            Some(current) if current.version == expected_version => {
                let mut next = report.clone();
                next.version = expected_version + 1;
                *current = next;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ReputationError::NotFound(format!("report {}", report.id))),
        }
    }

    async fn list_against(&self, identity: &IdentityId) -> Result<Vec<Report>> {
        let reports = self.reports.lock().await;
        let mut found: Vec<_> = reports
            .values()
            .filter(|r| r.reported == *identity)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.filed_at);
        Ok(found)
    }

    async fn list_by_reporter(&self, identity: &IdentityId) -> Result<Vec<Report>> {
        let reports = self.reports.lock().await;
        let mut found: Vec<_> = reports
            .values()
            .filter(|r| r.reporter == *identity)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.filed_at);
        Ok(found)
    }
}

/// In-memory [`VerificationStore`].
#[derive(Debug, Default)]
pub struct InMemoryVerificationStore {
    records: RwLock<HashMap<VerificationId, MutualVerification>>,
}

impl InMemoryVerificationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn insert(&self, verification: &MutualVerification) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&verification.id) {
            return Err(ReputationError::Conflict(format!(
                "verification {} already exists",
                verification.id
            )));
        }
        records.insert(verification.id, verification.clone());
        Ok(())
    }

    async fn get(&self, id: &VerificationId) -> Result<Option<MutualVerification>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn update_if_version(
        &self,
        verification: &MutualVerification,
        expected_version: u64,
    ) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&verification.id) {
            Some(current) if current.version == expected_version => {
                let mut next = verification.clone();
                next.version = expected_version + 1;
                *current = next;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ReputationError::NotFound(format!(
                "verification {}",
                verification.id
            ))),
        }
    }

    async fn list_for_identity(&self, identity: &IdentityId) -> Result<Vec<MutualVerification>> {
        let records = self.records.read().await;
        let mut found: Vec<_> = records
            .values()
            .filter(|v| v.involves(identity))
            .cloned()
            .collect();
        found.sort_by_key(|v| v.created_at);
        Ok(found)
    }
}

/// In-memory [`SnapshotStore`].
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<IdentityId, Vec<TrustScoreSnapshot>>>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total snapshots across identities.
    pub async fn len(&self) -> usize {
        self.snapshots.read().await.values().map(Vec::len).sum()
    }

    /// Whether no snapshot was written.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn append(&self, snapshot: &TrustScoreSnapshot) -> Result<bool> {
        let mut snapshots = self.snapshots.write().await;
        let history = snapshots.entry(snapshot.identity).or_default();
        if snapshot.period.is_some() && history.iter().any(|s| s.period == snapshot.period) {
            return Ok(false);
        }
        history.push(snapshot.clone());
        Ok(true)
    }

    async fn list_for_identity(
        &self,
        identity: &IdentityId,
        limit: usize,
    ) -> Result<Vec<TrustScoreSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(identity)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
