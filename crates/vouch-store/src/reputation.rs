//! Risk signals, reports, mutual verifications and score snapshots on sled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sled::Transactional;
use vouch_identity::IdentityId;
use vouch_reputation::{
    MutualVerification, Report, ReportAdmission, ReportId, ReportStore, ReputationError, Result,
    RiskSignal, SignalId, SignalStore, SnapshotId, SnapshotStore, TrustScoreSnapshot,
    VerificationId, VerificationStore,
};

use crate::codec::{
    decode, key, load_indexed, owned_key, settle, txn_encode, update_if_version,
};
use crate::sled_store::SledStore;
use crate::StoreError;

fn fingerprint_key(signal: &RiskSignal) -> Vec<u8> {
    key(&[signal.identity.as_bytes().as_slice(), signal.fingerprint.as_bytes()])
}

#[async_trait]
impl SignalStore for SledStore {
    async fn append_if_new(&self, signal: &RiskSignal) -> Result<bool> {
        let id_key = signal.id.as_bytes();
        let dedup_key = fingerprint_key(signal);
        let index_key = owned_key(signal.identity.as_bytes(), signal.created_at, id_key);
        let result = (
            &self.signals,
            &self.signal_fingerprints,
            &self.signals_by_identity,
        )
            .transaction(|(rows, fingerprints, index)| {
                if fingerprints.get(dedup_key.as_slice())?.is_some() {
                    return Ok(false);
                }
                fingerprints.insert(dedup_key.as_slice(), id_key.as_slice())?;
                index.insert(index_key.as_slice(), &b""[..])?;
                rows.insert(id_key.as_slice(), txn_encode::<_, ReputationError>(signal)?)?;
                Ok(true)
            });
        settle(result)
    }

    async fn get(&self, id: &SignalId) -> Result<Option<RiskSignal>> {
        match self.signals.get(id.as_bytes()).map_err(StoreError::from)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_for_identity(&self, identity: &IdentityId) -> Result<Vec<RiskSignal>> {
        Ok(load_indexed(
            &self.signals_by_identity,
            identity.as_bytes(),
            &self.signals,
            SignalId::SIZE,
        )?)
    }

    async fn update_if_version(&self, signal: &RiskSignal, expected_version: u64) -> Result<bool> {
        update_if_version(&self.signals, signal.id.as_bytes(), signal, expected_version)?
            .ok_or_else(|| ReputationError::NotFound(format!("signal {}", signal.id)))
    }
}

#[async_trait]
impl ReportStore for SledStore {
    async fn insert_within_limit(
        &self,
        report: &Report,
        limit: usize,
        since: DateTime<Utc>,
    ) -> Result<ReportAdmission> {
        let _admission = self
            .report_admission
            .lock()
            .map_err(|_| ReputationError::Storage("report admission lock poisoned".to_string()))?;

        let filed: Vec<Report> = load_indexed(
            &self.reports_by_reporter,
            report.reporter.as_bytes(),
            &self.reports,
            ReportId::SIZE,
        )?;
        let recent: Vec<DateTime<Utc>> = filed
            .iter()
            .map(|r| r.filed_at)
            .filter(|at| *at > since)
            .collect();
        if recent.len() >= limit {
            let oldest = recent.iter().min().copied().unwrap_or(report.filed_at);
            return Ok(ReportAdmission::Limited { oldest });
        }

        let id_key = report.id.as_bytes();
        let by_reporter = owned_key(report.reporter.as_bytes(), report.filed_at, id_key);
        let against = owned_key(report.reported.as_bytes(), report.filed_at, id_key);
        let result = (&self.reports, &self.reports_by_reporter, &self.reports_against)
            .transaction(|(rows, reporters, targets)| {
                if rows.get(id_key)?.is_some() {
                    return sled::transaction::abort(ReputationError::Conflict(format!(
                        "report {} already exists",
                        report.id
                    )));
                }
                rows.insert(id_key.as_slice(), txn_encode::<_, ReputationError>(report)?)?;
                reporters.insert(by_reporter.as_slice(), &b""[..])?;
                targets.insert(against.as_slice(), &b""[..])?;
                Ok(())
            });
        settle(result)?;
        Ok(ReportAdmission::Accepted)
    }

    async fn get(&self, id: &ReportId) -> Result<Option<Report>> {
        match self.reports.get(id.as_bytes()).map_err(StoreError::from)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update_if_version(&self, report: &Report, expected_version: u64) -> Result<bool> {
        update_if_version(&self.reports, report.id.as_bytes(), report, expected_version)?
            .ok_or_else(|| ReputationError::NotFound(format!("report {}", report.id)))
    }

    async fn list_against(&self, identity: &IdentityId) -> Result<Vec<Report>> {
        Ok(load_indexed(
            &self.reports_against,
            identity.as_bytes(),
            &self.reports,
            ReportId::SIZE,
        )?)
    }

    async fn list_by_reporter(&self, identity: &IdentityId) -> Result<Vec<Report>> {
        Ok(load_indexed(
            &self.reports_by_reporter,
            identity.as_bytes(),
            &self.reports,
            ReportId::SIZE,
        )?)
    }
}

#[async_trait]
impl VerificationStore for SledStore {
    async fn insert(&self, verification: &MutualVerification) -> Result<()> {
        let id_key = verification.id.as_bytes();
        let parties = [verification.initiator, verification.counterpart].map(|party| {
            owned_key(party.as_bytes(), verification.created_at, id_key)
        });
        let result = (&self.verifications, &self.verifications_by_party).transaction(
            |(rows, index)| {
                if rows.get(id_key)?.is_some() {
                    return sled::transaction::abort(ReputationError::Conflict(format!(
                        "verification {} already exists",
                        verification.id
                    )));
                }
                rows.insert(
                    id_key.as_slice(),
                    txn_encode::<_, ReputationError>(verification)?,
                )?;
                for k in &parties {
                    index.insert(k.as_slice(), &b""[..])?;
                }
                Ok(())
            },
        );
        settle(result)
    }

    async fn get(&self, id: &VerificationId) -> Result<Option<MutualVerification>> {
        match self.verifications.get(id.as_bytes()).map_err(StoreError::from)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update_if_version(
        &self,
        verification: &MutualVerification,
        expected_version: u64,
    ) -> Result<bool> {
        update_if_version(
            &self.verifications,
            verification.id.as_bytes(),
            verification,
            expected_version,
        )?
        .ok_or_else(|| ReputationError::NotFound(format!("verification {}", verification.id)))
    }

    async fn list_for_identity(&self, identity: &IdentityId) -> Result<Vec<MutualVerification>> {
        Ok(load_indexed(
            &self.verifications_by_party,
            identity.as_bytes(),
            &self.verifications,
            VerificationId::SIZE,
        )?)
    }
}

/// Snapshots are keyed `identity ++ time ++ snapshot id`, so a reverse prefix
/// scan yields an identity's history newest first.
#[async_trait]
impl SnapshotStore for SledStore {
    async fn append(&self, snapshot: &TrustScoreSnapshot) -> Result<bool> {
        let row_key = owned_key(
            snapshot.identity.as_bytes(),
            snapshot.created_at,
            snapshot.id.as_bytes(),
        );
        let period_key = snapshot
            .period
            .as_ref()
            .map(|p| key(&[snapshot.identity.as_bytes().as_slice(), p.as_bytes()]));
        let result = (&self.snapshots, &self.snapshot_periods).transaction(|(rows, periods)| {
            if let Some(period_key) = &period_key {
                if periods.get(period_key.as_slice())?.is_some() {
                    return Ok(false);
                }
                periods.insert(period_key.as_slice(), snapshot.id.as_bytes().as_slice())?;
            }
            rows.insert(row_key.as_slice(), txn_encode::<_, ReputationError>(snapshot)?)?;
            Ok(true)
        });
        settle(result)
    }

    async fn list_for_identity(
        &self,
        identity: &IdentityId,
        limit: usize,
    ) -> Result<Vec<TrustScoreSnapshot>> {
        let mut out = Vec::with_capacity(limit.min(64));
        for entry in self.snapshots.scan_prefix(identity.as_bytes()).rev().take(limit) {
            let (_, bytes) = entry.map_err(StoreError::from)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }
}

impl SledStore {
    /// Number of snapshots recorded for `identity`.
    pub fn snapshot_count(&self, identity: &IdentityId) -> usize {
        self.snapshots.scan_prefix(identity.as_bytes()).count()
    }

    /// Look up a snapshot id by identity and ISO week.
    pub fn snapshot_for_period(&self, identity: &IdentityId, period: &str) -> Result<Option<SnapshotId>> {
        let k = key(&[identity.as_bytes().as_slice(), period.as_bytes()]);
        match self.snapshot_periods.get(k).map_err(StoreError::from)? {
            Some(id) => Ok(Some(SnapshotId::from_slice(&id).map_err(|e| {
                StoreError::Corruption(format!("snapshot period index: {}", e))
            })?)),
            None => Ok(None),
        }
    }
}
