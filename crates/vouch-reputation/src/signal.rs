//! Risk signals.
//!
//! Signals are append-only. Resolution flips a flag and records who resolved
//! it; nothing is ever deleted. Each signal carries a fingerprint that is
//! unique per identity, which makes repeated evaluation idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vouch_crypto::define_id;
use vouch_identity::IdentityId;

define_id!(
    /// Risk signal primary key.
    SignalId
);

/// Highest severity.
pub const MAX_SEVERITY: u8 = 10;

/// Kind of anomaly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    /// Fraud-flagged or repeatedly rejected evidence.
    FakeEvidence,
    /// Suspicious verification patterns with other accounts.
    Collusion,
    /// Sessions from devices and networks unlike the signup one.
    DeviceMismatch,
    /// Burst of accounts created from the same network.
    RapidAccountCreation,
    /// A report against the identity was verified.
    Reported,
    /// A linked profile belongs to someone else.
    ProfileMismatch,
    /// Another account shares the signup device.
    DuplicateAccount,
}

impl RiskKind {
    /// Weight in the composite risk score.
    pub fn weight(&self) -> f32 {
        match self {
            RiskKind::FakeEvidence => 3.0,
            RiskKind::Collusion => 3.0,
            RiskKind::Reported => 2.5,
            RiskKind::DuplicateAccount => 2.5,
            RiskKind::ProfileMismatch => 2.0,
            RiskKind::RapidAccountCreation => 2.0,
            RiskKind::DeviceMismatch => 1.5,
        }
    }

    /// Stable snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskKind::FakeEvidence => "fake_evidence",
            RiskKind::Collusion => "collusion",
            RiskKind::DeviceMismatch => "device_mismatch",
            RiskKind::RapidAccountCreation => "rapid_account_creation",
            RiskKind::Reported => "reported",
            RiskKind::ProfileMismatch => "profile_mismatch",
            RiskKind::DuplicateAccount => "duplicate_account",
        }
    }
}

impl std::fmt::Display for RiskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detector finding before it is stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalCandidate {
    /// Kind.
    pub kind: RiskKind,
    /// Severity, clamped to 1..=10 on storage.
    pub severity: u8,
    /// Unique per identity; a second candidate with the same fingerprint is dropped.
    pub fingerprint: String,
    /// Human-readable detail for reviewers.
    pub detail: String,
}

impl SignalCandidate {
    /// Create a candidate.
    pub fn new(kind: RiskKind, severity: u8, fingerprint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            fingerprint: fingerprint.into(),
            detail: detail.into(),
        }
    }
}

/// A stored risk signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSignal {
    /// Primary key.
    pub id: SignalId,
    /// Identity the signal is about.
    pub identity: IdentityId,
    /// Kind.
    pub kind: RiskKind,
    /// Severity, 1..=10.
    pub severity: u8,
    /// Deduplication key.
    pub fingerprint: String,
    /// Reviewer-facing detail.
    pub detail: String,
    /// Whether a reviewer resolved it.
    pub resolved: bool,
    /// Who resolved it.
    pub resolved_by: Option<IdentityId>,
    /// When it was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// When it was raised.
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency version.
    pub version: u64,
}

impl RiskSignal {
    /// Materialize a candidate for `identity`.
    pub fn from_candidate(identity: IdentityId, candidate: SignalCandidate, now: DateTime<Utc>) -> Self {
        Self {
            id: SignalId::generate(),
            identity,
            kind: candidate.kind,
            severity: candidate.severity.clamp(1, MAX_SEVERITY),
            fingerprint: candidate.fingerprint,
            detail: candidate.detail,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            version: 0,
        }
    }

    /// Weighted contribution to the composite score.
    pub fn weighted(&self) -> f32 {
        f32::from(self.severity) * self.kind.weight()
    }
}
