//! Risk engine.
//!
//! `evaluate` gathers one identity's data, runs every detector, appends the
//! new signals and recomputes the composite 0–100 risk score. A new
//! fake-evidence or collusion ring signal downgrades the identity's evidence:
//! fraud-flagged records become Rejected and Valid ones Suspicious. A score at
//! or above the review threshold moves an Active account to UnderReview; the
//! engine never suspends anyone.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vouch_evidence::{set_evidence_state, EvidenceRecord, EvidenceState};
use vouch_identity::{modify_identity, AccountStatus, Clock, Identity, IdentityId};

use crate::collusion::CollusionDetector;
use crate::detectors::{run_all, DetectorPolicy, RiskContext};
use crate::signal::{RiskKind, RiskSignal, SignalCandidate, SignalId};
use crate::store::ReputationStores;
use crate::verification::block_pending;
use crate::{ReputationError, Result};

/// Raw weighted sum up to which the composite score grows linearly.
pub const COMPOSITE_KNEE: f32 = 60.0;

/// Highest composite risk score.
pub const MAX_RISK_SCORE: u8 = 100;

/// Default score that sends an account to review.
pub const DEFAULT_REVIEW_THRESHOLD: u8 = 70;

/// Maximum attempts for a conditional signal write.
const MAX_SIGNAL_RETRIES: usize = 8;

/// Risk engine configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RiskPolicy {
    /// Composite score that moves an Active account to UnderReview.
    pub review_threshold: u8,
    /// Detector thresholds.
    pub detectors: DetectorPolicy,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
            detectors: DetectorPolicy::default(),
        }
    }
}

/// Result of one evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Evaluated identity.
    pub identity: IdentityId,
    /// Composite score after the evaluation.
    pub score: u8,
    /// Signals appended by this evaluation.
    pub new_signals: Vec<RiskSignal>,
    /// Unresolved signals counted in the score.
    pub unresolved: usize,
    /// Whether this evaluation moved the account to UnderReview.
    pub moved_to_review: bool,
}

/// Reviewer view of an identity's risk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskProfile {
    /// Identity.
    pub identity: IdentityId,
    /// Account status.
    pub status: AccountStatus,
    /// Composite score.
    pub score: u8,
    /// Every signal, resolved or not, oldest first.
    pub signals: Vec<RiskSignal>,
}

impl RiskProfile {
    /// Signals still counted in the score.
    pub fn unresolved(&self) -> impl Iterator<Item = &RiskSignal> {
        self.signals.iter().filter(|s| !s.resolved)
    }
}

/// Composite risk score over `signals`, ignoring resolved ones.
///
/// Linear up to [`COMPOSITE_KNEE`], half slope above it, clamped to
/// [`MAX_RISK_SCORE`].
pub fn composite_score(signals: &[RiskSignal]) -> u8 {
    let raw: f32 = signals
        .iter()
        .filter(|s| !s.resolved)
        .map(RiskSignal::weighted)
        .sum();
    let scaled = if raw <= COMPOSITE_KNEE {
        raw
    } else {
        COMPOSITE_KNEE + (raw - COMPOSITE_KNEE) / 2.0
    };
    scaled.round().clamp(0.0, f32::from(MAX_RISK_SCORE)) as u8
}

/// Evaluates risk signals for identities.
pub struct RiskEngine {
    stores: ReputationStores,
    clock: Arc<dyn Clock>,
    policy: RiskPolicy,
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RiskEngine {
    /// Create an engine.
    pub fn new(stores: ReputationStores, clock: Arc<dyn Clock>, policy: RiskPolicy) -> Self {
        Self {
            stores,
            clock,
            policy,
        }
    }

    /// Configured policy.
    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Run every detector for `identity` and update its composite score.
    ///
    /// # Errors
    ///
    /// Returns `ReputationError::NotFound` for an unknown identity.
    pub async fn evaluate(&self, identity: &IdentityId) -> Result<RiskAssessment> {
        let subject = self.load_identity(identity).await?;
        let now = self.clock.now();

        let evidence = self.stores.evidence.list_for_identity(identity).await?;
        let sessions = self.stores.sessions.list_for_identity(identity).await?;
        let reports_against = self.stores.reports.list_against(identity).await?;
        let verifications = self.stores.verifications.list_for_identity(identity).await?;
        let signup_peers = match subject.signup.device.as_ref() {
            Some(device) => {
                self.stores
                    .directory
                    .find_by_signup(&device.device_id, device.ip)
                    .await?
            }
            None => Vec::new(),
        };

        let mut detector = self.neighborhood_graph(identity, &verifications).await?;
        detector.analyze_clusters(now);
        let ring = detector.cluster_for(identity);

        let ctx = RiskContext {
            identity: &subject,
            evidence: &evidence,
            sessions: &sessions,
            reports_against: &reports_against,
            verifications: &verifications,
            signup_peers: &signup_peers,
            ring,
            now,
        };
        let candidates = run_all(&ctx, &self.policy.detectors);
        let ring_detected = ring.is_some();

        let mut new_signals = Vec::new();
        for candidate in candidates {
            if let Some(signal) = self.raise(identity, candidate).await? {
                new_signals.push(signal);
            }
        }

        let ring_raised =
            ring_detected && new_signals.iter().any(|s| s.fingerprint == "collusion:ring");
        if ring_raised {
            let blocked =
                block_pending(&self.stores, identity, "member of a collusion ring", now).await?;
            if blocked > 0 {
                warn!(identity = %identity, blocked, "blocked pending verifications of ring member");
            }
        }
        if ring_raised || new_signals.iter().any(|s| s.kind == RiskKind::FakeEvidence) {
            let downgraded = self.downgrade_evidence(&evidence).await?;
            if downgraded > 0 {
                warn!(identity = %identity, downgraded, "evidence downgraded after fraud signal");
            }
        }

        let signals = self.stores.signals.list_for_identity(identity).await?;
        let score = composite_score(&signals);
        let unresolved = signals.iter().filter(|s| !s.resolved).count();
        let moved_to_review = if score >= self.policy.review_threshold {
            self.send_to_review(identity).await?
        } else {
            false
        };

        debug!(
            identity = %identity,
            score,
            unresolved,
            new = new_signals.len(),
            "risk evaluated"
        );
        Ok(RiskAssessment {
            identity: *identity,
            score,
            new_signals,
            unresolved,
            moved_to_review,
        })
    }

    /// Append a signal for `identity` unless one with the same fingerprint
    /// already exists. Returns the new signal.
    pub async fn raise(
        &self,
        identity: &IdentityId,
        candidate: SignalCandidate,
    ) -> Result<Option<RiskSignal>> {
        let signal = RiskSignal::from_candidate(*identity, candidate, self.clock.now());
        if !self.stores.signals.append_if_new(&signal).await? {
            return Ok(None);
        }
        match signal.kind {
            RiskKind::Collusion | RiskKind::FakeEvidence | RiskKind::ProfileMismatch => {
                warn!(
                    identity = %identity,
                    kind = signal.kind.as_str(),
                    severity = signal.severity,
                    "risk signal raised"
                );
            }
            _ => {
                info!(
                    identity = %identity,
                    kind = signal.kind.as_str(),
                    severity = signal.severity,
                    "risk signal raised"
                );
            }
        }
        Ok(Some(signal))
    }

    /// Mark a signal resolved. Resolving twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ReputationError::NotFound` for an unknown signal.
    pub async fn resolve_signal(
        &self,
        id: &SignalId,
        resolver: &IdentityId,
    ) -> Result<RiskSignal> {
        for _ in 0..MAX_SIGNAL_RETRIES {
            let mut signal = self
                .stores
                .signals
                .get(id)
                .await?
                .ok_or_else(|| ReputationError::NotFound(format!("signal {}", id)))?;
            if signal.resolved {
                return Ok(signal);
            }
            let expected = signal.version;
            signal.resolved = true;
            signal.resolved_by = Some(*resolver);
            signal.resolved_at = Some(self.clock.now());
            if self.stores.signals.update_if_version(&signal, expected).await? {
                signal.version = expected + 1;
                info!(signal = %id, identity = %signal.identity, resolver = %resolver, "risk signal resolved");
                return Ok(signal);
            }
        }
        Err(ReputationError::Conflict(format!("signal {} kept changing", id)))
    }

    /// Current signals and score without running detectors.
    pub async fn profile(&self, identity: &IdentityId) -> Result<RiskProfile> {
        let subject = self.load_identity(identity).await?;
        let signals = self.stores.signals.list_for_identity(identity).await?;
        Ok(RiskProfile {
            identity: *identity,
            status: subject.status,
            score: composite_score(&signals),
            signals,
        })
    }

    async fn load_identity(&self, identity: &IdentityId) -> Result<Identity> {
        self.stores
            .directory
            .get(identity)
            .await?
            .ok_or_else(|| ReputationError::NotFound(format!("identity {}", identity)))
    }

    /// Interaction graph of `identity`, its counterparts and their counterparts.
    async fn neighborhood_graph(
        &self,
        identity: &IdentityId,
        own: &[crate::verification::MutualVerification],
    ) -> Result<CollusionDetector> {
        let neighbors: BTreeSet<IdentityId> =
            own.iter().filter_map(|v| v.other_party(identity)).collect();
        let mut records = own.to_vec();
        let mut seen: BTreeSet<_> = own.iter().map(|v| v.id).collect();
        for neighbor in &neighbors {
            for v in self.stores.verifications.list_for_identity(neighbor).await? {
                if seen.insert(v.id) {
                    records.push(v);
                }
            }
        }
        Ok(CollusionDetector::from_verifications(records.iter()))
    }

    /// Reject fraud-flagged records and mark Valid ones Suspicious.
    async fn downgrade_evidence(&self, evidence: &[EvidenceRecord]) -> Result<usize> {
        let store = self.stores.evidence.as_ref();
        let mut changed = 0;
        for listed in evidence {
            let Some(record) = store.get(&listed.id).await? else {
                continue;
            };
            let target = match record.state {
                EvidenceState::Rejected => continue,
                _ if record.fraud => EvidenceState::Rejected,
                EvidenceState::Valid => EvidenceState::Suspicious,
                EvidenceState::Suspicious => continue,
            };
            set_evidence_state(store, &record.id, target, record.fraud).await?;
            changed += 1;
        }
        Ok(changed)
    }

    async fn send_to_review(&self, identity: &IdentityId) -> Result<bool> {
        let mut moved = false;
        modify_identity(self.stores.directory.as_ref(), identity, |current| {
            moved = false;
            if current.status != AccountStatus::Active {
                return Ok(false);
            }
            current.status = current.status.transition(AccountStatus::UnderReview)?;
            moved = true;
            Ok(true)
        })
        .await?;
        if moved {
            warn!(identity = %identity, "account moved to review by risk score");
        }
        Ok(moved)
    }
}
