//! # vouch-reputation
//!
//! Risk and reputation for the vouch trust core.
//!
//! This crate provides:
//! - **RiskEngine**: independent detectors producing fingerprinted risk
//!   signals and a composite 0–100 risk score
//! - **CollusionDetector**: pair and ring analysis over confirmed
//!   mutual verifications
//! - **MutualVerificationService**: the two-party confirmation state machine
//! - **ReportPipeline**: rate-limited abuse reports and their review
//! - **TrustScoreAggregator**: the 0–1000 trust score and its snapshot history
//!
//! ## Anti-Gaming Measures
//!
//! - Self-verification and self-reports are rejected outright
//! - Reciprocal or repeated-amount confirmations between one pair are blocked
//! - Dense, symmetric verification rings raise collusion signals and block
//!   their members' pending verifications
//! - 5 reports per reporter in any rolling 24h window

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod collusion;
pub mod detectors;
pub mod error;
pub mod memory;
pub mod report;
pub mod risk;
pub mod score;
pub mod signal;
pub mod store;
pub mod verification;

#[cfg(test)]
mod testkit;

pub use aggregator::{RecalcOutcome, TrustScoreAggregator, DEFAULT_HISTORY_LIMIT};
pub use collusion::{CollusionDetector, PairFinding, PairPolicy, SuspiciousCluster};
pub use detectors::{DetectorPolicy, RiskContext};
pub use error::{ReputationError, Result};
pub use memory::{
    InMemoryReportStore, InMemorySignalStore, InMemorySnapshotStore, InMemoryVerificationStore,
};
pub use report::{
    Report, ReportAdmission, ReportCategory, ReportDraft, ReportId, ReportPipeline, ReportPolicy,
    ReportStatus, ReviewOutcome,
};
pub use risk::{composite_score, RiskAssessment, RiskEngine, RiskPolicy, RiskProfile};
pub use score::{
    compute, iso_week_period, RecalcTrigger, ScoreBreakdown, ScoreInputs, ScorePolicy,
    SnapshotId, TrustScore, TrustScoreSnapshot, TrustTier,
};
pub use signal::{RiskKind, RiskSignal, SignalCandidate, SignalId};
pub use store::{ReportStore, ReputationStores, SignalStore, SnapshotStore, VerificationStore};
pub use verification::{
    Decision, MutualVerification, MutualVerificationService, ResponseOutcome, TransactionRole,
    VerificationDraft, VerificationId, VerificationPolicy, VerificationStatus,
};
