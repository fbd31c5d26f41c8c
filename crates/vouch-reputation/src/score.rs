//! Trust score computation.
//!
//! The score is a pure function of [`ScoreInputs`]: the same inputs always
//! give the same total. Three components are computed and clamped
//! independently, then summed:
//!
//! | component | max | sources |
//! |-----------|-----|---------|
//! | identity  | 250 | email, strong identity verification, second factor |
//! | evidence  | 400 | receipts, screenshots, linked profiles, confirmed peer verifications |
//! | behaviour | 350 | account age, login consistency, minus unresolved risk and verified reports |

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use vouch_auth::{week_index, Session};
use vouch_crypto::define_id;
use vouch_evidence::{EvidenceKind, EvidenceRecord, EvidenceState};
use vouch_identity::{Identity, IdentityId};

use crate::report::{Report, ReportStatus};
use crate::signal::RiskSignal;
use crate::verification::MutualVerification;

define_id!(
    /// Trust score snapshot primary key.
    SnapshotId
);

/// Score limits.
pub mod limits {
    /// Maximum identity component.
    pub const IDENTITY_MAX: u32 = 250;
    /// Maximum evidence component.
    pub const EVIDENCE_MAX: u32 = 400;
    /// Maximum behaviour component.
    pub const BEHAVIOUR_MAX: u32 = 350;
    /// Maximum total.
    pub const TOTAL_MAX: u32 = IDENTITY_MAX + EVIDENCE_MAX + BEHAVIOUR_MAX;
}

pub use limits::*;

/// Weeks looked back for login consistency.
pub const LOGIN_WINDOW_WEEKS: u32 = 12;

/// Point values. Defaults follow the canonical formula.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorePolicy {
    /// Verified email.
    pub email_verified: u32,
    /// Externally confirmed identity.
    pub identity_verified: u32,
    /// Second factor configured.
    pub second_factor: u32,
    /// Per Valid receipt.
    pub receipt: u32,
    /// Receipt cap.
    pub receipt_cap: u32,
    /// Per Valid screenshot.
    pub screenshot: u32,
    /// Screenshot cap.
    pub screenshot_cap: u32,
    /// Per verified profile link.
    pub verified_profile: u32,
    /// Per linked but unverified profile.
    pub linked_profile: u32,
    /// Profile cap.
    pub profile_cap: u32,
    /// Per confirmed mutual verification, to each party.
    pub peer_verification: u32,
    /// Peer verification cap.
    pub peer_verification_cap: u32,
    /// Account age asymptote.
    pub account_age_max: u32,
    /// Days at which account age reaches half its asymptote.
    pub account_age_half_days: u32,
    /// Login consistency at full activity.
    pub login_consistency_max: u32,
    /// Deduction per unresolved signal severity point.
    pub risk_penalty_per_severity: u32,
    /// Deduction per verified report.
    pub verified_report_penalty: u32,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self {
            email_verified: 50,
            identity_verified: 150,
            second_factor: 50,
            receipt: 20,
            receipt_cap: 160,
            screenshot: 10,
            screenshot_cap: 80,
            verified_profile: 40,
            linked_profile: 15,
            profile_cap: 120,
            peer_verification: 25,
            peer_verification_cap: 150,
            account_age_max: 200,
            account_age_half_days: 90,
            login_consistency_max: 150,
            risk_penalty_per_severity: 5,
            verified_report_penalty: 40,
        }
    }
}

/// The facts about one evidence record the score looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceFact {
    /// Kind.
    pub kind: EvidenceKind,
    /// State.
    pub state: EvidenceState,
    /// Profile ownership proven.
    pub verified_profile: bool,
}

impl From<&EvidenceRecord> for EvidenceFact {
    fn from(record: &EvidenceRecord) -> Self {
        Self {
            kind: record.kind,
            state: record.state,
            verified_profile: record.is_verified_profile(),
        }
    }
}

/// Everything a score depends on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreInputs {
    /// Email verified.
    pub email_verified: bool,
    /// Identity verified by the external provider.
    pub identity_verified: bool,
    /// Second factor configured.
    pub second_factor: bool,
    /// Evidence records.
    pub evidence: Vec<EvidenceFact>,
    /// Confirmed mutual verifications.
    pub confirmed_verifications: u32,
    /// Whole days since the account was created.
    pub account_age_days: u32,
    /// Weeks with a login among the last [`LOGIN_WINDOW_WEEKS`].
    pub active_weeks: u32,
    /// Severities of unresolved risk signals.
    pub unresolved_severities: Vec<u8>,
    /// Verified reports against the identity.
    pub verified_reports: u32,
}

impl ScoreInputs {
    /// Collect inputs from stored records.
    pub fn gather(
        identity: &Identity,
        evidence: &[EvidenceRecord],
        verifications: &[MutualVerification],
        sessions: &[Session],
        signals: &[RiskSignal],
        reports_against: &[Report],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            email_verified: identity.flags.email_verified,
            identity_verified: identity.flags.identity_verified,
            second_factor: identity.flags.second_factor,
            evidence: evidence.iter().map(EvidenceFact::from).collect(),
            confirmed_verifications: verifications
                .iter()
                .filter(|v| v.counts_as_confirmed() && v.involves(&identity.id))
                .count() as u32,
            account_age_days: identity.age_days(now),
            active_weeks: active_weeks(sessions, now),
            unresolved_severities: signals
                .iter()
                .filter(|s| !s.resolved)
                .map(|s| s.severity)
                .collect(),
            verified_reports: reports_against
                .iter()
                .filter(|r| r.status == ReportStatus::Verified)
                .count() as u32,
        }
    }
}

/// Distinct weeks with session activity among the last [`LOGIN_WINDOW_WEEKS`].
pub fn active_weeks(sessions: &[Session], now: DateTime<Utc>) -> u32 {
    let current = week_index(now);
    let oldest = current - i64::from(LOGIN_WINDOW_WEEKS) + 1;
    let weeks: BTreeSet<i64> = sessions
        .iter()
        .flat_map(|s| s.activity_weeks.iter().copied())
        .filter(|w| (oldest..=current).contains(w))
        .collect();
    weeks.len() as u32
}

/// Every term behind a score.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Email verification points.
    pub email: u32,
    /// Strong identity verification points.
    pub strong_identity: u32,
    /// Second factor points.
    pub second_factor: u32,
    /// Receipt points after cap.
    pub receipts: u32,
    /// Screenshot points after cap.
    pub screenshots: u32,
    /// Profile points after cap.
    pub profiles: u32,
    /// Peer verification points after cap.
    pub peer_verifications: u32,
    /// Account age points.
    pub account_age: u32,
    /// Login consistency points.
    pub login_consistency: u32,
    /// Deduction for unresolved risk signals.
    pub risk_penalty: u32,
    /// Deduction for verified reports.
    pub report_penalty: u32,
}

/// A computed score.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustScore {
    /// Identity component, 0..=250.
    pub identity: u32,
    /// Evidence component, 0..=400.
    pub evidence: u32,
    /// Behaviour component, 0..=350.
    pub behaviour: u32,
    /// Sum of the components.
    pub total: u32,
    /// Terms behind the components.
    pub breakdown: ScoreBreakdown,
}

impl TrustScore {
    /// Display tier.
    pub fn tier(&self) -> TrustTier {
        TrustTier::from_score(self.total)
    }
}

/// Compute a score.
pub fn compute(inputs: &ScoreInputs, policy: &ScorePolicy) -> TrustScore {
    let mut b = ScoreBreakdown {
        email: if inputs.email_verified { policy.email_verified } else { 0 },
        strong_identity: if inputs.identity_verified { policy.identity_verified } else { 0 },
        second_factor: if inputs.second_factor { policy.second_factor } else { 0 },
        ..ScoreBreakdown::default()
    };
    let identity = b
        .email
        .saturating_add(b.strong_identity)
        .saturating_add(b.second_factor)
        .min(IDENTITY_MAX);

    let mut receipts = 0u32;
    let mut screenshots = 0u32;
    let mut profiles = 0u32;
    for fact in &inputs.evidence {
        let full = match fact.kind {
            EvidenceKind::Receipt => policy.receipt,
            EvidenceKind::Screenshot => policy.screenshot,
            EvidenceKind::ProfileLink if fact.verified_profile => policy.verified_profile,
            EvidenceKind::ProfileLink => policy.linked_profile,
        };
        let earned = match fact.state {
            EvidenceState::Valid => full,
            EvidenceState::Suspicious => full / 2,
            EvidenceState::Rejected => 0,
        };
        let bucket = match fact.kind {
            EvidenceKind::Receipt => &mut receipts,
            EvidenceKind::Screenshot => &mut screenshots,
            EvidenceKind::ProfileLink => &mut profiles,
        };
        *bucket = bucket.saturating_add(earned);
    }
    b.receipts = receipts.min(policy.receipt_cap);
    b.screenshots = screenshots.min(policy.screenshot_cap);
    b.profiles = profiles.min(policy.profile_cap);
    b.peer_verifications = inputs
        .confirmed_verifications
        .saturating_mul(policy.peer_verification)
        .min(policy.peer_verification_cap);
    let evidence = b
        .receipts
        .saturating_add(b.screenshots)
        .saturating_add(b.profiles)
        .saturating_add(b.peer_verifications)
        .min(EVIDENCE_MAX);

    let days = u64::from(inputs.account_age_days);
    let half = u64::from(policy.account_age_half_days.max(1));
    b.account_age = (u64::from(policy.account_age_max) * days / (days + half)) as u32;
    b.login_consistency = (u64::from(policy.login_consistency_max)
        * u64::from(inputs.active_weeks.min(LOGIN_WINDOW_WEEKS))
        / u64::from(LOGIN_WINDOW_WEEKS)) as u32;
    b.risk_penalty = inputs
        .unresolved_severities
        .iter()
        .map(|&s| u32::from(s))
        .sum::<u32>()
        .saturating_mul(policy.risk_penalty_per_severity);
    b.report_penalty = inputs
        .verified_reports
        .saturating_mul(policy.verified_report_penalty);
    let behaviour = b
        .account_age
        .saturating_add(b.login_consistency)
        .saturating_sub(b.risk_penalty)
        .saturating_sub(b.report_penalty)
        .min(BEHAVIOUR_MAX);

    TrustScore {
        identity,
        evidence,
        behaviour,
        total: identity + evidence + behaviour,
        breakdown: b,
    }
}

/// Display tiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// Below 200.
    Unrated,
    /// 200..400.
    Emerging,
    /// 400..600.
    Established,
    /// 600..800.
    Trusted,
    /// 800 and above.
    Exemplary,
}

impl TrustTier {
    /// Tier for a total.
    pub fn from_score(total: u32) -> Self {
        match total {
            0..=199 => TrustTier::Unrated,
            200..=399 => TrustTier::Emerging,
            400..=599 => TrustTier::Established,
            600..=799 => TrustTier::Trusted,
            _ => TrustTier::Exemplary,
        }
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            TrustTier::Unrated => "Unrated",
            TrustTier::Emerging => "Emerging",
            TrustTier::Established => "Established",
            TrustTier::Trusted => "Trusted",
            TrustTier::Exemplary => "Exemplary",
        }
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a score was recomputed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalcTrigger {
    /// External identity verification completed.
    IdentityVerified,
    /// A mutual verification was confirmed.
    VerificationConfirmed,
    /// A report against the identity was verified.
    ReportVerified,
    /// Email verified at login.
    EmailVerified,
    /// Weekly batch.
    Scheduled,
    /// Explicit request.
    Manual,
}

impl RecalcTrigger {
    /// Scheduled runs are deduplicated per period and never wait for a
    /// run already in flight.
    pub fn is_scheduled(&self) -> bool {
        matches!(self, RecalcTrigger::Scheduled)
    }

    /// Stable snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecalcTrigger::IdentityVerified => "identity_verified",
            RecalcTrigger::VerificationConfirmed => "verification_confirmed",
            RecalcTrigger::ReportVerified => "report_verified",
            RecalcTrigger::EmailVerified => "email_verified",
            RecalcTrigger::Scheduled => "scheduled",
            RecalcTrigger::Manual => "manual",
        }
    }
}

/// ISO week key such as `2026-W07`.
pub fn iso_week_period(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// An immutable point in an identity's score history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustScoreSnapshot {
    /// Primary key.
    pub id: SnapshotId,
    /// Identity.
    pub identity: IdentityId,
    /// Total.
    pub total: u32,
    /// Identity component.
    pub identity_score: u32,
    /// Evidence component.
    pub evidence_score: u32,
    /// Behaviour component.
    pub behaviour_score: u32,
    /// Terms behind the components.
    pub breakdown: ScoreBreakdown,
    /// What caused the run.
    pub trigger: RecalcTrigger,
    /// ISO week for scheduled runs.
    pub period: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl TrustScoreSnapshot {
    /// Record `score` for `identity`.
    pub fn new(
        identity: IdentityId,
        score: TrustScore,
        trigger: RecalcTrigger,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SnapshotId::generate(),
            identity,
            total: score.total,
            identity_score: score.identity,
            evidence_score: score.evidence,
            behaviour_score: score.behaviour,
            breakdown: score.breakdown,
            trigger,
            period: trigger.is_scheduled().then(|| iso_week_period(created_at)),
            created_at,
        }
    }

    /// Display tier.
    pub fn tier(&self) -> TrustTier {
        TrustTier::from_score(self.total)
    }

    /// Change from `earlier`.
    pub fn delta_from(&self, earlier: &TrustScoreSnapshot) -> i64 {
        i64::from(self.total) - i64::from(earlier.total)
    }

    /// Age at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}
