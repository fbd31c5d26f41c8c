//! Risk detectors.
//!
//! Each detector is a pure function over a [`RiskContext`] snapshot of one
//! identity's data and returns signal candidates. Fingerprints are stable for
//! the same underlying fact, so running the detectors again never produces
//! a second signal for it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use vouch_auth::Session;
use vouch_evidence::{EvidenceRecord, EvidenceState};
use vouch_identity::{Identity, IdentityId};

use crate::collusion::{detect_pair, PairPolicy, SuspiciousCluster};
use crate::report::{Report, ReportStatus};
use crate::signal::{RiskKind, SignalCandidate};
use crate::verification::MutualVerification;

/// Severity for a fraud-flagged evidence record.
pub const FRAUD_EVIDENCE_SEVERITY: u8 = 7;

/// Severity for a linked profile owned by someone else.
pub const PROFILE_MISMATCH_SEVERITY: u8 = 6;

/// Severity for a session on an unfamiliar device and network.
pub const DEVICE_MISMATCH_SEVERITY: u8 = 3;

/// Severity for another account on the same signup device.
pub const SHARED_DEVICE_SEVERITY: u8 = 6;

/// Severity for many accounts on the same signup network.
pub const SHARED_NETWORK_SEVERITY: u8 = 3;

/// Severity for a burst of signups.
pub const RAPID_CREATION_SEVERITY: u8 = 5;

/// Severity for a suspicious pair pattern.
pub const PAIR_COLLUSION_SEVERITY: u8 = 6;

/// Detector thresholds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectorPolicy {
    /// Rejected records before repeated rejection counts as fake evidence.
    pub rejection_threshold: usize,
    /// Signups from one network within this window count as a burst.
    pub rapid_window: Duration,
    /// Accounts in the window (including this one) that form a burst.
    pub rapid_min_accounts: usize,
    /// Other accounts on the same network before it is suspicious.
    pub shared_network_min: usize,
    /// Pair collusion thresholds.
    pub pair: PairPolicy,
}

impl Default for DetectorPolicy {
    fn default() -> Self {
        Self {
            rejection_threshold: 3,
            rapid_window: Duration::hours(24),
            rapid_min_accounts: 3,
            shared_network_min: 3,
            pair: PairPolicy::default(),
        }
    }
}

/// Everything the detectors look at for one identity.
#[derive(Clone, Copy, Debug)]
pub struct RiskContext<'a> {
    /// The identity.
    pub identity: &'a Identity,
    /// Its evidence.
    pub evidence: &'a [EvidenceRecord],
    /// Its sessions.
    pub sessions: &'a [Session],
    /// Reports against it.
    pub reports_against: &'a [Report],
    /// Verifications it is party to.
    pub verifications: &'a [MutualVerification],
    /// Other identities sharing its signup device or IP.
    pub signup_peers: &'a [Identity],
    /// The suspicious ring it belongs to, if any.
    pub ring: Option<&'a SuspiciousCluster>,
    /// Evaluation time.
    pub now: DateTime<Utc>,
}

/// A detector function.
pub type Detector = fn(&RiskContext<'_>, &DetectorPolicy) -> Vec<SignalCandidate>;

/// Every detector, in evaluation order.
pub const DETECTORS: &[Detector] = &[
    fake_evidence,
    profile_mismatch,
    device_mismatch,
    reported,
    duplicate_accounts,
    rapid_creation,
    collusion,
];

/// Run every detector.
pub fn run_all(ctx: &RiskContext<'_>, policy: &DetectorPolicy) -> Vec<SignalCandidate> {
    DETECTORS.iter().flat_map(|detect| detect(ctx, policy)).collect()
}

/// Fraud-flagged evidence, and repeated rejections.
pub fn fake_evidence(ctx: &RiskContext<'_>, policy: &DetectorPolicy) -> Vec<SignalCandidate> {
    let mut out: Vec<_> = ctx
        .evidence
        .iter()
        .filter(|r| r.fraud && !r.integrity.profile_mismatch)
        .map(|r| {
            SignalCandidate::new(
                RiskKind::FakeEvidence,
                FRAUD_EVIDENCE_SEVERITY,
                format!("fake-evidence:{}", r.id),
                format!("{} flagged as fraudulent", r.kind.as_str()),
            )
        })
        .collect();

    let rejected = ctx
        .evidence
        .iter()
        .filter(|r| r.state == EvidenceState::Rejected)
        .count();
    if policy.rejection_threshold > 0 && rejected >= policy.rejection_threshold {
        let level = rejected / policy.rejection_threshold;
        let severity = 4 + (level.saturating_sub(1)).min(4) as u8;
        out.push(SignalCandidate::new(
            RiskKind::FakeEvidence,
            severity,
            format!("fake-evidence:rejections:{}", level),
            format!("{} evidence submissions rejected", rejected),
        ));
    }
    out
}

/// Linked profiles whose username belongs to someone else.
pub fn profile_mismatch(ctx: &RiskContext<'_>, _policy: &DetectorPolicy) -> Vec<SignalCandidate> {
    ctx.evidence
        .iter()
        .filter(|r| r.integrity.profile_mismatch)
        .map(|r| {
            SignalCandidate::new(
                RiskKind::ProfileMismatch,
                PROFILE_MISMATCH_SEVERITY,
                format!("profile-mismatch:{}", r.id),
                format!(
                    "linked profile {} shows username {}",
                    r.source_url.as_deref().unwrap_or("?"),
                    r.fields.username.as_deref().unwrap_or("?")
                ),
            )
        })
        .collect()
}

/// Sessions from a device and network unlike the signup fingerprint.
pub fn device_mismatch(ctx: &RiskContext<'_>, _policy: &DetectorPolicy) -> Vec<SignalCandidate> {
    let Some(signup) = ctx.identity.signup.device.as_ref() else {
        return Vec::new();
    };
    let devices: BTreeSet<&str> = ctx
        .sessions
        .iter()
        .filter(|s| s.device.mismatches(signup))
        .map(|s| s.device.device_id.as_str())
        .collect();
    devices
        .into_iter()
        .map(|device| {
            SignalCandidate::new(
                RiskKind::DeviceMismatch,
                DEVICE_MISMATCH_SEVERITY,
                format!("device:{}", device),
                "session from an unfamiliar device and network",
            )
        })
        .collect()
}

/// Verified reports.
pub fn reported(ctx: &RiskContext<'_>, _policy: &DetectorPolicy) -> Vec<SignalCandidate> {
    ctx.reports_against
        .iter()
        .filter(|r| r.status == ReportStatus::Verified)
        .map(|r| {
            SignalCandidate::new(
                RiskKind::Reported,
                r.category.severity(),
                format!("report:{}", r.id),
                format!("verified {} report", r.category.as_str()),
            )
        })
        .collect()
}

/// Other accounts created from the same device, or many from one network.
pub fn duplicate_accounts(ctx: &RiskContext<'_>, policy: &DetectorPolicy) -> Vec<SignalCandidate> {
    let Some(signup) = ctx.identity.signup.device.as_ref() else {
        return Vec::new();
    };
    let peers = peers(ctx);
    let mut out: Vec<_> = peers
        .iter()
        .filter(|p| p.signup.device.as_ref().is_some_and(|d| d.same_device(signup)))
        .map(|p| {
            SignalCandidate::new(
                RiskKind::DuplicateAccount,
                SHARED_DEVICE_SEVERITY,
                format!("duplicate:{}", p.id),
                format!("shares signup device with {}", p.id),
            )
        })
        .collect();

    let same_ip = peers
        .iter()
        .filter(|p| p.signup.device.as_ref().is_some_and(|d| d.ip == signup.ip))
        .count();
    if policy.shared_network_min > 0 && same_ip >= policy.shared_network_min {
        out.push(SignalCandidate::new(
            RiskKind::DuplicateAccount,
            SHARED_NETWORK_SEVERITY,
            format!("shared-network:{}", signup.ip),
            format!("{} other accounts signed up from {}", same_ip, signup.ip),
        ));
    }
    out
}

/// A burst of signups from one address around this account's creation.
pub fn rapid_creation(ctx: &RiskContext<'_>, policy: &DetectorPolicy) -> Vec<SignalCandidate> {
    let Some(signup) = ctx.identity.signup.device.as_ref() else {
        return Vec::new();
    };
    let created = ctx.identity.created_at;
    let burst = peers(ctx)
        .iter()
        .filter(|p| p.signup.device.as_ref().is_some_and(|d| d.ip == signup.ip))
        .filter(|p| (p.created_at - created).abs() <= policy.rapid_window)
        .count()
        + 1;
    if burst >= policy.rapid_min_accounts {
        vec![SignalCandidate::new(
            RiskKind::RapidAccountCreation,
            RAPID_CREATION_SEVERITY,
            format!("rapid-creation:{}", signup.ip),
            format!("{} accounts created from {} within a day", burst, signup.ip),
        )]
    } else {
        Vec::new()
    }
}

/// Pair patterns per counterpart, and membership in a suspicious ring.
pub fn collusion(ctx: &RiskContext<'_>, policy: &DetectorPolicy) -> Vec<SignalCandidate> {
    let me = ctx.identity.id;
    let mut by_partner: BTreeMap<IdentityId, Vec<&MutualVerification>> = BTreeMap::new();
    for v in ctx.verifications.iter().filter(|v| v.counts_as_confirmed()) {
        if let Some(other) = v.other_party(&me) {
            by_partner.entry(other).or_default().push(v);
        }
    }

    let mut out: Vec<_> = by_partner
        .into_iter()
        .filter_map(|(partner, history)| {
            detect_pair(&history, ctx.now, &policy.pair).map(|finding| {
                SignalCandidate::new(
                    RiskKind::Collusion,
                    PAIR_COLLUSION_SEVERITY,
                    format!("collusion:pair:{}", partner),
                    finding.describe(),
                )
            })
        })
        .collect();

    if let Some(ring) = ctx.ring.filter(|r| r.contains(&me)) {
        out.push(SignalCandidate::new(
            RiskKind::Collusion,
            ring.severity(),
            "collusion:ring",
            format!(
                "member of a {}-account ring (density {:.2}, symmetry {:.2})",
                ring.members.len(),
                ring.internal_density,
                ring.symmetry_score
            ),
        ));
    }
    out
}

fn peers<'a>(ctx: &RiskContext<'a>) -> Vec<&'a Identity> {
    ctx.signup_peers
        .iter()
        .filter(|p| p.id != ctx.identity.id)
        .collect()
}
