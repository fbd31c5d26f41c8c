//! Integrity scoring.
//!
//! Scores start at 100 and lose points for every anomaly found in provenance
//! and consistency checks. A profile whose username does not match the
//! account raises the fraud flag, which always rejects the record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::extractor::{Confidence, Extraction};
use crate::record::{EvidenceKind, EvidenceState};

/// Starting score.
pub const MAX_INTEGRITY: u8 = 100;

/// Score at or above which a record is Valid.
pub const DEFAULT_VALID_THRESHOLD: u8 = 60;

/// Score at or above which a record is Suspicious rather than Rejected.
pub const DEFAULT_SUSPICIOUS_FLOOR: u8 = 30;

/// Allowed clock skew for dates and capture times, in hours.
pub const MAX_SKEW_HOURS: i64 = 24;

/// A detected anomaly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Anomaly {
    /// Extractor returned medium confidence.
    MediumConfidence,
    /// Extractor returned low confidence.
    LowConfidence,
    /// Extractor produced nothing usable.
    ExtractionFailed,
    /// Receipt without authenticated source headers.
    UnauthenticatedSource,
    /// No amount found.
    MissingAmount,
    /// No date found.
    MissingDate,
    /// Date lies more than a day in the future.
    FutureDate,
    /// Screenshot without live-capture attestation.
    NoCaptureAttestation,
    /// File metadata contradicts the content.
    MetadataInconsistent,
    /// Capture time is far from the claimed date.
    TimestampSkew,
    /// Content matches a known fake template.
    TemplateMatch,
    /// Profile on a platform we do not recognize.
    UnknownPlatform,
    /// Profile username differs from the account's.
    ProfileMismatch,
}

impl Anomaly {
    /// Points deducted for this anomaly.
    pub fn penalty(&self) -> u8 {
        match self {
            Anomaly::MediumConfidence => 10,
            Anomaly::LowConfidence => 25,
            Anomaly::ExtractionFailed => 40,
            Anomaly::UnauthenticatedSource => 20,
            Anomaly::MissingAmount => 10,
            Anomaly::MissingDate => 10,
            Anomaly::FutureDate => 25,
            Anomaly::NoCaptureAttestation => 20,
            Anomaly::MetadataInconsistent => 25,
            Anomaly::TimestampSkew => 10,
            Anomaly::TemplateMatch => 30,
            Anomaly::UnknownPlatform => 10,
            Anomaly::ProfileMismatch => 40,
        }
    }
}

/// One applied deduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    /// What was found.
    pub anomaly: Anomaly,
    /// Points removed.
    pub points: u8,
}

/// Result of an integrity assessment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Final score, 0-100.
    pub score: u8,
    /// Deductions in the order they were applied.
    pub deductions: Vec<Deduction>,
    /// Fraud flag.
    pub fraud: bool,
    /// The profile username did not match the account.
    pub profile_mismatch: bool,
}

impl IntegrityReport {
    fn new() -> Self {
        Self {
            score: MAX_INTEGRITY,
            deductions: Vec::new(),
            fraud: false,
            profile_mismatch: false,
        }
    }

    fn deduct(&mut self, anomaly: Anomaly) {
        let points = anomaly.penalty();
        self.score = self.score.saturating_sub(points);
        self.deductions.push(Deduction { anomaly, points });
    }

    /// Whether `anomaly` was found.
    pub fn has(&self, anomaly: Anomaly) -> bool {
        self.deductions.iter().any(|d| d.anomaly == anomaly)
    }
}

/// Assess an extraction.
///
/// `account_username` is the submitting account's handle, used to cross-check
/// profile links; `known_platforms` are lowercase platform names.
pub fn assess(
    kind: EvidenceKind,
    extraction: &Extraction,
    account_username: Option<&str>,
    known_platforms: &[String],
    now: DateTime<Utc>,
) -> IntegrityReport {
    let mut report = IntegrityReport::new();
    let fields = &extraction.fields;
    let skew = Duration::hours(MAX_SKEW_HOURS);

    match extraction.confidence {
        Confidence::High => {}
        Confidence::Medium => report.deduct(Anomaly::MediumConfidence),
        Confidence::Low => report.deduct(Anomaly::LowConfidence),
        Confidence::Failed => report.deduct(Anomaly::ExtractionFailed),
    }

    if fields.template_match {
        report.deduct(Anomaly::TemplateMatch);
    }

    match kind {
        EvidenceKind::Receipt | EvidenceKind::Screenshot => {
            if kind == EvidenceKind::Receipt && !fields.source_authenticated {
                report.deduct(Anomaly::UnauthenticatedSource);
            }
            if kind == EvidenceKind::Screenshot && !fields.live_capture {
                report.deduct(Anomaly::NoCaptureAttestation);
            }
            if fields.amount.is_none() {
                report.deduct(Anomaly::MissingAmount);
            }
            match fields.occurred_at {
                None => report.deduct(Anomaly::MissingDate),
                Some(at) if at > now + skew => report.deduct(Anomaly::FutureDate),
                Some(_) => {}
            }
            if !fields.metadata_consistent {
                report.deduct(Anomaly::MetadataInconsistent);
            }
            if let (Some(captured), Some(occurred)) = (fields.captured_at, fields.occurred_at) {
                if (captured - occurred).abs() > skew {
                    report.deduct(Anomaly::TimestampSkew);
                }
            }
        }
        EvidenceKind::ProfileLink => {
            let known = fields
                .platform
                .as_deref()
                .is_some_and(|p| known_platforms.iter().any(|k| k.eq_ignore_ascii_case(p)));
            if !known {
                report.deduct(Anomaly::UnknownPlatform);
            }
            if let (Some(claimed), Some(account)) = (fields.username.as_deref(), account_username) {
                let claimed = claimed.trim().trim_start_matches('@');
                let account = account.trim().trim_start_matches('@');
                if !claimed.eq_ignore_ascii_case(account) {
                    report.deduct(Anomaly::ProfileMismatch);
                    report.profile_mismatch = true;
                    report.fraud = true;
                }
            }
        }
    }

    report
}

/// Map a score and fraud flag to a lifecycle state.
pub fn band(score: u8, fraud: bool, valid_threshold: u8, suspicious_floor: u8) -> EvidenceState {
    if fraud {
        EvidenceState::Rejected
    } else if score >= valid_threshold {
        EvidenceState::Valid
    } else if score >= suspicious_floor {
        EvidenceState::Suspicious
    } else {
        EvidenceState::Rejected
    }
}
