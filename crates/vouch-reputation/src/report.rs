//! Abuse reports.
//!
//! Reports are filed by one identity against another, limited to a fixed
//! number per reporter in a rolling window. A report only affects the
//! reported identity once review marks it Verified, at which point the risk
//! engine picks it up as a `Reported` signal.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use vouch_crypto::define_id;
use vouch_identity::{resolve_identifier, Clock, IdentityId};

use crate::risk::{RiskAssessment, RiskEngine};
use crate::store::ReputationStores;
use crate::{ReputationError, Result};

define_id!(
    /// Report primary key.
    ReportId
);

/// Reports allowed per reporter per window.
pub const DEFAULT_MAX_REPORTS: usize = 5;

/// Minimum description length in characters.
pub const MIN_DESCRIPTION_LENGTH: usize = 20;

/// Maximum description length in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 2000;

/// Maximum attached files.
pub const MAX_ATTACHMENTS: usize = 5;

/// What the report is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportCategory {
    /// Fraudulent activity.
    Fraud,
    /// A scam.
    Scam,
    /// Abusive behavior.
    Harassment,
    /// Pretending to be someone else.
    Impersonation,
    /// Forged evidence.
    FakeEvidence,
    /// Unsolicited messages.
    Spam,
    /// Anything else.
    Other,
}

impl ReportCategory {
    /// Every category.
    pub const ALL: [ReportCategory; 7] = [
        ReportCategory::Fraud,
        ReportCategory::Scam,
        ReportCategory::Harassment,
        ReportCategory::Impersonation,
        ReportCategory::FakeEvidence,
        ReportCategory::Spam,
        ReportCategory::Other,
    ];

    /// Parse a snake-case category name.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
    }

    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportCategory::Fraud => "fraud",
            ReportCategory::Scam => "scam",
            ReportCategory::Harassment => "harassment",
            ReportCategory::Impersonation => "impersonation",
            ReportCategory::FakeEvidence => "fake_evidence",
            ReportCategory::Spam => "spam",
            ReportCategory::Other => "other",
        }
    }

    /// Severity of the risk signal a verified report raises.
    pub fn severity(&self) -> u8 {
        match self {
            ReportCategory::Fraud => 8,
            ReportCategory::Scam => 8,
            ReportCategory::FakeEvidence => 7,
            ReportCategory::Impersonation => 6,
            ReportCategory::Harassment => 5,
            ReportCategory::Spam => 3,
            ReportCategory::Other => 3,
        }
    }
}

/// Review status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    /// Filed, not yet looked at.
    Pending,
    /// A reviewer is on it.
    UnderReview,
    /// Upheld.
    Verified,
    /// Not upheld.
    Dismissed,
}

impl ReportStatus {
    /// Whether moving to `to` is allowed.
    pub fn can_transition_to(&self, to: ReportStatus) -> bool {
        use ReportStatus::*;
        matches!(
            (self, to),
            (Pending, UnderReview)
                | (Pending, Verified)
                | (Pending, Dismissed)
                | (UnderReview, Verified)
                | (UnderReview, Dismissed)
        )
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::UnderReview => "under_review",
            ReportStatus::Verified => "verified",
            ReportStatus::Dismissed => "dismissed",
        }
    }
}

/// An abuse report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Primary key.
    pub id: ReportId,
    /// Who filed it.
    pub reporter: IdentityId,
    /// Who it is about.
    pub reported: IdentityId,
    /// Category.
    pub category: ReportCategory,
    /// Free-text description.
    pub description: String,
    /// Blob store URLs of attached files.
    pub attachments: Vec<String>,
    /// Review status.
    pub status: ReportStatus,
    /// Filing time.
    pub filed_at: DateTime<Utc>,
    /// Last reviewer.
    pub reviewed_by: Option<IdentityId>,
    /// Last review time.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version.
    pub version: u64,
}

/// Outcome of an atomic limited insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportAdmission {
    /// The report was stored.
    Accepted,
    /// The reporter is at the limit.
    Limited {
        /// Oldest filing counted against the limit.
        oldest: DateTime<Utc>,
    },
}

/// Input for filing a report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportDraft {
    /// Email, id or username of the reported user.
    pub reported: String,
    /// Category name.
    pub category: String,
    /// Description.
    pub description: String,
    /// Blob store URLs.
    pub attachments: Vec<String>,
}

/// Tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportPolicy {
    /// Reports allowed per window.
    pub max_reports: usize,
    /// Rolling window.
    pub window: Duration,
    /// Minimum description length.
    pub min_description: usize,
    /// Maximum description length.
    pub max_description: usize,
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            max_reports: DEFAULT_MAX_REPORTS,
            window: Duration::hours(24),
            min_description: MIN_DESCRIPTION_LENGTH,
            max_description: MAX_DESCRIPTION_LENGTH,
        }
    }
}

/// Result of a review.
#[derive(Clone, Debug)]
pub struct ReviewOutcome {
    /// The report after review.
    pub report: Report,
    /// Risk re-evaluation of the reported identity, when the report was verified.
    pub assessment: Option<RiskAssessment>,
}

/// Files and reviews reports.
pub struct ReportPipeline {
    stores: ReputationStores,
    risk: Arc<RiskEngine>,
    clock: Arc<dyn Clock>,
    policy: ReportPolicy,
}

impl std::fmt::Debug for ReportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportPipeline")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ReportPipeline {
    /// Create the pipeline.
    pub fn new(
        stores: ReputationStores,
        risk: Arc<RiskEngine>,
        clock: Arc<dyn Clock>,
        policy: ReportPolicy,
    ) -> Self {
        Self {
            stores,
            risk,
            clock,
            policy,
        }
    }

    /// File a report from `reporter`.
    ///
    /// # Errors
    ///
    /// - `ReputationError::NotFound` if the reported user does not resolve
    /// - `ReputationError::SelfReport` if it resolves to the reporter
    /// - `ReputationError::Validation` for an unknown category, a description
    ///   outside the allowed length or too many attachments
    /// - `ReputationError::RateLimited` if the reporter is at the limit
    pub async fn file_report(&self, reporter: &IdentityId, draft: ReportDraft) -> Result<Report> {
        let reported = resolve_identifier(self.stores.directory.as_ref(), &draft.reported)
            .await?
            .ok_or_else(|| ReputationError::NotFound(format!("user {}", draft.reported.trim())))?;
        if reported.id == *reporter {
            return Err(ReputationError::SelfReport);
        }

        let category = ReportCategory::parse(&draft.category).ok_or_else(|| {
            ReputationError::Validation(format!("unknown report category '{}'", draft.category))
        })?;
        let description = draft.description.trim().to_string();
        let length = description.chars().count();
        if length < self.policy.min_description || length > self.policy.max_description {
            return Err(ReputationError::Validation(format!(
                "description must be {}..={} characters",
                self.policy.min_description, self.policy.max_description
            )));
        }
        if draft.attachments.len() > MAX_ATTACHMENTS {
            return Err(ReputationError::Validation(format!(
                "at most {} attachments",
                MAX_ATTACHMENTS
            )));
        }

        let now = self.clock.now();
        let report = Report {
            id: ReportId::generate(),
            reporter: *reporter,
            reported: reported.id,
            category,
            description,
            attachments: draft.attachments,
            status: ReportStatus::Pending,
            filed_at: now,
            reviewed_by: None,
            reviewed_at: None,
            version: 0,
        };

        let since = now - self.policy.window;
        match self
            .stores
            .reports
            .insert_within_limit(&report, self.policy.max_reports, since)
            .await?
        {
            ReportAdmission::Accepted => {}
            ReportAdmission::Limited { oldest } => {
                let retry_after_secs = (oldest + self.policy.window - now).num_seconds().max(1);
                info!(reporter = %reporter, "report limit reached");
                return Err(ReputationError::RateLimited { retry_after_secs });
            }
        }

        info!(
            report = %report.id,
            reporter = %reporter,
            reported = %report.reported,
            category = category.as_str(),
            "report filed"
        );
        Ok(report)
    }

    /// Move a report to `to` on behalf of `reviewer`.
    ///
    /// Verifying a report re-evaluates the reported identity.
    ///
    /// # Errors
    ///
    /// Returns `ReputationError::InvalidState` for disallowed transitions.
    pub async fn review(
        &self,
        id: &ReportId,
        reviewer: &IdentityId,
        to: ReportStatus,
    ) -> Result<ReviewOutcome> {
        let mut report = self
            .stores
            .reports
            .get(id)
            .await?
            .ok_or_else(|| ReputationError::NotFound(format!("report {}", id)))?;
        if !report.status.can_transition_to(to) {
            return Err(ReputationError::InvalidState {
                state: report.status.as_str().to_string(),
                action: format!("move to {}", to.as_str()),
            });
        }

        let expected = report.version;
        report.status = to;
        report.reviewed_by = Some(*reviewer);
        report.reviewed_at = Some(self.clock.now());
        if !self.stores.reports.update_if_version(&report, expected).await? {
            return Err(ReputationError::Conflict(format!(
                "report {} changed during review",
                id
            )));
        }
        report.version = expected + 1;
        info!(report = %id, reviewer = %reviewer, status = to.as_str(), "report reviewed");

        let assessment = if to == ReportStatus::Verified {
            Some(self.risk.evaluate(&report.reported).await?)
        } else {
            None
        };
        Ok(ReviewOutcome { report, assessment })
    }

    /// Load a report.
    pub async fn get(&self, id: &ReportId) -> Result<Report> {
        self.stores
            .reports
            .get(id)
            .await?
            .ok_or_else(|| ReputationError::NotFound(format!("report {}", id)))
    }

    /// Reports filed against `identity`.
    pub async fn list_against(&self, identity: &IdentityId) -> Result<Vec<Report>> {
        self.stores.reports.list_against(identity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::RiskKind;
    use crate::testkit::Kit;

    #[test]
    fn test_category_parse() {
        assert_eq!(ReportCategory::parse("fake_evidence"), Some(ReportCategory::FakeEvidence));
        assert_eq!(ReportCategory::parse(" Scam "), Some(ReportCategory::Scam));
        assert_eq!(ReportCategory::parse("rudeness"), None);
        for category in ReportCategory::ALL {
            assert_eq!(ReportCategory::parse(category.as_str()), Some(category));
        }
    }

    #[test]
    fn test_status_transitions() {
        use ReportStatus::*;
        assert!(Pending.can_transition_to(UnderReview));
        assert!(Pending.can_transition_to(Verified));
        assert!(UnderReview.can_transition_to(Dismissed));
        assert!(!Verified.can_transition_to(Dismissed));
        assert!(!Dismissed.can_transition_to(Pending));
        assert!(!UnderReview.can_transition_to(Pending));
    }

    fn draft(reported: &str, category: &str) -> ReportDraft {
        ReportDraft {
            reported: reported.to_string(),
            category: category.to_string(),
            description: "Took payment for a phone and never shipped it".to_string(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_self_report_and_unknown() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let pipeline = kit.reports();

        let err = pipeline.file_report(&alice.id, draft("alice", "scam")).await.unwrap_err();
        assert!(matches!(err, ReputationError::SelfReport));
        let err = pipeline
            .file_report(&alice.id, draft("ghost@example.com", "scam"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReputationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_validation() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        kit.user("mallory@example.com").await;
        let pipeline = kit.reports();

        let err = pipeline
            .file_report(&alice.id, draft("mallory", "rudeness"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReputationError::Validation(_)));

        let mut short = draft("mallory", "spam");
        short.description = "spam".into();
        let err = pipeline.file_report(&alice.id, short).await.unwrap_err();
        assert!(matches!(err, ReputationError::Validation(_)));
        assert!(pipeline.list_against(&alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rolling_daily_limit() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        kit.user("mallory@example.com").await;
        let pipeline = kit.reports();

        for _ in 0..DEFAULT_MAX_REPORTS {
            pipeline.file_report(&alice.id, draft("mallory", "spam")).await.unwrap();
            kit.clock.advance(Duration::hours(1));
        }
        let err = pipeline
            .file_report(&alice.id, draft("mallory", "spam"))
            .await
            .unwrap_err();
        match err {
            ReputationError::RateLimited { retry_after_secs } => {
                assert_eq!(retry_after_secs, Duration::hours(19).num_seconds());
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        kit.clock.advance(Duration::hours(19));
        pipeline.file_report(&alice.id, draft("mallory", "spam")).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_filings_respect_limit() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        kit.user("mallory@example.com").await;
        let pipeline = kit.reports();

        let attempts = (0..8).map(|_| pipeline.file_report(&alice.id, draft("mallory", "spam")));
        let results = futures::future::join_all(attempts).await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), DEFAULT_MAX_REPORTS);
    }

    #[tokio::test]
    async fn test_verified_report_raises_signal() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let reviewer = kit.user("rita@example.com").await;
        let mallory = kit.user("mallory@example.com").await;
        let pipeline = kit.reports();

        let report = pipeline.file_report(&alice.id, draft("mallory", "fraud")).await.unwrap();
        assert_eq!(report.status, ReportStatus::Pending);

        let outcome = pipeline
            .review(&report.id, &reviewer.id, ReportStatus::Verified)
            .await
            .unwrap();
        let assessment = outcome.assessment.unwrap();
        let signal = assessment
            .new_signals
            .iter()
            .find(|s| s.kind == RiskKind::Reported)
            .unwrap();
        assert_eq!(signal.severity, ReportCategory::Fraud.severity());
        assert_eq!(signal.fingerprint, format!("report:{}", report.id));
        assert_eq!(outcome.report.reviewed_by, Some(reviewer.id));

        let again = kit.risk.evaluate(&mallory.id).await.unwrap();
        assert!(again.new_signals.is_empty());

        let err = pipeline
            .review(&report.id, &reviewer.id, ReportStatus::Dismissed)
            .await
            .unwrap_err();
        assert!(matches!(err, ReputationError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_dismissed_report_has_no_effect() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let reviewer = kit.user("rita@example.com").await;
        let mallory = kit.user("mallory@example.com").await;
        let pipeline = kit.reports();

        let report = pipeline.file_report(&alice.id, draft("mallory", "spam")).await.unwrap();
        pipeline
            .review(&report.id, &reviewer.id, ReportStatus::UnderReview)
            .await
            .unwrap();
        let outcome = pipeline
            .review(&report.id, &reviewer.id, ReportStatus::Dismissed)
            .await
            .unwrap();
        assert!(outcome.assessment.is_none());
        assert!(kit.risk.profile(&mallory.id).await.unwrap().signals.is_empty());
    }
}
