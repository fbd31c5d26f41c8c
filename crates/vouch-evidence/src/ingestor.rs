//! Evidence ingestion pipeline.
//!
//! ```text
//! hash ──► dedup check ──► blob put ──► extract ──► assess ──► insert_if_absent
//! ```
//!
//! No lock is held across the external calls. The early dedup check saves
//! work; `insert_if_absent` is the authoritative one, so a race between two
//! identical submissions still ends with exactly one record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use vouch_identity::{Clock, Identity};

use crate::blob::BlobStore;
use crate::extractor::{EvidenceExtractor, Extraction};
use crate::integrity::{assess, band, DEFAULT_SUSPICIOUS_FLOOR, DEFAULT_VALID_THRESHOLD};
use crate::record::{
    content_hash, normalize_url, EvidenceContent, EvidenceId, EvidenceRecord, EvidenceState,
    EvidenceSubmission,
};
use crate::store::{set_evidence_state, EvidenceStore};
use crate::{EvidenceError, Result};

/// Maximum accepted file size (10 MiB).
pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

/// Maximum accepted URL length.
pub const MAX_URL_LENGTH: usize = 2048;

/// Tunables for ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidencePolicy {
    /// Score at or above which a record is Valid.
    pub valid_threshold: u8,
    /// Score at or above which a record is Suspicious.
    pub suspicious_floor: u8,
    /// Largest accepted file.
    pub max_file_bytes: usize,
    /// Recognized profile platforms, lowercase.
    pub known_platforms: Vec<String>,
}

impl Default for EvidencePolicy {
    fn default() -> Self {
        Self {
            valid_threshold: DEFAULT_VALID_THRESHOLD,
            suspicious_floor: DEFAULT_SUSPICIOUS_FLOOR,
            max_file_bytes: MAX_FILE_BYTES,
            known_platforms: [
                "ebay", "etsy", "amazon", "facebook", "instagram", "vinted", "depop", "poshmark",
                "mercari", "reddit", "discord", "github",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

/// A stored submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submitted {
    /// The new record.
    pub record: EvidenceRecord,
}

impl Submitted {
    /// The submission revealed a profile that does not belong to the account.
    pub fn profile_mismatch(&self) -> bool {
        self.record.integrity.profile_mismatch
    }
}

/// Ingests evidence submissions.
pub struct EvidenceIngestor {
    store: Arc<dyn EvidenceStore>,
    extractor: Arc<dyn EvidenceExtractor>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    policy: EvidencePolicy,
}

impl std::fmt::Debug for EvidenceIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceIngestor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl EvidenceIngestor {
    /// Create an ingestor.
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        extractor: Arc<dyn EvidenceExtractor>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        policy: EvidencePolicy,
    ) -> Self {
        Self {
            store,
            extractor,
            blobs,
            clock,
            policy,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn EvidenceStore> {
        &self.store
    }

    /// Ingest a submission from `owner`.
    ///
    /// # Errors
    ///
    /// - `EvidenceError::Validation` for empty, oversized or malformed content
    /// - `EvidenceError::Duplicate` if any identity already submitted the same content
    /// - `EvidenceError::Blob` / `EvidenceError::Storage` on collaborator failures
    pub async fn submit(&self, owner: &Identity, submission: EvidenceSubmission) -> Result<Submitted> {
        self.validate(&submission)?;
        let hash = content_hash(&submission.content);

        if self.store.find_by_hash(&hash).await?.is_some() {
            debug!(identity = %owner.id, hash = %hash, "duplicate evidence rejected early");
            return Err(EvidenceError::Duplicate(hash.to_hex()));
        }

        let (blob_url, source_url) = match &submission.content {
            EvidenceContent::File {
                bytes,
                content_type,
            } => (Some(self.blobs.put(bytes, content_type).await?), None),
            EvidenceContent::Url(url) => (None, Some(normalize_url(url))),
        };

        let extraction = match self
            .extractor
            .extract(submission.kind, &submission.content)
            .await
        {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(identity = %owner.id, error = %e, "evidence extraction failed");
                Extraction::failed()
            }
        };

        let now = self.clock.now();
        let username = owner.username.as_ref().map(|u| u.as_str());
        let integrity = assess(
            submission.kind,
            &extraction,
            username,
            &self.policy.known_platforms,
            now,
        );
        let state = band(
            integrity.score,
            integrity.fraud,
            self.policy.valid_threshold,
            self.policy.suspicious_floor,
        );

        let record = EvidenceRecord {
            id: EvidenceId::generate(),
            owner: owner.id,
            kind: submission.kind,
            content_hash: hash,
            blob_url,
            source_url,
            fields: extraction.fields,
            confidence: extraction.confidence,
            fraud: integrity.fraud,
            integrity,
            state,
            submitted_at: now,
            version: 0,
        };

        if !self.store.insert_if_absent(&record).await? {
            debug!(identity = %owner.id, "duplicate evidence lost the insert race");
            return Err(EvidenceError::Duplicate(record.content_hash.to_hex()));
        }

        info!(
            identity = %owner.id,
            evidence = %record.id,
            kind = record.kind.as_str(),
            score = record.integrity.score,
            state = ?record.state,
            "evidence ingested"
        );
        Ok(Submitted { record })
    }

    /// Change a record's state and fraud flag.
    pub async fn set_state(
        &self,
        id: &EvidenceId,
        state: EvidenceState,
        fraud: bool,
    ) -> Result<EvidenceRecord> {
        set_evidence_state(self.store.as_ref(), id, state, fraud).await
    }

    /// Records submitted by `owner`.
    pub async fn list(&self, owner: &vouch_identity::IdentityId) -> Result<Vec<EvidenceRecord>> {
        self.store.list_for_identity(owner).await
    }

    /// Current time as seen by the ingestor.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn validate(&self, submission: &EvidenceSubmission) -> Result<()> {
        use crate::record::EvidenceKind;

        match (&submission.kind, &submission.content) {
            (EvidenceKind::ProfileLink, EvidenceContent::Url(url)) => {
                let url = url.trim();
                if url.is_empty() || url.len() > MAX_URL_LENGTH {
                    return Err(EvidenceError::Validation(format!(
                        "profile URL must be 1..={} characters",
                        MAX_URL_LENGTH
                    )));
                }
                if !(url.starts_with("https://") || url.starts_with("http://")) {
                    return Err(EvidenceError::Validation(
                        "profile URL must use http or https".to_string(),
                    ));
                }
                Ok(())
            }
            (EvidenceKind::ProfileLink, EvidenceContent::File { .. }) => Err(
                EvidenceError::Validation("profile links must be submitted as a URL".to_string()),
            ),
            (_, EvidenceContent::Url(_)) => Err(EvidenceError::Validation(format!(
                "{} evidence must be an uploaded file",
                submission.kind.as_str()
            ))),
            (_, EvidenceContent::File { bytes, .. }) => {
                if bytes.is_empty() {
                    return Err(EvidenceError::Validation("empty file".to_string()));
                }
                if bytes.len() > self.policy.max_file_bytes {
                    return Err(EvidenceError::Validation(format!(
                        "file too large: {} bytes (max {})",
                        bytes.len(),
                        self.policy.max_file_bytes
                    )));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{Confidence, ExtractedFields};
    use crate::memory::{FixedExtractor, InMemoryBlobStore, InMemoryEvidenceStore};
    use crate::record::{EvidenceKind, Money};
    use chrono::Duration;
    use vouch_identity::{EmailAddress, ManualClock, SignupMetadata, Username};

    struct Harness {
        ingestor: EvidenceIngestor,
        extractor: Arc<FixedExtractor>,
        blobs: Arc<InMemoryBlobStore>,
        now: DateTime<Utc>,
    }

    fn harness() -> Harness {
        let now = DateTime::from_timestamp(1_750_000_000, 0).unwrap();
        let extractor = Arc::new(FixedExtractor::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let ingestor = EvidenceIngestor::new(
            Arc::new(InMemoryEvidenceStore::new()),
            extractor.clone(),
            blobs.clone(),
            Arc::new(ManualClock::new(now)),
            EvidencePolicy::default(),
        );
        Harness {
            ingestor,
            extractor,
            blobs,
            now,
        }
    }

    fn person(email: &str, username: &str) -> Identity {
        Identity::new(
            EmailAddress::parse(email).unwrap(),
            SignupMetadata::default(),
            Utc::now(),
        )
        .with_username(Username::new(username).unwrap())
    }

    fn good_receipt(now: DateTime<Utc>) -> Extraction {
        Extraction {
            fields: ExtractedFields {
                amount: Some(Money::new(2500, "USD")),
                occurred_at: Some(now - Duration::days(1)),
                source_authenticated: true,
                metadata_consistent: true,
                ..Default::default()
            },
            confidence: Confidence::High,
        }
    }

    #[tokio::test]
    async fn test_valid_receipt_is_stored() {
        let h = harness();
        h.extractor.set(EvidenceKind::Receipt, good_receipt(h.now)).await;
        let alice = person("alice@x.com", "alice");

        let submitted = h
            .ingestor
            .submit(&alice, EvidenceSubmission::receipt(b"receipt-1".to_vec(), "application/pdf"))
            .await
            .unwrap();
        assert_eq!(submitted.record.state, EvidenceState::Valid);
        assert_eq!(submitted.record.integrity_score(), 100);
        assert!(submitted.record.blob_url.is_some());
        assert_eq!(h.blobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_rejected_across_identities() {
        let h = harness();
        h.extractor.set(EvidenceKind::Receipt, good_receipt(h.now)).await;
        let alice = person("alice@x.com", "alice");
        let bob = person("bob@x.com", "bob");
        let payload = b"same bytes".to_vec();

        h.ingestor
            .submit(&alice, EvidenceSubmission::receipt(payload.clone(), "image/png"))
            .await
            .unwrap();
        let err = h
            .ingestor
            .submit(&bob, EvidenceSubmission::receipt(payload.clone(), "image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EvidenceError::Duplicate(_)));
        let err = h
            .ingestor
            .submit(&alice, EvidenceSubmission::screenshot(payload, "image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EvidenceError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_store_one() {
        let h = harness();
        let alice = person("alice@x.com", "alice");
        let attempts = (0..4).map(|_| {
            h.ingestor
                .submit(&alice, EvidenceSubmission::receipt(b"racy".to_vec(), "image/png"))
        });
        let results = futures::future::join_all(attempts).await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(h.ingestor.list(&alice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_profile_mismatch_rejected_with_fraud() {
        let h = harness();
        h.extractor
            .set(
                EvidenceKind::ProfileLink,
                Extraction {
                    fields: ExtractedFields {
                        platform: Some("ebay".into()),
                        username: Some("mallory".into()),
                        ..Default::default()
                    },
                    confidence: Confidence::High,
                },
            )
            .await;
        let alice = person("alice@x.com", "alice");
        let submitted = h
            .ingestor
            .submit(&alice, EvidenceSubmission::profile_link("https://ebay.com/usr/mallory"))
            .await
            .unwrap();
        assert!(submitted.profile_mismatch());
        assert!(submitted.record.fraud);
        assert_eq!(submitted.record.state, EvidenceState::Rejected);
        assert_eq!(submitted.record.source_url.as_deref(), Some("ebay.com/usr/mallory"));
    }

    #[tokio::test]
    async fn test_low_confidence_is_not_an_error() {
        let h = harness();
        let alice = person("alice@x.com", "alice");
        let submitted = h
            .ingestor
            .submit(&alice, EvidenceSubmission::screenshot(b"blurry".to_vec(), "image/jpeg"))
            .await
            .unwrap();
        assert_eq!(submitted.record.confidence, Confidence::Failed);
        assert_eq!(submitted.record.state, EvidenceState::Rejected);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let h = harness();
        let alice = person("alice@x.com", "alice");
        for submission in [
            EvidenceSubmission::receipt(Vec::new(), "image/png"),
            EvidenceSubmission::profile_link("ftp://example.com/u"),
            EvidenceSubmission::profile_link("   "),
            EvidenceSubmission {
                kind: EvidenceKind::Receipt,
                content: EvidenceContent::Url("https://example.com".into()),
            },
        ] {
            let err = h.ingestor.submit(&alice, submission).await.unwrap_err();
            assert!(matches!(err, EvidenceError::Validation(_)));
        }
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_state_only_mutation() {
        let h = harness();
        h.extractor.set(EvidenceKind::Receipt, good_receipt(h.now)).await;
        let alice = person("alice@x.com", "alice");
        let record = h
            .ingestor
            .submit(&alice, EvidenceSubmission::receipt(b"r".to_vec(), "image/png"))
            .await
            .unwrap()
            .record;

        let updated = h
            .ingestor
            .set_state(&record.id, EvidenceState::Rejected, true)
            .await
            .unwrap();
        assert_eq!(updated.state, EvidenceState::Rejected);
        assert!(updated.fraud);
        assert_eq!(updated.version, 1);
        assert_eq!(updated.content_hash, record.content_hash);

        let missing = h
            .ingestor
            .set_state(&EvidenceId::generate(), EvidenceState::Valid, false)
            .await;
        assert!(matches!(missing, Err(EvidenceError::NotFound(_))));
    }
}
