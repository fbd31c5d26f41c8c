//! Evidence records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vouch_crypto::{define_id, Hash256};
use vouch_identity::IdentityId;

use crate::extractor::{Confidence, ExtractedFields};
use crate::integrity::IntegrityReport;

define_id!(
    /// Evidence record primary key.
    EvidenceId
);

/// Domain separation for profile URL hashes.
const PROFILE_URL_DOMAIN: &[u8] = b"vouch.evidence.profile-url.v1";

/// Domain separation for file hashes.
const FILE_DOMAIN: &[u8] = b"vouch.evidence.file.v1";

/// Kind of evidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// Purchase or payment receipt.
    Receipt,
    /// Screenshot of a transaction or conversation.
    Screenshot,
    /// Link to a profile on an external platform.
    ProfileLink,
}

impl EvidenceKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Receipt => "receipt",
            EvidenceKind::Screenshot => "screenshot",
            EvidenceKind::ProfileLink => "profile_link",
        }
    }
}

/// Lifecycle state of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceState {
    /// Counts fully toward the score.
    Valid,
    /// Counts at a reduced rate.
    Suspicious,
    /// Counts for nothing.
    Rejected,
}

/// An amount of money in minor units.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units (cents).
    pub minor_units: i64,
    /// ISO 4217 code, uppercase.
    pub currency: String,
}

impl Money {
    /// Create an amount, uppercasing the currency.
    pub fn new(minor_units: i64, currency: &str) -> Self {
        Self {
            minor_units,
            currency: currency.trim().to_ascii_uppercase(),
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.minor_units / 100,
            (self.minor_units % 100).abs(),
            self.currency
        )
    }
}

/// Raw submitted content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvidenceContent {
    /// An uploaded file.
    File {
        /// File bytes.
        bytes: Vec<u8>,
        /// MIME type as reported by the client.
        content_type: String,
    },
    /// A URL, for profile links.
    Url(String),
}

/// A submission before ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidenceSubmission {
    /// Declared kind.
    pub kind: EvidenceKind,
    /// Raw content.
    pub content: EvidenceContent,
}

impl EvidenceSubmission {
    /// A receipt file.
    pub fn receipt(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            kind: EvidenceKind::Receipt,
            content: EvidenceContent::File {
                bytes,
                content_type: content_type.into(),
            },
        }
    }

    /// A screenshot file.
    pub fn screenshot(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            kind: EvidenceKind::Screenshot,
            content: EvidenceContent::File {
                bytes,
                content_type: content_type.into(),
            },
        }
    }

    /// A profile link.
    pub fn profile_link(url: impl Into<String>) -> Self {
        Self {
            kind: EvidenceKind::ProfileLink,
            content: EvidenceContent::Url(url.into()),
        }
    }
}

/// Normalize a profile URL so trivially different spellings hash alike.
///
/// Lowercases scheme and host, drops `www.`, query, fragment and trailing
/// slashes. Path case is preserved.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let rest = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
    let host = host.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        host.to_string()
    } else {
        format!("{}/{}", host, path)
    }
}

/// Content hash used for deduplication across all identities.
pub fn content_hash(content: &EvidenceContent) -> Hash256 {
    match content {
        EvidenceContent::File { bytes, .. } => Hash256::hash_many(&[FILE_DOMAIN, bytes]),
        EvidenceContent::Url(url) => {
            Hash256::hash_many(&[PROFILE_URL_DOMAIN, normalize_url(url).as_bytes()])
        }
    }
}

/// A stored evidence record.
///
/// Immutable after creation except for `state`, `fraud` and `version`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Primary key.
    pub id: EvidenceId,
    /// Submitting identity.
    pub owner: IdentityId,
    /// Kind.
    pub kind: EvidenceKind,
    /// Deduplication hash.
    pub content_hash: Hash256,
    /// Blob store URL of the uploaded file.
    pub blob_url: Option<String>,
    /// Normalized profile URL.
    pub source_url: Option<String>,
    /// Extracted fields.
    pub fields: ExtractedFields,
    /// Extractor confidence.
    pub confidence: Confidence,
    /// Integrity assessment.
    pub integrity: IntegrityReport,
    /// Fraud flag.
    pub fraud: bool,
    /// Lifecycle state.
    pub state: EvidenceState,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Optimistic-concurrency version.
    pub version: u64,
}

impl EvidenceRecord {
    /// Integrity score, 0-100.
    pub fn integrity_score(&self) -> u8 {
        self.integrity.score
    }

    /// A profile link whose ownership was proven and whose username matches.
    pub fn is_verified_profile(&self) -> bool {
        self.kind == EvidenceKind::ProfileLink
            && self.fields.ownership_proven
            && !self.integrity.profile_mismatch
    }
}
