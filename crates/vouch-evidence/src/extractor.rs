//! Boundary to the external field extractor (OCR, scraping, parsing).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{EvidenceContent, EvidenceKind, Money};
use crate::Result;

/// How sure the extractor is about its output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Confidence {
    /// Fields are reliable.
    High,
    /// Fields are probably right.
    Medium,
    /// Fields are a guess.
    Low,
    /// Nothing usable was extracted.
    #[default]
    Failed,
}

/// Best-effort structured fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    /// Transaction amount.
    pub amount: Option<Money>,
    /// Transaction date.
    pub occurred_at: Option<DateTime<Utc>>,
    /// Platform or merchant name, lowercase.
    pub platform: Option<String>,
    /// Role of the counterpart (buyer, seller).
    pub counterpart_role: Option<String>,
    /// Username shown on a profile.
    pub username: Option<String>,
    /// Receipt carried authenticated sender headers.
    pub source_authenticated: bool,
    /// Screenshot came with a live-capture attestation.
    pub live_capture: bool,
    /// Capture time from file metadata.
    pub captured_at: Option<DateTime<Utc>>,
    /// File metadata agrees with the visible content.
    pub metadata_consistent: bool,
    /// Content matches a known fake template.
    pub template_match: bool,
    /// Profile ownership was proven (e.g. a code placed in the bio).
    pub ownership_proven: bool,
}

/// Extractor output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Extracted fields.
    pub fields: ExtractedFields,
    /// Confidence indicator.
    pub confidence: Confidence,
}

impl Extraction {
    /// The result used when the extractor itself failed.
    pub fn failed() -> Self {
        Self::default()
    }
}

/// External extractor.
///
/// Low confidence is an integrity input, not a failure. Errors are reserved
/// for the extractor being unavailable.
#[async_trait]
pub trait EvidenceExtractor: Send + Sync {
    /// Extract fields from raw content.
    async fn extract(&self, kind: EvidenceKind, content: &EvidenceContent) -> Result<Extraction>;
}
