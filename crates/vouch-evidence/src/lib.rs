//! # vouch-evidence
//!
//! Evidence records backing a trust claim: purchase receipts, screenshots and
//! links to profiles on external platforms.
//!
//! Every submission is hashed for global deduplication, its file is handed to
//! a [`BlobStore`], structured fields come from an external
//! [`EvidenceExtractor`], and [`assess`] turns provenance and consistency
//! checks into a 0-100 integrity score and a lifecycle state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod error;
pub mod extractor;
pub mod ingestor;
pub mod integrity;
pub mod memory;
pub mod record;
pub mod store;

pub use blob::BlobStore;
pub use error::{EvidenceError, Result};
pub use extractor::{Confidence, EvidenceExtractor, Extraction, ExtractedFields};
pub use ingestor::{EvidenceIngestor, EvidencePolicy, Submitted};
pub use integrity::{assess, band, Anomaly, Deduction, IntegrityReport};
pub use memory::{FixedExtractor, InMemoryBlobStore, InMemoryEvidenceStore};
pub use record::{
    content_hash, EvidenceContent, EvidenceId, EvidenceKind, EvidenceRecord, EvidenceState,
    EvidenceSubmission, Money,
};
pub use store::{set_evidence_state, EvidenceStore};
