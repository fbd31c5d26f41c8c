//! Error types for evidence operations.

use thiserror::Error;

/// Errors that can occur while handling evidence.
#[derive(Error, Debug)]
pub enum EvidenceError {
    /// A record with the same content hash exists.
    #[error("Duplicate evidence: {0}")]
    Duplicate(String),

    /// Malformed submission.
    #[error("Invalid evidence: {0}")]
    Validation(String),

    /// Record not found.
    #[error("Evidence not found: {0}")]
    NotFound(String),

    /// The blob store failed.
    #[error("Blob store error: {0}")]
    Blob(String),

    /// A conditional write kept losing to concurrent writers.
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// Cryptographic failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] vouch_crypto::CryptoError),

    /// Backing store failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for evidence operations.
pub type Result<T> = std::result::Result<T, EvidenceError>;
