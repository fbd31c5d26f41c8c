//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Invalid hash length.
    #[error("Invalid hash length: expected {expected}, got {actual}")]
    InvalidHashLength {
        /// Expected hash length.
        expected: usize,
        /// Actual hash length.
        actual: usize,
    },

    /// Invalid hex string format.
    #[error("Invalid hex string: {0}")]
    InvalidHexFormat(String),

    /// Envelope is malformed or its MAC does not verify.
    #[error("Envelope verification failed")]
    EnvelopeVerification,

    /// Invalid identifier length.
    #[error("Invalid identifier length: expected {expected}, got {actual}")]
    InvalidIdLength {
        /// Expected identifier length.
        expected: usize,
        /// Actual identifier length.
        actual: usize,
    },
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
