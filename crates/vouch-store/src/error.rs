//! Error types for storage operations.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Corruption detected.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for vouch_identity::IdentityError {
    fn from(e: StoreError) -> Self {
        vouch_identity::IdentityError::Storage(e.to_string())
    }
}

impl From<StoreError> for vouch_auth::AuthError {
    fn from(e: StoreError) -> Self {
        vouch_auth::AuthError::Storage(e.to_string())
    }
}

impl From<StoreError> for vouch_evidence::EvidenceError {
    fn from(e: StoreError) -> Self {
        vouch_evidence::EvidenceError::Storage(e.to_string())
    }
}

impl From<StoreError> for vouch_reputation::ReputationError {
    fn from(e: StoreError) -> Self {
        vouch_reputation::ReputationError::Storage(e.to_string())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
