//! Error types for reputation operations.

use thiserror::Error;

/// Errors that can occur during reputation operations.
#[derive(Error, Debug)]
pub enum ReputationError {
    /// Rate limit exceeded.
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the oldest counted item leaves the window.
        retry_after_secs: i64,
    },

    /// An identity tried to report itself.
    #[error("Cannot report yourself")]
    SelfReport,

    /// An identity tried to verify a transaction with itself.
    #[error("Cannot verify a transaction with yourself")]
    SelfVerification,

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller is not entitled to the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Malformed input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation is not valid in the entity's current state.
    #[error("Invalid state: cannot {action} while {state}")]
    InvalidState {
        /// Current state.
        state: String,
        /// Attempted action.
        action: String,
    },

    /// A conditional write kept losing to concurrent writers.
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// Identity layer failure.
    #[error("Identity error: {0}")]
    Identity(#[from] vouch_identity::IdentityError),

    /// Evidence layer failure.
    #[error("Evidence error: {0}")]
    Evidence(#[from] vouch_evidence::EvidenceError),

    /// Session layer failure.
    #[error("Auth error: {0}")]
    Auth(#[from] vouch_auth::AuthError),

    /// Backing store failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for reputation operations.
pub type Result<T> = std::result::Result<T, ReputationError>;
