//! Error types for identity operations.

use thiserror::Error;

/// Errors that can occur during identity operations.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Cryptographic operation failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] vouch_crypto::CryptoError),

    /// Identity not found.
    #[error("Identity not found: {0}")]
    NotFound(String),

    /// An identity with this email already exists.
    #[error("Identity already exists: {0}")]
    AlreadyExists(String),

    /// Invalid email address.
    #[error("Invalid email address: {reason}")]
    InvalidEmail {
        /// Reason for invalidity.
        reason: String,
    },

    /// Invalid username format.
    #[error("Invalid username: {reason}")]
    InvalidUsername {
        /// Reason for invalidity.
        reason: String,
    },

    /// Username already taken.
    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    /// Invalid account status transition.
    #[error("Invalid account status transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current status.
        from: String,
        /// Attempted status.
        to: String,
    },

    /// A conditional write kept losing to concurrent writers.
    #[error("Concurrent modification of identity {0}")]
    Conflict(String),

    /// The external verification provider failed.
    #[error("Verification provider error: {0}")]
    Provider(String),

    /// Backing store failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;
