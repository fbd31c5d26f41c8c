//! Error types for authentication operations.

use thiserror::Error;

/// Errors that can occur during authentication.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Too many code requests in the current window.
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimitExceeded {
        /// Seconds until the window expires.
        retry_after_secs: i64,
    },

    /// The code is wrong, expired, consumed or out of attempts.
    ///
    /// Deliberately generic: it never reveals whether the email is known.
    #[error("Invalid or expired one-time code")]
    InvalidOrExpiredOtp,

    /// The token is malformed, expired, unknown or its session is revoked.
    #[error("Unauthorized")]
    Unauthorized,

    /// Outbound delivery failed.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    /// Invalid input such as a malformed email.
    #[error("Identity error: {0}")]
    Identity(#[from] vouch_identity::IdentityError),

    /// Cryptographic failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] vouch_crypto::CryptoError),

    /// A conditional write kept losing to concurrent writers.
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// Backing store failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
