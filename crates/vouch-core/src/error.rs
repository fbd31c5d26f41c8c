//! Error types for the service facade.
//!
//! Lower crates keep their own error enums. [`CoreError`] wraps them and
//! [`CoreError::kind`] collapses every variant into one of the documented
//! [`ErrorKind`]s that outer layers map to responses.

use thiserror::Error;
use vouch_auth::AuthError;
use vouch_evidence::EvidenceError;
use vouch_identity::IdentityError;
use vouch_reputation::ReputationError;
use vouch_store::StoreError;

use crate::config::ConfigError;

/// Errors returned by [`TrustService`](crate::TrustService) and the scheduler.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The caller lacks a capability or is not a party.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Authentication error.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Identity error.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Evidence error.
    #[error("Evidence error: {0}")]
    Evidence(#[from] EvidenceError),

    /// Reputation error.
    #[error("Reputation error: {0}")]
    Reputation(#[from] ReputationError),

    /// Storage error.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Documented error kinds with stable codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Too many requests in the current window.
    RateLimitExceeded,
    /// Unknown, wrong, consumed or expired one-time code.
    InvalidOtp,
    /// Missing, invalid or revoked credentials.
    Unauthorized,
    /// Authenticated but not entitled.
    Forbidden,
    /// Unresolved reference.
    NotFound,
    /// Mutual verification with oneself.
    SelfVerification,
    /// Report against oneself.
    SelfReport,
    /// Malformed input.
    ValidationError,
    /// Operation not valid in the current lifecycle state.
    InvalidState,
    /// Evidence content already submitted.
    DuplicateEvidence,
    /// Fraud was detected. Soft: carried by outcomes, never an `Err`.
    FraudDetected,
    /// Persistence failed or a conditional write kept losing.
    Storage,
    /// An external collaborator failed.
    Dispatch,
    /// Invalid configuration.
    Configuration,
}

impl ErrorKind {
    /// Stable snake-case code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::InvalidOtp => "invalid_otp",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SelfVerification => "self_verification",
            ErrorKind::SelfReport => "self_report",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::DuplicateEvidence => "duplicate_evidence",
            ErrorKind::FraudDetected => "fraud_detected",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Dispatch => "dispatch_failed",
            ErrorKind::Configuration => "configuration_error",
        }
    }

    /// Whether the same call may succeed later without re-authenticating.
    ///
    /// Rate limits and validation clear once the window or input changes;
    /// dispatch and storage failures are transient. Everything else, token
    /// replay included, needs a different request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimitExceeded
                | ErrorKind::ValidationError
                | ErrorKind::Dispatch
                | ErrorKind::Storage
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    /// The documented kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Validation(_) => ErrorKind::ValidationError,
            CoreError::Config(_) => ErrorKind::Configuration,
            CoreError::Auth(e) => auth_kind(e),
            CoreError::Identity(e) => identity_kind(e),
            CoreError::Evidence(e) => evidence_kind(e),
            CoreError::Reputation(e) => reputation_kind(e),
            CoreError::Store(_) => ErrorKind::Storage,
        }
    }

    /// See [`ErrorKind::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Seconds until a rate-limited call may succeed.
    pub fn retry_after_secs(&self) -> Option<i64> {
        match self {
            CoreError::Auth(AuthError::RateLimitExceeded { retry_after_secs })
            | CoreError::Reputation(ReputationError::RateLimited { retry_after_secs })
            | CoreError::Reputation(ReputationError::Auth(AuthError::RateLimitExceeded {
                retry_after_secs,
            })) => Some(*retry_after_secs),
            _ => None,
        }
    }
}

fn auth_kind(e: &AuthError) -> ErrorKind {
    match e {
        AuthError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
        AuthError::InvalidOrExpiredOtp => ErrorKind::InvalidOtp,
        AuthError::Unauthorized => ErrorKind::Unauthorized,
        AuthError::Dispatch(_) => ErrorKind::Dispatch,
        AuthError::Identity(e) => identity_kind(e),
        AuthError::Crypto(_) | AuthError::Conflict(_) | AuthError::Storage(_) => ErrorKind::Storage,
    }
}

fn identity_kind(e: &IdentityError) -> ErrorKind {
    match e {
        IdentityError::NotFound(_) => ErrorKind::NotFound,
        IdentityError::AlreadyExists(_)
        | IdentityError::InvalidEmail { .. }
        | IdentityError::InvalidUsername { .. }
        | IdentityError::UsernameTaken(_) => ErrorKind::ValidationError,
        IdentityError::InvalidStateTransition { .. } => ErrorKind::InvalidState,
        IdentityError::Provider(_) => ErrorKind::Dispatch,
        IdentityError::Crypto(_) | IdentityError::Conflict(_) | IdentityError::Storage(_) => {
            ErrorKind::Storage
        }
    }
}

fn evidence_kind(e: &EvidenceError) -> ErrorKind {
    match e {
        EvidenceError::Duplicate(_) => ErrorKind::DuplicateEvidence,
        EvidenceError::Validation(_) => ErrorKind::ValidationError,
        EvidenceError::NotFound(_) => ErrorKind::NotFound,
        EvidenceError::Blob(_) => ErrorKind::Dispatch,
        EvidenceError::Crypto(_) | EvidenceError::Conflict(_) | EvidenceError::Storage(_) => {
            ErrorKind::Storage
        }
    }
}

fn reputation_kind(e: &ReputationError) -> ErrorKind {
    match e {
        ReputationError::RateLimited { .. } => ErrorKind::RateLimitExceeded,
        ReputationError::SelfReport => ErrorKind::SelfReport,
        ReputationError::SelfVerification => ErrorKind::SelfVerification,
        ReputationError::NotFound(_) => ErrorKind::NotFound,
        ReputationError::Forbidden(_) => ErrorKind::Forbidden,
        ReputationError::Validation(_) => ErrorKind::ValidationError,
        ReputationError::InvalidState { .. } => ErrorKind::InvalidState,
        ReputationError::Identity(e) => identity_kind(e),
        ReputationError::Evidence(e) => evidence_kind(e),
        ReputationError::Auth(e) => auth_kind(e),
        ReputationError::Conflict(_) | ReputationError::Storage(_) => ErrorKind::Storage,
    }
}
