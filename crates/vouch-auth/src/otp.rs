//! One-time code issuance and verification.
//!
//! ## Lifecycle
//!
//! `request_code` counts the request against the email's rate-limit window,
//! replaces any earlier code for that email with a fresh one and hands the
//! plaintext to the [`Dispatcher`]. Only the salted hash is stored.
//!
//! `verify_code` bumps the attempt counter with a conditional write and marks
//! the code consumed on a match, so a code verifies at most once even under
//! concurrent calls.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vouch_crypto::{numeric_code, Hash256, Salt};
use vouch_identity::{Clock, EmailAddress};

use crate::dispatch::{Dispatcher, Message};
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::{AuthError, Result};

/// Digits in a generated code.
pub const DEFAULT_CODE_DIGITS: u32 = 6;

/// Code lifetime in minutes.
pub const DEFAULT_CODE_TTL_MINUTES: i64 = 5;

/// Verification attempts allowed per code.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Code requests allowed per window.
pub const DEFAULT_REQUESTS_PER_WINDOW: u32 = 3;

/// Rate-limit window length in minutes.
pub const DEFAULT_WINDOW_MINUTES: i64 = 15;

/// Conditional-write retries before failing closed.
const MAX_VERIFY_RETRIES: usize = 4;

/// Tunables for the authenticator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpPolicy {
    /// Digits per code.
    pub code_digits: u32,
    /// Code lifetime.
    pub code_ttl: Duration,
    /// Attempts allowed per code.
    pub max_attempts: u32,
    /// Requests allowed per window.
    pub requests_per_window: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            code_digits: DEFAULT_CODE_DIGITS,
            code_ttl: Duration::minutes(DEFAULT_CODE_TTL_MINUTES),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            requests_per_window: DEFAULT_REQUESTS_PER_WINDOW,
            window: Duration::minutes(DEFAULT_WINDOW_MINUTES),
        }
    }
}

/// A stored one-time code. Holds only the salted hash of the code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeCode {
    /// Normalized email the code was sent to.
    pub email: EmailAddress,
    /// Per-code salt.
    pub salt: Salt,
    /// `Hash256::salted(salt, code)`.
    pub code_hash: Hash256,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Verification attempts so far.
    pub attempts: u32,
    /// Whether the code was successfully used.
    pub consumed: bool,
    /// Optimistic-concurrency version.
    pub version: u64,
}

impl OneTimeCode {
    /// Whether the code can still be tried at `now`.
    pub fn is_usable(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        !self.consumed && now < self.expires_at && self.attempts < max_attempts
    }
}

/// Storage for one-time codes, keyed by email.
///
/// At most one code per email is kept; `replace` overwrites whatever was
/// there, which invalidates the earlier code.
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Store `code` as the only code for its email.
    async fn replace(&self, code: &OneTimeCode) -> Result<()>;

    /// The current code for `email`.
    async fn latest(&self, email: &EmailAddress) -> Result<Option<OneTimeCode>>;

    /// Write `code` if the stored version equals `expected_version`.
    ///
    /// The stored copy receives `expected_version + 1`.
    async fn update_if_version(&self, code: &OneTimeCode, expected_version: u64) -> Result<bool>;

    /// Drop the stored code for `code.email` if it still carries `code.salt`.
    ///
    /// Returns whether a code was removed.
    async fn remove_if_current(&self, code: &OneTimeCode) -> Result<bool>;
}

/// Receipt of a successful code request. Never contains the code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCode {
    /// Normalized email.
    pub email: EmailAddress,
    /// When the code expires.
    pub expires_at: DateTime<Utc>,
    /// Requests left in the current window.
    pub remaining_requests: u32,
}

/// One-time code authenticator.
pub struct OtpAuthenticator {
    codes: Arc<dyn OtpStore>,
    limiter: Arc<dyn RateLimiter>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    policy: OtpPolicy,
}

impl std::fmt::Debug for OtpAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpAuthenticator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl OtpAuthenticator {
    /// Create an authenticator.
    pub fn new(
        codes: Arc<dyn OtpStore>,
        limiter: Arc<dyn RateLimiter>,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
        policy: OtpPolicy,
    ) -> Self {
        Self {
            codes,
            limiter,
            dispatcher,
            clock,
            policy,
        }
    }

    /// The active policy.
    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    /// Issue a code for `email` and dispatch it.
    ///
    /// # Errors
    ///
    /// - `AuthError::Identity` if the email is malformed (nothing is counted)
    /// - `AuthError::RateLimitExceeded` if the window is full (no code issued)
    /// - `AuthError::Dispatch` if delivery failed (the code is dropped unless a
    ///   newer one replaced it meanwhile)
    pub async fn request_code(&self, email: &str) -> Result<IssuedCode> {
        let email = EmailAddress::parse(email)?;
        let now = self.clock.now();

        let decision = self
            .limiter
            .check_and_increment(
                email.as_str(),
                self.policy.requests_per_window,
                self.policy.window,
                now,
            )
            .await?;
        let remaining_requests = match decision {
            RateLimitDecision::Allowed { remaining } => remaining,
            RateLimitDecision::Limited { retry_after_secs } => {
                info!(email = %email, "one-time code rate limit reached");
                return Err(AuthError::RateLimitExceeded { retry_after_secs });
            }
        };

        let code = numeric_code(self.policy.code_digits);
        let salt = Salt::generate();
        let record = OneTimeCode {
            email: email.clone(),
            salt,
            code_hash: Hash256::salted(&salt, code.as_bytes()),
            created_at: now,
            expires_at: now + self.policy.code_ttl,
            attempts: 0,
            consumed: false,
            version: 0,
        };
        self.codes.replace(&record).await?;

        let message = Message::OneTimeCode {
            code,
            expires_in_minutes: self.policy.code_ttl.num_minutes(),
        };
        if let Err(e) = self.dispatcher.send(email.as_str(), &message).await {
            warn!(email = %email, error = %e, "one-time code dispatch failed");
            if !self.codes.remove_if_current(&record).await? {
                debug!(email = %email, "newer code issued meanwhile, keeping it");
            }
            return Err(match e {
                AuthError::Dispatch(reason) => AuthError::Dispatch(reason),
                other => AuthError::Dispatch(other.to_string()),
            });
        }

        debug!(email = %email, remaining = remaining_requests, "one-time code issued");
        Ok(IssuedCode {
            email,
            expires_at: record.expires_at,
            remaining_requests,
        })
    }

    /// Verify `code` for `email`, consuming it on success.
    ///
    /// Returns the normalized email.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidOrExpiredOtp` for a malformed email, a
    /// missing, expired, consumed or exhausted code, or a wrong code.
    pub async fn verify_code(&self, email: &str, code: &str) -> Result<EmailAddress> {
        let email = EmailAddress::parse(email).map_err(|_| AuthError::InvalidOrExpiredOtp)?;
        let supplied = code.trim();

        for _ in 0..MAX_VERIFY_RETRIES {
            let now = self.clock.now();
            let Some(mut record) = self.codes.latest(&email).await? else {
                return Err(AuthError::InvalidOrExpiredOtp);
            };
            if !record.is_usable(now, self.policy.max_attempts) {
                return Err(AuthError::InvalidOrExpiredOtp);
            }

            let expected = record.version;
            let matched = record.code_hash.matches_salted(&record.salt, supplied.as_bytes());
            record.attempts += 1;
            record.consumed = matched;

            if !self.codes.update_if_version(&record, expected).await? {
                debug!(email = %email, "one-time code changed during verification, reloading");
                continue;
            }

            if matched {
                info!(email = %email, "one-time code verified");
                return Ok(email);
            }
            debug!(email = %email, attempts = record.attempts, "one-time code mismatch");
            return Err(AuthError::InvalidOrExpiredOtp);
        }

        Err(AuthError::InvalidOrExpiredOtp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryOtpStore, InMemoryRateLimiter, MemoryOutbox};
    use vouch_identity::ManualClock;

    struct Harness {
        auth: OtpAuthenticator,
        outbox: Arc<MemoryOutbox>,
        clock: ManualClock,
        codes: Arc<InMemoryOtpStore>,
    }

    fn harness() -> Harness {
        let clock = ManualClock::new(DateTime::from_timestamp(1_750_000_000, 0).unwrap());
        let outbox = Arc::new(MemoryOutbox::new());
        let codes = Arc::new(InMemoryOtpStore::new());
        let auth = OtpAuthenticator::new(
            codes.clone(),
            Arc::new(InMemoryRateLimiter::new()),
            outbox.clone(),
            Arc::new(clock.clone()),
            OtpPolicy::default(),
        );
        Harness {
            auth,
            outbox,
            clock,
            codes,
        }
    }

    #[tokio::test]
    async fn test_fourth_request_in_window_is_limited() {
        let h = harness();
        for _ in 0..3 {
            h.auth.request_code("a@x.com").await.unwrap();
            h.clock.advance(Duration::minutes(1));
        }
        let err = h.auth.request_code("A@x.com").await.unwrap_err();
        assert!(matches!(err, AuthError::RateLimitExceeded { .. }));
        assert_eq!(h.outbox.sent_to("a@x.com").await, 3);
    }

    #[tokio::test]
    async fn test_window_expiry_allows_new_requests() {
        let h = harness();
        for _ in 0..3 {
            h.auth.request_code("a@x.com").await.unwrap();
        }
        h.clock.advance(Duration::minutes(15));
        assert!(h.auth.request_code("a@x.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_code_verifies_once() {
        let h = harness();
        h.auth.request_code("a@x.com").await.unwrap();
        let code = h.outbox.last_code("a@x.com").await.unwrap();

        let email = h.auth.verify_code("a@x.com", &code).await.unwrap();
        assert_eq!(email.as_str(), "a@x.com");
        let err = h.auth.verify_code("a@x.com", &code).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredOtp));
    }

    #[tokio::test]
    async fn test_new_code_invalidates_previous() {
        let h = harness();
        h.auth.request_code("a@x.com").await.unwrap();
        let first = h.outbox.last_code("a@x.com").await.unwrap();
        h.auth.request_code("a@x.com").await.unwrap();
        let second = h.outbox.last_code("a@x.com").await.unwrap();

        if first != second {
            assert!(h.auth.verify_code("a@x.com", &first).await.is_err());
        }
        assert!(h.auth.verify_code("a@x.com", &second).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_code_rejected() {
        let h = harness();
        h.auth.request_code("a@x.com").await.unwrap();
        let code = h.outbox.last_code("a@x.com").await.unwrap();
        h.clock.advance(Duration::minutes(5));
        assert!(matches!(
            h.auth.verify_code("a@x.com", &code).await,
            Err(AuthError::InvalidOrExpiredOtp)
        ));
    }

    #[tokio::test]
    async fn test_attempt_cap_locks_code() {
        let h = harness();
        h.auth.request_code("a@x.com").await.unwrap();
        let code = h.outbox.last_code("a@x.com").await.unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..5 {
            assert!(h.auth.verify_code("a@x.com", wrong).await.is_err());
        }
        assert!(h.auth.verify_code("a@x.com", &code).await.is_err());
        let stored = h.codes.latest(&EmailAddress::parse("a@x.com").unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 5);
    }

    #[tokio::test]
    async fn test_unknown_email_is_generic_failure() {
        let h = harness();
        assert!(matches!(
            h.auth.verify_code("nobody@x.com", "123456").await,
            Err(AuthError::InvalidOrExpiredOtp)
        ));
        assert!(matches!(
            h.auth.verify_code("not-an-email", "123456").await,
            Err(AuthError::InvalidOrExpiredOtp)
        ));
    }

    #[tokio::test]
    async fn test_malformed_email_not_counted() {
        let h = harness();
        assert!(matches!(
            h.auth.request_code("bad email").await,
            Err(AuthError::Identity(_))
        ));
        assert_eq!(h.outbox.len().await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_drops_code() {
        let h = harness();
        h.outbox.fail_next(true);
        let err = h.auth.request_code("a@x.com").await.unwrap_err();
        assert!(matches!(err, AuthError::Dispatch(_)));
        let email = EmailAddress::parse("a@x.com").unwrap();
        assert!(h.codes.latest(&email).await.unwrap().is_none());
    }

    /// Dispatcher that fails after a newer code has been stored for the
    /// same address.
    struct OvertakenDispatcher {
        codes: Arc<InMemoryOtpStore>,
        newer: OneTimeCode,
    }

    #[async_trait]
    impl Dispatcher for OvertakenDispatcher {
        async fn send(&self, _destination: &str, _message: &Message) -> Result<()> {
            self.codes.replace(&self.newer).await?;
            Err(AuthError::Dispatch("mail relay down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_dispatch_keeps_newer_code() {
        let now = DateTime::from_timestamp(1_750_000_000, 0).unwrap();
        let email = EmailAddress::parse("a@x.com").unwrap();
        let salt = Salt::generate();
        let newer = OneTimeCode {
            email: email.clone(),
            salt,
            code_hash: Hash256::salted(&salt, b"654321"),
            created_at: now,
            expires_at: now + Duration::minutes(10),
            attempts: 0,
            consumed: false,
            version: 0,
        };
        let codes = Arc::new(InMemoryOtpStore::new());
        let auth = OtpAuthenticator::new(
            codes.clone(),
            Arc::new(InMemoryRateLimiter::new()),
            Arc::new(OvertakenDispatcher {
                codes: codes.clone(),
                newer,
            }),
            Arc::new(ManualClock::new(now)),
            OtpPolicy::default(),
        );

        let err = auth.request_code("a@x.com").await.unwrap_err();
        assert!(matches!(err, AuthError::Dispatch(_)));
        let kept = codes.latest(&email).await.unwrap().unwrap();
        assert_eq!(kept.salt, salt);
        assert!(auth.verify_code("a@x.com", "654321").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_verification_consumes_once() {
        let h = Arc::new(harness());
        h.auth.request_code("a@x.com").await.unwrap();
        let code = h.outbox.last_code("a@x.com").await.unwrap();

        let attempts = (0..8).map(|_| {
            let h = h.clone();
            let code = code.clone();
            async move { h.auth.verify_code("a@x.com", &code).await.is_ok() }
        });
        let results = futures::future::join_all(attempts).await;
        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
    }
}
