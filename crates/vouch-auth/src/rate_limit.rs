//! Fixed-window request limits.
//!
//! A window opens at the first request for a key and lasts for the configured
//! duration. The count only grows inside a window and restarts at one when a
//! request arrives after expiry.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Request counter for one key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    /// Limited key, usually a normalized email.
    pub key: String,
    /// Requests counted in this window.
    pub count: u32,
    /// When the window closes.
    pub expires_at: DateTime<Utc>,
}

impl RateLimitWindow {
    /// Open a window with a single request.
    pub fn open(key: impl Into<String>, now: DateTime<Utc>, length: Duration) -> Self {
        Self {
            key: key.into(),
            count: 1,
            expires_at: now + length,
        }
    }

    /// Whether the window still applies at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Apply one request against an optional existing window.
    ///
    /// Returns the decision and, when allowed, the window to persist.
    pub fn apply(
        existing: Option<&RateLimitWindow>,
        key: &str,
        limit: u32,
        length: Duration,
        now: DateTime<Utc>,
    ) -> (RateLimitDecision, Option<RateLimitWindow>) {
        match existing {
            Some(window) if window.is_active(now) => {
                if window.count >= limit {
                    let retry = (window.expires_at - now).num_seconds().max(1);
                    (RateLimitDecision::Limited { retry_after_secs: retry }, None)
                } else {
                    let mut next = window.clone();
                    next.count = next.count.saturating_add(1);
                    let remaining = limit - next.count;
                    (RateLimitDecision::Allowed { remaining }, Some(next))
                }
            }
            _ => {
                let window = RateLimitWindow::open(key, now, length);
                let remaining = limit.saturating_sub(1);
                (RateLimitDecision::Allowed { remaining }, Some(window))
            }
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The request was counted.
    Allowed {
        /// Requests left in the window.
        remaining: u32,
    },
    /// The window is full; nothing was counted.
    Limited {
        /// Seconds until the window expires.
        retry_after_secs: i64,
    },
}

impl RateLimitDecision {
    /// Check if the request is allowed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// Atomic check-and-increment over fixed windows.
///
/// Implementations must apply [`RateLimitWindow::apply`] atomically per key so
/// that concurrent requests cannot both take the last slot.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request for `key` unless the window is full.
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        length: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision>;

    /// Current window for `key`, if any.
    async fn window(&self, key: &str) -> Result<Option<RateLimitWindow>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    #[test]
    fn test_first_request_opens_window() {
        let (decision, window) = RateLimitWindow::apply(None, "a@x.com", 3, Duration::minutes(15), t0());
        assert_eq!(decision, RateLimitDecision::Allowed { remaining: 2 });
        let window = window.unwrap();
        assert_eq!(window.count, 1);
        assert_eq!(window.expires_at, t0() + Duration::minutes(15));
    }

    #[test]
    fn test_full_window_is_limited_and_unchanged() {
        let mut window = RateLimitWindow::open("a@x.com", t0(), Duration::minutes(15));
        window.count = 3;
        let (decision, next) =
            RateLimitWindow::apply(Some(&window), "a@x.com", 3, Duration::minutes(15), t0() + Duration::minutes(5));
        assert_eq!(decision, RateLimitDecision::Limited { retry_after_secs: 600 });
        assert!(next.is_none());
    }

    #[test]
    fn test_expired_window_resets() {
        let mut window = RateLimitWindow::open("a@x.com", t0(), Duration::minutes(15));
        window.count = 3;
        let later = t0() + Duration::minutes(15);
        let (decision, next) = RateLimitWindow::apply(Some(&window), "a@x.com", 3, Duration::minutes(15), later);
        assert!(decision.is_allowed());
        assert_eq!(next.unwrap().count, 1);
    }
}
