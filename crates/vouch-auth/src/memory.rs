//! In-memory stores and a recording dispatcher for tests and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use vouch_identity::{EmailAddress, IdentityId};

use crate::dispatch::{Dispatcher, Message};
use crate::otp::{OneTimeCode, OtpStore};
use crate::rate_limit::{RateLimitDecision, RateLimitWindow, RateLimiter};
use crate::session::{Session, SessionId, SessionStore};
use crate::{AuthError, Result};

/// In-memory [`OtpStore`].
#[derive(Debug, Default)]
pub struct InMemoryOtpStore {
    codes: RwLock<HashMap<EmailAddress, OneTimeCode>>,
}

impl InMemoryOtpStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpStore for InMemoryOtpStore {
    async fn replace(&self, code: &OneTimeCode) -> Result<()> {
        let mut codes = self.codes.write().await;
        let version = codes.get(&code.email).map_or(0, |c| c.version + 1);
        let mut stored = code.clone();
        stored.version = version;
        codes.insert(code.email.clone(), stored);
        Ok(())
    }

    async fn latest(&self, email: &EmailAddress) -> Result<Option<OneTimeCode>> {
        Ok(self.codes.read().await.get(email).cloned())
    }

    async fn update_if_version(&self, code: &OneTimeCode, expected_version: u64) -> Result<bool> {
        let mut codes = self.codes.write().await;
        match codes.get_mut(&code.email) {
            Some(current) if current.version == expected_version => {
                let mut next = code.clone();
                next.version = expected_version + 1;
                *current = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_if_current(&self, code: &OneTimeCode) -> Result<bool> {
        let mut codes = self.codes.write().await;
        match codes.get(&code.email) {
            Some(current) if current.salt == code.salt => {
                codes.remove(&code.email);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-memory [`RateLimiter`].
#[derive(Debug, Default)]
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, RateLimitWindow>>,
}

impl InMemoryRateLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        length: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        let mut windows = self.windows.lock().await;
        let (decision, next) = RateLimitWindow::apply(windows.get(key), key, limit, length, now);
        if let Some(window) = next {
            windows.insert(key.to_string(), window);
        }
        Ok(decision)
    }

    async fn window(&self, key: &str) -> Result<Option<RateLimitWindow>> {
        Ok(self.windows.lock().await.get(key).cloned())
    }
}

/// In-memory [`SessionStore`].
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(AuthError::Storage(format!(
                "Session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn update_if_version(&self, session: &Session, expected_version: u64) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(current) if current.version == expected_version => {
                let mut next = session.clone();
                next.version = expected_version + 1;
                *current = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_identity(&self, identity: &IdentityId) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.identity == *identity)
            .cloned()
            .collect())
    }
}

/// A [`Dispatcher`] that records messages instead of sending them.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    sent: RwLock<Vec<(String, Message)>>,
    fail: AtomicBool,
}

impl MemoryOutbox {
    /// Create an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail until reset.
    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of recorded messages.
    pub async fn len(&self) -> usize {
        self.sent.read().await.len()
    }

    /// Whether nothing was sent.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Messages sent to `destination`.
    pub async fn sent_to(&self, destination: &str) -> usize {
        self.sent
            .read()
            .await
            .iter()
            .filter(|(to, _)| to == destination)
            .count()
    }

    /// Most recent code sent to `destination`.
    pub async fn last_code(&self, destination: &str) -> Option<String> {
        self.sent
            .read()
            .await
            .iter()
            .rev()
            .find(|(to, _)| to == destination)
            .map(|(_, message)| match message {
                Message::OneTimeCode { code, .. } => code.as_str().to_string(),
            })
    }
}

#[async_trait]
impl Dispatcher for MemoryOutbox {
    async fn send(&self, destination: &str, message: &Message) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthError::Dispatch("outbox configured to fail".to_string()));
        }
        self.sent
            .write()
            .await
            .push((destination.to_string(), message.clone()));
        Ok(())
    }
}
