//! Access/refresh token sessions.
//!
//! ## Tokens
//!
//! - **Refresh token**: `"<session-id-hex>.<secret-hex>"`. The session row
//!   stores only the BLAKE3 digest of the current secret plus a bounded list
//!   of digests it has already rotated away from.
//! - **Access token**: a MAC-signed envelope around [`AccessClaims`]. It is
//!   verified statelessly and then checked against the session row so a
//!   revoked session stops working immediately.
//!
//! ## Replay
//!
//! Presenting a superseded refresh secret means the token was copied. The
//! whole session is revoked and the caller gets `Unauthorized`. Losing the
//! conditional write during rotation is treated the same way: two parties
//! raced with one token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vouch_crypto::{define_id, open_envelope, seal_envelope, Hash256, SecretToken, SigningKey};
use vouch_identity::{Clock, DeviceFingerprint, IdentityId};

use crate::{AuthError, Result};

define_id!(
    /// Session primary key.
    SessionId
);

/// Access-token lifetime in minutes.
pub const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;

/// Refresh-token lifetime in days.
pub const DEFAULT_REFRESH_TTL_DAYS: i64 = 30;

/// Superseded refresh digests kept per session so a recently rotated token
/// can still sign out.
pub const MAX_SUPERSEDED_HASHES: usize = 16;

/// Distinct activity weeks remembered per session.
pub const MAX_ACTIVITY_WEEKS: usize = 16;

/// Conditional-write retries when revoking.
const MAX_REVOKE_RETRIES: usize = 8;

/// Tunables for the session issuer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Access-token lifetime.
    pub access_ttl: Duration,
    /// Refresh-token lifetime, extended on each rotation.
    pub refresh_ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            access_ttl: Duration::minutes(DEFAULT_ACCESS_TTL_MINUTES),
            refresh_ttl: Duration::days(DEFAULT_REFRESH_TTL_DAYS),
        }
    }
}

/// Why a session stopped being active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationReason {
    /// The user signed out.
    SignedOut,
    /// A superseded refresh token was presented.
    ReplayDetected,
    /// All sessions of the identity were revoked.
    RevokedAll,
}

/// A refresh-token session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Primary key.
    pub id: SessionId,
    /// Owning identity.
    pub identity: IdentityId,
    /// Digest of the current refresh secret.
    pub refresh_hash: Hash256,
    /// Digests of earlier refresh secrets, oldest first.
    pub superseded: Vec<Hash256>,
    /// Device the session was opened from.
    pub device: DeviceFingerprint,
    /// Open time.
    pub created_at: DateTime<Utc>,
    /// Refresh-token expiry.
    pub expires_at: DateTime<Utc>,
    /// Last issue or refresh.
    pub last_seen_at: DateTime<Utc>,
    /// Week indices (days since epoch / 7) with activity, ascending.
    pub activity_weeks: Vec<i64>,
    /// Whether the session can still be used.
    pub active: bool,
    /// Set when `active` went false.
    pub revoked: Option<RevocationReason>,
    /// Optimistic-concurrency version.
    pub version: u64,
}

impl Session {
    /// Whether the session accepts tokens at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.expires_at
    }

    fn record_activity(&mut self, now: DateTime<Utc>) {
        self.last_seen_at = now;
        let week = week_index(now);
        if self.activity_weeks.last() != Some(&week) {
            self.activity_weeks.push(week);
            if self.activity_weeks.len() > MAX_ACTIVITY_WEEKS {
                self.activity_weeks.remove(0);
            }
        }
    }

    fn supersede(&mut self, next: Hash256) {
        let previous = std::mem::replace(&mut self.refresh_hash, next);
        self.superseded.push(previous);
        if self.superseded.len() > MAX_SUPERSEDED_HASHES {
            self.superseded.remove(0);
        }
    }
}

/// Whole weeks since the Unix epoch.
pub fn week_index(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(7 * 24 * 60 * 60)
}

/// Storage for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session.
    async fn insert(&self, session: &Session) -> Result<()>;

    /// Load a session by id.
    async fn get(&self, id: &SessionId) -> Result<Option<Session>>;

    /// Write `session` if the stored version equals `expected_version`.
    ///
    /// The stored copy receives `expected_version + 1`.
    async fn update_if_version(&self, session: &Session, expected_version: u64) -> Result<bool>;

    /// All sessions of an identity, active or not.
    async fn list_for_identity(&self, identity: &IdentityId) -> Result<Vec<Session>>;
}

/// Claims sealed inside an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Authenticated identity.
    pub subject: IdentityId,
    /// Session the token belongs to.
    pub session: SessionId,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
}

/// Tokens handed to the client.
#[derive(Clone)]
pub struct TokenPair {
    /// Session id.
    pub session_id: SessionId,
    /// Signed access token.
    pub access_token: String,
    /// Access-token expiry.
    pub access_expires_at: DateTime<Utc>,
    /// Opaque refresh token.
    pub refresh_token: String,
    /// Refresh-token expiry.
    pub refresh_expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("session_id", &self.session_id)
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

fn format_refresh(session: &SessionId, secret: &SecretToken) -> String {
    format!("{}.{}", session.to_hex(), secret.to_hex())
}

fn parse_refresh(token: &str) -> Option<(SessionId, SecretToken)> {
    let (id, secret) = token.trim().split_once('.')?;
    let id = SessionId::from_hex(id).ok()?;
    let secret = SecretToken::from_hex(secret).ok()?;
    Some((id, secret))
}

/// Issues, rotates and revokes sessions.
pub struct SessionIssuer {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    key: SigningKey,
    policy: SessionPolicy,
}

impl std::fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIssuer")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SessionIssuer {
    /// Create an issuer signing access tokens with `key`.
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        key: SigningKey,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            key,
            policy,
        }
    }

    /// Open a session for `identity` on `device`.
    pub async fn issue(&self, identity: IdentityId, device: DeviceFingerprint) -> Result<TokenPair> {
        let now = self.clock.now();
        let secret = SecretToken::generate();
        let mut session = Session {
            id: SessionId::generate(),
            identity,
            refresh_hash: secret.digest(),
            superseded: Vec::new(),
            device,
            created_at: now,
            expires_at: now + self.policy.refresh_ttl,
            last_seen_at: now,
            activity_weeks: Vec::new(),
            active: true,
            revoked: None,
            version: 0,
        };
        session.record_activity(now);
        self.store.insert(&session).await?;

        info!(identity = %identity, session = %session.id, "session issued");
        self.token_pair(&session, &secret, now)
    }

    /// Rotate a refresh token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthorized` for malformed, unknown, expired or
    /// revoked tokens. A well-formed token for a live session whose secret is
    /// not the current one additionally revokes the session, however many
    /// rotations ago it was superseded.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let (session_id, secret) = parse_refresh(refresh_token).ok_or(AuthError::Unauthorized)?;
        let presented = secret.digest();
        let now = self.clock.now();

        let Some(mut session) = self.store.get(&session_id).await? else {
            return Err(AuthError::Unauthorized);
        };
        if !session.is_live(now) {
            return Err(AuthError::Unauthorized);
        }

        if session.refresh_hash != presented {
            warn!(
                identity = %session.identity,
                session = %session.id,
                recent = session.superseded.contains(&presented),
                "stale refresh token presented, revoking session"
            );
            self.revoke_session(&session_id, RevocationReason::ReplayDetected)
                .await?;
            return Err(AuthError::Unauthorized);
        }

        let expected = session.version;
        let next_secret = SecretToken::generate();
        session.supersede(next_secret.digest());
        session.expires_at = now + self.policy.refresh_ttl;
        session.record_activity(now);

        if !self.store.update_if_version(&session, expected).await? {
            warn!(
                identity = %session.identity,
                session = %session.id,
                "concurrent refresh with the same token, revoking session"
            );
            self.revoke_session(&session_id, RevocationReason::ReplayDetected)
                .await?;
            return Err(AuthError::Unauthorized);
        }
        session.version = expected + 1;

        debug!(session = %session.id, "refresh token rotated");
        self.token_pair(&session, &next_secret, now)
    }

    /// Revoke the session a refresh token belongs to.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthorized` if the token does not match the
    /// session's current or a superseded secret.
    pub async fn revoke_token(&self, refresh_token: &str) -> Result<()> {
        let (session_id, secret) = parse_refresh(refresh_token).ok_or(AuthError::Unauthorized)?;
        let presented = secret.digest();
        let session = self
            .store
            .get(&session_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if session.refresh_hash != presented && !session.superseded.contains(&presented) {
            return Err(AuthError::Unauthorized);
        }
        self.revoke_session(&session_id, RevocationReason::SignedOut)
            .await
            .map(|_| ())
    }

    /// Mark a session inactive. Idempotent.
    ///
    /// Returns `true` if this call changed the session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthorized` if the session does not exist.
    pub async fn revoke_session(&self, id: &SessionId, reason: RevocationReason) -> Result<bool> {
        for _ in 0..MAX_REVOKE_RETRIES {
            let mut session = self.store.get(id).await?.ok_or(AuthError::Unauthorized)?;
            if !session.active {
                return Ok(false);
            }
            let expected = session.version;
            session.active = false;
            session.revoked = Some(reason);
            if self.store.update_if_version(&session, expected).await? {
                info!(identity = %session.identity, session = %id, ?reason, "session revoked");
                return Ok(true);
            }
        }
        Err(AuthError::Conflict(format!("session {} kept changing", id)))
    }

    /// Revoke every active session of `identity`. Returns how many changed.
    pub async fn revoke_all(&self, identity: &IdentityId) -> Result<usize> {
        let mut revoked = 0;
        for session in self.store.list_for_identity(identity).await? {
            if session.active
                && self
                    .revoke_session(&session.id, RevocationReason::RevokedAll)
                    .await?
            {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    /// Sessions of `identity`, newest first.
    pub async fn list_sessions(&self, identity: &IdentityId) -> Result<Vec<Session>> {
        let mut sessions = self.store.list_for_identity(identity).await?;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Verify an access token and its session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthorized` for a bad signature, an expired
    /// token or an inactive session.
    pub async fn authenticate(&self, access_token: &str) -> Result<AccessClaims> {
        let payload = open_envelope(&self.key, access_token).map_err(|_| AuthError::Unauthorized)?;
        let claims: AccessClaims =
            bincode::deserialize(&payload).map_err(|_| AuthError::Unauthorized)?;

        let now = self.clock.now();
        if now >= claims.expires_at {
            return Err(AuthError::Unauthorized);
        }

        let session = self
            .store
            .get(&claims.session)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !session.is_live(now) || session.identity != claims.subject {
            return Err(AuthError::Unauthorized);
        }
        Ok(claims)
    }

    fn token_pair(&self, session: &Session, secret: &SecretToken, now: DateTime<Utc>) -> Result<TokenPair> {
        let claims = AccessClaims {
            subject: session.identity,
            session: session.id,
            expires_at: now + self.policy.access_ttl,
        };
        let payload = bincode::serialize(&claims)
            .map_err(|e| AuthError::Storage(format!("Failed to encode access claims: {}", e)))?;
        Ok(TokenPair {
            session_id: session.id,
            access_token: seal_envelope(&self.key, &payload),
            access_expires_at: claims.expires_at,
            refresh_token: format_refresh(&session.id, secret),
            refresh_expires_at: session.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySessionStore;
    use vouch_identity::ManualClock;

    fn setup() -> (SessionIssuer, ManualClock, Arc<InMemorySessionStore>) {
        let clock = ManualClock::new(DateTime::from_timestamp(1_750_000_000, 0).unwrap());
        let store = Arc::new(InMemorySessionStore::new());
        let issuer = SessionIssuer::new(
            store.clone(),
            Arc::new(clock.clone()),
            SigningKey::generate(),
            SessionPolicy::default(),
        );
        (issuer, clock, store)
    }

    fn device() -> DeviceFingerprint {
        DeviceFingerprint::new("device-1", "192.0.2.10".parse().unwrap())
    }

    #[tokio::test]
    async fn test_issue_and_authenticate() {
        let (issuer, _, _) = setup();
        let who = IdentityId::generate();
        let pair = issuer.issue(who, device()).await.unwrap();

        let claims = issuer.authenticate(&pair.access_token).await.unwrap();
        assert_eq!(claims.subject, who);
        assert_eq!(claims.session, pair.session_id);
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let (issuer, _, _) = setup();
        let pair = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        let next = issuer.refresh(&pair.refresh_token).await.unwrap();

        assert_ne!(next.refresh_token, pair.refresh_token);
        assert_eq!(next.session_id, pair.session_id);
        assert!(issuer.refresh(&next.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_replayed_token_revokes_session() {
        let (issuer, _, store) = setup();
        let pair = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        let next = issuer.refresh(&pair.refresh_token).await.unwrap();

        assert!(matches!(
            issuer.refresh(&pair.refresh_token).await,
            Err(AuthError::Unauthorized)
        ));
        let session = store.get(&pair.session_id).await.unwrap().unwrap();
        assert!(!session.active);
        assert_eq!(session.revoked, Some(RevocationReason::ReplayDetected));

        assert!(issuer.refresh(&next.refresh_token).await.is_err());
        assert!(issuer.authenticate(&next.access_token).await.is_err());
    }

    #[tokio::test]
    async fn test_long_superseded_token_still_revokes() {
        let (issuer, _, store) = setup();
        let first = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        let mut current = first.refresh_token.clone();
        for _ in 0..=MAX_SUPERSEDED_HASHES {
            current = issuer.refresh(&current).await.unwrap().refresh_token;
        }

        assert!(matches!(
            issuer.refresh(&first.refresh_token).await,
            Err(AuthError::Unauthorized)
        ));
        let session = store.get(&first.session_id).await.unwrap().unwrap();
        assert!(!session.active);
        assert_eq!(session.revoked, Some(RevocationReason::ReplayDetected));
        assert!(issuer.refresh(&current).await.is_err());
    }

    #[tokio::test]
    async fn test_mismatched_secret_revokes() {
        let (issuer, _, store) = setup();
        let pair = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        let forged = format_refresh(&pair.session_id, &SecretToken::generate());

        assert!(issuer.refresh(&forged).await.is_err());
        let session = store.get(&pair.session_id).await.unwrap().unwrap();
        assert_eq!(session.revoked, Some(RevocationReason::ReplayDetected));
    }

    #[tokio::test]
    async fn test_malformed_or_unknown_session_leaves_sessions_alone() {
        let (issuer, _, store) = setup();
        let pair = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        let elsewhere = format_refresh(&SessionId::generate(), &SecretToken::generate());

        assert!(issuer.refresh("garbage").await.is_err());
        assert!(issuer.refresh(&elsewhere).await.is_err());
        assert!(store.get(&pair.session_id).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_recent_token_can_sign_out() {
        let (issuer, _, store) = setup();
        let pair = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        issuer.refresh(&pair.refresh_token).await.unwrap();

        issuer.revoke_token(&pair.refresh_token).await.unwrap();
        let session = store.get(&pair.session_id).await.unwrap().unwrap();
        assert_eq!(session.revoked, Some(RevocationReason::SignedOut));
    }

    #[tokio::test]
    async fn test_revoke_then_refresh_fails() {
        let (issuer, _, _) = setup();
        let pair = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        issuer.revoke_token(&pair.refresh_token).await.unwrap();

        assert!(matches!(
            issuer.refresh(&pair.refresh_token).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(issuer.authenticate(&pair.access_token).await.is_err());
        assert!(!issuer
            .revoke_session(&pair.session_id, RevocationReason::SignedOut)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_access_token_expires() {
        let (issuer, clock, _) = setup();
        let pair = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        clock.advance(Duration::minutes(DEFAULT_ACCESS_TTL_MINUTES));
        assert!(issuer.authenticate(&pair.access_token).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_token_expires() {
        let (issuer, clock, _) = setup();
        let pair = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        clock.advance(Duration::days(DEFAULT_REFRESH_TTL_DAYS));
        assert!(issuer.refresh(&pair.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_tampered_access_token_rejected() {
        let (issuer, _, _) = setup();
        let pair = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        let mut tampered = pair.access_token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert!(issuer.authenticate(&tampered).await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_all_and_activity_weeks() {
        let (issuer, clock, _) = setup();
        let who = IdentityId::generate();
        let first = issuer.issue(who, device()).await.unwrap();
        clock.advance(Duration::weeks(1));
        issuer.refresh(&first.refresh_token).await.unwrap();
        issuer.issue(who, device()).await.unwrap();

        let sessions = issuer.list_sessions(&who).await.unwrap();
        assert_eq!(sessions.len(), 2);
        let oldest = sessions.last().unwrap();
        assert_eq!(oldest.activity_weeks.len(), 2);

        assert_eq!(issuer.revoke_all(&who).await.unwrap(), 2);
        assert_eq!(issuer.revoke_all(&who).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_single_winner() {
        let (issuer, _, store) = setup();
        let pair = issuer.issue(IdentityId::generate(), device()).await.unwrap();
        let issuer = Arc::new(issuer);

        let attempts = (0..4).map(|_| {
            let issuer = issuer.clone();
            let token = pair.refresh_token.clone();
            async move { issuer.refresh(&token).await.is_ok() }
        });
        let results = futures::future::join_all(attempts).await;
        assert!(results.iter().filter(|ok| **ok).count() <= 1);
        let session = store.get(&pair.session_id).await.unwrap().unwrap();
        if results.iter().filter(|ok| **ok).count() == 0 {
            assert!(!session.active);
        }
    }
}
