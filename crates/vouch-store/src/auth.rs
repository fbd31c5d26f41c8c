//! One-time codes, rate-limit windows and sessions on sled.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sled::transaction::abort;
use sled::Transactional;
use vouch_auth::{
    AuthError, OneTimeCode, OtpStore, RateLimitDecision, RateLimitWindow, RateLimiter, Result,
    Session, SessionId, SessionStore,
};
use vouch_identity::{EmailAddress, IdentityId};

use crate::codec::{
    decode, load_indexed, owned_key, read_modify_write, remove_if, settle, txn_encode,
    update_if_version,
};
use crate::sled_store::SledStore;
use crate::StoreError;

#[async_trait]
impl OtpStore for SledStore {
    async fn replace(&self, code: &OneTimeCode) -> Result<()> {
        read_modify_write::<OneTimeCode, _, _>(&self.otp_codes, code.email.as_str().as_bytes(), |current| {
            let mut stored = code.clone();
            stored.version = current.map_or(0, |c| c.version + 1);
            Ok(((), Some(stored)))
        })?;
        Ok(())
    }

    async fn latest(&self, email: &EmailAddress) -> Result<Option<OneTimeCode>> {
        match self
            .otp_codes
            .get(email.as_str().as_bytes())
            .map_err(StoreError::from)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update_if_version(&self, code: &OneTimeCode, expected_version: u64) -> Result<bool> {
        let written =
            update_if_version(&self.otp_codes, code.email.as_str().as_bytes(), code, expected_version)?;
        Ok(written.unwrap_or(false))
    }

    async fn remove_if_current(&self, code: &OneTimeCode) -> Result<bool> {
        let removed = remove_if::<OneTimeCode, _>(
            &self.otp_codes,
            code.email.as_str().as_bytes(),
            |stored| stored.salt == code.salt,
        )?;
        Ok(removed)
    }
}

#[async_trait]
impl RateLimiter for SledStore {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        length: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        let decision = read_modify_write::<RateLimitWindow, _, _>(
            &self.rate_limits,
            key.as_bytes(),
            |current| Ok(RateLimitWindow::apply(current.as_ref(), key, limit, length, now)),
        )?;
        Ok(decision)
    }

    async fn window(&self, key: &str) -> Result<Option<RateLimitWindow>> {
        match self.rate_limits.get(key.as_bytes()).map_err(StoreError::from)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for SledStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let id_key = session.id.as_bytes();
        let index_key = owned_key(session.identity.as_bytes(), session.created_at, id_key);
        let result = (&self.sessions, &self.sessions_by_identity).transaction(|(rows, index)| {
            if rows.get(id_key)?.is_some() {
                return abort(AuthError::Storage(format!(
                    "Session {} already exists",
                    session.id
                )));
            }
            rows.insert(id_key.as_slice(), txn_encode::<_, AuthError>(session)?)?;
            index.insert(index_key.as_slice(), &b""[..])?;
            Ok(())
        });
        settle(result)
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>> {
        match self.sessions.get(id.as_bytes()).map_err(StoreError::from)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update_if_version(&self, session: &Session, expected_version: u64) -> Result<bool> {
        let written =
            update_if_version(&self.sessions, session.id.as_bytes(), session, expected_version)?;
        Ok(written.unwrap_or(false))
    }

    async fn list_for_identity(&self, identity: &IdentityId) -> Result<Vec<Session>> {
        Ok(load_indexed(
            &self.sessions_by_identity,
            identity.as_bytes(),
            &self.sessions,
            SessionId::SIZE,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use vouch_crypto::{Hash256, Salt};
    use vouch_identity::DeviceFingerprint;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    fn code(email: &EmailAddress, secret: &str) -> OneTimeCode {
        let salt = Salt::generate();
        OneTimeCode {
            email: email.clone(),
            code_hash: Hash256::salted(&salt, secret.as_bytes()),
            salt,
            created_at: t0(),
            expires_at: t0() + Duration::minutes(5),
            attempts: 0,
            consumed: false,
            version: 0,
        }
    }

    fn session(identity: IdentityId, at: DateTime<Utc>) -> Session {
        Session {
            id: SessionId::generate(),
            identity,
            refresh_hash: Hash256::hash(b"refresh"),
            superseded: Vec::new(),
            device: DeviceFingerprint::new("dev-1", "10.0.0.1".parse::<IpAddr>().unwrap()),
            created_at: at,
            expires_at: at + Duration::days(30),
            last_seen_at: at,
            activity_weeks: vec![vouch_auth::week_index(at)],
            active: true,
            revoked: None,
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_replace_bumps_version_and_supersedes() {
        let store = SledStore::temporary().unwrap();
        let email = EmailAddress::parse("a@x.com").unwrap();

        store.replace(&code(&email, "111111")).await.unwrap();
        store.replace(&code(&email, "222222")).await.unwrap();
        let latest = store.latest(&email).await.unwrap().unwrap();
        assert_eq!(latest.version, 1);
        assert!(latest.code_hash.matches_salted(&latest.salt, b"222222"));

        let superseded = code(&email, "111111");
        assert!(!store.remove_if_current(&superseded).await.unwrap());
        assert!(store.latest(&email).await.unwrap().is_some());

        assert!(store.remove_if_current(&latest).await.unwrap());
        assert!(store.latest(&email).await.unwrap().is_none());
        assert!(!store.remove_if_current(&latest).await.unwrap());
    }

    #[tokio::test]
    async fn test_code_update_is_conditional() {
        let store = SledStore::temporary().unwrap();
        let email = EmailAddress::parse("a@x.com").unwrap();
        let mut stored = code(&email, "111111");
        store.replace(&stored).await.unwrap();

        stored.consumed = true;
        assert!(OtpStore::update_if_version(&store, &stored, 0).await.unwrap());
        assert!(!OtpStore::update_if_version(&store, &stored, 0).await.unwrap());

        let missing = code(&EmailAddress::parse("b@x.com").unwrap(), "1");
        assert!(!OtpStore::update_if_version(&store, &missing, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_rate_limit_window() {
        let store = SledStore::temporary().unwrap();
        let length = Duration::minutes(15);
        for remaining in [2, 1, 0] {
            let decision = store
                .check_and_increment("a@x.com", 3, length, t0())
                .await
                .unwrap();
            assert_eq!(decision, RateLimitDecision::Allowed { remaining });
        }
        let limited = store
            .check_and_increment("a@x.com", 3, length, t0() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(limited, RateLimitDecision::Limited { retry_after_secs: 600 });
        assert_eq!(store.window("a@x.com").await.unwrap().unwrap().count, 3);

        let reopened = store
            .check_and_increment("a@x.com", 3, length, t0() + length)
            .await
            .unwrap();
        assert!(reopened.is_allowed());
        assert_eq!(store.window("a@x.com").await.unwrap().unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_exceed_limit() {
        let store = SledStore::temporary().unwrap();
        let attempts = (0..10).map(|_| {
            store.check_and_increment("k", 3, Duration::minutes(15), t0())
        });
        let allowed = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|d| d.as_ref().unwrap().is_allowed())
            .count();
        assert_eq!(allowed, 3);
    }

    #[tokio::test]
    async fn test_sessions_listed_per_identity_in_creation_order() {
        let store = SledStore::temporary().unwrap();
        let alice = IdentityId::generate();
        let later = session(alice, t0() + Duration::hours(1));
        let earlier = session(alice, t0());
        SessionStore::insert(&store, &later).await.unwrap();
        SessionStore::insert(&store, &earlier).await.unwrap();
        SessionStore::insert(&store, &session(IdentityId::generate(), t0()))
            .await
            .unwrap();

        let listed = store.list_for_identity(&alice).await.unwrap();
        assert_eq!(
            listed.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![earlier.id, later.id]
        );
        assert!(SessionStore::insert(&store, &earlier).await.is_err());
    }

    #[tokio::test]
    async fn test_session_update_is_conditional() {
        let store = SledStore::temporary().unwrap();
        let mut s = session(IdentityId::generate(), t0());
        SessionStore::insert(&store, &s).await.unwrap();

        s.active = false;
        assert!(SessionStore::update_if_version(&store, &s, 0).await.unwrap());
        assert!(!SessionStore::update_if_version(&store, &s, 0).await.unwrap());
        let stored = SessionStore::get(&store, &s.id).await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.version, 1);
    }
}
