//! Identity repository boundary.
//!
//! [`IdentityDirectory`] is the persistence contract for identities: lookups by
//! primary key, email, username and signup device, plus single-row
//! conditional writes. [`InMemoryDirectory`] backs tests and development.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::email::EmailAddress;
use crate::identity::{Identity, IdentityId};
use crate::{IdentityError, Result};

/// Maximum optimistic-concurrency retries in [`modify_identity`].
pub const MAX_CAS_RETRIES: usize = 8;

/// Persistence contract for identities.
///
/// Implementations must make `insert` unique on both id and email, and
/// `update_if_version` an atomic compare-and-swap on the stored `version`.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Load an identity by id.
    async fn get(&self, id: &IdentityId) -> Result<Option<Identity>>;

    /// Load an identity by normalized email.
    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<Identity>>;

    /// Load an identity by username, ignoring case.
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>>;

    /// Insert a new identity.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::AlreadyExists` if the id or email is taken.
    async fn insert(&self, identity: &Identity) -> Result<()>;

    /// Replace the stored identity if its version equals `expected_version`.
    ///
    /// The stored copy receives `expected_version + 1`. Returns `false` when
    /// another writer got there first.
    async fn update_if_version(&self, identity: &Identity, expected_version: u64) -> Result<bool>;

    /// Ids of every identity, in no particular order.
    async fn list_ids(&self) -> Result<Vec<IdentityId>>;

    /// Identities whose signup fingerprint shares the device id or IP.
    async fn find_by_signup(&self, device_id: &str, ip: IpAddr) -> Result<Vec<Identity>>;
}

/// In-memory [`IdentityDirectory`].
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    inner: RwLock<DirectoryState>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    by_id: HashMap<IdentityId, Identity>,
    by_email: HashMap<EmailAddress, IdentityId>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored identities.
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    /// Whether the directory is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn get(&self, id: &IdentityId) -> Result<Option<Identity>> {
        Ok(self.inner.read().await.by_id.get(id).cloned())
    }

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<Identity>> {
        let state = self.inner.read().await;
        Ok(state
            .by_email
            .get(email)
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>> {
        let state = self.inner.read().await;
        Ok(state
            .by_id
            .values()
            .find(|i| i.username.as_ref().is_some_and(|u| u.matches(username)))
            .cloned())
    }

    async fn insert(&self, identity: &Identity) -> Result<()> {
        let mut state = self.inner.write().await;
        if state.by_id.contains_key(&identity.id) {
            return Err(IdentityError::AlreadyExists(identity.id.to_hex()));
        }
        if state.by_email.contains_key(&identity.email) {
            return Err(IdentityError::AlreadyExists(identity.email.to_string()));
        }
        state.by_email.insert(identity.email.clone(), identity.id);
        state.by_id.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn update_if_version(&self, identity: &Identity, expected_version: u64) -> Result<bool> {
        let mut state = self.inner.write().await;
        let Some(current) = state.by_id.get_mut(&identity.id) else {
            return Err(IdentityError::NotFound(identity.id.to_hex()));
        };
        if current.version != expected_version {
            return Ok(false);
        }
        let mut next = identity.clone();
        next.version = expected_version + 1;
        *current = next;
        Ok(true)
    }

    async fn list_ids(&self) -> Result<Vec<IdentityId>> {
        Ok(self.inner.read().await.by_id.keys().copied().collect())
    }

    async fn find_by_signup(&self, device_id: &str, ip: IpAddr) -> Result<Vec<Identity>> {
        let state = self.inner.read().await;
        Ok(state
            .by_id
            .values()
            .filter(|i| {
                i.signup.device.as_ref().is_some_and(|d| {
                    (!device_id.is_empty() && d.device_id == device_id) || d.ip == ip
                })
            })
            .cloned()
            .collect())
    }
}

/// Resolve a user-supplied identifier to an identity.
///
/// An identifier containing `@` is treated as an email, a 32-character hex
/// string as an [`IdentityId`], anything else as a username.
pub async fn resolve_identifier(
    directory: &dyn IdentityDirectory,
    identifier: &str,
) -> Result<Option<Identity>> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Ok(None);
    }

    if identifier.contains('@') && !identifier.starts_with('@') {
        return match EmailAddress::parse(identifier) {
            Ok(email) => directory.find_by_email(&email).await,
            Err(_) => Ok(None),
        };
    }

    if let Ok(id) = identifier.parse::<IdentityId>() {
        if let Some(found) = directory.get(&id).await? {
            return Ok(Some(found));
        }
    }

    directory.find_by_username(identifier).await
}

/// Apply `change` to an identity with optimistic-concurrency retries.
///
/// The closure runs against a fresh copy on every attempt and returns
/// `Ok(false)` when no write is needed.
///
/// # Errors
///
/// Returns `IdentityError::NotFound` if the identity does not exist,
/// `IdentityError::Conflict` after [`MAX_CAS_RETRIES`] lost races, or any
/// error produced by `change`.
pub async fn modify_identity<F>(
    directory: &dyn IdentityDirectory,
    id: &IdentityId,
    mut change: F,
) -> Result<Identity>
where
    F: FnMut(&mut Identity) -> Result<bool> + Send,
{
    for _ in 0..MAX_CAS_RETRIES {
        let mut identity = directory
            .get(id)
            .await?
            .ok_or_else(|| IdentityError::NotFound(id.to_hex()))?;
        let expected = identity.version;
        if !change(&mut identity)? {
            return Ok(identity);
        }
        if directory.update_if_version(&identity, expected).await? {
            identity.version = expected + 1;
            return Ok(identity);
        }
        tracing::debug!(identity = %id, "identity write lost a race, retrying");
    }
    Err(IdentityError::Conflict(format!(
        "identity {} kept changing during update",
        id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceFingerprint;
    use crate::identity::{AccountStatus, SignupMetadata};
    use crate::username::Username;
    use chrono::Utc;

    fn make(email: &str) -> Identity {
        Identity::new(
            EmailAddress::parse(email).unwrap(),
            SignupMetadata::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let dir = InMemoryDirectory::new();
        let id = make("alice@example.com").with_username(Username::new("alice").unwrap());
        dir.insert(&id).await.unwrap();

        assert_eq!(dir.get(&id.id).await.unwrap().unwrap().id, id.id);
        let email = EmailAddress::parse("ALICE@example.com").unwrap();
        assert!(dir.find_by_email(&email).await.unwrap().is_some());
        assert!(dir.find_by_username("@Alice").await.unwrap().is_some());
        assert_eq!(dir.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let dir = InMemoryDirectory::new();
        dir.insert(&make("a@x.com")).await.unwrap();
        let err = dir.insert(&make("a@x.com")).await.unwrap_err();
        assert!(matches!(err, IdentityError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_if_version_detects_conflict() {
        let dir = InMemoryDirectory::new();
        let mut id = make("a@x.com");
        dir.insert(&id).await.unwrap();

        id.flags.email_verified = true;
        assert!(dir.update_if_version(&id, 0).await.unwrap());
        assert!(!dir.update_if_version(&id, 0).await.unwrap());

        let stored = dir.get(&id.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.flags.email_verified);
    }

    #[tokio::test]
    async fn test_modify_identity_bumps_version() {
        let dir = InMemoryDirectory::new();
        let id = make("a@x.com");
        dir.insert(&id).await.unwrap();

        let updated = modify_identity(&dir, &id.id, |i| {
            i.status = i.status.transition(AccountStatus::UnderReview)?;
            Ok(true)
        })
        .await
        .unwrap();
        assert_eq!(updated.status, AccountStatus::UnderReview);
        assert_eq!(updated.version, 1);

        let unchanged = modify_identity(&dir, &id.id, |_| Ok(false)).await.unwrap();
        assert_eq!(unchanged.version, 1);
    }

    #[tokio::test]
    async fn test_modify_identity_propagates_closure_error() {
        let dir = InMemoryDirectory::new();
        let id = make("a@x.com");
        dir.insert(&id).await.unwrap();

        let err = modify_identity(&dir, &id.id, |i| {
            i.status = i.status.transition(AccountStatus::Active)?;
            Ok(true)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_resolve_identifier_forms() {
        let dir = InMemoryDirectory::new();
        let id = make("bob@x.com").with_username(Username::new("bob_01").unwrap());
        dir.insert(&id).await.unwrap();

        let by_email = resolve_identifier(&dir, " Bob@X.com ").await.unwrap();
        let by_hex = resolve_identifier(&dir, &id.id.to_hex()).await.unwrap();
        let by_name = resolve_identifier(&dir, "@bob_01").await.unwrap();
        assert_eq!(by_email.unwrap().id, id.id);
        assert_eq!(by_hex.unwrap().id, id.id);
        assert_eq!(by_name.unwrap().id, id.id);

        assert!(resolve_identifier(&dir, "nobody").await.unwrap().is_none());
        assert!(resolve_identifier(&dir, "").await.unwrap().is_none());
        assert!(resolve_identifier(&dir, "not an email@").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_signup_matches_device_or_ip() {
        let dir = InMemoryDirectory::new();
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        for (email, device) in [("a@x.com", "dev-1"), ("b@x.com", "dev-2")] {
            let signup = SignupMetadata {
                device: Some(DeviceFingerprint::new(device, ip)),
                source: None,
            };
            dir.insert(&Identity::new(EmailAddress::parse(email).unwrap(), signup, Utc::now()))
                .await
                .unwrap();
        }
        dir.insert(&make("c@x.com")).await.unwrap();

        assert_eq!(dir.find_by_signup("dev-1", ip).await.unwrap().len(), 2);
        let other_ip: IpAddr = "198.51.100.1".parse().unwrap();
        assert_eq!(dir.find_by_signup("dev-2", other_ip).await.unwrap().len(), 1);
        assert!(dir.find_by_signup("", other_ip).await.unwrap().is_empty());
    }
}
