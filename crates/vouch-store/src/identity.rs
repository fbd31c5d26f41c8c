//! [`IdentityDirectory`] on sled.
//!
//! Email and username indexes map the normalized value to the identity id.
//! The signup index holds `d:<device id>\0<id>` and `i:<ip>\0<id>` keys and
//! is written once, at insert.

use std::collections::BTreeSet;
use std::net::IpAddr;

use async_trait::async_trait;
use sled::transaction::{abort, TransactionalTree};
use sled::Transactional;
use vouch_identity::{EmailAddress, Identity, IdentityDirectory, IdentityError, IdentityId, Result};

use crate::codec::{decode, key, settle, txn_decode, txn_encode};
use crate::sled_store::SledStore;
use crate::StoreError;

fn device_prefix(device_id: &str) -> Vec<u8> {
    key(&[b"d:", device_id.as_bytes(), b"\0"])
}

fn ip_prefix(ip: IpAddr) -> Vec<u8> {
    key(&[b"i:", ip.to_string().as_bytes(), b"\0"])
}

fn username_key(identity: &Identity) -> Option<Vec<u8>> {
    identity
        .username
        .as_ref()
        .map(|u| u.normalized().into_bytes())
}

/// Point `index[value]` at `id`, aborting if another identity holds it.
fn claim(
    index: &TransactionalTree,
    value: &[u8],
    id: &IdentityId,
    taken: impl Fn() -> String,
) -> std::result::Result<(), sled::transaction::ConflictableTransactionError<IdentityError>> {
    if let Some(owner) = index.get(value)? {
        if owner[..] != id.as_bytes()[..] {
            return abort(IdentityError::AlreadyExists(taken()));
        }
        return Ok(());
    }
    index.insert(value, id.as_bytes().as_slice())?;
    Ok(())
}

#[async_trait]
impl IdentityDirectory for SledStore {
    async fn get(&self, id: &IdentityId) -> Result<Option<Identity>> {
        match self.identities.get(id.as_bytes()).map_err(StoreError::from)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<Identity>> {
        let Some(id) = self
            .identity_emails
            .get(email.as_str().as_bytes())
            .map_err(StoreError::from)?
        else {
            return Ok(None);
        };
        let id = IdentityId::from_slice(&id)
            .map_err(|e| StoreError::Corruption(format!("email index: {}", e)))?;
        self.get(&id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>> {
        let normalized = username.trim().trim_start_matches('@').to_ascii_lowercase();
        if normalized.is_empty() {
            return Ok(None);
        }
        let Some(id) = self
            .identity_usernames
            .get(normalized.as_bytes())
            .map_err(StoreError::from)?
        else {
            return Ok(None);
        };
        let id = IdentityId::from_slice(&id)
            .map_err(|e| StoreError::Corruption(format!("username index: {}", e)))?;
        self.get(&id).await
    }

    async fn insert(&self, identity: &Identity) -> Result<()> {
        let id_key = identity.id.as_bytes();
        let email_key = identity.email.as_str().as_bytes();
        let name_key = username_key(identity);
        let signup_keys: Vec<Vec<u8>> = identity
            .signup
            .device
            .as_ref()
            .map(|d| {
                let mut keys = vec![key(&[ip_prefix(d.ip).as_slice(), id_key])];
                if !d.device_id.is_empty() {
                    keys.push(key(&[device_prefix(&d.device_id).as_slice(), id_key]));
                }
                keys
            })
            .unwrap_or_default();

        let result = (
            &self.identities,
            &self.identity_emails,
            &self.identity_usernames,
            &self.identity_signups,
        )
            .transaction(|(rows, emails, names, signups)| {
                if rows.get(id_key)?.is_some() {
                    return abort(IdentityError::AlreadyExists(identity.id.to_hex()));
                }
                if emails.get(email_key)?.is_some() {
                    return abort(IdentityError::AlreadyExists(identity.email.to_string()));
                }
                if let Some(name) = &name_key {
                    claim(names, name, &identity.id, || {
                        String::from_utf8_lossy(name).into_owned()
                    })?;
                }
                emails.insert(email_key, id_key.as_slice())?;
                for k in &signup_keys {
                    signups.insert(k.as_slice(), &b""[..])?;
                }
                rows.insert(id_key.as_slice(), txn_encode::<_, IdentityError>(identity)?)?;
                Ok(())
            });
        settle(result)
    }

    async fn update_if_version(&self, identity: &Identity, expected_version: u64) -> Result<bool> {
        let id_key = identity.id.as_bytes();
        let result = (
            &self.identities,
            &self.identity_emails,
            &self.identity_usernames,
        )
            .transaction(|(rows, emails, names)| {
                let Some(bytes) = rows.get(id_key)? else {
                    return abort(IdentityError::NotFound(identity.id.to_hex()));
                };
                let current: Identity = txn_decode(&bytes)?;
                if current.version != expected_version {
                    return Ok(false);
                }

                if current.email != identity.email {
                    claim(emails, identity.email.as_str().as_bytes(), &identity.id, || {
                        identity.email.to_string()
                    })?;
                    emails.remove(current.email.as_str().as_bytes())?;
                }
                let (old_name, new_name) = (username_key(&current), username_key(identity));
                if old_name != new_name {
                    if let Some(name) = &new_name {
                        claim(names, name, &identity.id, || {
                            String::from_utf8_lossy(name).into_owned()
                        })?;
                    }
                    if let Some(name) = &old_name {
                        names.remove(name.as_slice())?;
                    }
                }

                let mut next = identity.clone();
                next.version = expected_version + 1;
                rows.insert(id_key.as_slice(), txn_encode::<_, IdentityError>(&next)?)?;
                Ok(true)
            });
        settle(result)
    }

    async fn list_ids(&self) -> Result<Vec<IdentityId>> {
        let mut ids = Vec::with_capacity(self.identities.len());
        for entry in self.identities.iter().keys() {
            let k = entry.map_err(StoreError::from)?;
            ids.push(
                IdentityId::from_slice(&k)
                    .map_err(|e| StoreError::Corruption(format!("identity key: {}", e)))?,
            );
        }
        Ok(ids)
    }

    async fn find_by_signup(&self, device_id: &str, ip: IpAddr) -> Result<Vec<Identity>> {
        let mut prefixes = vec![ip_prefix(ip)];
        if !device_id.is_empty() {
            prefixes.push(device_prefix(device_id));
        }

        let mut ids = BTreeSet::new();
        for prefix in prefixes {
            for entry in self.identity_signups.scan_prefix(&prefix).keys() {
                let k = entry.map_err(StoreError::from)?;
                let id = IdentityId::from_slice(&k[prefix.len()..])
                    .map_err(|e| StoreError::Corruption(format!("signup index: {}", e)))?;
                ids.insert(id);
            }
        }

        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(identity) = self.get(&id).await? {
                found.push(identity);
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use vouch_identity::{modify_identity, DeviceFingerprint, SignupMetadata, Username};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    fn make(email: &str) -> Identity {
        Identity::new(EmailAddress::parse(email).unwrap(), SignupMetadata::default(), t0())
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = SledStore::temporary().unwrap();
        let alice = make("alice@example.com").with_username(Username::new("Alice").unwrap());
        store.insert(&alice).await.unwrap();

        assert_eq!(store.get(&alice.id).await.unwrap().unwrap(), alice);
        let email = EmailAddress::parse("ALICE@example.com").unwrap();
        assert_eq!(store.find_by_email(&email).await.unwrap().unwrap().id, alice.id);
        assert_eq!(store.find_by_username("@alice").await.unwrap().unwrap().id, alice.id);
        assert!(store.find_by_username("bob").await.unwrap().is_none());
        assert_eq!(store.list_ids().await.unwrap(), vec![alice.id]);
    }

    #[tokio::test]
    async fn test_duplicate_email_and_username_rejected() {
        let store = SledStore::temporary().unwrap();
        store
            .insert(&make("a@x.com").with_username(Username::new("taken").unwrap()))
            .await
            .unwrap();

        let err = store.insert(&make("a@x.com")).await.unwrap_err();
        assert!(matches!(err, IdentityError::AlreadyExists(_)));
        let err = store
            .insert(&make("b@x.com").with_username(Username::new("TAKEN").unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::AlreadyExists(_)));
        assert_eq!(store.identity_count(), 1);
    }

    #[tokio::test]
    async fn test_update_if_version_is_compare_and_swap() {
        let store = SledStore::temporary().unwrap();
        let mut alice = make("a@x.com");
        store.insert(&alice).await.unwrap();

        alice.flags.email_verified = true;
        assert!(store.update_if_version(&alice, 0).await.unwrap());
        assert!(!store.update_if_version(&alice, 0).await.unwrap());
        let stored = store.get(&alice.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.flags.email_verified);

        let ghost = make("ghost@x.com");
        let err = store.update_if_version(&ghost, 0).await.unwrap_err();
        assert!(matches!(err, IdentityError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_username_change_moves_index() {
        let store = SledStore::temporary().unwrap();
        let alice = make("a@x.com").with_username(Username::new("first").unwrap());
        store.insert(&alice).await.unwrap();

        modify_identity(&store, &alice.id, |i| {
            i.username = Some(Username::new("second").unwrap());
            Ok(true)
        })
        .await
        .unwrap();

        assert!(store.find_by_username("first").await.unwrap().is_none());
        assert_eq!(store.find_by_username("second").await.unwrap().unwrap().id, alice.id);
    }

    #[tokio::test]
    async fn test_concurrent_modify_keeps_both_writes() {
        let store = SledStore::temporary().unwrap();
        let alice = make("a@x.com");
        store.insert(&alice).await.unwrap();

        let (a, b) = futures::join!(
            modify_identity(&store, &alice.id, |i| {
                i.flags.email_verified = true;
                Ok(true)
            }),
            modify_identity(&store, &alice.id, |i| {
                i.flags.second_factor = true;
                Ok(true)
            }),
        );
        a.unwrap();
        b.unwrap();
        let stored = store.get(&alice.id).await.unwrap().unwrap();
        assert!(stored.flags.email_verified && stored.flags.second_factor);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_find_by_signup_matches_device_or_ip() {
        let store = SledStore::temporary().unwrap();
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        for (email, device) in [("a@x.com", "dev-1"), ("b@x.com", "dev-2")] {
            let signup = SignupMetadata {
                device: Some(DeviceFingerprint::new(device, ip)),
                source: None,
            };
            store
                .insert(&Identity::new(EmailAddress::parse(email).unwrap(), signup, t0()))
                .await
                .unwrap();
        }
        store.insert(&make("c@x.com")).await.unwrap();

        assert_eq!(store.find_by_signup("dev-1", ip).await.unwrap().len(), 2);
        let other: IpAddr = "198.51.100.1".parse().unwrap();
        assert_eq!(store.find_by_signup("dev-2", other).await.unwrap().len(), 1);
        assert!(store.find_by_signup("", other).await.unwrap().is_empty());
    }
}
