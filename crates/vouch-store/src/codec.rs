//! Value encoding, key layout and conditional writes shared by every tree.
//!
//! Values are bincode. Secondary index keys are concatenations of fixed-width
//! parts, so a prefix scan over an owner id returns that owner's rows in
//! timestamp order.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use sled::{IVec, Tree};

use crate::{Result, StoreError};

/// Conditional-write retries before giving up on a hot key.
const MAX_CAS_SPINS: usize = 64;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| StoreError::Corruption(format!("undecodable value: {}", e)))
}

/// Concatenate key parts.
pub(crate) fn key(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Big-endian microseconds with the sign bit flipped, so byte order matches
/// time order across the epoch.
pub(crate) fn time_key(at: DateTime<Utc>) -> [u8; 8] {
    ((at.timestamp_micros() as u64) ^ (1 << 63)).to_be_bytes()
}

/// Index key `owner ++ time ++ id`, ordering an owner's rows by time.
pub(crate) fn owned_key(owner: &[u8], at: DateTime<Utc>, id: &[u8]) -> Vec<u8> {
    key(&[owner, time_key(at).as_slice(), id])
}

/// Rows with an optimistic-concurrency version.
pub(crate) trait Versioned: Clone + Serialize + DeserializeOwned {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

macro_rules! versioned {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Versioned for $ty {
                fn version(&self) -> u64 {
                    self.version
                }

                fn set_version(&mut self, version: u64) {
                    self.version = version;
                }
            }
        )*
    };
}

versioned!(
    vouch_identity::Identity,
    vouch_auth::Session,
    vouch_auth::OneTimeCode,
    vouch_evidence::EvidenceRecord,
    vouch_reputation::RiskSignal,
    vouch_reputation::Report,
    vouch_reputation::MutualVerification,
);

/// Replace the row at `key` if its stored version equals `expected`.
///
/// Returns `None` when the row does not exist. The stored copy receives
/// `expected + 1`.
pub(crate) fn update_if_version<T: Versioned>(
    tree: &Tree,
    key: &[u8],
    record: &T,
    expected: u64,
) -> Result<Option<bool>> {
    for _ in 0..MAX_CAS_SPINS {
        let Some(current) = tree.get(key)? else {
            return Ok(None);
        };
        let stored: T = decode(&current)?;
        if stored.version() != expected {
            return Ok(Some(false));
        }
        let mut next = record.clone();
        next.set_version(expected + 1);
        if tree
            .compare_and_swap(key, Some(&current), Some(encode(&next)?))?
            .is_ok()
        {
            return Ok(Some(true));
        }
    }
    Ok(Some(false))
}

/// Delete the row at `key` if `matches` accepts its stored value.
///
/// Returns whether the row was deleted.
pub(crate) fn remove_if<T, F>(tree: &Tree, key: &[u8], matches: F) -> Result<bool>
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    for _ in 0..MAX_CAS_SPINS {
        let Some(current) = tree.get(key)? else {
            return Ok(false);
        };
        if !matches(&decode::<T>(&current)?) {
            return Ok(false);
        }
        if tree
            .compare_and_swap(key, Some(&current), None as Option<IVec>)?
            .is_ok()
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Read-modify-write of a single key with compare-and-swap retries.
///
/// `change` sees the current value and returns the caller's result plus the
/// value to store, or `None` to leave the key untouched.
pub(crate) fn read_modify_write<T, R, F>(tree: &Tree, key: &[u8], mut change: F) -> Result<R>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(Option<T>) -> Result<(R, Option<T>)>,
{
    loop {
        let old: Option<IVec> = tree.get(key)?;
        let current = old.as_deref().map(decode::<T>).transpose()?;
        let (result, next) = change(current)?;
        let Some(next) = next else {
            return Ok(result);
        };
        if tree
            .compare_and_swap(key, old.as_ref(), Some(encode(&next)?))?
            .is_ok()
        {
            return Ok(result);
        }
        tracing::trace!("compare-and-swap lost a race, retrying");
    }
}

/// Decode inside a transaction, aborting with the caller's error type.
pub(crate) fn txn_decode<T, E>(bytes: &[u8]) -> std::result::Result<T, ConflictableTransactionError<E>>
where
    T: DeserializeOwned,
    E: From<StoreError>,
{
    decode(bytes).map_err(|e| ConflictableTransactionError::Abort(E::from(e)))
}

/// Encode inside a transaction, aborting with the caller's error type.
pub(crate) fn txn_encode<T, E>(value: &T) -> std::result::Result<Vec<u8>, ConflictableTransactionError<E>>
where
    T: Serialize,
    E: From<StoreError>,
{
    encode(value).map_err(|e| ConflictableTransactionError::Abort(E::from(e)))
}

/// Flatten a transaction result into the caller's error type.
pub(crate) fn settle<T, E: From<StoreError>>(result: TransactionResult<T, E>) -> std::result::Result<T, E> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => E::from(StoreError::from(e)),
    })
}

/// Load every row named by the ids stored as suffixes of an index prefix scan.
pub(crate) fn load_indexed<T: DeserializeOwned>(
    index: &Tree,
    prefix: &[u8],
    rows: &Tree,
    id_len: usize,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for entry in index.scan_prefix(prefix) {
        let (k, _) = entry?;
        if k.len() < id_len {
            return Err(StoreError::Corruption("short index key".to_string()));
        }
        let id = &k[k.len() - id_len..];
        match rows.get(id)? {
            Some(bytes) => out.push(decode(&bytes)?),
            None => {
                return Err(StoreError::Corruption(
                    "index entry points at a missing row".to_string(),
                ))
            }
        }
    }
    Ok(out)
}
