//! BLAKE3 hashing primitives.
//!
//! Provides a 256-bit hash type used for evidence content hashes and for
//! the salted hashes of one-time codes and refresh tokens.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::secret::Salt;
use crate::{CryptoError, Result};

/// A 256-bit (32-byte) hash value using BLAKE3.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Hash size in bytes.
    pub const SIZE: usize = 32;

    /// Create a Hash256 from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(CryptoError::InvalidHashLength {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Get the hash as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to owned byte array.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Hash a single input.
    pub fn hash(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(*hash.as_bytes())
    }

    /// Hash multiple inputs.
    ///
    /// Each input is length-prefixed to prevent ambiguity.
    pub fn hash_many(inputs: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for input in inputs {
            hasher.update(&(input.len() as u64).to_le_bytes());
            hasher.update(input);
        }
        let hash = hasher.finalize();
        Self(*hash.as_bytes())
    }

    /// Create a keyed hash (MAC).
    pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> Self {
        let hash = blake3::keyed_hash(key, data);
        Self(*hash.as_bytes())
    }

    /// Hash a secret together with a per-record salt.
    ///
    /// The salt is expanded into a BLAKE3 key under a fixed context so the
    /// same secret hashed under two salts yields unrelated digests.
    pub fn salted(salt: &Salt, secret: &[u8]) -> Self {
        let key = blake3::derive_key("vouch salted secret v1", salt.as_bytes());
        Self::keyed_hash(&key, secret)
    }

    /// Check whether `secret` hashes to `self` under `salt`, in constant time.
    pub fn matches_salted(&self, salt: &Salt, secret: &[u8]) -> bool {
        self.ct_eq(&Self::salted(salt, secret)).into()
    }

    /// Check if this hash is all zeros.
    pub fn is_zero(&self) -> bool {
        self.0.ct_eq(&[0u8; 32]).into()
    }

    /// Format as hex string.
    pub fn to_hex(&self) -> String {
        crate::id::encode_hex(&self.0)
    }

    /// Parse from hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 64 {
            return Err(CryptoError::InvalidHashLength {
                expected: 64,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; 32];
        crate::id::decode_hex_into(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl ConstantTimeEq for Hash256 {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for Hash256 {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for Hash256 {}

impl std::hash::Hash for Hash256 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Bucket selection only, not a security operation.
        self.0.hash(state);
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash256({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let h1 = Hash256::hash(b"receipt bytes");
        let h2 = Hash256::hash(b"receipt bytes");
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_many_is_length_prefixed() {
        let h1 = Hash256::hash_many(&[b"hello", b"world"]);
        let h2 = Hash256::hash_many(&[b"helloworld"]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_salted_hash_depends_on_salt() {
        let salt_a = Salt::from_bytes([1u8; 16]);
        let salt_b = Salt::from_bytes([2u8; 16]);
        let h1 = Hash256::salted(&salt_a, b"123456");
        let h2 = Hash256::salted(&salt_b, b"123456");
        assert_ne!(h1, h2);
        assert!(h1.matches_salted(&salt_a, b"123456"));
        assert!(!h1.matches_salted(&salt_a, b"123457"));
        assert!(!h1.matches_salted(&salt_b, b"123456"));
    }

    #[test]
    fn test_hex_parsing() {
        let h = Hash256::hash(b"test");
        assert_eq!(Hash256::from_hex(&h.to_hex()).unwrap(), h);
        assert!(Hash256::from_hex("zz").is_err());
        assert!(matches!(
            Hash256::from_hex(&"g".repeat(64)),
            Err(CryptoError::InvalidHexFormat(_))
        ));
    }

    #[test]
    fn test_from_bytes_invalid_length() {
        assert!(Hash256::from_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_is_zero() {
        assert!(Hash256::default().is_zero());
        assert!(!Hash256::hash(b"data").is_zero());
    }
}
