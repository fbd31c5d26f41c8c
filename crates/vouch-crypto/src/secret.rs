//! Random secrets: salts, opaque tokens and numeric one-time codes.

use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::hash::Hash256;

/// Maximum number of digits a numeric code may have.
pub const MAX_CODE_DIGITS: u32 = 9;

/// Fill a fixed-size array from the operating system RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a uniformly distributed numeric code with `digits` digits.
///
/// Leading zeros are kept, so a 6-digit code may be `"004211"`.
/// `digits` is clamped to `1..=MAX_CODE_DIGITS`.
pub fn numeric_code(digits: u32) -> Zeroizing<String> {
    let digits = digits.clamp(1, MAX_CODE_DIGITS);
    let upper = 10u32.pow(digits);
    let value = OsRng.gen_range(0..upper);
    Zeroizing::new(format!("{:0width$}", value, width = digits as usize))
}

/// A per-record random salt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; 16]);

impl Salt {
    /// Generate a fresh random salt.
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    /// Wrap existing salt bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw salt bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// A 256-bit random bearer secret (refresh-token body, signing keys).
///
/// Wiped from memory on drop. Only its hash should ever be persisted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretToken([u8; 32]);

impl SecretToken {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        Self(random_bytes())
    }

    /// Parse a secret from its hex form.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not 64 hex characters.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::CryptoError::InvalidHashLength {
                expected: 64,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; 32];
        crate::id::decode_hex_into(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Hex form, suitable for handing to a client.
    pub fn to_hex(&self) -> String {
        crate::id::encode_hex(&self.0)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Unsalted digest used as a lookup key for stored token hashes.
    pub fn digest(&self) -> Hash256 {
        Hash256::hash(&self.0)
    }
}

impl PartialEq for SecretToken {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SecretToken {}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_code_has_requested_digits() {
        for _ in 0..100 {
            let code = numeric_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_numeric_code_digits_clamped() {
        assert_eq!(numeric_code(0).len(), 1);
        assert_eq!(numeric_code(42).len(), MAX_CODE_DIGITS as usize);
    }

    #[test]
    fn test_secret_token_hex_parse() {
        let token = SecretToken::generate();
        let parsed = SecretToken::from_hex(&token.to_hex()).unwrap();
        assert_eq!(token, parsed);
        assert_eq!(token.digest(), parsed.digest());
    }

    #[test]
    fn test_secret_token_debug_redacted() {
        let token = SecretToken::generate();
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains(&token.to_hex()));
    }

    #[test]
    fn test_salts_are_random() {
        assert_ne!(Salt::generate(), Salt::generate());
    }
}
