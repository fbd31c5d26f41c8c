//! MAC-signed opaque envelopes.
//!
//! An envelope is `hex(payload) "." hex(mac)` where the MAC is a BLAKE3
//! keyed hash of the payload under a server-held [`SigningKey`]. Envelopes
//! are integrity-protected, not encrypted.

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::Hash256;
use crate::id::{decode_hex_into, encode_hex};
use crate::{CryptoError, Result};

/// Largest payload accepted when opening an envelope.
pub const MAX_ENVELOPE_PAYLOAD: usize = 4096;

/// Server-held key used to sign envelopes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    /// Generate a fresh random signing key.
    pub fn generate() -> Self {
        Self(crate::random_bytes())
    }

    /// Use existing key material.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive a signing key from a configured secret string.
    pub fn derive(context: &str, material: &[u8]) -> Self {
        Self(blake3::derive_key(context, material))
    }

    fn mac(&self, payload: &[u8]) -> Hash256 {
        Hash256::keyed_hash(&self.0, payload)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey([REDACTED])")
    }
}

/// Sign `payload` and render it as an envelope string.
pub fn seal_envelope(key: &SigningKey, payload: &[u8]) -> String {
    let mac = key.mac(payload);
    format!("{}.{}", encode_hex(payload), mac.to_hex())
}

/// Verify an envelope and return its payload.
///
/// # Errors
///
/// Returns [`CryptoError::EnvelopeVerification`] for any malformed input or
/// MAC mismatch; the cause is deliberately not distinguished.
pub fn open_envelope(key: &SigningKey, envelope: &str) -> Result<Vec<u8>> {
    let (payload_hex, mac_hex) = envelope
        .split_once('.')
        .ok_or(CryptoError::EnvelopeVerification)?;

    if payload_hex.len() % 2 != 0 || payload_hex.len() / 2 > MAX_ENVELOPE_PAYLOAD {
        return Err(CryptoError::EnvelopeVerification);
    }

    let mut payload = vec![0u8; payload_hex.len() / 2];
    decode_hex_into(payload_hex, &mut payload).map_err(|_| CryptoError::EnvelopeVerification)?;
    let presented = Hash256::from_hex(mac_hex).map_err(|_| CryptoError::EnvelopeVerification)?;

    let expected = key.mac(&payload);
    if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
        Ok(payload)
    } else {
        Err(CryptoError::EnvelopeVerification)
    }
}
