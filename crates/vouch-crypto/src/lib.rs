//! # vouch-crypto
//!
//! Cryptographic primitives for the vouch trust core.
//!
//! This crate provides:
//! - **Hash256**: BLAKE3 content hashes, salted and keyed hashes
//! - **Secrets**: random tokens and numeric one-time codes
//! - **Envelopes**: MAC-signed opaque tokens
//! - **Identifiers**: random fixed-size record identifiers
//!
//! ## Security
//!
//! Secret values are wiped with `zeroize` on drop and compared in constant
//! time via `subtle`. Plaintext codes and tokens are never stored; callers
//! keep only their hashes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod error;
pub mod hash;
pub mod id;
pub mod secret;

#[cfg(test)]
mod proptests;

pub use envelope::{open_envelope, seal_envelope, SigningKey};
pub use error::{CryptoError, Result};
pub use hash::Hash256;
pub use secret::{numeric_code, random_bytes, Salt, SecretToken};
