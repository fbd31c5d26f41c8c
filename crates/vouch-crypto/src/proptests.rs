//! Property-based tests for the primitives.
//!
//! They cover the properties the rest of the workspace leans on: envelopes
//! reject any modification, salted hashes only match their own secret, and
//! numeric codes always have the requested shape.

use proptest::prelude::*;

use crate::{numeric_code, open_envelope, seal_envelope, Hash256, Salt, SigningKey};

proptest! {
    /// Flipping any bit of the payload invalidates the envelope.
    #[test]
    fn envelope_rejects_payload_bit_flip(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = SigningKey::generate();
        let envelope = seal_envelope(&key, &payload);
        let (_, mac) = envelope.split_once('.').unwrap();

        let mut forged = payload.clone();
        let at = index.index(forged.len());
        forged[at] ^= 1 << bit;
        let forged = format!("{}.{}", crate::id::encode_hex(&forged), mac);

        prop_assert!(open_envelope(&key, &forged).is_err());
    }

    /// A salted hash matches its own secret and no other.
    #[test]
    fn salted_hash_matches_only_its_secret(
        secret in prop::collection::vec(any::<u8>(), 0..64),
        other in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let salt = Salt::generate();
        let hash = Hash256::salted(&salt, &secret);

        prop_assert!(hash.matches_salted(&salt, &secret));
        prop_assert_eq!(hash.matches_salted(&salt, &other), secret == other);
        prop_assert!(!hash.matches_salted(&Salt::generate(), &secret));
    }

    /// Codes are exactly `digits` ASCII digits, zero-padded.
    #[test]
    fn numeric_code_shape(digits in 1u32..=9) {
        let code = numeric_code(digits);
        prop_assert_eq!(code.len(), digits as usize);
        prop_assert!(code.bytes().all(|b| b.is_ascii_digit()));
    }
}
