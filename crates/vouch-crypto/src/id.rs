//! Fixed-size random record identifiers and hex helpers.

use crate::{CryptoError, Result};

/// Encode bytes as lowercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        s.push_str(&format!("{:02x}", byte));
    }
    s
}

/// Decode a hex string into `out`. The string must be exactly `2 * out.len()` long.
pub fn decode_hex_into(s: &str, out: &mut [u8]) -> Result<()> {
    if s.len() != out.len() * 2 {
        return Err(CryptoError::InvalidHexFormat(format!(
            "expected {} characters, got {}",
            out.len() * 2,
            s.len()
        )));
    }
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let hex_str = std::str::from_utf8(chunk).map_err(|_| {
            CryptoError::InvalidHexFormat("invalid UTF-8 in hex string".to_string())
        })?;
        out[i] = u8::from_str_radix(hex_str, 16).map_err(|_| {
            CryptoError::InvalidHexFormat(format!("invalid hex character at position {}", i * 2))
        })?;
    }
    Ok(())
}

/// Define a 16-byte random identifier newtype.
///
/// The generated type is `Copy`, ordered, hashable, serializable and
/// renders as 32 lowercase hex characters.
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        pub struct $name([u8; 16]);

        impl $name {
            /// Identifier size in bytes.
            pub const SIZE: usize = 16;

            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self($crate::random_bytes())
            }

            /// Wrap raw identifier bytes.
            pub const fn from_array(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Parse from a byte slice.
            pub fn from_slice(bytes: &[u8]) -> $crate::Result<Self> {
                if bytes.len() != Self::SIZE {
                    return Err($crate::CryptoError::InvalidIdLength {
                        expected: Self::SIZE,
                        actual: bytes.len(),
                    });
                }
                let mut arr = [0u8; 16];
                arr.copy_from_slice(bytes);
                Ok(Self(arr))
            }

            /// Raw bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Lowercase hex form.
            pub fn to_hex(&self) -> String {
                $crate::id::encode_hex(&self.0)
            }

            /// Parse from the hex form.
            pub fn from_hex(s: &str) -> $crate::Result<Self> {
                let mut arr = [0u8; 16];
                $crate::id::decode_hex_into(s, &mut arr)?;
                Ok(Self(arr))
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..8])
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::CryptoError;

            fn from_str(s: &str) -> $crate::Result<Self> {
                Self::from_hex(s)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    define_id!(
        /// Identifier used only by these tests.
        TestId
    );

    #[test]
    fn test_hex_encoding() {
        assert_eq!(encode_hex(&[0x00, 0xab, 0xff]), "00abff");
        let mut out = [0u8; 3];
        decode_hex_into("00abff", &mut out).unwrap();
        assert_eq!(out, [0x00, 0xab, 0xff]);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let mut out = [0u8; 2];
        assert!(decode_hex_into("abc", &mut out).is_err());
    }

    #[test]
    fn test_generated_ids_parse_back() {
        let id = TestId::generate();
        let parsed: TestId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_ne!(TestId::generate(), id);
    }

    #[test]
    fn test_from_slice_length_checked() {
        assert!(TestId::from_slice(&[0u8; 15]).is_err());
        assert!(TestId::from_slice(&[0u8; 16]).is_ok());
    }
}
