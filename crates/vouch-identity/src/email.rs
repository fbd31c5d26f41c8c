//! Email address validation and normalization.
//!
//! The normalized email is the unique key of an identity and the key of
//! every one-time-code and rate-limit record.
//!
//! ## Validation Rules
//!
//! - Surrounding whitespace is trimmed, then the address is lowercased
//! - Length: 3-254 characters
//! - Exactly one `@`, non-empty local part (max 64 characters)
//! - Domain contains a dot, does not start or end with `.` or `-`
//! - No whitespace or control characters anywhere

use serde::{Deserialize, Serialize};

use crate::{IdentityError, Result};

/// Minimum email length in characters.
pub const MIN_EMAIL_LEN: usize = 3;

/// Maximum email length in characters.
pub const MAX_EMAIL_LEN: usize = 254;

/// Maximum local-part length in characters.
pub const MAX_LOCAL_PART_LEN: usize = 64;

/// A validated, lowercase email address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Validate and normalize an email address.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidEmail` describing the first rule violated.
    ///
    /// # Examples
    ///
    /// ```
    /// use vouch_identity::EmailAddress;
    ///
    /// let email = EmailAddress::parse("  Alice@Example.COM ").unwrap();
    /// assert_eq!(email.as_str(), "alice@example.com");
    ///
    /// assert!(EmailAddress::parse("no-at-sign").is_err());
    /// assert!(EmailAddress::parse("a@localhost").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_lowercase();
        Self::validate(&normalized)?;
        Ok(Self(normalized))
    }

    /// Validate an already-normalized address.
    pub fn validate(email: &str) -> Result<()> {
        let invalid = |reason: &str| IdentityError::InvalidEmail {
            reason: reason.to_string(),
        };

        let len = email.chars().count();
        if len < MIN_EMAIL_LEN {
            return Err(invalid("email too short"));
        }
        if len > MAX_EMAIL_LEN {
            return Err(invalid("email too long"));
        }
        if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid("email contains whitespace or control characters"));
        }

        let (local, domain) = email
            .split_once('@')
            .ok_or_else(|| invalid("email must contain '@'"))?;

        if domain.contains('@') {
            return Err(invalid("email must contain exactly one '@'"));
        }
        if local.is_empty() {
            return Err(invalid("local part is empty"));
        }
        if local.chars().count() > MAX_LOCAL_PART_LEN {
            return Err(invalid("local part too long"));
        }
        if !domain.contains('.') {
            return Err(invalid("domain must contain a dot"));
        }
        if domain.starts_with(['.', '-']) || domain.ends_with(['.', '-']) {
            return Err(invalid("domain must not start or end with '.' or '-'"));
        }
        if domain.contains("..") {
            return Err(invalid("domain contains an empty label"));
        }

        Ok(())
    }

    /// The normalized address.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The domain part.
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map(|(_, d)| d).unwrap_or_default()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(email: EmailAddress) -> Self {
        email.0
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalizes_case_and_whitespace() {
        let email = EmailAddress::parse(" A@X.com\t").unwrap();
        assert_eq!(email.as_str(), "a@x.com");
        assert_eq!(email.domain(), "x.com");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "a",
            "@x.com",
            "a@",
            "a@b",
            "a@@b.com",
            "a b@x.com",
            "a@.x.com",
            "a@x.com.",
            "a@x..com",
            "a@-x.com",
        ] {
            assert!(EmailAddress::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_rejects_overlong() {
        let local = "a".repeat(65);
        assert!(EmailAddress::parse(&format!("{local}@x.com")).is_err());
        let domain = format!("{}.com", "d".repeat(250));
        assert!(EmailAddress::parse(&format!("a@{domain}")).is_err());
    }

    #[test]
    fn test_serde_goes_through_validation() {
        let email: EmailAddress = serde_json::from_str("\"B@Y.org\"").unwrap();
        assert_eq!(email.as_str(), "b@y.org");
        assert!(serde_json::from_str::<EmailAddress>("\"not-an-email\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_parse_is_idempotent(local in "[a-zA-Z0-9._%+-]{1,20}", domain in "[a-zA-Z0-9]{1,10}\\.[a-zA-Z]{2,6}") {
            let raw = format!("{local}@{domain}");
            let once = EmailAddress::parse(&raw).unwrap();
            let twice = EmailAddress::parse(once.as_str()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
