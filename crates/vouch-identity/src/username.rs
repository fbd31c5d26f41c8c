//! Public handles.
//!
//! A handle is an optional human-readable alias for an identity, used by
//! other users to address it (mutual verifications, reports). The email
//! stays the primary key.
//!
//! ## Validation Rules
//!
//! - Length: 3-32 characters
//! - Allowed characters: alphanumeric (a-z, A-Z, 0-9), underscore (_), hyphen (-)
//! - Must start and end with an alphanumeric character
//! - Case-insensitive for lookup

use serde::{Deserialize, Serialize};

use crate::{IdentityError, Result};

/// Minimum username length in characters.
pub const MIN_USERNAME_LEN: usize = 3;

/// Maximum username length in characters.
pub const MAX_USERNAME_LEN: usize = 32;

/// Handles that cannot be registered.
pub const RESERVED_USERNAMES: &[&str] = &[
    "admin",
    "administrator",
    "system",
    "vouch",
    "support",
    "moderator",
    "official",
    "verified",
    "security",
    "root",
];

/// A validated handle (3-32 characters).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    /// Create a new validated username.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidUsername` if the handle breaks a rule
    /// or is reserved.
    pub fn new(username: &str) -> Result<Self> {
        Self::validate(username)?;
        if Self::is_reserved(username) {
            return Err(IdentityError::InvalidUsername {
                reason: format!("'{}' is a reserved username", username),
            });
        }
        Ok(Self(username.to_string()))
    }

    /// Check if a username string is reserved.
    pub fn is_reserved(username: &str) -> bool {
        let normalized = username.to_ascii_lowercase();
        RESERVED_USERNAMES.contains(&normalized.as_str())
    }

    /// Validate a username string without creating a Username instance.
    pub fn validate(username: &str) -> Result<()> {
        let len = username.len();

        if len < MIN_USERNAME_LEN {
            return Err(IdentityError::InvalidUsername {
                reason: format!(
                    "username too short: minimum {} characters, got {}",
                    MIN_USERNAME_LEN, len
                ),
            });
        }

        if len > MAX_USERNAME_LEN {
            return Err(IdentityError::InvalidUsername {
                reason: format!(
                    "username too long: maximum {} characters, got {}",
                    MAX_USERNAME_LEN, len
                ),
            });
        }

        for (i, c) in username.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(IdentityError::InvalidUsername {
                    reason: format!("invalid character '{}' at position {}", c, i),
                });
            }
        }

        let starts_ok = username.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
        let ends_ok = username.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
        if !starts_ok || !ends_ok {
            return Err(IdentityError::InvalidUsername {
                reason: "username must start and end with an alphanumeric character".to_string(),
            });
        }

        Ok(())
    }

    /// Get the username as provided.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used for lookup and comparison.
    pub fn normalized(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// Case-insensitive comparison with a raw handle, ignoring a leading `@`.
    pub fn matches(&self, other: &str) -> bool {
        other.trim().trim_start_matches('@').eq_ignore_ascii_case(&self.0)
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_usernames() {
        assert!(Username::new("alice").is_ok());
        assert!(Username::new("bob_smith").is_ok());
        assert!(Username::new("user-123").is_ok());
    }

    #[test]
    fn test_invalid_usernames() {
        assert!(Username::new("ab").is_err());
        assert!(Username::new("_alice").is_err());
        assert!(Username::new("alice-").is_err());
        assert!(Username::new("bob@smith").is_err());
        assert!(Username::new(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_reserved_is_case_insensitive() {
        assert!(Username::new("Admin").is_err());
        assert!(Username::is_reserved("VOUCH"));
    }

    #[test]
    fn test_matches_ignores_case_and_at_sign() {
        let name = Username::new("Carol_99").unwrap();
        assert!(name.matches("@carol_99"));
        assert!(name.matches(" CAROL_99 "));
        assert!(!name.matches("carol_98"));
        assert_eq!(name.normalized(), "carol_99");
    }
}
