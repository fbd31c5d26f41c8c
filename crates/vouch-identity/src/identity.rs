//! Identity records and account status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vouch_crypto::define_id;

use crate::device::DeviceFingerprint;
use crate::email::EmailAddress;
use crate::username::Username;
use crate::{IdentityError, Result};

define_id!(
    /// Stable primary key of an identity.
    IdentityId
);

/// Account status.
///
/// ```text
///   Active ──risk──► UnderReview ──review──► Active
///     │                   │
///     └──────admin────────┴──────► Suspended ──admin──► Active
/// ```
///
/// The risk engine may only move `Active` to `UnderReview`; suspension and
/// reinstatement belong to the external admin workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AccountStatus {
    /// Normal operation.
    #[default]
    Active,
    /// Soft-disabled by an administrator.
    Suspended,
    /// Flagged by the risk engine, waiting for admin review.
    UnderReview,
}

impl AccountStatus {
    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(&self, to: AccountStatus) -> bool {
        use AccountStatus::*;
        matches!(
            (self, to),
            (Active, UnderReview)
                | (Active, Suspended)
                | (UnderReview, Active)
                | (UnderReview, Suspended)
                | (Suspended, Active)
        )
    }

    /// Apply a transition.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidStateTransition` for illegal moves.
    pub fn transition(self, to: AccountStatus) -> Result<AccountStatus> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(IdentityError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::UnderReview => "under_review",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role used for capability lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular account.
    #[default]
    User,
    /// Can review reports and resolve risk signals.
    Reviewer,
    /// Full administrative access.
    Admin,
}

/// Verification flags feeding the identity component of the trust score.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationFlags {
    /// Control of the email address was proven with a one-time code.
    pub email_verified: bool,
    /// The external identity-verification provider confirmed the person.
    pub identity_verified: bool,
    /// When the provider confirmed the identity.
    pub identity_verified_at: Option<DateTime<Utc>>,
    /// Provider reference for the last identity check.
    pub verification_reference: Option<String>,
    /// A passkey or second factor is registered.
    pub second_factor: bool,
}

/// Where and how the account was created.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupMetadata {
    /// Device used to create the account.
    pub device: Option<DeviceFingerprint>,
    /// Free-form acquisition source (referral, campaign).
    pub source: Option<String>,
}

/// An account in the trust system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Primary key.
    pub id: IdentityId,
    /// Normalized, unique email.
    pub email: EmailAddress,
    /// Optional public handle.
    pub username: Option<Username>,
    /// Role for capability checks.
    pub role: Role,
    /// Account status.
    pub status: AccountStatus,
    /// Verification flags.
    pub flags: VerificationFlags,
    /// Signup metadata.
    pub signup: SignupMetadata,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency version, bumped on every write.
    pub version: u64,
}

impl Identity {
    /// Create a new active identity.
    pub fn new(email: EmailAddress, signup: SignupMetadata, created_at: DateTime<Utc>) -> Self {
        Self {
            id: IdentityId::generate(),
            email,
            username: None,
            role: Role::User,
            status: AccountStatus::Active,
            flags: VerificationFlags::default(),
            signup,
            created_at,
            version: 0,
        }
    }

    /// Attach a public handle.
    pub fn with_username(mut self, username: Username) -> Self {
        self.username = Some(username);
        self
    }

    /// Set the role.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Whole days since creation, never negative.
    pub fn age_days(&self, now: DateTime<Utc>) -> u32 {
        (now - self.created_at).num_days().max(0) as u32
    }

    /// Whether the account may act (not suspended).
    pub fn is_enabled(&self) -> bool {
        self.status != AccountStatus::Suspended
    }
}
