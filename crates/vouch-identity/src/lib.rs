//! # vouch-identity
//!
//! Identity records for the vouch trust core.
//!
//! Provides:
//! - **Identity**: email-keyed account record with verification flags
//! - **AccountStatus**: Active / UnderReview / Suspended with guarded transitions
//! - **EmailAddress** and **Username**: validated, normalized identifiers
//! - **DeviceFingerprint**: device and network metadata used by risk checks
//! - **IdentityDirectory**: repository boundary with an in-memory implementation
//! - **IdentityVerificationProvider**: boundary to the external document check
//! - **Clock**: injectable time source
//!
//! Identities are never deleted; they are soft-disabled through
//! [`AccountStatus::Suspended`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod directory;
pub mod email;
pub mod error;
pub mod identity;
pub mod provider;
pub mod time;
pub mod username;

pub use device::DeviceFingerprint;
pub use directory::{modify_identity, resolve_identifier, IdentityDirectory, InMemoryDirectory};
pub use email::EmailAddress;
pub use error::{IdentityError, Result};
pub use identity::{AccountStatus, Identity, IdentityId, Role, SignupMetadata, VerificationFlags};
pub use provider::{IdentityVerificationProvider, ProviderReport, ProviderStatus};
pub use time::{Clock, ManualClock, SystemClock};
pub use username::Username;
