//! # vouch-core
//!
//! High-level API of the vouch trust core.
//!
//! This crate ties the component crates together behind one facade:
//!
//! - [`TrustService`]: every sign-in, evidence, risk, mutual verification,
//!   report and trust score operation as a named async function
//! - [`VouchConfig`]: one serializable configuration with builder and
//!   validation
//! - [`CapabilityTable`]: the role to capability table loaded at startup
//! - [`CoreError`] and [`ErrorKind`]: the documented error kinds with their
//!   stable codes
//! - [`Recalculator`]: the weekly score recalculation batch
//!
//! ## Wiring
//!
//! Repositories come from a [`Backend`], either in memory or on a sled
//! database. External collaborators (code dispatch, evidence extraction,
//! identity verification, time) are passed in as [`Collaborators`].
//!
//! ```ignore
//! use vouch_core::{Backend, Collaborators, TrustService, VouchConfig};
//!
//! let config = VouchConfig::in_memory();
//! let service = TrustService::new(&config, Backend::in_memory(), collaborators, key)?;
//!
//! service.request_code("alice@example.com").await?;
//! let login = service.verify_code("alice@example.com", &code, device).await?;
//! let caller = service.authenticate(&login.tokens.access_token).await?;
//! let score = service.score(&caller, &caller.identity).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capabilities;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod service;

pub use capabilities::{Capability, CapabilityTable};
pub use config::{ConfigError, VouchConfig, VouchConfigBuilder};
pub use error::{CoreError, ErrorKind, Result};
pub use scheduler::{BatchSummary, Recalculator};
pub use service::{
    Backend, Collaborators, EvidenceOutcome, IdentityVerificationOutcome, Login, Principal,
    ScoreView, TrustService, VerificationResponse,
};
