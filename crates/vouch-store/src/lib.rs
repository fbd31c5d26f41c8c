//! # vouch-store
//!
//! Persistent storage for the vouch trust core.
//!
//! Provides [`SledStore`], a single sled database implementing every
//! repository trait the service crates define:
//! - Identities with email, username and signup-device indexes
//! - One-time codes, rate-limit windows and sessions
//! - Evidence records and content-addressed uploads
//! - Risk signals, reports, mutual verifications and score snapshots
//!
//! ```no_run
//! use std::path::Path;
//! use vouch_store::SledStore;
//!
//! let store = SledStore::open(Path::new("/var/lib/vouch"), 64).unwrap();
//! println!("{} identities", store.identity_count());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod auth;
mod codec;
pub mod error;
mod evidence;
mod identity;
mod reputation;
pub mod sled_store;

pub use error::{Result, StoreError};
pub use evidence::BLOB_URL_PREFIX;
pub use sled_store::SledStore;
