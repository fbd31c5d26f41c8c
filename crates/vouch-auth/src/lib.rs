//! # vouch-auth
//!
//! Passwordless authentication for the vouch trust core.
//!
//! - [`OtpAuthenticator`]: issues and verifies one-time codes per email,
//!   guarded by a fixed-window [`RateLimiter`]
//! - [`SessionIssuer`]: access/refresh token pairs, refresh-token rotation
//!   and replay detection that revokes the whole session
//! - [`Dispatcher`]: outbound delivery boundary for codes
//!
//! Plaintext codes and refresh tokens are never stored or logged; stores only
//! ever see salted or plain BLAKE3 hashes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod error;
pub mod memory;
pub mod otp;
pub mod rate_limit;
pub mod session;

pub use dispatch::{Dispatcher, Message};
pub use error::{AuthError, Result};
pub use memory::{InMemoryOtpStore, InMemoryRateLimiter, InMemorySessionStore, MemoryOutbox};
pub use otp::{IssuedCode, OneTimeCode, OtpAuthenticator, OtpPolicy, OtpStore};
pub use rate_limit::{RateLimitDecision, RateLimitWindow, RateLimiter};
pub use session::{
    week_index, AccessClaims, RevocationReason, Session, SessionId, SessionIssuer, SessionPolicy,
    SessionStore, TokenPair,
};
