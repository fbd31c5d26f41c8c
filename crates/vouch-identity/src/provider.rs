//! Boundary to the external identity-verification provider.
//!
//! The provider inspects identity documents on its own infrastructure and
//! reports back only a status. No document ever reaches this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Status reported by the provider for a verification reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    /// The check has not finished.
    Pending,
    /// The person was verified.
    Verified,
    /// The check failed.
    Failed,
}

/// Provider answer with the time it was produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReport {
    /// Current status.
    pub status: ProviderStatus,
    /// When the provider determined the status.
    pub checked_at: DateTime<Utc>,
}

/// External identity-verification provider.
#[async_trait]
pub trait IdentityVerificationProvider: Send + Sync {
    /// Look up the status of a verification by the provider's reference id.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Provider` when the provider cannot be reached.
    async fn get_status(&self, reference: &str) -> Result<ProviderReport>;
}
