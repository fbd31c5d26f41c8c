//! Sled-backed persistent storage for the trust core.
//!
//! One [`SledStore`] implements every repository trait of the service
//! crates. Each entity lives in its own tree keyed by its id; secondary
//! lookups use index trees whose keys end in the row id and whose values
//! are empty.
//!
//! ## Consistency
//!
//! - Versioned rows are written with `compare_and_swap` on the encoded value
//! - Inserts touching a row and its indexes run in one sled transaction
//! - The report limit check and insert run under a process-wide lock

use std::path::Path;
use std::sync::Mutex;

use sled::{Db, Tree};
use tracing::info;

use crate::Result;

const IDENTITIES_TREE: &str = "vouch_identities";
const IDENTITY_EMAILS_TREE: &str = "vouch_identity_emails";
const IDENTITY_USERNAMES_TREE: &str = "vouch_identity_usernames";
const IDENTITY_SIGNUPS_TREE: &str = "vouch_identity_signups";
const OTP_CODES_TREE: &str = "vouch_otp_codes";
const RATE_LIMITS_TREE: &str = "vouch_rate_limits";
const SESSIONS_TREE: &str = "vouch_sessions";
const SESSIONS_BY_IDENTITY_TREE: &str = "vouch_sessions_by_identity";
const EVIDENCE_TREE: &str = "vouch_evidence";
const EVIDENCE_HASHES_TREE: &str = "vouch_evidence_hashes";
const EVIDENCE_BY_OWNER_TREE: &str = "vouch_evidence_by_owner";
const BLOBS_TREE: &str = "vouch_blobs";
const SIGNALS_TREE: &str = "vouch_signals";
const SIGNAL_FINGERPRINTS_TREE: &str = "vouch_signal_fingerprints";
const SIGNALS_BY_IDENTITY_TREE: &str = "vouch_signals_by_identity";
const REPORTS_TREE: &str = "vouch_reports";
const REPORTS_BY_REPORTER_TREE: &str = "vouch_reports_by_reporter";
const REPORTS_AGAINST_TREE: &str = "vouch_reports_against";
const VERIFICATIONS_TREE: &str = "vouch_verifications";
const VERIFICATIONS_BY_PARTY_TREE: &str = "vouch_verifications_by_party";
const SNAPSHOTS_TREE: &str = "vouch_snapshots";
const SNAPSHOT_PERIODS_TREE: &str = "vouch_snapshot_periods";

/// Persistent storage backed by sled.
///
/// ## Thread Safety
///
/// `SledStore` is thread-safe. All sled operations are internally
/// synchronized; share it behind an `Arc`.
pub struct SledStore {
    db: Db,
    pub(crate) identities: Tree,
    pub(crate) identity_emails: Tree,
    pub(crate) identity_usernames: Tree,
    pub(crate) identity_signups: Tree,
    pub(crate) otp_codes: Tree,
    pub(crate) rate_limits: Tree,
    pub(crate) sessions: Tree,
    pub(crate) sessions_by_identity: Tree,
    pub(crate) evidence: Tree,
    pub(crate) evidence_hashes: Tree,
    pub(crate) evidence_by_owner: Tree,
    pub(crate) blobs: Tree,
    pub(crate) signals: Tree,
    pub(crate) signal_fingerprints: Tree,
    pub(crate) signals_by_identity: Tree,
    pub(crate) reports: Tree,
    pub(crate) reports_by_reporter: Tree,
    pub(crate) reports_against: Tree,
    pub(crate) verifications: Tree,
    pub(crate) verifications_by_party: Tree,
    pub(crate) snapshots: Tree,
    pub(crate) snapshot_periods: Tree,
    pub(crate) report_admission: Mutex<()>,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("identities", &self.identities.len())
            .field("sessions", &self.sessions.len())
            .field("evidence", &self.evidence.len())
            .field("snapshots", &self.snapshots.len())
            .finish_non_exhaustive()
    }
}

impl SledStore {
    /// Open or create a store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory for sled database files
    /// * `cache_mb` - Sled page cache size in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open(path: &Path, cache_mb: usize) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .cache_capacity((cache_mb as u64) * 1024 * 1024)
            .mode(sled::Mode::LowSpace)
            .flush_every_ms(Some(1000))
            .open()?;
        info!(path = %path.display(), cache_mb, "opened sled store");
        Self::from_db(db)
    }

    /// Open a throwaway store that is deleted on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            identities: db.open_tree(IDENTITIES_TREE)?,
            identity_emails: db.open_tree(IDENTITY_EMAILS_TREE)?,
            identity_usernames: db.open_tree(IDENTITY_USERNAMES_TREE)?,
            identity_signups: db.open_tree(IDENTITY_SIGNUPS_TREE)?,
            otp_codes: db.open_tree(OTP_CODES_TREE)?,
            rate_limits: db.open_tree(RATE_LIMITS_TREE)?,
            sessions: db.open_tree(SESSIONS_TREE)?,
            sessions_by_identity: db.open_tree(SESSIONS_BY_IDENTITY_TREE)?,
            evidence: db.open_tree(EVIDENCE_TREE)?,
            evidence_hashes: db.open_tree(EVIDENCE_HASHES_TREE)?,
            evidence_by_owner: db.open_tree(EVIDENCE_BY_OWNER_TREE)?,
            blobs: db.open_tree(BLOBS_TREE)?,
            signals: db.open_tree(SIGNALS_TREE)?,
            signal_fingerprints: db.open_tree(SIGNAL_FINGERPRINTS_TREE)?,
            signals_by_identity: db.open_tree(SIGNALS_BY_IDENTITY_TREE)?,
            reports: db.open_tree(REPORTS_TREE)?,
            reports_by_reporter: db.open_tree(REPORTS_BY_REPORTER_TREE)?,
            reports_against: db.open_tree(REPORTS_AGAINST_TREE)?,
            verifications: db.open_tree(VERIFICATIONS_TREE)?,
            verifications_by_party: db.open_tree(VERIFICATIONS_BY_PARTY_TREE)?,
            snapshots: db.open_tree(SNAPSHOTS_TREE)?,
            snapshot_periods: db.open_tree(SNAPSHOT_PERIODS_TREE)?,
            report_admission: Mutex::new(()),
            db,
        })
    }

    /// Flush dirty pages to disk.
    pub async fn flush(&self) -> Result<usize> {
        Ok(self.db.flush_async().await?)
    }

    /// Bytes used on disk.
    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.db.size_on_disk()?)
    }

    /// Number of stored identities.
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use vouch_identity::{EmailAddress, Identity, IdentityDirectory, SignupMetadata};

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let identity = Identity::new(
            EmailAddress::parse("alice@example.com").unwrap(),
            SignupMetadata::default(),
            DateTime::<Utc>::from_timestamp(1_750_000_000, 0).unwrap(),
        );
        {
            let store = SledStore::open(dir.path(), 8).unwrap();
            store.insert(&identity).await.unwrap();
            store.flush().await.unwrap();
        }
        let store = SledStore::open(dir.path(), 8).unwrap();
        assert_eq!(store.identity_count(), 1);
        assert_eq!(store.get(&identity.id).await.unwrap(), Some(identity));
    }
}
