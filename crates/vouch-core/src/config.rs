//! Configuration for the trust core.
//!
//! Every tunable of the services lives in one serializable [`VouchConfig`],
//! organized into sections that mirror the components. Durations are
//! `std::time::Duration` on the wire and are converted to the services'
//! `chrono` policies by [`VouchConfig::otp_policy`] and friends.
//!
//! # Example
//!
//! ```
//! use vouch_core::config::{VouchConfig, VouchConfigBuilder};
//! use std::time::Duration;
//!
//! // Use defaults
//! let config = VouchConfig::default();
//!
//! // Or use the builder
//! let config = VouchConfigBuilder::new()
//!     .with_in_memory_storage()
//!     .with_code_ttl(Duration::from_secs(120))
//!     .with_report_limit(3)
//!     .build();
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use vouch_auth::{OtpPolicy, SessionPolicy};
use vouch_evidence::EvidencePolicy;
use vouch_reputation::{
    DetectorPolicy, PairPolicy, ReportPolicy, RiskPolicy, ScorePolicy, VerificationPolicy,
};

use crate::capabilities::CapabilityTable;

const DEFAULT_CODE_DIGITS: u32 = 6;
const DEFAULT_CODE_TTL_SECS: u64 = 5 * 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_REQUESTS_PER_WINDOW: u32 = 3;
const DEFAULT_RATE_WINDOW_SECS: u64 = 15 * 60;

const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: u64 = 30 * 24 * 3600;

const DEFAULT_VALID_THRESHOLD: u8 = 60;
const DEFAULT_SUSPICIOUS_FLOOR: u8 = 30;
const DEFAULT_MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_REVIEW_THRESHOLD: u8 = 70;

const DEFAULT_MAX_REPORTS: usize = 5;
const DEFAULT_REPORT_WINDOW_SECS: u64 = 24 * 3600;
const DEFAULT_MIN_DESCRIPTION: usize = 20;
const DEFAULT_MAX_DESCRIPTION: usize = 2000;

const DEFAULT_MAX_ITEM_LENGTH: usize = 200;
const DEFAULT_MAX_FUTURE_SKEW_SECS: u64 = 24 * 3600;

const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 7 * 24 * 3600;
const DEFAULT_SCHEDULE_CONCURRENCY: usize = 8;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MILLIS: u64 = 500;

const DEFAULT_DATA_DIR: &str = "/var/lib/vouch";
const DEFAULT_CACHE_MB: usize = 64;

/// Main configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VouchConfig {
    /// One-time codes and sessions.
    pub auth: AuthConfig,

    /// Evidence ingestion.
    pub evidence: EvidenceConfig,

    /// Risk engine and detectors.
    pub risk: RiskConfig,

    /// Report pipeline.
    pub report: ReportConfig,

    /// Mutual verification.
    pub verification: VerificationConfig,

    /// Trust score point values.
    pub score: ScorePolicy,

    /// Weekly recalculation.
    pub scheduler: SchedulerConfig,

    /// Persistence.
    pub storage: StorageConfig,

    /// Role to capability table.
    pub capabilities: CapabilityTable,
}

impl VouchConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration builder.
    pub fn builder() -> VouchConfigBuilder {
        VouchConfigBuilder::new()
    }

    /// Create a configuration for in-memory operation (useful for testing).
    pub fn in_memory() -> Self {
        VouchConfigBuilder::new().with_in_memory_storage().build()
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Validate the configuration.
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let otp = &self.auth.otp;
        if !(4..=10).contains(&otp.code_digits) {
            return Err(invalid("auth.otp.code_digits", "code length must be 4..=10 digits"));
        }
        if otp.code_ttl.is_zero() {
            return Err(invalid("auth.otp.code_ttl", "code lifetime must be greater than zero"));
        }
        if otp.max_attempts == 0 {
            return Err(invalid("auth.otp.max_attempts", "at least one attempt is required"));
        }
        if otp.requests_per_window == 0 {
            return Err(invalid(
                "auth.otp.requests_per_window",
                "at least one request per window is required",
            ));
        }
        if otp.window.is_zero() {
            return Err(invalid("auth.otp.window", "rate-limit window must be greater than zero"));
        }

        let session = &self.auth.session;
        if session.access_ttl.is_zero() {
            return Err(invalid(
                "auth.session.access_ttl",
                "access-token lifetime must be greater than zero",
            ));
        }
        if session.refresh_ttl <= session.access_ttl {
            return Err(invalid(
                "auth.session.refresh_ttl",
                "refresh-token lifetime must exceed the access-token lifetime",
            ));
        }

        if self.evidence.valid_threshold > 100 {
            return Err(invalid("evidence.valid_threshold", "threshold must be 0..=100"));
        }
        if self.evidence.suspicious_floor > self.evidence.valid_threshold {
            return Err(invalid(
                "evidence.suspicious_floor",
                "suspicious floor cannot exceed the valid threshold",
            ));
        }
        if self.evidence.max_file_bytes == 0 {
            return Err(invalid("evidence.max_file_bytes", "file limit must be greater than zero"));
        }

        if self.risk.review_threshold == 0 || self.risk.review_threshold > 100 {
            return Err(invalid("risk.review_threshold", "threshold must be 1..=100"));
        }
        if self.risk.pair_window.is_zero() {
            return Err(invalid("risk.pair_window", "window must be greater than zero"));
        }

        if self.report.max_reports == 0 {
            return Err(invalid("report.max_reports", "limit must be greater than zero"));
        }
        if self.report.window.is_zero() {
            return Err(invalid("report.window", "window must be greater than zero"));
        }
        if self.report.min_description > self.report.max_description {
            return Err(invalid(
                "report.min_description",
                "minimum description length exceeds the maximum",
            ));
        }

        if self.verification.max_item_length == 0 {
            return Err(invalid(
                "verification.max_item_length",
                "item length must be greater than zero",
            ));
        }

        if self.scheduler.interval.is_zero() {
            return Err(invalid("scheduler.interval", "interval must be greater than zero"));
        }
        if self.scheduler.concurrency == 0 {
            return Err(invalid("scheduler.concurrency", "concurrency must be greater than zero"));
        }

        if !self.storage.in_memory && self.storage.data_dir.as_os_str().is_empty() {
            return Err(invalid(
                "storage.data_dir",
                "data directory cannot be empty when not using in-memory storage",
            ));
        }

        // Durations must fit chrono's range.
        self.otp_policy()?;
        self.session_policy()?;
        self.report_policy()?;
        self.verification_policy()?;
        self.risk_policy()?;
        Ok(())
    }

    /// One-time code policy.
    pub fn otp_policy(&self) -> Result<OtpPolicy, ConfigError> {
        let otp = &self.auth.otp;
        Ok(OtpPolicy {
            code_digits: otp.code_digits,
            code_ttl: chrono_duration("auth.otp.code_ttl", otp.code_ttl)?,
            max_attempts: otp.max_attempts,
            requests_per_window: otp.requests_per_window,
            window: chrono_duration("auth.otp.window", otp.window)?,
        })
    }

    /// Session policy.
    pub fn session_policy(&self) -> Result<SessionPolicy, ConfigError> {
        let session = &self.auth.session;
        Ok(SessionPolicy {
            access_ttl: chrono_duration("auth.session.access_ttl", session.access_ttl)?,
            refresh_ttl: chrono_duration("auth.session.refresh_ttl", session.refresh_ttl)?,
        })
    }

    /// Evidence policy.
    pub fn evidence_policy(&self) -> EvidencePolicy {
        let evidence = &self.evidence;
        EvidencePolicy {
            valid_threshold: evidence.valid_threshold,
            suspicious_floor: evidence.suspicious_floor,
            max_file_bytes: evidence.max_file_bytes,
            known_platforms: evidence
                .known_platforms
                .iter()
                .map(|p| p.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Risk policy, including detector thresholds.
    pub fn risk_policy(&self) -> Result<RiskPolicy, ConfigError> {
        let risk = &self.risk;
        Ok(RiskPolicy {
            review_threshold: risk.review_threshold,
            detectors: DetectorPolicy {
                rejection_threshold: risk.rejection_threshold,
                rapid_window: chrono_duration("risk.rapid_window", risk.rapid_window)?,
                rapid_min_accounts: risk.rapid_min_accounts,
                shared_network_min: risk.shared_network_min,
                pair: self.pair_policy()?,
            },
        })
    }

    /// Report policy.
    pub fn report_policy(&self) -> Result<ReportPolicy, ConfigError> {
        let report = &self.report;
        Ok(ReportPolicy {
            max_reports: report.max_reports,
            window: chrono_duration("report.window", report.window)?,
            min_description: report.min_description,
            max_description: report.max_description,
        })
    }

    /// Mutual verification policy.
    pub fn verification_policy(&self) -> Result<VerificationPolicy, ConfigError> {
        Ok(VerificationPolicy {
            max_item_length: self.verification.max_item_length,
            max_future_skew: chrono_duration(
                "verification.max_future_skew",
                self.verification.max_future_skew,
            )?,
            pair: self.pair_policy()?,
        })
    }

    fn pair_policy(&self) -> Result<PairPolicy, ConfigError> {
        Ok(PairPolicy {
            window: chrono_duration("risk.pair_window", self.risk.pair_window)?,
            min_reciprocal: self.risk.min_reciprocal,
            min_repeated_amount: self.risk.min_repeated_amount,
        })
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

fn chrono_duration(field: &str, duration: Duration) -> Result<chrono::Duration, ConfigError> {
    chrono::Duration::from_std(duration).map_err(|_| invalid(field, "duration out of range"))
}

/// Authentication configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// One-time codes.
    pub otp: OtpConfig,

    /// Sessions.
    pub session: SessionConfig,
}

/// One-time code configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// Digits per code.
    pub code_digits: u32,

    /// Code lifetime.
    #[serde(with = "duration_serde")]
    pub code_ttl: Duration,

    /// Verification attempts per code.
    pub max_attempts: u32,

    /// Code requests allowed per email and window.
    pub requests_per_window: u32,

    /// Rate-limit window.
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            code_digits: DEFAULT_CODE_DIGITS,
            code_ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            requests_per_window: DEFAULT_REQUESTS_PER_WINDOW,
            window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
        }
    }
}

/// Session configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Access-token lifetime.
    #[serde(with = "duration_serde")]
    pub access_ttl: Duration,

    /// Refresh-token lifetime.
    #[serde(with = "duration_serde")]
    pub refresh_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::from_secs(DEFAULT_REFRESH_TTL_SECS),
        }
    }
}

/// Evidence configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Integrity score at or above which a record is Valid.
    pub valid_threshold: u8,

    /// Integrity score at or above which a record is Suspicious.
    pub suspicious_floor: u8,

    /// Largest accepted upload.
    pub max_file_bytes: usize,

    /// Recognized profile platforms.
    pub known_platforms: Vec<String>,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            valid_threshold: DEFAULT_VALID_THRESHOLD,
            suspicious_floor: DEFAULT_SUSPICIOUS_FLOOR,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            known_platforms: EvidencePolicy::default().known_platforms,
        }
    }
}

/// Risk engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Composite score that moves an account to review.
    pub review_threshold: u8,

    /// Rejected records before repeated rejection is fake evidence.
    pub rejection_threshold: usize,

    /// Window for signup bursts from one network.
    #[serde(with = "duration_serde")]
    pub rapid_window: Duration,

    /// Accounts in the window that form a burst.
    pub rapid_min_accounts: usize,

    /// Other accounts on the same network before it is suspicious.
    pub shared_network_min: usize,

    /// Look-back window for reciprocal confirmations.
    #[serde(with = "duration_serde")]
    pub pair_window: Duration,

    /// Reciprocal confirmations inside the window that trigger.
    pub min_reciprocal: usize,

    /// Confirmations with an identical amount that trigger.
    pub min_repeated_amount: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let detectors = DetectorPolicy::default();
        Self {
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
            rejection_threshold: detectors.rejection_threshold,
            rapid_window: detectors
                .rapid_window
                .to_std()
                .unwrap_or(Duration::from_secs(24 * 3600)),
            rapid_min_accounts: detectors.rapid_min_accounts,
            shared_network_min: detectors.shared_network_min,
            pair_window: detectors
                .pair
                .window
                .to_std()
                .unwrap_or(Duration::from_secs(30 * 24 * 3600)),
            min_reciprocal: detectors.pair.min_reciprocal,
            min_repeated_amount: detectors.pair.min_repeated_amount,
        }
    }
}

/// Report pipeline configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Reports per reporter in the rolling window.
    pub max_reports: usize,

    /// Rolling window.
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Minimum description length in characters.
    pub min_description: usize,

    /// Maximum description length in characters.
    pub max_description: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_reports: DEFAULT_MAX_REPORTS,
            window: Duration::from_secs(DEFAULT_REPORT_WINDOW_SECS),
            min_description: DEFAULT_MIN_DESCRIPTION,
            max_description: DEFAULT_MAX_DESCRIPTION,
        }
    }
}

/// Mutual verification configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Longest item description.
    pub max_item_length: usize,

    /// How far in the future a transaction date may lie.
    #[serde(with = "duration_serde")]
    pub max_future_skew: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_item_length: DEFAULT_MAX_ITEM_LENGTH,
            max_future_skew: Duration::from_secs(DEFAULT_MAX_FUTURE_SKEW_SECS),
        }
    }
}

/// Weekly recalculation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time between batch runs.
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Identities recalculated concurrently.
    pub concurrency: usize,

    /// Retries per identity after a transient failure.
    pub max_retries: u32,

    /// Delay before the first retry, doubled for each further one.
    #[serde(with = "duration_serde")]
    pub retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SCHEDULE_INTERVAL_SECS),
            concurrency: DEFAULT_SCHEDULE_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MILLIS),
        }
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the database.
    pub data_dir: PathBuf,

    /// Page cache size in megabytes.
    pub cache_mb: usize,

    /// Use in-memory stores instead of the database.
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            cache_mb: DEFAULT_CACHE_MB,
            in_memory: false,
        }
    }
}

/// Builder for [`VouchConfig`].
#[derive(Clone, Debug, Default)]
pub struct VouchConfigBuilder {
    config: VouchConfig,
}

impl VouchConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: VouchConfig) -> Self {
        Self { config }
    }

    /// Build the configuration without validating it.
    pub fn build(self) -> VouchConfig {
        self.config
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<VouchConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    // ==================== Auth ====================

    /// Set the one-time code lifetime.
    pub fn with_code_ttl(mut self, ttl: Duration) -> Self {
        self.config.auth.otp.code_ttl = ttl;
        self
    }

    /// Set the attempts allowed per code.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.config.auth.otp.max_attempts = attempts;
        self
    }

    /// Set the code request rate limit.
    pub fn with_request_limit(mut self, requests: u32, window: Duration) -> Self {
        self.config.auth.otp.requests_per_window = requests;
        self.config.auth.otp.window = window;
        self
    }

    /// Set the access-token lifetime.
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.config.auth.session.access_ttl = ttl;
        self
    }

    /// Set the refresh-token lifetime.
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.config.auth.session.refresh_ttl = ttl;
        self
    }

    // ==================== Evidence and risk ====================

    /// Set the integrity bands.
    pub fn with_integrity_bands(mut self, valid_threshold: u8, suspicious_floor: u8) -> Self {
        self.config.evidence.valid_threshold = valid_threshold;
        self.config.evidence.suspicious_floor = suspicious_floor;
        self
    }

    /// Recognize an additional profile platform.
    pub fn with_known_platform(mut self, platform: impl Into<String>) -> Self {
        self.config.evidence.known_platforms.push(platform.into());
        self
    }

    /// Set the composite risk score that sends an account to review.
    pub fn with_review_threshold(mut self, threshold: u8) -> Self {
        self.config.risk.review_threshold = threshold;
        self
    }

    /// Set the reports allowed per reporter and rolling window.
    pub fn with_report_limit(mut self, max_reports: usize) -> Self {
        self.config.report.max_reports = max_reports;
        self
    }

    /// Replace the score point values.
    pub fn with_score_policy(mut self, policy: ScorePolicy) -> Self {
        self.config.score = policy;
        self
    }

    // ==================== Scheduler ====================

    /// Set the batch interval.
    pub fn with_schedule_interval(mut self, interval: Duration) -> Self {
        self.config.scheduler.interval = interval;
        self
    }

    /// Set how many identities are recalculated concurrently.
    pub fn with_schedule_concurrency(mut self, concurrency: usize) -> Self {
        self.config.scheduler.concurrency = concurrency;
        self
    }

    /// Set the retry budget for transient failures.
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.config.scheduler.max_retries = max_retries;
        self.config.scheduler.retry_backoff = backoff;
        self
    }

    // ==================== Storage ====================

    /// Set the data directory.
    pub fn with_data_dir(mut self, path: PathBuf) -> Self {
        self.config.storage.data_dir = path;
        self.config.storage.in_memory = false;
        self
    }

    /// Set the page cache size.
    pub fn with_cache_mb(mut self, cache_mb: usize) -> Self {
        self.config.storage.cache_mb = cache_mb;
        self
    }

    /// Use in-memory stores.
    pub fn with_in_memory_storage(mut self) -> Self {
        self.config.storage.in_memory = true;
        self
    }

    // ==================== Capabilities ====================

    /// Replace the capability table.
    pub fn with_capabilities(mut self, table: CapabilityTable) -> Self {
        self.config.capabilities = table;
        self
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The field that has an invalid value.
        field: String,
        /// The reason why the value is invalid.
        reason: String,
    },

    /// The configuration could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    Parse(String),
}

/// Serde helpers for std Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serializable representation of Duration.
    #[derive(Serialize, Deserialize)]
    struct DurationRepr {
        secs: u64,
        #[serde(default)]
        nanos: u32,
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let repr = DurationRepr {
            secs: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = DurationRepr::deserialize(deserializer)?;
        Ok(Duration::new(repr.secs, repr.nanos))
    }
}
