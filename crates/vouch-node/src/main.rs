//! Vouch trust node daemon
//!
//! Opens the trust-core database and keeps trust scores current by running
//! the scheduled recalculation batch once per interval until stopped.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

use vouch_core::{Backend, Recalculator, VouchConfig};
use vouch_identity::SystemClock;
use vouch_reputation::TrustScoreAggregator;

/// Vouch trust node
///
/// Runs the weekly trust score recalculation over the sled database.
#[derive(Parser, Debug)]
#[command(name = "vouch-node")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a JSON configuration file
    #[arg(short, long, env = "VOUCH_CONFIG")]
    config: Option<PathBuf>,

    /// Path to data directory (overrides the configuration file)
    #[arg(short, long, env = "VOUCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Database page cache in megabytes (overrides the configuration file)
    #[arg(long, env = "VOUCH_CACHE_MB")]
    cache_mb: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "VOUCH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (plain, json)
    #[arg(long, env = "VOUCH_LOG_FORMAT", default_value = "plain")]
    log_format: String,

    /// Run a single batch and exit
    #[arg(long)]
    once: bool,
}

fn setup_logging(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("sled=warn".parse()?);

    match log_format.to_lowercase().as_str() {
        "json" => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
        _ => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
    }

    Ok(())
}

/// Load the configuration file, if any, and apply CLI overrides.
fn build_config(args: &Args) -> Result<VouchConfig> {
    let mut config = match &args.config {
        Some(path) => VouchConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => VouchConfig::default(),
    };

    if let Some(data_dir) = &args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(cache_mb) = args.cache_mb {
        config.storage.cache_mb = cache_mb;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, &args.log_format)?;

    let config = build_config(&args)?;
    let storage = &config.storage;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %storage.data_dir.display(),
        in_memory = storage.in_memory,
        interval_secs = config.scheduler.interval.as_secs(),
        "Starting vouch node"
    );

    if !storage.in_memory && !storage.data_dir.exists() {
        std::fs::create_dir_all(&storage.data_dir).context("Failed to create data directory")?;
        info!(path = %storage.data_dir.display(), "Created data directory");
    }

    let backend = Backend::open(storage).context("Failed to open database")?;
    let clock = Arc::new(SystemClock);
    let aggregator = Arc::new(TrustScoreAggregator::new(
        backend.reputation_stores(),
        clock.clone(),
        config.score.clone(),
    ));
    let recalculator = Recalculator::new(
        backend.directory.clone(),
        aggregator,
        clock,
        config.scheduler.clone(),
    );

    if args.once {
        let summary = recalculator
            .run_batch()
            .await
            .context("Recalculation batch failed")?;
        info!(
            identities = summary.identities,
            recorded = summary.recorded,
            failed = summary.failed,
            "Batch complete"
        );
    } else {
        info!("Press Ctrl+C to stop the node");
        recalculator
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Received shutdown signal");
            })
            .await
            .context("Recalculation loop failed")?;
    }

    info!("Shutting down vouch node...");
    backend.flush().await.context("Failed to flush database")?;

    info!("Vouch node stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["vouch-node"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_without_config_file() {
        let config = build_config(&args(&[])).unwrap();
        let defaults = VouchConfig::default();
        assert_eq!(config.storage.data_dir, defaults.storage.data_dir);
        assert_eq!(config.storage.cache_mb, defaults.storage.cache_mb);
        assert_eq!(config.scheduler.interval, defaults.scheduler.interval);
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vouch.json");
        std::fs::write(
            &path,
            r#"{"storage": {"data_dir": "/srv/vouch", "cache_mb": 16}, "scheduler": {"concurrency": 2}}"#,
        )
        .unwrap();

        let from_file = build_config(&args(&["--config", path.to_str().unwrap()])).unwrap();
        assert_eq!(from_file.storage.data_dir, PathBuf::from("/srv/vouch"));
        assert_eq!(from_file.storage.cache_mb, 16);
        assert_eq!(from_file.scheduler.concurrency, 2);

        let overridden = build_config(&args(&[
            "--config",
            path.to_str().unwrap(),
            "--data-dir",
            "/data",
            "--cache-mb",
            "64",
        ]))
        .unwrap();
        assert_eq!(overridden.storage.data_dir, PathBuf::from("/data"));
        assert_eq!(overridden.storage.cache_mb, 64);
        assert_eq!(overridden.scheduler.concurrency, 2);
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"scheduler": {"concurrency": 0}}"#).unwrap();

        assert!(build_config(&args(&["--config", path.to_str().unwrap()])).is_err());
        assert!(build_config(&args(&["--config", "/nonexistent/vouch.json"])).is_err());
    }
}
