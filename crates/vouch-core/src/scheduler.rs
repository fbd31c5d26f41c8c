//! Weekly trust score recalculation.
//!
//! A batch lists every identity and recalculates each with
//! [`RecalcTrigger::Scheduled`], several at a time. The aggregator skips an
//! identity whose previous run is still in flight and records at most one
//! scheduled snapshot per ISO week, so a batch may be rerun after a crash
//! without side effects. Transient storage failures are retried with
//! exponential backoff.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vouch_identity::{Clock, IdentityDirectory, IdentityId};
use vouch_reputation::{RecalcOutcome, RecalcTrigger, ReputationError, TrustScoreAggregator};

use crate::config::SchedulerConfig;
use crate::error::Result;

/// Totals of one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// When the batch started.
    pub started_at: Option<DateTime<Utc>>,
    /// Identities visited.
    pub identities: usize,
    /// New snapshots written.
    pub recorded: usize,
    /// Identities that already had this week's snapshot.
    pub already_recorded: usize,
    /// Identities skipped because a run was in flight.
    pub skipped: usize,
    /// Identities that failed after every retry.
    pub failed: usize,
    /// Retries spent on transient failures.
    pub retries: usize,
}

enum Visit {
    Done(RecalcOutcome, usize),
    Failed(usize),
}

/// Runs scheduled recalculation batches.
pub struct Recalculator {
    directory: Arc<dyn IdentityDirectory>,
    aggregator: Arc<TrustScoreAggregator>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl std::fmt::Debug for Recalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recalculator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Recalculator {
    /// Create a recalculator.
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        aggregator: Arc<TrustScoreAggregator>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            directory,
            aggregator,
            clock,
            config,
        }
    }

    /// Recalculate every identity once.
    ///
    /// # Errors
    ///
    /// Fails only if the identity list cannot be read. Per-identity
    /// failures are counted in the summary.
    pub async fn run_batch(&self) -> Result<BatchSummary> {
        let started_at = self.clock.now();
        let ids = self.directory.list_ids().await?;
        info!(identities = ids.len(), "scheduled recalculation started");

        let mut summary = BatchSummary {
            started_at: Some(started_at),
            identities: ids.len(),
            ..BatchSummary::default()
        };
        let mut visits = stream::iter(ids)
            .map(|id| async move { self.visit(id).await })
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some(visit) = visits.next().await {
            match visit {
                Visit::Done(outcome, retries) => {
                    summary.retries += retries;
                    match outcome {
                        RecalcOutcome::Recorded(_) => summary.recorded += 1,
                        RecalcOutcome::AlreadyRecorded { .. } => summary.already_recorded += 1,
                        RecalcOutcome::Skipped => summary.skipped += 1,
                    }
                }
                Visit::Failed(retries) => {
                    summary.retries += retries;
                    summary.failed += 1;
                }
            }
        }

        info!(
            recorded = summary.recorded,
            already_recorded = summary.already_recorded,
            skipped = summary.skipped,
            failed = summary.failed,
            "scheduled recalculation finished"
        );
        Ok(summary)
    }

    /// Run a batch now and then once per interval until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("recalculation loop stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_batch().await {
                        warn!(error = %e, "scheduled recalculation batch failed");
                    }
                }
            }
        }
    }

    async fn visit(&self, id: IdentityId) -> Visit {
        let mut retries = 0;
        loop {
            match self
                .aggregator
                .recalculate(&id, RecalcTrigger::Scheduled)
                .await
            {
                Ok(outcome) => return Visit::Done(outcome, retries),
                Err(e) if is_transient(&e) && retries < self.config.max_retries as usize => {
                    let delay = self.config.retry_backoff * 2u32.saturating_pow(retries as u32);
                    debug!(identity = %id, error = %e, ?delay, "transient failure, retrying");
                    retries += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(identity = %id, error = %e, "recalculation failed");
                    return Visit::Failed(retries);
                }
            }
        }
    }
}

fn is_transient(e: &ReputationError) -> bool {
    match e {
        ReputationError::Storage(_) | ReputationError::Conflict(_) => true,
        ReputationError::Identity(e) => matches!(
            e,
            vouch_identity::IdentityError::Storage(_) | vouch_identity::IdentityError::Conflict(_)
        ),
        ReputationError::Evidence(e) => matches!(
            e,
            vouch_evidence::EvidenceError::Storage(_) | vouch_evidence::EvidenceError::Conflict(_)
        ),
        ReputationError::Auth(e) => matches!(
            e,
            vouch_auth::AuthError::Storage(_) | vouch_auth::AuthError::Conflict(_)
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vouch_identity::{EmailAddress, Identity, ManualClock, SignupMetadata};
    use vouch_reputation::{ScorePolicy, SnapshotStore, TrustScoreSnapshot};

    use crate::service::Backend;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    /// Fails the first `failures` appends with a storage error.
    struct FlakySnapshots {
        inner: Arc<dyn SnapshotStore>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotStore for FlakySnapshots {
        async fn append(&self, snapshot: &TrustScoreSnapshot) -> vouch_reputation::Result<bool> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(ReputationError::Storage("disk busy".into()));
            }
            self.inner.append(snapshot).await
        }

        async fn list_for_identity(
            &self,
            identity: &IdentityId,
            limit: usize,
        ) -> vouch_reputation::Result<Vec<TrustScoreSnapshot>> {
            self.inner.list_for_identity(identity, limit).await
        }
    }

    async fn populated(backend: &Backend, count: usize) {
        for n in 0..count {
            let email = EmailAddress::parse(&format!("user{}@x.com", n)).unwrap();
            backend
                .directory
                .insert(&Identity::new(email, SignupMetadata::default(), t0()))
                .await
                .unwrap();
        }
    }

    fn config(max_retries: u32) -> SchedulerConfig {
        SchedulerConfig {
            concurrency: 3,
            max_retries,
            retry_backoff: std::time::Duration::from_millis(1),
            ..SchedulerConfig::default()
        }
    }

    fn recalculator(backend: &Backend, clock: Arc<ManualClock>, max_retries: u32) -> Recalculator {
        let aggregator = Arc::new(TrustScoreAggregator::new(
            backend.reputation_stores(),
            clock.clone(),
            ScorePolicy::default(),
        ));
        Recalculator::new(backend.directory.clone(), aggregator, clock, config(max_retries))
    }

    #[tokio::test]
    async fn test_batch_records_once_per_week() {
        let backend = Backend::in_memory();
        populated(&backend, 5).await;
        let clock = Arc::new(ManualClock::new(t0()));
        let recalc = recalculator(&backend, clock.clone(), 0);

        let first = recalc.run_batch().await.unwrap();
        assert_eq!(first.identities, 5);
        assert_eq!(first.recorded, 5);

        clock.advance(Duration::hours(1));
        let rerun = recalc.run_batch().await.unwrap();
        assert_eq!(rerun.recorded, 0);
        assert_eq!(rerun.already_recorded, 5);

        clock.advance(Duration::days(7));
        let next_week = recalc.run_batch().await.unwrap();
        assert_eq!(next_week.recorded, 5);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mut backend = Backend::in_memory();
        backend.snapshots = Arc::new(FlakySnapshots {
            inner: backend.snapshots.clone(),
            failures: AtomicUsize::new(2),
        });
        populated(&backend, 1).await;
        let recalc = recalculator(&backend, Arc::new(ManualClock::new(t0())), 3);

        let summary = recalc.run_batch().await.unwrap();
        assert_eq!(summary.recorded, 1);
        assert_eq!(summary.retries, 2);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_count_as_failed() {
        let mut backend = Backend::in_memory();
        backend.snapshots = Arc::new(FlakySnapshots {
            inner: backend.snapshots.clone(),
            failures: AtomicUsize::new(10),
        });
        populated(&backend, 1).await;
        let recalc = recalculator(&backend, Arc::new(ManualClock::new(t0())), 2);

        let summary = recalc.run_batch().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retries, 2);
        assert_eq!(summary.recorded, 0);
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let backend = Backend::in_memory();
        populated(&backend, 2).await;
        let recalc = recalculator(&backend, Arc::new(ManualClock::new(t0())), 0);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let loop_task = recalc.run_until(async move {
            let _ = rx.await;
        });
        let stopper = async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = tx.send(());
        };
        let (result, ()) = tokio::join!(loop_task, stopper);
        result.unwrap();

        let id = backend.directory.list_ids().await.unwrap()[0];
        assert_eq!(
            backend.snapshots.list_for_identity(&id, 10).await.unwrap().len(),
            1
        );
    }
}
