//! Trust score aggregation and snapshot history.
//!
//! Recalculation for one identity never overlaps itself. Event-driven runs
//! wait for an in-flight run to finish; scheduled runs skip instead. A
//! scheduled snapshot is written at most once per identity and ISO week.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use vouch_identity::{Clock, Identity, IdentityId};

use crate::score::{compute, RecalcTrigger, ScoreInputs, ScorePolicy, TrustScore, TrustScoreSnapshot};
use crate::store::ReputationStores;
use crate::{ReputationError, Result};

/// Default number of snapshots returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 52;

/// What a recalculation did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecalcOutcome {
    /// A new snapshot was appended.
    Recorded(TrustScoreSnapshot),
    /// A scheduled snapshot for this period already exists.
    AlreadyRecorded {
        /// ISO week.
        period: String,
    },
    /// Another run for the identity was in flight.
    Skipped,
}

impl RecalcOutcome {
    /// The new snapshot, if one was written.
    pub fn snapshot(&self) -> Option<&TrustScoreSnapshot> {
        match self {
            RecalcOutcome::Recorded(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

/// Computes trust scores and appends snapshots.
pub struct TrustScoreAggregator {
    stores: ReputationStores,
    clock: Arc<dyn Clock>,
    policy: ScorePolicy,
    in_flight: Mutex<HashMap<IdentityId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for TrustScoreAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustScoreAggregator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TrustScoreAggregator {
    /// Create an aggregator.
    pub fn new(stores: ReputationStores, clock: Arc<dyn Clock>, policy: ScorePolicy) -> Self {
        Self {
            stores,
            clock,
            policy,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Configured point values.
    pub fn policy(&self) -> &ScorePolicy {
        &self.policy
    }

    /// Gather the current inputs for `identity`.
    pub async fn inputs(&self, identity: &IdentityId) -> Result<ScoreInputs> {
        let subject = self.load_identity(identity).await?;
        self.gather(&subject).await
    }

    /// Compute the current score without recording it.
    pub async fn compute(&self, identity: &IdentityId) -> Result<TrustScore> {
        let inputs = self.inputs(identity).await?;
        Ok(compute(&inputs, &self.policy))
    }

    /// Compute and record a snapshot.
    pub async fn recalculate(
        &self,
        identity: &IdentityId,
        trigger: RecalcTrigger,
    ) -> Result<RecalcOutcome> {
        let guard = self.guard_for(identity).await;
        let running = if trigger.is_scheduled() {
            match guard.clone().try_lock_owned() {
                Ok(running) => running,
                Err(_) => {
                    debug!(identity = %identity, "recalculation already running, skipping");
                    self.release(identity, guard).await;
                    return Ok(RecalcOutcome::Skipped);
                }
            }
        } else {
            guard.clone().lock_owned().await
        };

        let result = self.run(identity, trigger).await;
        drop(running);
        self.release(identity, guard).await;
        result
    }

    /// Up to `limit` snapshots, newest first.
    pub async fn history(
        &self,
        identity: &IdentityId,
        limit: usize,
    ) -> Result<Vec<TrustScoreSnapshot>> {
        self.stores.snapshots.list_for_identity(identity, limit).await
    }

    /// Most recent snapshot.
    pub async fn latest(&self, identity: &IdentityId) -> Result<Option<TrustScoreSnapshot>> {
        self.stores.snapshots.latest(identity).await
    }

    async fn run(&self, identity: &IdentityId, trigger: RecalcTrigger) -> Result<RecalcOutcome> {
        let subject = self.load_identity(identity).await?;
        let now = self.clock.now();
        let inputs = self.gather(&subject).await?;
        let score = compute(&inputs, &self.policy);
        let snapshot = TrustScoreSnapshot::new(*identity, score, trigger, now);

        if !self.stores.snapshots.append(&snapshot).await? {
            let period = snapshot.period.unwrap_or_default();
            debug!(identity = %identity, %period, "snapshot for period already recorded");
            return Ok(RecalcOutcome::AlreadyRecorded { period });
        }
        info!(
            identity = %identity,
            total = snapshot.total,
            trigger = trigger.as_str(),
            "trust score recorded"
        );
        Ok(RecalcOutcome::Recorded(snapshot))
    }

    async fn gather(&self, subject: &Identity) -> Result<ScoreInputs> {
        let id = &subject.id;
        let evidence = self.stores.evidence.list_for_identity(id).await?;
        let verifications = self.stores.verifications.list_for_identity(id).await?;
        let sessions = self.stores.sessions.list_for_identity(id).await?;
        let signals = self.stores.signals.list_for_identity(id).await?;
        let reports = self.stores.reports.list_against(id).await?;
        Ok(ScoreInputs::gather(
            subject,
            &evidence,
            &verifications,
            &sessions,
            &signals,
            &reports,
            self.clock.now(),
        ))
    }

    async fn load_identity(&self, identity: &IdentityId) -> Result<Identity> {
        self.stores
            .directory
            .get(identity)
            .await?
            .ok_or_else(|| ReputationError::NotFound(format!("identity {}", identity)))
    }

    async fn guard_for(&self, identity: &IdentityId) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.entry(*identity).or_default().clone()
    }

    /// Drop a handle from [`Self::guard_for`]. Every caller of `guard_for`
    /// releases, so the last one out removes the entry.
    async fn release(&self, identity: &IdentityId, guard: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        drop(guard);
        if in_flight
            .get(identity)
            .is_some_and(|g| Arc::strong_count(g) == 1)
        {
            in_flight.remove(identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{device, t0, Kit};
    use crate::verification::{Decision, TransactionRole, VerificationDraft};
    use chrono::Duration;
    use vouch_evidence::Money;
    use vouch_identity::modify_identity;

    async fn verify_email(kit: &Kit, identity: &IdentityId) {
        modify_identity(kit.directory.as_ref(), identity, |i| {
            i.flags.email_verified = true;
            Ok(true)
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_recalculate_records_snapshot() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        verify_email(&kit, &alice.id).await;
        let aggregator = kit.aggregator();

        let outcome = aggregator
            .recalculate(&alice.id, RecalcTrigger::EmailVerified)
            .await
            .unwrap();
        let snapshot = outcome.snapshot().unwrap();
        assert_eq!(snapshot.identity_score, 50);
        assert_eq!(snapshot.total, 50);
        assert!(snapshot.period.is_none());
        assert_eq!(aggregator.latest(&alice.id).await.unwrap().as_ref(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_scheduled_snapshot_once_per_week() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let aggregator = kit.aggregator();

        let first = aggregator.recalculate(&alice.id, RecalcTrigger::Scheduled).await.unwrap();
        assert!(first.snapshot().is_some());
        let again = aggregator.recalculate(&alice.id, RecalcTrigger::Scheduled).await.unwrap();
        assert_eq!(
            again,
            RecalcOutcome::AlreadyRecorded {
                period: "2025-W24".to_string()
            }
        );
        let manual = aggregator.recalculate(&alice.id, RecalcTrigger::Manual).await.unwrap();
        assert!(manual.snapshot().is_some());

        kit.clock.advance(Duration::days(7));
        let next = aggregator.recalculate(&alice.id, RecalcTrigger::Scheduled).await.unwrap();
        assert_eq!(next.snapshot().unwrap().period.as_deref(), Some("2025-W25"));
        assert_eq!(aggregator.history(&alice.id, 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_scheduled_runs_write_once() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let aggregator = kit.aggregator();

        let (a, b) = futures::join!(
            aggregator.recalculate(&alice.id, RecalcTrigger::Scheduled),
            aggregator.recalculate(&alice.id, RecalcTrigger::Scheduled),
        );
        let recorded = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| o.snapshot().is_some())
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(aggregator.history(&alice.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_run_leaves_no_guard_behind() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let aggregator = kit.aggregator();

        let guard = aggregator.guard_for(&alice.id).await;
        let held = guard.clone().lock_owned().await;
        let skipped = aggregator
            .recalculate(&alice.id, RecalcTrigger::Scheduled)
            .await
            .unwrap();
        assert_eq!(skipped, RecalcOutcome::Skipped);
        assert_eq!(aggregator.in_flight.lock().await.len(), 1);

        drop(held);
        aggregator.release(&alice.id, guard).await;
        assert!(aggregator.in_flight.lock().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_map_drains_after_mixed_runs() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let aggregator = Arc::new(kit.aggregator());

        let runs: Vec<_> = (0..32)
            .map(|n| {
                let aggregator = aggregator.clone();
                let id = alice.id;
                let trigger = if n % 2 == 0 {
                    RecalcTrigger::Scheduled
                } else {
                    RecalcTrigger::Manual
                };
                tokio::spawn(async move { aggregator.recalculate(&id, trigger).await })
            })
            .collect();
        for run in futures::future::join_all(runs).await {
            run.unwrap().unwrap();
        }
        assert!(aggregator.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_verification_raises_evidence_for_both() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let bob = kit.user("bobby@example.com").await;
        let aggregator = kit.aggregator();
        let before_a = aggregator.compute(&alice.id).await.unwrap();
        let before_b = aggregator.compute(&bob.id).await.unwrap();

        let service = kit.verifications();
        let record = service
            .create(
                &alice.id,
                VerificationDraft {
                    counterpart: "bobby".into(),
                    item: "camera".into(),
                    amount: Money::new(45_000, "EUR"),
                    role: TransactionRole::Buyer,
                    occurred_at: t0(),
                },
            )
            .await
            .unwrap();
        service
            .respond(&record.id, &bob.id, Decision::Confirm, None)
            .await
            .unwrap();

        for (party, before) in [(&alice.id, before_a), (&bob.id, before_b)] {
            let outcome = aggregator
                .recalculate(party, RecalcTrigger::VerificationConfirmed)
                .await
                .unwrap();
            let after = outcome.snapshot().unwrap();
            assert_eq!(after.evidence_score, before.evidence + 25);
            assert_eq!(after.identity_score, before.identity);
            assert_eq!(after.behaviour_score, before.behaviour);
        }
    }

    #[tokio::test]
    async fn test_login_consistency_from_sessions() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        for _ in 0..3 {
            kit.session(&alice, device("dev-1", "10.0.0.1")).await;
            kit.clock.advance(Duration::days(7));
        }
        let score = kit.aggregator().compute(&alice.id).await.unwrap();
        assert_eq!(score.breakdown.login_consistency, 37);
        assert_eq!(score.breakdown.account_age, 200 * 21 / (21 + 90));
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let aggregator = kit.aggregator();
        for _ in 0..3 {
            aggregator.recalculate(&alice.id, RecalcTrigger::Manual).await.unwrap();
            kit.clock.advance(Duration::days(30));
        }
        let history = aggregator.history(&alice.id, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].created_at > history[1].created_at);
        assert!(history[0].total >= history[1].total);
    }

    #[tokio::test]
    async fn test_unknown_identity() {
        let kit = Kit::new();
        let err = kit
            .aggregator()
            .recalculate(&IdentityId::generate(), RecalcTrigger::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, ReputationError::NotFound(_)));
    }
}
