//! Mutual verification: two parties confirming one transaction.
//!
//! ```text
//!            ┌──────── confirm ────────► Confirmed
//!            │
//!   Pending ─┼──────── reject ─────────► Rejected
//!            │
//!            └── collusion / risk ─────► Blocked
//! ```
//!
//! Only the counterpart may respond, and only while the record is Pending.
//! Terminal records never change again. Every transition is a conditional
//! write on the record's version, so two concurrent responses cannot both
//! apply.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vouch_crypto::define_id;
use vouch_evidence::Money;
use vouch_identity::{resolve_identifier, Clock, IdentityId};

use crate::collusion::{detect_pair, PairPolicy};
use crate::risk::RiskEngine;
use crate::signal::{RiskKind, SignalCandidate};
use crate::store::ReputationStores;
use crate::{ReputationError, Result};

define_id!(
    /// Mutual verification primary key.
    VerificationId
);

/// Maximum item description length.
pub const MAX_ITEM_LENGTH: usize = 200;

/// Severity of the collusion signal raised when a confirmation is blocked.
pub const BLOCKED_COLLUSION_SEVERITY: u8 = 7;

/// A party's role in the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionRole {
    /// Paid for goods.
    Buyer,
    /// Sold goods.
    Seller,
    /// Lent money or items.
    Lender,
    /// Borrowed money or items.
    Borrower,
    /// Hired a service.
    Client,
    /// Provided a service.
    Provider,
}

impl TransactionRole {
    /// The other side of the transaction.
    pub fn complement(&self) -> TransactionRole {
        match self {
            TransactionRole::Buyer => TransactionRole::Seller,
            TransactionRole::Seller => TransactionRole::Buyer,
            TransactionRole::Lender => TransactionRole::Borrower,
            TransactionRole::Borrower => TransactionRole::Lender,
            TransactionRole::Client => TransactionRole::Provider,
            TransactionRole::Provider => TransactionRole::Client,
        }
    }
}

/// Lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationStatus {
    /// Waiting for the counterpart.
    Pending,
    /// Both parties agreed.
    Confirmed,
    /// The counterpart disagreed.
    Rejected,
    /// Stopped by fraud detection.
    Blocked,
}

impl VerificationStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationStatus::Pending)
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Confirmed => "confirmed",
            VerificationStatus::Rejected => "rejected",
            VerificationStatus::Blocked => "blocked",
        }
    }
}

/// The counterpart's answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// The transaction happened as described.
    Confirm,
    /// It did not.
    Reject,
}

/// A two-party transaction claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutualVerification {
    /// Primary key.
    pub id: VerificationId,
    /// Party A, who created the claim.
    pub initiator: IdentityId,
    /// Party B, who must respond.
    pub counterpart: IdentityId,
    /// What changed hands.
    pub item: String,
    /// Transaction amount.
    pub amount: Money,
    /// Party A's role.
    pub initiator_role: TransactionRole,
    /// Party B's role, inferred and correctable on response.
    pub counterpart_role: TransactionRole,
    /// When the transaction took place.
    pub occurred_at: DateTime<Utc>,
    /// Status.
    pub status: VerificationStatus,
    /// Fraud flag.
    pub fraud: bool,
    /// Why the record was blocked.
    pub block_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When it became terminal.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version.
    pub version: u64,
}

impl MutualVerification {
    /// A new pending record. The counterpart role is the complement of `role`.
    pub fn new(
        initiator: IdentityId,
        counterpart: IdentityId,
        item: String,
        amount: Money,
        role: TransactionRole,
        occurred_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VerificationId::generate(),
            initiator,
            counterpart,
            item,
            amount,
            initiator_role: role,
            counterpart_role: role.complement(),
            occurred_at,
            status: VerificationStatus::Pending,
            fraud: false,
            block_reason: None,
            created_at: now,
            resolved_at: None,
            version: 0,
        }
    }

    /// Whether the record earns peer points.
    pub fn counts_as_confirmed(&self) -> bool {
        self.status == VerificationStatus::Confirmed
    }

    /// Whether `identity` is either party.
    pub fn involves(&self, identity: &IdentityId) -> bool {
        self.initiator == *identity || self.counterpart == *identity
    }

    /// The party that is not `identity`.
    pub fn other_party(&self, identity: &IdentityId) -> Option<IdentityId> {
        if self.initiator == *identity {
            Some(self.counterpart)
        } else if self.counterpart == *identity {
            Some(self.initiator)
        } else {
            None
        }
    }

    fn is_between(&self, a: &IdentityId, b: &IdentityId) -> bool {
        (self.initiator == *a && self.counterpart == *b)
            || (self.initiator == *b && self.counterpart == *a)
    }
}

/// Input for creating a verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationDraft {
    /// Email, id or username of the other party.
    pub counterpart: String,
    /// What changed hands.
    pub item: String,
    /// Amount.
    pub amount: Money,
    /// The creator's role.
    pub role: TransactionRole,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
}

/// Result of a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Confirmed; both parties earn peer points.
    Confirmed(MutualVerification),
    /// Rejected; no score impact.
    Rejected(MutualVerification),
    /// The confirmation was overridden by collusion detection.
    Blocked {
        /// The blocked record.
        verification: MutualVerification,
        /// What the detector found.
        reason: String,
    },
}

impl ResponseOutcome {
    /// The record after the response.
    pub fn verification(&self) -> &MutualVerification {
        match self {
            ResponseOutcome::Confirmed(v) | ResponseOutcome::Rejected(v) => v,
            ResponseOutcome::Blocked { verification, .. } => verification,
        }
    }
}

/// Tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationPolicy {
    /// Longest item description.
    pub max_item_length: usize,
    /// How far in the future a transaction date may lie.
    pub max_future_skew: Duration,
    /// Pair collusion thresholds.
    pub pair: PairPolicy,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            max_item_length: MAX_ITEM_LENGTH,
            max_future_skew: Duration::hours(24),
            pair: PairPolicy::default(),
        }
    }
}

/// Runs the mutual verification state machine.
pub struct MutualVerificationService {
    stores: ReputationStores,
    risk: Arc<RiskEngine>,
    clock: Arc<dyn Clock>,
    policy: VerificationPolicy,
}

impl std::fmt::Debug for MutualVerificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutualVerificationService")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl MutualVerificationService {
    /// Create the service.
    pub fn new(
        stores: ReputationStores,
        risk: Arc<RiskEngine>,
        clock: Arc<dyn Clock>,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            stores,
            risk,
            clock,
            policy,
        }
    }

    /// Create a pending verification from `initiator`.
    ///
    /// # Errors
    ///
    /// - `ReputationError::NotFound` if either party does not resolve
    /// - `ReputationError::SelfVerification` if the counterpart is the initiator
    /// - `ReputationError::Validation` for a bad item, amount or date
    pub async fn create(
        &self,
        initiator: &IdentityId,
        draft: VerificationDraft,
    ) -> Result<MutualVerification> {
        let counterpart = resolve_identifier(self.stores.directory.as_ref(), &draft.counterpart)
            .await?
            .ok_or_else(|| ReputationError::NotFound(format!("user {}", draft.counterpart.trim())))?;
        if counterpart.id == *initiator {
            return Err(ReputationError::SelfVerification);
        }
        if self.stores.directory.get(initiator).await?.is_none() {
            return Err(ReputationError::NotFound(format!("identity {}", initiator)));
        }

        let now = self.clock.now();
        let item = draft.item.trim().to_string();
        if item.is_empty() || item.chars().count() > self.policy.max_item_length {
            return Err(ReputationError::Validation(format!(
                "item must be 1..={} characters",
                self.policy.max_item_length
            )));
        }
        if draft.amount.minor_units <= 0 {
            return Err(ReputationError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        if draft.amount.currency.len() != 3
            || !draft.amount.currency.chars().all(|c| c.is_ascii_uppercase())
        {
            return Err(ReputationError::Validation(
                "currency must be a three-letter code".to_string(),
            ));
        }
        if draft.occurred_at > now + self.policy.max_future_skew {
            return Err(ReputationError::Validation(
                "transaction date lies in the future".to_string(),
            ));
        }

        let record = MutualVerification::new(
            *initiator,
            counterpart.id,
            item,
            draft.amount,
            draft.role,
            draft.occurred_at,
            now,
        );
        self.stores.verifications.insert(&record).await?;
        info!(
            verification = %record.id,
            initiator = %record.initiator,
            counterpart = %record.counterpart,
            "mutual verification created"
        );
        Ok(record)
    }

    /// Respond to a pending verification as its counterpart.
    ///
    /// `counterpart_role` corrects the inferred role of the responder.
    ///
    /// # Errors
    ///
    /// - `ReputationError::NotFound` for an unknown id
    /// - `ReputationError::Forbidden` unless `responder` is the counterpart
    /// - `ReputationError::InvalidState` if the record is terminal
    /// - `ReputationError::Validation` if the corrected role equals the initiator's
    pub async fn respond(
        &self,
        id: &VerificationId,
        responder: &IdentityId,
        decision: Decision,
        counterpart_role: Option<TransactionRole>,
    ) -> Result<ResponseOutcome> {
        let mut record = self.load(id).await?;
        if record.counterpart != *responder {
            warn!(verification = %id, responder = %responder, "response from a non-party");
            return Err(ReputationError::Forbidden(
                "only the counterpart may respond".to_string(),
            ));
        }
        if record.status.is_terminal() {
            return Err(invalid_state(record.status, "respond"));
        }
        if let Some(role) = counterpart_role {
            if role == record.initiator_role {
                return Err(ReputationError::Validation(
                    "both parties cannot hold the same role".to_string(),
                ));
            }
            record.counterpart_role = role;
        }

        let now = self.clock.now();
        let expected = record.version;
        record.resolved_at = Some(now);

        let outcome = match decision {
            Decision::Reject => {
                record.status = VerificationStatus::Rejected;
                self.commit(&mut record, expected).await?;
                info!(verification = %id, "mutual verification rejected");
                ResponseOutcome::Rejected(record)
            }
            Decision::Confirm => match self.collusion_finding(&record, now).await? {
                Some(reason) => {
                    record.status = VerificationStatus::Blocked;
                    record.fraud = true;
                    record.block_reason = Some(reason.clone());
                    self.commit(&mut record, expected).await?;
                    warn!(verification = %id, %reason, "confirmation blocked by collusion check");
                    self.flag_parties(&record, &reason).await?;
                    ResponseOutcome::Blocked {
                        verification: record,
                        reason,
                    }
                }
                None => {
                    record.status = VerificationStatus::Confirmed;
                    self.commit(&mut record, expected).await?;
                    info!(verification = %id, "mutual verification confirmed");
                    ResponseOutcome::Confirmed(record)
                }
            },
        };
        Ok(outcome)
    }

    /// Force a pending record to Blocked.
    ///
    /// # Errors
    ///
    /// Returns `ReputationError::InvalidState` if the record is terminal.
    pub async fn block(&self, id: &VerificationId, reason: &str) -> Result<MutualVerification> {
        let mut record = self.load(id).await?;
        if record.status.is_terminal() {
            return Err(invalid_state(record.status, "block"));
        }
        let expected = record.version;
        record.status = VerificationStatus::Blocked;
        record.fraud = true;
        record.block_reason = Some(reason.to_string());
        record.resolved_at = Some(self.clock.now());
        self.commit(&mut record, expected).await?;
        warn!(verification = %id, reason, "mutual verification blocked");
        Ok(record)
    }

    /// Block every pending record involving `identity`. Returns how many changed.
    pub async fn block_pending_for(&self, identity: &IdentityId, reason: &str) -> Result<usize> {
        block_pending(&self.stores, identity, reason, self.clock.now()).await
    }

    /// Load a record.
    pub async fn get(&self, id: &VerificationId) -> Result<MutualVerification> {
        self.load(id).await
    }

    /// Records where `identity` is either party.
    pub async fn list(&self, identity: &IdentityId) -> Result<Vec<MutualVerification>> {
        self.stores.verifications.list_for_identity(identity).await
    }

    async fn load(&self, id: &VerificationId) -> Result<MutualVerification> {
        self.stores
            .verifications
            .get(id)
            .await?
            .ok_or_else(|| ReputationError::NotFound(format!("verification {}", id)))
    }

    async fn commit(&self, record: &mut MutualVerification, expected: u64) -> Result<()> {
        if self
            .stores
            .verifications
            .update_if_version(record, expected)
            .await?
        {
            record.version = expected + 1;
            return Ok(());
        }
        let current = self.load(&record.id).await?;
        debug!(verification = %record.id, status = current.status.as_str(), "lost response race");
        if current.status.is_terminal() {
            Err(invalid_state(current.status, "respond"))
        } else {
            Err(ReputationError::Conflict(format!(
                "verification {} changed concurrently",
                record.id
            )))
        }
    }

    async fn collusion_finding(
        &self,
        candidate: &MutualVerification,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let history = self
            .stores
            .verifications
            .list_for_identity(&candidate.initiator)
            .await?;
        let mut pair: Vec<&MutualVerification> = history
            .iter()
            .filter(|v| {
                v.id != candidate.id
                    && v.counts_as_confirmed()
                    && v.is_between(&candidate.initiator, &candidate.counterpart)
            })
            .collect();
        pair.push(candidate);
        Ok(detect_pair(&pair, now, &self.policy.pair).map(|f| f.describe()))
    }

    async fn flag_parties(&self, record: &MutualVerification, reason: &str) -> Result<()> {
        for party in [record.initiator, record.counterpart] {
            let candidate = SignalCandidate::new(
                RiskKind::Collusion,
                BLOCKED_COLLUSION_SEVERITY,
                format!("collusion:verification:{}", record.id),
                reason.to_string(),
            );
            self.risk.raise(&party, candidate).await?;
            self.risk.evaluate(&party).await?;
        }
        Ok(())
    }
}

/// Block every pending record involving `identity`, skipping records that
/// reach a terminal state concurrently.
pub(crate) async fn block_pending(
    stores: &ReputationStores,
    identity: &IdentityId,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut blocked = 0;
    for mut record in stores.verifications.list_for_identity(identity).await? {
        if record.status != VerificationStatus::Pending {
            continue;
        }
        let expected = record.version;
        record.status = VerificationStatus::Blocked;
        record.fraud = true;
        record.block_reason = Some(reason.to_string());
        record.resolved_at = Some(now);
        if stores.verifications.update_if_version(&record, expected).await? {
            warn!(verification = %record.id, reason, "pending verification blocked");
            blocked += 1;
        }
    }
    Ok(blocked)
}

fn invalid_state(status: VerificationStatus, action: &str) -> ReputationError {
    ReputationError::InvalidState {
        state: status.as_str().to_string(),
        action: action.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::RiskKind;
    use crate::testkit::{t0, Kit};

    fn draft(counterpart: &str, cents: i64) -> VerificationDraft {
        VerificationDraft {
            counterpart: counterpart.to_string(),
            item: "road bike".to_string(),
            amount: Money::new(cents, "usd"),
            role: TransactionRole::Seller,
            occurred_at: t0() - Duration::days(1),
        }
    }

    #[test]
    fn test_role_complement() {
        assert_eq!(TransactionRole::Buyer.complement(), TransactionRole::Seller);
        assert_eq!(TransactionRole::Lender.complement(), TransactionRole::Borrower);
        assert_eq!(TransactionRole::Provider.complement(), TransactionRole::Client);
    }

    #[tokio::test]
    async fn test_self_verification_rejected_for_any_identifier() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let service = kit.verifications();
        let hex = alice.id.to_hex();

        for identifier in ["alice@example.com", "ALICE@Example.com", "alice", hex.as_str()] {
            let err = service.create(&alice.id, draft(identifier, 500)).await.unwrap_err();
            assert!(matches!(err, ReputationError::SelfVerification), "{}", identifier);
        }
    }

    #[tokio::test]
    async fn test_unknown_counterpart_not_found() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let err = kit
            .verifications()
            .create(&alice.id, draft("nobody@example.com", 500))
            .await
            .unwrap_err();
        assert!(matches!(err, ReputationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        kit.user("bobby@example.com").await;
        let service = kit.verifications();

        let mut empty = draft("bobby", 500);
        empty.item = "   ".into();
        let zero = draft("bobby", 0);
        let mut future = draft("bobby", 500);
        future.occurred_at = t0() + Duration::days(3);

        for bad in [empty, zero, future] {
            let err = service.create(&alice.id, bad).await.unwrap_err();
            assert!(matches!(err, ReputationError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_create_infers_counterpart_role() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let bob = kit.user("bobby@example.com").await;
        let record = kit.verifications().create(&alice.id, draft("bobby", 500)).await.unwrap();
        assert_eq!(record.counterpart, bob.id);
        assert_eq!(record.counterpart_role, TransactionRole::Buyer);
        assert_eq!(record.status, VerificationStatus::Pending);
        assert_eq!(record.amount.currency, "USD");
    }

    #[tokio::test]
    async fn test_only_counterpart_may_respond() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        kit.user("bobby@example.com").await;
        let carol = kit.user("carol@example.com").await;
        let service = kit.verifications();
        let record = service.create(&alice.id, draft("bobby", 500)).await.unwrap();

        for outsider in [&alice.id, &carol.id] {
            let err = service
                .respond(&record.id, outsider, Decision::Confirm, None)
                .await
                .unwrap_err();
            assert!(matches!(err, ReputationError::Forbidden(_)));
        }
        assert_eq!(service.get(&record.id).await.unwrap().status, VerificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_confirm_then_terminal() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let bob = kit.user("bobby@example.com").await;
        let service = kit.verifications();
        let record = service.create(&alice.id, draft("bobby", 500)).await.unwrap();

        let outcome = service
            .respond(&record.id, &bob.id, Decision::Confirm, None)
            .await
            .unwrap();
        assert!(matches!(outcome, ResponseOutcome::Confirmed(_)));
        assert!(outcome.verification().resolved_at.is_some());

        let err = service
            .respond(&record.id, &bob.id, Decision::Reject, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReputationError::InvalidState { .. }));
        let err = service.block(&record.id, "late").await.unwrap_err();
        assert!(matches!(err, ReputationError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_reject_and_role_correction() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let bob = kit.user("bobby@example.com").await;
        let service = kit.verifications();
        let record = service.create(&alice.id, draft("bobby", 500)).await.unwrap();

        let err = service
            .respond(&record.id, &bob.id, Decision::Reject, Some(TransactionRole::Seller))
            .await
            .unwrap_err();
        assert!(matches!(err, ReputationError::Validation(_)));

        let outcome = service
            .respond(&record.id, &bob.id, Decision::Reject, Some(TransactionRole::Borrower))
            .await
            .unwrap();
        assert_eq!(outcome.verification().status, VerificationStatus::Rejected);
        assert_eq!(outcome.verification().counterpart_role, TransactionRole::Borrower);
    }

    #[tokio::test]
    async fn test_concurrent_responses_apply_once() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let bob = kit.user("bobby@example.com").await;
        let service = kit.verifications();
        let record = service.create(&alice.id, draft("bobby", 500)).await.unwrap();

        let (a, b) = futures::join!(
            service.respond(&record.id, &bob.id, Decision::Confirm, None),
            service.respond(&record.id, &bob.id, Decision::Reject, None),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(ReputationError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_reciprocal_confirmations_blocked_as_collusion() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let bob = kit.user("bobby@example.com").await;
        let service = kit.verifications();

        let first = service.create(&alice.id, draft("bobby", 100)).await.unwrap();
        service.respond(&first.id, &bob.id, Decision::Confirm, None).await.unwrap();
        let second = service.create(&bob.id, draft("alice", 200)).await.unwrap();
        service.respond(&second.id, &alice.id, Decision::Confirm, None).await.unwrap();

        let third = service.create(&alice.id, draft("bobby", 300)).await.unwrap();
        let outcome = service
            .respond(&third.id, &bob.id, Decision::Confirm, None)
            .await
            .unwrap();
        match outcome {
            ResponseOutcome::Blocked { verification, .. } => {
                assert_eq!(verification.status, VerificationStatus::Blocked);
                assert!(verification.fraud);
            }
            other => panic!("expected a block, got {:?}", other),
        }

        for party in [&alice.id, &bob.id] {
            let profile = kit.risk.profile(party).await.unwrap();
            assert!(profile
                .signals
                .iter()
                .any(|s| s.kind == RiskKind::Collusion
                    && s.fingerprint == format!("collusion:verification:{}", third.id)));
        }
    }

    #[tokio::test]
    async fn test_block_pending_for() {
        let kit = Kit::new();
        let alice = kit.user("alice@example.com").await;
        let bob = kit.user("bobby@example.com").await;
        kit.user("carol@example.com").await;
        let service = kit.verifications();
        let done = service.create(&alice.id, draft("bobby", 100)).await.unwrap();
        service.respond(&done.id, &bob.id, Decision::Confirm, None).await.unwrap();
        service.create(&alice.id, draft("carol", 100)).await.unwrap();
        service.create(&alice.id, draft("bobby", 250)).await.unwrap();

        assert_eq!(service.block_pending_for(&alice.id, "review").await.unwrap(), 2);
        let statuses: Vec<_> = service
            .list(&alice.id)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.status)
            .collect();
        assert_eq!(
            statuses.iter().filter(|s| **s == VerificationStatus::Blocked).count(),
            2
        );
        assert!(statuses.contains(&VerificationStatus::Confirmed));
    }
}
