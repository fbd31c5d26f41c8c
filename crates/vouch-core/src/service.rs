//! The [`TrustService`] facade.
//!
//! Every operation of the trust core is exposed here as one named async
//! function. The facade wires the component services to a shared set of
//! repositories, checks capabilities and performs the cross-component
//! follow-ups: risk screening of new accounts and suspicious evidence, and
//! score recalculation after identity verification, confirmed mutual
//! verifications and verified reports.
//!
//! Follow-ups that run after the triggering write has committed are
//! bookkeeping. Their failures are logged and never turn a committed
//! operation into an error, except for identity verification, whose score
//! boost is part of the answer.

use std::sync::Arc;

use tracing::{debug, info, warn};
use vouch_auth::{
    InMemoryOtpStore, InMemoryRateLimiter, InMemorySessionStore, IssuedCode, OtpAuthenticator,
    OtpStore, RateLimiter, RevocationReason, Session, SessionId, SessionIssuer, SessionStore,
    TokenPair,
};
use vouch_crypto::SigningKey;
use vouch_evidence::{
    BlobStore, EvidenceExtractor, EvidenceIngestor, EvidenceRecord, EvidenceState, EvidenceStore,
    EvidenceSubmission, InMemoryBlobStore, InMemoryEvidenceStore,
};
use vouch_identity::{
    modify_identity, Clock, DeviceFingerprint, EmailAddress, Identity, IdentityDirectory,
    IdentityError, IdentityId, IdentityVerificationProvider, InMemoryDirectory, ProviderStatus,
    Role, SignupMetadata,
};
use vouch_reputation::{
    Decision, InMemoryReportStore, InMemorySignalStore, InMemorySnapshotStore,
    InMemoryVerificationStore, MutualVerification, MutualVerificationService, RecalcOutcome,
    RecalcTrigger, Report, ReportDraft, ReportId, ReportPipeline, ReportStatus, ReportStore,
    ReputationStores, ResponseOutcome, ReviewOutcome, RiskAssessment, RiskEngine, RiskProfile,
    RiskSignal, SignalId, SignalStore, SnapshotStore, TransactionRole, TrustScore,
    TrustScoreAggregator, TrustScoreSnapshot, TrustTier, VerificationDraft, VerificationId,
    VerificationStore,
};
use vouch_store::SledStore;

use crate::capabilities::{Capability, CapabilityTable};
use crate::config::{StorageConfig, VouchConfig};
use crate::error::{CoreError, ErrorKind, Result};

// ============================================================================
// Wiring
// ============================================================================

/// Every repository the services use.
#[derive(Clone)]
pub struct Backend {
    /// Identities.
    pub directory: Arc<dyn IdentityDirectory>,
    /// One-time codes.
    pub otp_codes: Arc<dyn OtpStore>,
    /// Code request windows.
    pub rate_limits: Arc<dyn RateLimiter>,
    /// Sessions.
    pub sessions: Arc<dyn SessionStore>,
    /// Evidence records.
    pub evidence: Arc<dyn EvidenceStore>,
    /// Evidence files.
    pub blobs: Arc<dyn BlobStore>,
    /// Risk signals.
    pub signals: Arc<dyn SignalStore>,
    /// Reports.
    pub reports: Arc<dyn ReportStore>,
    /// Mutual verifications.
    pub verifications: Arc<dyn VerificationStore>,
    /// Score snapshots.
    pub snapshots: Arc<dyn SnapshotStore>,
    database: Option<Arc<SledStore>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("persistent", &self.database.is_some())
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Fresh in-memory repositories.
    pub fn in_memory() -> Self {
        Self {
            directory: Arc::new(InMemoryDirectory::new()),
            otp_codes: Arc::new(InMemoryOtpStore::new()),
            rate_limits: Arc::new(InMemoryRateLimiter::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            evidence: Arc::new(InMemoryEvidenceStore::new()),
            blobs: Arc::new(InMemoryBlobStore::new()),
            signals: Arc::new(InMemorySignalStore::new()),
            reports: Arc::new(InMemoryReportStore::new()),
            verifications: Arc::new(InMemoryVerificationStore::new()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            database: None,
        }
    }

    /// Every repository backed by one sled database.
    pub fn sled(store: Arc<SledStore>) -> Self {
        Self {
            directory: store.clone(),
            otp_codes: store.clone(),
            rate_limits: store.clone(),
            sessions: store.clone(),
            evidence: store.clone(),
            blobs: store.clone(),
            signals: store.clone(),
            reports: store.clone(),
            verifications: store.clone(),
            snapshots: store.clone(),
            database: Some(store),
        }
    }

    /// Open the repositories a storage configuration describes.
    pub fn open(storage: &StorageConfig) -> Result<Self> {
        if storage.in_memory {
            return Ok(Self::in_memory());
        }
        let store = SledStore::open(&storage.data_dir, storage.cache_mb)?;
        Ok(Self::sled(Arc::new(store)))
    }

    /// The repositories the reputation services share.
    pub fn reputation_stores(&self) -> ReputationStores {
        ReputationStores {
            directory: self.directory.clone(),
            evidence: self.evidence.clone(),
            sessions: self.sessions.clone(),
            signals: self.signals.clone(),
            reports: self.reports.clone(),
            verifications: self.verifications.clone(),
            snapshots: self.snapshots.clone(),
        }
    }

    /// Flush the database to disk. A no-op in memory.
    pub async fn flush(&self) -> Result<()> {
        if let Some(db) = &self.database {
            let bytes = db.flush().await?;
            debug!(bytes, "database flushed");
        }
        Ok(())
    }
}

/// External collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Delivers one-time codes.
    pub dispatcher: Arc<dyn vouch_auth::Dispatcher>,
    /// Extracts fields from evidence.
    pub extractor: Arc<dyn EvidenceExtractor>,
    /// Confirms identities.
    pub provider: Arc<dyn IdentityVerificationProvider>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

// ============================================================================
// Outcomes
// ============================================================================

/// An authenticated caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Who is calling.
    pub identity: IdentityId,
    /// Their role at authentication time.
    pub role: Role,
    /// Session the access token belongs to.
    pub session: SessionId,
}

/// Result of a successful code verification.
#[derive(Clone, Debug)]
pub struct Login {
    /// The signed-in identity.
    pub identity: Identity,
    /// New session tokens.
    pub tokens: TokenPair,
    /// This login created the identity.
    pub created: bool,
}

/// Result of an evidence submission.
#[derive(Clone, Debug)]
pub struct EvidenceOutcome {
    /// The stored record.
    pub record: EvidenceRecord,
    /// Risk screening, run when the record came out fraudulent or rejected.
    pub assessment: Option<RiskAssessment>,
}

impl EvidenceOutcome {
    /// [`ErrorKind::FraudDetected`] when the submission raised a fraud flag.
    pub fn notice(&self) -> Option<ErrorKind> {
        self.record.fraud.then_some(ErrorKind::FraudDetected)
    }
}

/// Result of responding to a mutual verification.
#[derive(Clone, Debug)]
pub struct VerificationResponse {
    /// What happened to the record.
    pub outcome: ResponseOutcome,
    /// Score recalculations of both parties after a confirmation.
    pub recalculated: Vec<RecalcOutcome>,
}

impl VerificationResponse {
    /// [`ErrorKind::FraudDetected`] when collusion detection blocked the confirmation.
    pub fn notice(&self) -> Option<ErrorKind> {
        matches!(self.outcome, ResponseOutcome::Blocked { .. }).then_some(ErrorKind::FraudDetected)
    }
}

/// Result of checking an identity verification with the provider.
#[derive(Clone, Debug)]
pub struct IdentityVerificationOutcome {
    /// Status reported by the provider.
    pub status: ProviderStatus,
    /// The identity afterwards.
    pub identity: Identity,
    /// Score recalculation, when the identity became verified.
    pub recalculated: Option<RecalcOutcome>,
}

/// Current score of an identity.
#[derive(Clone, Debug)]
pub struct ScoreView {
    /// Identity.
    pub identity: IdentityId,
    /// Score computed from current data.
    pub score: TrustScore,
    /// Display tier of the current score.
    pub tier: TrustTier,
    /// Most recent recorded snapshot.
    pub latest: Option<TrustScoreSnapshot>,
}

// ============================================================================
// Service
// ============================================================================

/// Entry point to every trust-core operation.
pub struct TrustService {
    capabilities: CapabilityTable,
    directory: Arc<dyn IdentityDirectory>,
    provider: Arc<dyn IdentityVerificationProvider>,
    clock: Arc<dyn Clock>,
    otp: OtpAuthenticator,
    sessions: SessionIssuer,
    evidence: EvidenceIngestor,
    risk: Arc<RiskEngine>,
    verifications: MutualVerificationService,
    reports: ReportPipeline,
    aggregator: Arc<TrustScoreAggregator>,
    backend: Backend,
}

impl std::fmt::Debug for TrustService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustService")
            .field("capabilities", &self.capabilities)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl TrustService {
    /// Wire the services.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if the configuration does not validate.
    pub fn new(
        config: &VouchConfig,
        backend: Backend,
        collaborators: Collaborators,
        signing_key: SigningKey,
    ) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            dispatcher,
            extractor,
            provider,
            clock,
        } = collaborators;
        let stores = backend.reputation_stores();

        let otp = OtpAuthenticator::new(
            backend.otp_codes.clone(),
            backend.rate_limits.clone(),
            dispatcher,
            clock.clone(),
            config.otp_policy()?,
        );
        let sessions = SessionIssuer::new(
            backend.sessions.clone(),
            clock.clone(),
            signing_key,
            config.session_policy()?,
        );
        let evidence = EvidenceIngestor::new(
            backend.evidence.clone(),
            extractor,
            backend.blobs.clone(),
            clock.clone(),
            config.evidence_policy(),
        );
        let risk = Arc::new(RiskEngine::new(
            stores.clone(),
            clock.clone(),
            config.risk_policy()?,
        ));
        let verifications = MutualVerificationService::new(
            stores.clone(),
            risk.clone(),
            clock.clone(),
            config.verification_policy()?,
        );
        let reports = ReportPipeline::new(
            stores.clone(),
            risk.clone(),
            clock.clone(),
            config.report_policy()?,
        );
        let aggregator = Arc::new(TrustScoreAggregator::new(
            stores,
            clock.clone(),
            config.score.clone(),
        ));

        info!(persistent = backend.database.is_some(), "trust service ready");
        Ok(Self {
            capabilities: config.capabilities.clone(),
            directory: backend.directory.clone(),
            provider,
            clock,
            otp,
            sessions,
            evidence,
            risk,
            verifications,
            reports,
            aggregator,
            backend,
        })
    }

    /// The shared score aggregator.
    pub fn aggregator(&self) -> Arc<TrustScoreAggregator> {
        self.aggregator.clone()
    }

    /// The repositories.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    // ==================== Sign-in ====================

    /// Issue a one-time code to `email`.
    ///
    /// # Errors
    ///
    /// `ValidationError` for a malformed email, `RateLimitExceeded` after
    /// too many requests in the window, `Dispatch` when delivery fails.
    pub async fn request_code(&self, email: &str) -> Result<IssuedCode> {
        Ok(self.otp.request_code(email).await?)
    }

    /// Verify a one-time code and open a session on `device`.
    ///
    /// The first successful verification for an email creates the identity
    /// and screens it for risk. Verifying the email for the first time
    /// records a score snapshot.
    ///
    /// # Errors
    ///
    /// `InvalidOtp` for a wrong, consumed or expired code; `Forbidden` for a
    /// suspended account.
    pub async fn verify_code(
        &self,
        email: &str,
        code: &str,
        device: DeviceFingerprint,
    ) -> Result<Login> {
        let email = self.otp.verify_code(email, code).await?;
        let (identity, created) = match self.directory.find_by_email(&email).await? {
            Some(existing) => (existing, false),
            None => self.sign_up(email, &device).await?,
        };
        if !identity.is_enabled() {
            warn!(identity = %identity.id, "sign-in attempt on a suspended account");
            return Err(CoreError::Forbidden("account suspended".to_string()));
        }

        let identity = if identity.flags.email_verified {
            identity
        } else {
            let verified = modify_identity(self.directory.as_ref(), &identity.id, |i| {
                if i.flags.email_verified {
                    return Ok(false);
                }
                i.flags.email_verified = true;
                Ok(true)
            })
            .await?;
            info!(identity = %verified.id, "email verified");
            self.follow_up_score(&verified.id, RecalcTrigger::EmailVerified)
                .await;
            verified
        };
        if created {
            self.screen(&identity.id).await;
        }

        let tokens = self.sessions.issue(identity.id, device).await?;
        Ok(Login {
            identity,
            tokens,
            created,
        })
    }

    async fn sign_up(
        &self,
        email: EmailAddress,
        device: &DeviceFingerprint,
    ) -> Result<(Identity, bool)> {
        let signup = SignupMetadata {
            device: Some(device.clone()),
            source: None,
        };
        let identity = Identity::new(email.clone(), signup, self.clock.now());
        match self.directory.insert(&identity).await {
            Ok(()) => {
                info!(identity = %identity.id, "identity created");
                Ok((identity, true))
            }
            Err(IdentityError::AlreadyExists(_)) => {
                debug!("concurrent first sign-in, using the stored identity");
                let existing = self
                    .directory
                    .find_by_email(&email)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(format!("identity for {}", email)))?;
                Ok((existing, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rotate a refresh token.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for unknown, expired or revoked tokens. Presenting a
    /// stale token for a live session also revokes that session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        Ok(self.sessions.refresh(refresh_token).await?)
    }

    /// Sign out the session a refresh token belongs to.
    pub async fn sign_out(&self, refresh_token: &str) -> Result<()> {
        Ok(self.sessions.revoke_token(refresh_token).await?)
    }

    /// Resolve an access token to its caller.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for a bad, expired or revoked token; `Forbidden` for a
    /// suspended account.
    pub async fn authenticate(&self, access_token: &str) -> Result<Principal> {
        let claims = self.sessions.authenticate(access_token).await?;
        let identity = self
            .directory
            .get(&claims.subject)
            .await?
            .ok_or(vouch_auth::AuthError::Unauthorized)?;
        if !identity.is_enabled() {
            return Err(CoreError::Forbidden("account suspended".to_string()));
        }
        Ok(Principal {
            identity: identity.id,
            role: identity.role,
            session: claims.session,
        })
    }

    /// Sessions of the caller, newest first.
    pub async fn list_sessions(&self, caller: &Principal) -> Result<Vec<Session>> {
        Ok(self.sessions.list_sessions(&caller.identity).await?)
    }

    /// Revoke one of the caller's sessions.
    ///
    /// # Errors
    ///
    /// `NotFound` if the caller has no such session.
    pub async fn revoke_session(&self, caller: &Principal, session: &SessionId) -> Result<bool> {
        let owned = self
            .sessions
            .list_sessions(&caller.identity)
            .await?
            .iter()
            .any(|s| s.id == *session);
        if !owned {
            return Err(CoreError::NotFound(format!("session {}", session)));
        }
        Ok(self
            .sessions
            .revoke_session(session, RevocationReason::SignedOut)
            .await?)
    }

    /// Revoke every session of `target`. Returns how many changed.
    ///
    /// Callers may always target themselves; other targets need
    /// [`Capability::RevokeSessions`].
    pub async fn revoke_all(&self, caller: &Principal, target: &IdentityId) -> Result<usize> {
        self.require_self_or(caller, target, Capability::RevokeSessions)?;
        let revoked = self.sessions.revoke_all(target).await?;
        info!(identity = %target, by = %caller.identity, revoked, "sessions revoked");
        Ok(revoked)
    }

    /// Record that the caller configured a second factor.
    pub async fn enable_second_factor(&self, caller: &Principal) -> Result<Identity> {
        let identity = modify_identity(self.directory.as_ref(), &caller.identity, |i| {
            if i.flags.second_factor {
                return Ok(false);
            }
            i.flags.second_factor = true;
            Ok(true)
        })
        .await?;
        self.follow_up_score(&identity.id, RecalcTrigger::Manual).await;
        Ok(identity)
    }

    // ==================== Identity verification ====================

    /// Ask the provider about `reference` and apply the answer.
    ///
    /// A Verified answer marks the identity verified and recalculates its
    /// score immediately. Pending and Failed only record the reference.
    ///
    /// # Errors
    ///
    /// `ValidationError` for an empty reference, `Dispatch` when the
    /// provider cannot be reached.
    pub async fn complete_identity_verification(
        &self,
        caller: &Principal,
        reference: &str,
    ) -> Result<IdentityVerificationOutcome> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(CoreError::Validation(
                "verification reference is empty".to_string(),
            ));
        }
        let report = self.provider.get_status(reference).await?;

        let identity = modify_identity(self.directory.as_ref(), &caller.identity, |i| {
            let mut changed = false;
            if i.flags.verification_reference.as_deref() != Some(reference) {
                i.flags.verification_reference = Some(reference.to_string());
                changed = true;
            }
            if report.status == ProviderStatus::Verified && !i.flags.identity_verified {
                i.flags.identity_verified = true;
                i.flags.identity_verified_at = Some(report.checked_at);
                changed = true;
            }
            Ok(changed)
        })
        .await?;

        let recalculated = if report.status == ProviderStatus::Verified {
            info!(identity = %identity.id, "identity verified by provider");
            Some(
                self.aggregator
                    .recalculate(&identity.id, RecalcTrigger::IdentityVerified)
                    .await?,
            )
        } else {
            debug!(identity = %identity.id, status = ?report.status, "identity verification not complete");
            None
        };
        Ok(IdentityVerificationOutcome {
            status: report.status,
            identity,
            recalculated,
        })
    }

    // ==================== Evidence ====================

    /// Submit evidence as the caller.
    ///
    /// A fraudulent or rejected record is stored and additionally screens
    /// the caller for risk; neither fails the call.
    ///
    /// # Errors
    ///
    /// `DuplicateEvidence` when any identity already submitted the same
    /// content, `ValidationError` for malformed content.
    pub async fn submit_evidence(
        &self,
        caller: &Principal,
        submission: EvidenceSubmission,
    ) -> Result<EvidenceOutcome> {
        let owner = self.load_identity(&caller.identity).await?;
        let submitted = self.evidence.submit(&owner, submission).await?;
        let record = submitted.record;

        let assessment = if record.fraud || record.state == EvidenceState::Rejected {
            self.screen(&owner.id).await
        } else {
            None
        };
        Ok(EvidenceOutcome { record, assessment })
    }

    /// Evidence submitted by the caller.
    pub async fn list_evidence(&self, caller: &Principal) -> Result<Vec<EvidenceRecord>> {
        Ok(self.evidence.list(&caller.identity).await?)
    }

    // ==================== Risk ====================

    /// Run every detector for `identity`.
    pub async fn evaluate_risk(
        &self,
        caller: &Principal,
        identity: &IdentityId,
    ) -> Result<RiskAssessment> {
        self.require(caller, Capability::EvaluateRisk)?;
        Ok(self.risk.evaluate(identity).await?)
    }

    /// Mark a signal resolved.
    pub async fn resolve_signal(&self, caller: &Principal, signal: &SignalId) -> Result<RiskSignal> {
        self.require(caller, Capability::ResolveSignals)?;
        Ok(self.risk.resolve_signal(signal, &caller.identity).await?)
    }

    /// Signals and composite risk score of `identity`.
    pub async fn risk_profile(&self, caller: &Principal, identity: &IdentityId) -> Result<RiskProfile> {
        self.require(caller, Capability::ViewRiskProfiles)?;
        Ok(self.risk.profile(identity).await?)
    }

    // ==================== Mutual verification ====================

    /// Propose a mutual verification to another user.
    ///
    /// # Errors
    ///
    /// `SelfVerification` when the counterpart is the caller, `NotFound`
    /// when it does not resolve, `ValidationError` for bad details.
    pub async fn create_verification(
        &self,
        caller: &Principal,
        draft: VerificationDraft,
    ) -> Result<MutualVerification> {
        Ok(self.verifications.create(&caller.identity, draft).await?)
    }

    /// Respond to a pending verification as its counterpart.
    ///
    /// A confirmation that survives collusion detection recalculates both
    /// parties' scores.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the caller is the counterpart, `InvalidState` for
    /// a terminal record.
    pub async fn respond_verification(
        &self,
        caller: &Principal,
        id: &VerificationId,
        decision: Decision,
        counterpart_role: Option<TransactionRole>,
    ) -> Result<VerificationResponse> {
        let outcome = self
            .verifications
            .respond(id, &caller.identity, decision, counterpart_role)
            .await?;

        let mut recalculated = Vec::new();
        if let ResponseOutcome::Confirmed(record) = &outcome {
            for party in [record.initiator, record.counterpart] {
                if let Some(result) = self
                    .follow_up_score(&party, RecalcTrigger::VerificationConfirmed)
                    .await
                {
                    recalculated.push(result);
                }
            }
        }
        Ok(VerificationResponse {
            outcome,
            recalculated,
        })
    }

    /// Force a pending verification to Blocked.
    pub async fn block_verification(
        &self,
        caller: &Principal,
        id: &VerificationId,
        reason: &str,
    ) -> Result<MutualVerification> {
        self.require(caller, Capability::BlockVerifications)?;
        Ok(self.verifications.block(id, reason).await?)
    }

    /// Verifications the caller is party to.
    pub async fn list_verifications(&self, caller: &Principal) -> Result<Vec<MutualVerification>> {
        Ok(self.verifications.list(&caller.identity).await?)
    }

    // ==================== Reports ====================

    /// File a report as the caller.
    ///
    /// # Errors
    ///
    /// `SelfReport`, `NotFound`, `ValidationError`, or `RateLimitExceeded`
    /// once the caller filed the maximum in the rolling window.
    pub async fn file_report(&self, caller: &Principal, draft: ReportDraft) -> Result<Report> {
        Ok(self.reports.file_report(&caller.identity, draft).await?)
    }

    /// Move a report through review.
    ///
    /// Verifying a report re-evaluates and recalculates the reported user.
    pub async fn review_report(
        &self,
        caller: &Principal,
        id: &ReportId,
        to: ReportStatus,
    ) -> Result<ReviewOutcome> {
        self.require(caller, Capability::ReviewReports)?;
        let outcome = self.reports.review(id, &caller.identity, to).await?;
        if outcome.report.status == ReportStatus::Verified {
            self.follow_up_score(&outcome.report.reported, RecalcTrigger::ReportVerified)
                .await;
        }
        Ok(outcome)
    }

    /// Reports filed against `identity`.
    pub async fn reports_against(
        &self,
        caller: &Principal,
        identity: &IdentityId,
    ) -> Result<Vec<Report>> {
        self.require(caller, Capability::ReviewReports)?;
        Ok(self.reports.list_against(identity).await?)
    }

    // ==================== Trust score ====================

    /// Current score of `identity`.
    pub async fn score(&self, caller: &Principal, identity: &IdentityId) -> Result<ScoreView> {
        self.require_self_or(caller, identity, Capability::ViewAnyScore)?;
        let score = self.aggregator.compute(identity).await?;
        let latest = self.aggregator.latest(identity).await?;
        Ok(ScoreView {
            identity: *identity,
            tier: score.tier(),
            score,
            latest,
        })
    }

    /// Up to `limit` snapshots of `identity`, newest first.
    pub async fn score_history(
        &self,
        caller: &Principal,
        identity: &IdentityId,
        limit: usize,
    ) -> Result<Vec<TrustScoreSnapshot>> {
        self.require_self_or(caller, identity, Capability::ViewAnyScore)?;
        Ok(self.aggregator.history(identity, limit).await?)
    }

    // ==================== Helpers ====================

    fn require(&self, caller: &Principal, capability: Capability) -> Result<()> {
        if self.capabilities.allows(caller.role, capability) {
            Ok(())
        } else {
            warn!(identity = %caller.identity, role = ?caller.role, %capability, "capability denied");
            Err(CoreError::Forbidden(format!("requires {}", capability)))
        }
    }

    fn require_self_or(
        &self,
        caller: &Principal,
        target: &IdentityId,
        capability: Capability,
    ) -> Result<()> {
        if caller.identity == *target {
            Ok(())
        } else {
            self.require(caller, capability)
        }
    }

    async fn load_identity(&self, id: &IdentityId) -> Result<Identity> {
        self.directory
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("identity {}", id)))
    }

    async fn screen(&self, identity: &IdentityId) -> Option<RiskAssessment> {
        match self.risk.evaluate(identity).await {
            Ok(assessment) => Some(assessment),
            Err(e) => {
                warn!(identity = %identity, error = %e, "risk screening failed");
                None
            }
        }
    }

    async fn follow_up_score(
        &self,
        identity: &IdentityId,
        trigger: RecalcTrigger,
    ) -> Option<RecalcOutcome> {
        match self.aggregator.recalculate(identity, trigger).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(identity = %identity, ?trigger, error = %e, "score recalculation failed");
                None
            }
        }
    }
}
