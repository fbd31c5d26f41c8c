//! Shared fixtures for unit tests.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use vouch_auth::{InMemorySessionStore, Session, SessionId, SessionStore};
use vouch_crypto::Hash256;
use vouch_evidence::{
    EvidenceIngestor, EvidencePolicy, FixedExtractor, InMemoryBlobStore, InMemoryEvidenceStore,
};
use vouch_identity::{
    DeviceFingerprint, EmailAddress, Identity, IdentityDirectory, InMemoryDirectory, ManualClock,
    SignupMetadata, Username,
};

use crate::aggregator::TrustScoreAggregator;
use crate::memory::{
    InMemoryReportStore, InMemorySignalStore, InMemorySnapshotStore, InMemoryVerificationStore,
};
use crate::report::{ReportPipeline, ReportPolicy};
use crate::risk::{RiskEngine, RiskPolicy};
use crate::score::ScorePolicy;
use crate::store::ReputationStores;
use crate::verification::{MutualVerificationService, VerificationPolicy};

pub(crate) fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).unwrap()
}

pub(crate) struct Kit {
    pub clock: ManualClock,
    pub stores: ReputationStores,
    pub directory: Arc<InMemoryDirectory>,
    pub sessions: Arc<InMemorySessionStore>,
    pub extractor: Arc<FixedExtractor>,
    pub ingestor: EvidenceIngestor,
    pub risk: Arc<RiskEngine>,
}

impl Kit {
    pub fn new() -> Self {
        let clock = ManualClock::new(t0());
        let directory = Arc::new(InMemoryDirectory::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let evidence = Arc::new(InMemoryEvidenceStore::new());
        let stores = ReputationStores {
            directory: directory.clone(),
            evidence: evidence.clone(),
            sessions: sessions.clone(),
            signals: Arc::new(InMemorySignalStore::new()),
            reports: Arc::new(InMemoryReportStore::new()),
            verifications: Arc::new(InMemoryVerificationStore::new()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
        };
        let extractor = Arc::new(FixedExtractor::new());
        let ingestor = EvidenceIngestor::new(
            evidence,
            extractor.clone(),
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(clock.clone()),
            EvidencePolicy::default(),
        );
        let risk = Arc::new(RiskEngine::new(
            stores.clone(),
            Arc::new(clock.clone()),
            RiskPolicy::default(),
        ));
        Self {
            clock,
            stores,
            directory,
            sessions,
            extractor,
            ingestor,
            risk,
        }
    }

    pub fn verifications(&self) -> MutualVerificationService {
        MutualVerificationService::new(
            self.stores.clone(),
            self.risk.clone(),
            Arc::new(self.clock.clone()),
            VerificationPolicy::default(),
        )
    }

    pub fn reports(&self) -> ReportPipeline {
        ReportPipeline::new(
            self.stores.clone(),
            self.risk.clone(),
            Arc::new(self.clock.clone()),
            ReportPolicy::default(),
        )
    }

    pub fn aggregator(&self) -> TrustScoreAggregator {
        TrustScoreAggregator::new(
            self.stores.clone(),
            Arc::new(self.clock.clone()),
            ScorePolicy::default(),
        )
    }

    /// An identity named after the local part of `email`.
    pub async fn user(&self, email: &str) -> Identity {
        self.insert(email, SignupMetadata::default()).await
    }

    /// An identity that signed up from `device_id` at `ip`.
    pub async fn user_from(&self, email: &str, device_id: &str, ip: &str) -> Identity {
        let signup = SignupMetadata {
            device: Some(device(device_id, ip)),
            source: None,
        };
        self.insert(email, signup).await
    }

    async fn insert(&self, email: &str, signup: SignupMetadata) -> Identity {
        let local = email.split('@').next().unwrap();
        let identity = Identity::new(EmailAddress::parse(email).unwrap(), signup, self.clock_now())
            .with_username(Username::new(local).unwrap());
        self.directory.insert(&identity).await.unwrap();
        identity
    }

    /// Store an active session for `identity` on `device`.
    pub async fn session(&self, identity: &Identity, device: DeviceFingerprint) -> Session {
        let now = self.clock_now();
        let session = Session {
            id: SessionId::generate(),
            identity: identity.id,
            refresh_hash: Hash256::hash(SessionId::generate().to_hex().as_bytes()),
            superseded: Vec::new(),
            device,
            created_at: now,
            expires_at: now + chrono::Duration::days(30),
            last_seen_at: now,
            activity_weeks: vec![vouch_auth::week_index(now)],
            active: true,
            revoked: None,
            version: 0,
        };
        self.sessions.insert(&session).await.unwrap();
        session
    }

    pub async fn reload(&self, identity: &Identity) -> Identity {
        self.directory.get(&identity.id).await.unwrap().unwrap()
    }

    fn clock_now(&self) -> DateTime<Utc> {
        use vouch_identity::Clock;
        self.clock.now()
    }
}

pub(crate) fn device(device_id: &str, ip: &str) -> DeviceFingerprint {
    DeviceFingerprint::new(device_id, ip.parse::<IpAddr>().unwrap())
}
