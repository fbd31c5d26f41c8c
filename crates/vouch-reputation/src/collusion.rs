//! Collusion detection.
//!
//! Two complementary checks:
//!
//! - **Pair patterns**: the same two accounts confirming each other's
//!   transactions in both directions at a suspicious frequency, or over and
//!   over for the same amount. Consulted before a confirmation counts.
//! - **Rings**: graph analysis over confirmed verifications. A connected
//!   group with dense internal edges, symmetric confirmations and few
//!   outside partners is flagged as a suspicious cluster.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use vouch_evidence::Money;
use vouch_identity::IdentityId;

use crate::verification::MutualVerification;

/// Suspicion threshold for cluster detection (70%).
pub const CLUSTER_SUSPICION_THRESHOLD: f32 = 0.7;

/// Minimum cluster size to analyze.
pub const MIN_CLUSTER_SIZE: usize = 3;

/// Minimum suspicion score for a cluster to be reported.
pub const MIN_REPORTED_SUSPICION: f32 = 0.3;

/// Minimum average symmetry for a ring. One-directional stars (a seller
/// with many buyers) are normal trade, not collusion.
pub const MIN_RING_SYMMETRY: f32 = 0.5;

/// Tunables for pair detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairPolicy {
    /// Look-back window for reciprocal confirmations.
    pub window: Duration,
    /// Confirmations inside the window, in both directions, that trigger.
    pub min_reciprocal: usize,
    /// Confirmations with an identical amount that trigger.
    pub min_repeated_amount: usize,
}

impl Default for PairPolicy {
    fn default() -> Self {
        Self {
            window: Duration::days(30),
            min_reciprocal: 3,
            min_repeated_amount: 3,
        }
    }
}

/// What a pair check found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairFinding {
    /// Frequent confirmations in both directions.
    Reciprocal {
        /// Confirmations inside the window.
        count: usize,
    },
    /// The same amount confirmed again and again.
    RepeatedAmount {
        /// The repeated amount.
        amount: Money,
        /// How often it occurs.
        count: usize,
    },
}

impl PairFinding {
    /// Reviewer-facing description.
    pub fn describe(&self) -> String {
        match self {
            PairFinding::Reciprocal { count } => {
                format!("{} reciprocal confirmations with the same account", count)
            }
            PairFinding::RepeatedAmount { amount, count } => {
                format!("{} confirmations for the identical amount {}", count, amount)
            }
        }
    }
}

/// Check the confirmations between one pair of identities.
///
/// `history` must hold only records between the two parties that count as
/// confirmed, including a pending confirmation being evaluated.
pub fn detect_pair(
    history: &[&MutualVerification],
    now: DateTime<Utc>,
    policy: &PairPolicy,
) -> Option<PairFinding> {
    let cutoff = now - policy.window;
    let recent: Vec<_> = history.iter().filter(|v| v.created_at >= cutoff).collect();
    let initiators: HashSet<IdentityId> = recent.iter().map(|v| v.initiator).collect();
    if recent.len() >= policy.min_reciprocal && initiators.len() >= 2 {
        return Some(PairFinding::Reciprocal {
            count: recent.len(),
        });
    }

    let mut by_amount: HashMap<&Money, usize> = HashMap::new();
    for v in history {
        *by_amount.entry(&v.amount).or_default() += 1;
    }
    by_amount
        .into_iter()
        .filter(|(_, count)| *count >= policy.min_repeated_amount)
        .max_by_key(|(_, count)| *count)
        .map(|(amount, count)| PairFinding::RepeatedAmount {
            amount: amount.clone(),
            count,
        })
}

/// Directed confirmation counts between two identities.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Initiator of the confirmed verifications.
    pub from: IdentityId,
    /// Counterpart who confirmed.
    pub to: IdentityId,
    /// Number of confirmations.
    pub count: u32,
    /// First confirmation.
    pub first_seen: DateTime<Utc>,
    /// Latest confirmation.
    pub last_seen: DateTime<Utc>,
}

/// A member of a suspicious cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterMember {
    /// The identity.
    pub identity: IdentityId,
    /// Confirmations within the cluster.
    pub internal_connections: u32,
    /// Confirmations with outsiders.
    pub external_connections: u32,
    /// This member's share of the suspicion.
    pub suspicion_contribution: f32,
}

/// A detected suspicious cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuspiciousCluster {
    /// Members of the cluster.
    pub members: Vec<ClusterMember>,
    /// Ratio of internal to total connections (0.0-1.0).
    pub internal_density: f32,
    /// How symmetric confirmations are (0.0-1.0, 1.0 = perfectly symmetric).
    pub symmetry_score: f32,
    /// Combined suspicion score (0.0-1.0).
    pub suspicion_score: f32,
    /// When the cluster was detected.
    pub detected_at: DateTime<Utc>,
}

impl SuspiciousCluster {
    /// Check if an identity is in this cluster.
    #[must_use]
    pub fn contains(&self, identity: &IdentityId) -> bool {
        self.members.iter().any(|m| &m.identity == identity)
    }

    /// Severity 1..=10 derived from the suspicion score.
    #[must_use]
    pub fn severity(&self) -> u8 {
        ((self.suspicion_score * 10.0).ceil() as u8).clamp(1, 10)
    }
}

/// Detects collusion rings through graph analysis of confirmations.
#[derive(Clone, Debug, Default)]
pub struct CollusionDetector {
    interactions: HashMap<(IdentityId, IdentityId), InteractionRecord>,
    suspicious_clusters: Vec<SuspiciousCluster>,
    identity_clusters: HashMap<IdentityId, usize>,
}

impl CollusionDetector {
    /// Create an empty detector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a detector from verification records, counting confirmed ones.
    pub fn from_verifications<'a>(records: impl IntoIterator<Item = &'a MutualVerification>) -> Self {
        let mut detector = Self::new();
        let mut seen = HashSet::new();
        for record in records {
            if record.counts_as_confirmed() && seen.insert(record.id) {
                detector.record_interaction(record.initiator, record.counterpart, record.created_at);
            }
        }
        detector
    }

    /// Record one confirmation from `from` to `to`.
    pub fn record_interaction(&mut self, from: IdentityId, to: IdentityId, at: DateTime<Utc>) {
        self.interactions
            .entry((from, to))
            .and_modify(|r| {
                r.count = r.count.saturating_add(1);
                r.first_seen = r.first_seen.min(at);
                r.last_seen = r.last_seen.max(at);
            })
            .or_insert(InteractionRecord {
                from,
                to,
                count: 1,
                first_seen: at,
                last_seen: at,
            });
    }

    fn neighbors(&self, identity: &IdentityId) -> HashSet<IdentityId> {
        let mut neighbors = HashSet::new();
        for (from, to) in self.interactions.keys() {
            if from == identity {
                neighbors.insert(*to);
            }
            if to == identity {
                neighbors.insert(*from);
            }
        }
        neighbors
    }

    fn directed(&self, from: &IdentityId, to: &IdentityId) -> u32 {
        self.interactions.get(&(*from, *to)).map_or(0, |r| r.count)
    }

    fn interaction_count(&self, a: &IdentityId, b: &IdentityId) -> u32 {
        self.directed(a, b) + self.directed(b, a)
    }

    /// 1.0 = equal confirmations in both directions.
    fn symmetry(&self, a: &IdentityId, b: &IdentityId) -> f32 {
        let ab = self.directed(a, b) as f32;
        let ba = self.directed(b, a) as f32;
        let max = ab.max(ba);
        if max == 0.0 {
            0.0
        } else {
            ab.min(ba) / max
        }
    }

    fn connected_components(&self) -> Vec<HashSet<IdentityId>> {
        let mut visited = HashSet::new();
        let mut components = Vec::new();

        let mut all: Vec<IdentityId> = self
            .interactions
            .keys()
            .flat_map(|(from, to)| [*from, *to])
            .collect();
        all.sort();
        all.dedup();

        for start in all {
            if visited.contains(&start) {
                continue;
            }
            let mut component = HashSet::new();
            let mut queue = vec![start];
            while let Some(current) = queue.pop() {
                if !visited.insert(current) {
                    continue;
                }
                component.insert(current);
                for neighbor in self.neighbors(&current) {
                    if !visited.contains(&neighbor) {
                        queue.push(neighbor);
                    }
                }
            }
            if component.len() >= MIN_CLUSTER_SIZE {
                components.push(component);
            }
        }
        components
    }

    fn analyze_component(&self, members: &HashSet<IdentityId>, now: DateTime<Utc>) -> Option<SuspiciousCluster> {
        if members.len() < MIN_CLUSTER_SIZE {
            return None;
        }

        let mut ordered: Vec<_> = members.iter().copied().collect();
        ordered.sort();

        let mut cluster_members = Vec::with_capacity(ordered.len());
        let mut total_internal = 0u32;
        let mut total_external = 0u32;
        let mut total_symmetry = 0.0f32;
        let mut symmetry_count = 0u32;

        for identity in &ordered {
            let mut internal = 0u32;
            let mut external = 0u32;
            for neighbor in self.neighbors(identity) {
                let count = self.interaction_count(identity, &neighbor);
                if members.contains(&neighbor) {
                    internal += count;
                    total_internal += count;
                    total_symmetry += self.symmetry(identity, &neighbor);
                    symmetry_count += 1;
                } else {
                    external += count;
                    total_external += count;
                }
            }
            cluster_members.push(ClusterMember {
                identity: *identity,
                internal_connections: internal,
                external_connections: external,
                suspicion_contribution: 0.0,
            });
        }

        // Internal edges were counted once from each side.
        let internal_edges = total_internal / 2;
        let total_edges = internal_edges + total_external;
        if total_edges == 0 {
            return None;
        }

        let internal_density = internal_edges as f32 / total_edges as f32;
        let symmetry_score = if symmetry_count > 0 {
            total_symmetry / symmetry_count as f32
        } else {
            0.0
        };
        if symmetry_score < MIN_RING_SYMMETRY {
            return None;
        }
        let external_ratio = total_external as f32 / total_edges as f32;

        let density_factor = if internal_density > CLUSTER_SUSPICION_THRESHOLD {
            (internal_density - CLUSTER_SUSPICION_THRESHOLD) / (1.0 - CLUSTER_SUSPICION_THRESHOLD)
        } else {
            0.0
        };
        let symmetry_factor = if symmetry_score > 0.8 {
            (symmetry_score - 0.8) / 0.2
        } else {
            0.0
        };
        let external_factor = if external_ratio < 0.3 {
            (0.3 - external_ratio) / 0.3
        } else {
            0.0
        };

        let suspicion_score =
            (density_factor * 0.4 + symmetry_factor * 0.3 + external_factor * 0.3).clamp(0.0, 1.0);
        if suspicion_score < MIN_REPORTED_SUSPICION {
            return None;
        }

        for member in &mut cluster_members {
            let total = member.internal_connections + member.external_connections;
            if total > 0 {
                member.suspicion_contribution =
                    member.internal_connections as f32 / total as f32 * suspicion_score;
            }
        }

        Some(SuspiciousCluster {
            members: cluster_members,
            internal_density,
            symmetry_score,
            suspicion_score,
            detected_at: now,
        })
    }

    /// Run cluster analysis over all recorded confirmations.
    pub fn analyze_clusters(&mut self, now: DateTime<Utc>) {
        self.suspicious_clusters.clear();
        self.identity_clusters.clear();

        for component in self.connected_components() {
            if let Some(cluster) = self.analyze_component(&component, now) {
                let index = self.suspicious_clusters.len();
                for member in &cluster.members {
                    self.identity_clusters.insert(member.identity, index);
                }
                self.suspicious_clusters.push(cluster);
            }
        }
    }

    /// The suspicious cluster an identity belongs to.
    #[must_use]
    pub fn cluster_for(&self, identity: &IdentityId) -> Option<&SuspiciousCluster> {
        self.identity_clusters
            .get(identity)
            .and_then(|&index| self.suspicious_clusters.get(index))
    }

    /// All detected suspicious clusters.
    #[must_use]
    pub fn suspicious_clusters(&self) -> &[SuspiciousCluster] {
        &self.suspicious_clusters
    }

    /// Number of directed pairs tracked.
    #[must_use]
    pub fn interaction_count_total(&self) -> usize {
        self.interactions.len()
    }
}
