//! Role to capability table.
//!
//! Loaded once with the configuration and never mutated. Every check is a
//! pure lookup.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use vouch_identity::Role;

/// Something a role may do beyond acting on its own account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Move reports through review.
    ReviewReports,
    /// Mark risk signals resolved.
    ResolveSignals,
    /// Read any identity's risk profile.
    ViewRiskProfiles,
    /// Read any identity's score history.
    ViewAnyScore,
    /// Run detectors for any identity.
    EvaluateRisk,
    /// Force a pending mutual verification to Blocked.
    BlockVerifications,
    /// Revoke every session of another identity.
    RevokeSessions,
}

impl Capability {
    /// Every capability.
    pub const ALL: [Capability; 7] = [
        Capability::ReviewReports,
        Capability::ResolveSignals,
        Capability::ViewRiskProfiles,
        Capability::ViewAnyScore,
        Capability::EvaluateRisk,
        Capability::BlockVerifications,
        Capability::RevokeSessions,
    ];

    /// Stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ReviewReports => "review_reports",
            Capability::ResolveSignals => "resolve_signals",
            Capability::ViewRiskProfiles => "view_risk_profiles",
            Capability::ViewAnyScore => "view_any_score",
            Capability::EvaluateRisk => "evaluate_risk",
            Capability::BlockVerifications => "block_verifications",
            Capability::RevokeSessions => "revoke_sessions",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities granted to each role. Roles without an entry have none.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityTable {
    grants: BTreeMap<Role, BTreeSet<Capability>>,
}

impl Default for CapabilityTable {
    /// Users act only on their own account, reviewers handle reports and
    /// signals, admins hold everything.
    fn default() -> Self {
        let reviewer: BTreeSet<Capability> = [
            Capability::ReviewReports,
            Capability::ResolveSignals,
            Capability::ViewRiskProfiles,
            Capability::ViewAnyScore,
            Capability::EvaluateRisk,
        ]
        .into_iter()
        .collect();

        let mut grants = BTreeMap::new();
        grants.insert(Role::User, BTreeSet::new());
        grants.insert(Role::Reviewer, reviewer);
        grants.insert(Role::Admin, Capability::ALL.into_iter().collect());
        Self { grants }
    }
}

impl CapabilityTable {
    /// A table granting nothing.
    pub fn empty() -> Self {
        Self {
            grants: BTreeMap::new(),
        }
    }

    /// Add `capability` to `role`.
    pub fn grant(mut self, role: Role, capability: Capability) -> Self {
        self.grants.entry(role).or_default().insert(capability);
        self
    }

    /// Whether `role` holds `capability`.
    pub fn allows(&self, role: Role, capability: Capability) -> bool {
        self.grants
            .get(&role)
            .is_some_and(|caps| caps.contains(&capability))
    }

    /// Capabilities of `role`.
    pub fn capabilities(&self, role: Role) -> impl Iterator<Item = Capability> + '_ {
        self.grants.get(&role).into_iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = CapabilityTable::default();
        for cap in Capability::ALL {
            assert!(!table.allows(Role::User, cap));
            assert!(table.allows(Role::Admin, cap));
        }
        assert!(table.allows(Role::Reviewer, Capability::ReviewReports));
        assert!(table.allows(Role::Reviewer, Capability::ResolveSignals));
        assert!(!table.allows(Role::Reviewer, Capability::BlockVerifications));
        assert!(!table.allows(Role::Reviewer, Capability::RevokeSessions));
    }

    #[test]
    fn test_grant_and_empty() {
        let table = CapabilityTable::empty().grant(Role::User, Capability::ViewAnyScore);
        assert!(table.allows(Role::User, Capability::ViewAnyScore));
        assert!(!table.allows(Role::Admin, Capability::ViewAnyScore));
        assert_eq!(
            table.capabilities(Role::User).collect::<Vec<_>>(),
            vec![Capability::ViewAnyScore]
        );
        assert_eq!(table.capabilities(Role::Reviewer).count(), 0);
    }

    #[test]
    fn test_json_shape() {
        let table = CapabilityTable::empty()
            .grant(Role::Reviewer, Capability::ReviewReports)
            .grant(Role::Reviewer, Capability::ResolveSignals);
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"{"reviewer":["review_reports","resolve_signals"]}"#);
        let parsed: CapabilityTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, table);
    }
}
