//! Cooldown ledger
//!
//! Serializes same-kind control actions across ticks. Each scope maps to
//! the earliest timestamp at which that action is permitted again. The
//! ledger is owned by the orchestrator and only touched from its worker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Action scopes subject to cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionScope {
    ReplicaUp,
    ReplicaDown,
    NodeUp,
    NodeDown,
    Critical,
}

impl ActionScope {
    pub const ALL: [ActionScope; 5] = [
        ActionScope::ReplicaUp,
        ActionScope::ReplicaDown,
        ActionScope::NodeUp,
        ActionScope::NodeDown,
        ActionScope::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionScope::ReplicaUp => "replica_up",
            ActionScope::ReplicaDown => "replica_down",
            ActionScope::NodeUp => "node_up",
            ActionScope::NodeDown => "node_down",
            ActionScope::Critical => "critical",
        }
    }
}

/// Earliest-permitted timestamps per action scope.
#[derive(Debug, Clone, Default)]
pub struct CooldownLedger {
    next_allowed: HashMap<ActionScope, i64>,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `scope` may act at `now`.
    pub fn permits(&self, scope: ActionScope, now: i64) -> bool {
        self.next_allowed.get(&scope).is_none_or(|t| now >= *t)
    }

    /// Seconds until `scope` is permitted again (0 when already permitted).
    pub fn remaining(&self, scope: ActionScope, now: i64) -> i64 {
        self.next_allowed
            .get(&scope)
            .map(|t| (t - now).max(0))
            .unwrap_or(0)
    }

    /// Record a successful action: `scope` is blocked until
    /// `now + cooldown_secs`.
    pub fn record(&mut self, scope: ActionScope, now: i64, cooldown_secs: u64) {
        self.next_allowed.insert(scope, now + cooldown_secs as i64);
    }

    /// Remaining cooldowns per scope, for the status endpoint.
    pub fn snapshot(&self, now: i64) -> HashMap<&'static str, i64> {
        ActionScope::ALL
            .iter()
            .map(|scope| (scope.as_str(), self.remaining(*scope, now)))
            .collect()
    }
}
