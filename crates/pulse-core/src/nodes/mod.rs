//! Node health monitoring and node-pool scaling
//!
//! `NodeMonitor` watches readiness and taints and computes capacity loss;
//! `NodeScaler` cordons, drains, and resizes the pool. The two never hold
//! each other: the monitor emits `NodeEvent`s onto a channel and the
//! orchestrator routes them to the scaler.

mod monitor;
mod scaler;

pub use monitor::{NodeHealth, NodeHealthSignal, NodeMonitor};
pub use scaler::{DrainIncomplete, DrainReport, DrainStep, NodeActionReport, NodeScaler};

use serde::Serialize;

use crate::models::Taint;

/// Taint placed on nodes the scaler is draining. The monitor treats nodes
/// carrying it as intentionally cordoned, not failed.
pub const DRAINING_TAINT_KEY: &str = "pulse.io/draining";

/// Build the draining taint.
pub fn draining_taint() -> Taint {
    Taint {
        key: DRAINING_TAINT_KEY.to_string(),
        value: "true".to_string(),
        effect: "NoSchedule".to_string(),
    }
}

/// Whether a taint set marks a deliberate drain by the scaler.
pub fn is_draining(taints: &[Taint]) -> bool {
    taints.iter().any(|t| t.key == DRAINING_TAINT_KEY)
}

/// Events emitted by the node monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    /// Node has been not-ready past the grace period; quarantine requested
    NodeLost { name: String },
    /// Node has been stably ready again; quarantine cleared
    NodeRecovered { name: String },
    CapacityDegraded { loss: f64 },
    CapacityCritical { loss: f64, lost_nodes: usize },
}
