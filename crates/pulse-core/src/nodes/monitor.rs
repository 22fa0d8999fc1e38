//! Node health monitor
//!
//! Classifies each node's readiness and schedulability from the cluster view,
//! applies a not-ready hysteresis before a node counts as lost, and tracks
//! quarantine state. Runs as a background worker publishing snapshots and
//! transition events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tracing::{info, warn};

use crate::cluster::{with_deadline, NodeApi, NodeView, DEFAULT_DEADLINE};
use crate::config::PulseConfig;
use crate::models::NodeState;
use crate::nodes::{is_draining, NodeEvent};

/// Aggregate node health snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeHealth {
    pub nodes: Vec<NodeState>,
    pub total: usize,
    pub ready: usize,
    /// Fraction of nodes lost after hysteresis, always in [0, 1]
    pub capacity_loss: f64,
    pub observed_at: i64,
}

/// Node health as seen by the decision loop.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "freshness", rename_all = "snake_case")]
pub enum NodeHealthSignal {
    Fresh(NodeHealth),
    /// The cluster API cannot be read; do not assume an empty cluster
    Unknown,
}

impl NodeHealthSignal {
    pub fn health(&self) -> Option<&NodeHealth> {
        match self {
            NodeHealthSignal::Fresh(h) => Some(h),
            NodeHealthSignal::Unknown => None,
        }
    }
}

/// Watches node readiness with hysteresis and quarantine tracking.
pub struct NodeMonitor {
    api: Arc<dyn NodeApi>,
    poll_interval: Duration,
    grace_secs: i64,
    critical_loss: f64,
    /// First timestamp each node was seen not-ready
    not_ready_since: HashMap<String, i64>,
    /// First timestamp each quarantined node was seen ready again
    ready_since: HashMap<String, i64>,
    /// Nodes currently quarantined (lost and awaiting stable recovery)
    quarantined: HashSet<String>,
}

impl NodeMonitor {
    pub fn new(api: Arc<dyn NodeApi>, config: &PulseConfig) -> Self {
        Self {
            api,
            poll_interval: Duration::from_secs(config.node_poll_interval_secs),
            grace_secs: config.not_ready_grace_secs as i64,
            critical_loss: config.critical_capacity_loss,
            not_ready_since: HashMap::new(),
            ready_since: HashMap::new(),
            quarantined: HashSet::new(),
        }
    }

    /// Process one cluster view, returning the aggregate snapshot and any
    /// transition events.
    pub fn observe(&mut self, views: &[NodeView], now: i64) -> (NodeHealth, Vec<NodeEvent>) {
        let mut events = Vec::new();
        let mut nodes = Vec::with_capacity(views.len());
        let mut ready_count = 0usize;
        let mut lost = 0usize;

        for view in views {
            let draining = is_draining(&view.taints);
            let schedulable = !view.unschedulable
                && !view
                    .taints
                    .iter()
                    .any(|t| t.effect == "NoSchedule");

            if view.ready {
                ready_count += 1;
                self.not_ready_since.remove(&view.name);

                if self.quarantined.contains(&view.name) {
                    // Quarantine clears only after a stable-ready window.
                    let since = *self.ready_since.entry(view.name.clone()).or_insert(now);
                    if now - since >= self.grace_secs {
                        self.quarantined.remove(&view.name);
                        self.ready_since.remove(&view.name);
                        events.push(NodeEvent::NodeRecovered {
                            name: view.name.clone(),
                        });
                        info!(node = %view.name, "Node recovered, quarantine cleared");
                    }
                }
            } else {
                self.ready_since.remove(&view.name);
                // Nodes the scaler is draining are not failures.
                if !draining {
                    let since = *self.not_ready_since.entry(view.name.clone()).or_insert(now);
                    if now - since >= self.grace_secs {
                        lost += 1;
                        if !self.quarantined.contains(&view.name) {
                            self.quarantined.insert(view.name.clone());
                            events.push(NodeEvent::NodeLost {
                                name: view.name.clone(),
                            });
                            warn!(
                                node = %view.name,
                                not_ready_secs = now - since,
                                "Node lost, requesting quarantine"
                            );
                        }
                    }
                }
            }

            nodes.push(NodeState {
                name: view.name.clone(),
                ready: view.ready,
                schedulable,
                taints: view.taints.clone(),
                last_transition_ts: view.last_transition_ts,
                quarantined: self.quarantined.contains(&view.name),
            });
        }

        // Forget nodes that left the cluster.
        self.not_ready_since
            .retain(|name, _| views.iter().any(|v| &v.name == name));
        self.quarantined
            .retain(|name| views.iter().any(|v| &v.name == name));

        let total = views.len();
        let capacity_loss = if total == 0 {
            0.0
        } else {
            (lost as f64 / total as f64).clamp(0.0, 1.0)
        };

        if capacity_loss >= self.critical_loss && lost > 0 {
            events.push(NodeEvent::CapacityCritical {
                loss: capacity_loss,
                lost_nodes: lost,
            });
        } else if lost > 0 {
            events.push(NodeEvent::CapacityDegraded {
                loss: capacity_loss,
            });
        }

        (
            NodeHealth {
                nodes,
                total,
                ready: ready_count,
                capacity_loss,
                observed_at: now,
            },
            events,
        )
    }

    /// Background worker: poll the cluster, publish snapshots, forward
    /// events, stop on shutdown.
    pub async fn run(
        mut self,
        health_tx: watch::Sender<NodeHealthSignal>,
        event_tx: mpsc::Sender<NodeEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Starting node monitor"
        );
        let mut ticker = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    match with_deadline(DEFAULT_DEADLINE, self.api.list_nodes()).await {
                        Ok(views) => {
                            let (health, events) = self.observe(&views, now);
                            let _ = health_tx.send(NodeHealthSignal::Fresh(health));
                            for event in events {
                                if event_tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            // Keep the previous snapshot; readers see its age.
                            warn!(error = %err, "Node list failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down node monitor");
                    break;
                }
            }
        }
    }
}
