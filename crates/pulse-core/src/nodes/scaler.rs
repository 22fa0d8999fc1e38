//! Node-pool scaler
//!
//! Executes cordon/drain/remove sequences and pool resizes. The drain
//! protocol is strict: cordon, then evict non-daemonset pods honoring
//! disruption budgets, then remove. A failure at any step leaves the node
//! cordoned and surfaces `DrainIncomplete`; a node is never silently
//! uncordoned and never removed while still schedulable.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cluster::{
    retry_with_backoff, with_deadline, NodeApi, NodeUtilization, PodPhase, DEFAULT_DEADLINE,
    EVICTION_DEADLINE,
};
use crate::config::PulseConfig;
use crate::error::ControlError;
use crate::models::DecisionKind;
use crate::nodes::draining_taint;

/// Grace period handed to each eviction request, in seconds.
const EVICTION_GRACE_SECS: u32 = 30;

/// Steps of the drain protocol, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainStep {
    Cordon,
    Evict,
    Remove,
}

/// Result of a completed drain.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DrainReport {
    pub evicted: usize,
    /// Pods that failed eviction twice; logged and left for the budget
    /// owner, never force-deleted
    pub skipped: usize,
}

/// A drain that stopped partway. The node stays cordoned.
#[derive(Debug, Clone, Error)]
#[error("drain of {node} incomplete at {step:?}: {source}")]
pub struct DrainIncomplete {
    pub node: String,
    pub step: DrainStep,
    pub source: ControlError,
}

/// Outcome of one node action, reported back for the decision log.
#[derive(Debug, Clone, Serialize)]
pub struct NodeActionReport {
    pub kind: DecisionKind,
    pub nodes_before: u32,
    pub nodes_after: u32,
    pub reason: String,
    pub success: bool,
}

/// Cordons, drains, and resizes the node pool.
pub struct NodeScaler {
    api: Arc<dyn NodeApi>,
    scale_up_utilization: f64,
    scale_down_utilization: f64,
    min_action_gap_secs: i64,
    /// Timestamp of the last pool mutation; enforces the inter-action gap
    last_action_ts: Option<i64>,
}

impl NodeScaler {
    pub fn new(api: Arc<dyn NodeApi>, config: &PulseConfig) -> Self {
        Self {
            api,
            scale_up_utilization: config.node_scale_up_utilization,
            scale_down_utilization: config.node_scale_down_utilization,
            min_action_gap_secs: config.min_node_action_gap_secs as i64,
            last_action_ts: None,
        }
    }

    /// Shared node API handle.
    pub fn api(&self) -> Arc<dyn NodeApi> {
        self.api.clone()
    }

    /// Whether the minimum inter-action gap has passed. Applies to every
    /// pool mutation, including cooldown-bypassing emergency scale-ups.
    pub fn gap_elapsed(&self, now: i64) -> bool {
        self.last_action_ts
            .is_none_or(|t| now - t >= self.min_action_gap_secs)
    }

    /// Grow the pool by `n` nodes.
    pub async fn scale_up(&mut self, n: u32, now: i64) -> Result<(), ControlError> {
        if !self.gap_elapsed(now) {
            return Err(ControlError::Transient(format!(
                "node action gap active ({}s minimum)",
                self.min_action_gap_secs
            )));
        }
        let api = self.api.clone();
        retry_with_backoff("node_pool_scale_up", || {
            let api = api.clone();
            async move { with_deadline(DEFAULT_DEADLINE, api.resize_node_pool(n as i64)).await }
        })
        .await?;
        self.last_action_ts = Some(now);
        info!(added = n, "Node pool scaled up");
        Ok(())
    }

    /// Mark a node unschedulable.
    pub async fn cordon(&self, node: &str) -> Result<(), ControlError> {
        let api = self.api.clone();
        retry_with_backoff("node_cordon", || {
            let api = api.clone();
            let node = node.to_string();
            async move { with_deadline(DEFAULT_DEADLINE, api.set_unschedulable(&node, true)).await }
        })
        .await?;
        info!(node, "Node cordoned");
        Ok(())
    }

    /// Mark a recovered node schedulable again.
    pub async fn uncordon(&self, node: &str) -> Result<(), ControlError> {
        let api = self.api.clone();
        retry_with_backoff("node_uncordon", || {
            let api = api.clone();
            let node = node.to_string();
            async move { with_deadline(DEFAULT_DEADLINE, api.set_unschedulable(&node, false)).await }
        })
        .await?;
        info!(node, "Node uncordoned");
        Ok(())
    }

    /// Cordon the node, taint it as draining, and evict its evictable pods.
    pub async fn drain(&self, node: &str) -> Result<DrainReport, DrainIncomplete> {
        if let Err(source) = self.cordon(node).await {
            return Err(DrainIncomplete {
                node: node.to_string(),
                step: DrainStep::Cordon,
                source,
            });
        }
        // The taint tells the monitor this outage is self-inflicted; failing
        // to apply it does not undo the cordon.
        if let Err(err) = with_deadline(
            DEFAULT_DEADLINE,
            self.api.add_taint(node, &draining_taint()),
        )
        .await
        {
            warn!(node, error = %err, "Failed to apply draining taint");
        }

        let pods = match with_deadline(DEFAULT_DEADLINE, self.api.list_pods_on_node(node)).await {
            Ok(pods) => pods,
            Err(source) => {
                return Err(DrainIncomplete {
                    node: node.to_string(),
                    step: DrainStep::Evict,
                    source,
                })
            }
        };

        let mut report = DrainReport::default();
        for pod in pods {
            if pod.daemonset_owned
                || !matches!(pod.phase, PodPhase::Running | PodPhase::Pending)
            {
                continue;
            }
            match self.evict_with_one_retry(&pod.namespace, &pod.name).await {
                Ok(()) => report.evicted += 1,
                Err(err) => {
                    warn!(
                        node,
                        pod = %pod.name,
                        namespace = %pod.namespace,
                        error = %err,
                        "Eviction failed twice, skipping pod"
                    );
                    report.skipped += 1;
                }
            }
        }
        info!(
            node,
            evicted = report.evicted,
            skipped = report.skipped,
            "Node drained"
        );
        Ok(report)
    }

    async fn evict_with_one_retry(&self, namespace: &str, pod: &str) -> Result<(), ControlError> {
        let evict = || async {
            with_deadline(
                EVICTION_DEADLINE,
                self.api.evict_pod(namespace, pod, EVICTION_GRACE_SECS),
            )
            .await
        };
        match evict().await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() => evict().await,
            Err(err) => Err(err),
        }
    }

    /// Drain a node and remove it from the pool.
    pub async fn delete(&mut self, node: &str, now: i64) -> Result<DrainReport, DrainIncomplete> {
        let report = self.drain(node).await?;

        let api = self.api.clone();
        let remove = retry_with_backoff("node_pool_scale_down", || {
            let api = api.clone();
            async move { with_deadline(DEFAULT_DEADLINE, api.resize_node_pool(-1)).await }
        })
        .await;

        match remove {
            Ok(()) => {
                self.last_action_ts = Some(now);
                info!(node, "Node removed from pool");
                Ok(report)
            }
            Err(source) => Err(DrainIncomplete {
                node: node.to_string(),
                step: DrainStep::Remove,
                source,
            }),
        }
    }

    /// Remove `n` nodes, draining the least-utilized candidates first.
    ///
    /// Emergency path: with no ready node in sight there is nothing to
    /// drain onto; grow the pool instead and let the caller re-evaluate.
    pub async fn scale_down(
        &mut self,
        n: u32,
        now: i64,
    ) -> Result<Vec<NodeActionReport>, ControlError> {
        if !self.gap_elapsed(now) {
            return Err(ControlError::Transient(format!(
                "node action gap active ({}s minimum)",
                self.min_action_gap_secs
            )));
        }

        let nodes = with_deadline(DEFAULT_DEADLINE, self.api.list_nodes()).await?;
        let ready: Vec<_> = nodes.iter().filter(|v| v.ready).collect();
        if ready.is_empty() {
            warn!("No ready nodes; growing pool instead of draining");
            self.scale_up(1, now).await?;
            return Ok(vec![NodeActionReport {
                kind: DecisionKind::NodeUp,
                nodes_before: nodes.len() as u32,
                nodes_after: nodes.len() as u32 + 1,
                reason: "emergency scale-up: no ready nodes".to_string(),
                success: true,
            }]);
        }

        let mut utilization =
            with_deadline(DEFAULT_DEADLINE, self.api.node_utilization()).await?;
        utilization.retain(|u| ready.iter().any(|v| v.name == u.name && !v.unschedulable));
        utilization.sort_by(|a, b| {
            a.cpu_fraction()
                .partial_cmp(&b.cpu_fraction())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut reports = Vec::new();
        let total = nodes.len() as u32;
        for (i, candidate) in utilization.iter().take(n as usize).enumerate() {
            let before = total - i as u32;
            match self.delete(&candidate.name, now).await {
                Ok(report) => {
                    reports.push(NodeActionReport {
                        kind: DecisionKind::NodeDown,
                        nodes_before: before,
                        nodes_after: before - 1,
                        reason: format!(
                            "drained {} (cpu {:.0}%, {} evicted, {} skipped)",
                            candidate.name,
                            candidate.cpu_fraction() * 100.0,
                            report.evicted,
                            report.skipped
                        ),
                        success: true,
                    });
                }
                Err(incomplete) => {
                    warn!(error = %incomplete, "Drain incomplete, node left cordoned");
                    reports.push(NodeActionReport {
                        kind: DecisionKind::NodeDown,
                        nodes_before: before,
                        nodes_after: before,
                        reason: incomplete.to_string(),
                        success: false,
                    });
                    break;
                }
            }
        }
        Ok(reports)
    }

    /// Utilization-driven sizing pass: one scale-up or scale-down proposal
    /// per invocation, or `None` when the cluster is within its band.
    pub fn propose(
        &self,
        utilization: &[NodeUtilization],
        unschedulable_pods: usize,
    ) -> Option<(DecisionKind, String)> {
        if utilization.is_empty() {
            return None;
        }

        if unschedulable_pods > 0 {
            return Some((
                DecisionKind::NodeUp,
                format!("{unschedulable_pods} pods unschedulable for lack of resources"),
            ));
        }

        let n = utilization.len() as f64;
        let avg_cpu = utilization.iter().map(|u| u.cpu_fraction()).sum::<f64>() / n;
        let avg_mem = utilization.iter().map(|u| u.memory_fraction()).sum::<f64>() / n;

        if avg_cpu > self.scale_up_utilization || avg_mem > self.scale_up_utilization {
            return Some((
                DecisionKind::NodeUp,
                format!(
                    "cluster utilization high (cpu {:.0}%, mem {:.0}%)",
                    avg_cpu * 100.0,
                    avg_mem * 100.0
                ),
            ));
        }

        if utilization.len() > 1
            && avg_cpu < self.scale_down_utilization
            && avg_mem < self.scale_down_utilization
        {
            return Some((
                DecisionKind::NodeDown,
                format!(
                    "cluster utilization low (cpu {:.0}%, mem {:.0}%)",
                    avg_cpu * 100.0,
                    avg_mem * 100.0
                ),
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use crate::cluster::{NodeView, PodView};
    use crate::models::Taint;

    /// In-memory node API recording mutations.
    #[derive(Default)]
    struct FakeNodeApi {
        nodes: Mutex<Vec<NodeView>>,
        pods: Mutex<Vec<PodView>>,
        utilization: Mutex<Vec<NodeUtilization>>,
        cordoned: Mutex<HashSet<String>>,
        evicted: Mutex<Vec<String>>,
        pool_delta: Mutex<i64>,
        fail_evictions_for: Mutex<HashSet<String>>,
        fail_resize: Mutex<bool>,
    }

    #[async_trait]
    impl NodeApi for FakeNodeApi {
        async fn list_nodes(&self) -> Result<Vec<NodeView>, ControlError> {
            Ok(self.nodes.lock().unwrap().clone())
        }
        async fn node_utilization(&self) -> Result<Vec<NodeUtilization>, ControlError> {
            Ok(self.utilization.lock().unwrap().clone())
        }
        async fn list_pods_on_node(&self, node: &str) -> Result<Vec<PodView>, ControlError> {
            Ok(self
                .pods
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.node_name == node)
                .cloned()
                .collect())
        }
        async fn set_unschedulable(
            &self,
            node: &str,
            unschedulable: bool,
        ) -> Result<(), ControlError> {
            if unschedulable {
                self.cordoned.lock().unwrap().insert(node.to_string());
            } else {
                self.cordoned.lock().unwrap().remove(node);
            }
            Ok(())
        }
        async fn add_taint(&self, _node: &str, _taint: &Taint) -> Result<(), ControlError> {
            Ok(())
        }
        async fn evict_pod(
            &self,
            _namespace: &str,
            pod: &str,
            _grace_secs: u32,
        ) -> Result<(), ControlError> {
            if self.fail_evictions_for.lock().unwrap().contains(pod) {
                return Err(ControlError::Transient("pdb blocks eviction".to_string()));
            }
            self.evicted.lock().unwrap().push(pod.to_string());
            Ok(())
        }
        async fn resize_node_pool(&self, delta: i64) -> Result<(), ControlError> {
            if *self.fail_resize.lock().unwrap() {
                return Err(ControlError::Permission("pool resize denied".to_string()));
            }
            *self.pool_delta.lock().unwrap() += delta;
            Ok(())
        }
    }

    fn pod(name: &str, node: &str, daemonset: bool) -> PodView {
        PodView {
            name: name.to_string(),
            namespace: "default".to_string(),
            node_name: node.to_string(),
            phase: PodPhase::Running,
            ready: true,
            daemonset_owned: daemonset,
            unschedulable_reason: None,
            containers: vec![],
        }
    }

    fn node(name: &str, ready: bool) -> NodeView {
        NodeView {
            name: name.to_string(),
            ready,
            unschedulable: false,
            taints: vec![],
            last_transition_ts: 0,
        }
    }

    fn scaler(api: Arc<FakeNodeApi>) -> NodeScaler {
        NodeScaler::new(api, &PulseConfig::default())
    }

    #[tokio::test]
    async fn drain_skips_daemonset_pods() {
        let api = Arc::new(FakeNodeApi::default());
        *api.pods.lock().unwrap() = vec![
            pod("app-1", "n1", false),
            pod("app-2", "n1", false),
            pod("ds-1", "n1", true),
        ];

        let s = scaler(api.clone());
        let report = s.drain("n1").await.unwrap();

        assert_eq!(report.evicted, 2);
        assert_eq!(report.skipped, 0);
        assert!(api.cordoned.lock().unwrap().contains("n1"));
        assert!(!api.evicted.lock().unwrap().contains(&"ds-1".to_string()));
    }

    #[tokio::test]
    async fn failed_eviction_is_skipped_not_forced() {
        let api = Arc::new(FakeNodeApi::default());
        *api.pods.lock().unwrap() = vec![pod("app-1", "n1", false), pod("app-2", "n1", false)];
        api.fail_evictions_for
            .lock()
            .unwrap()
            .insert("app-2".to_string());

        let s = scaler(api.clone());
        let report = s.drain("n1").await.unwrap();

        assert_eq!(report.evicted, 1);
        assert_eq!(report.skipped, 1);
        // Node stays cordoned regardless.
        assert!(api.cordoned.lock().unwrap().contains("n1"));
    }

    #[tokio::test]
    async fn failed_remove_leaves_node_cordoned() {
        let api = Arc::new(FakeNodeApi::default());
        *api.nodes.lock().unwrap() = vec![node("n1", true)];
        *api.fail_resize.lock().unwrap() = true;

        let mut s = scaler(api.clone());
        let err = s.delete("n1", 1_000).await.unwrap_err();

        assert_eq!(err.step, DrainStep::Remove);
        assert!(api.cordoned.lock().unwrap().contains("n1"));
        assert_eq!(*api.pool_delta.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn scale_up_resizes_pool() {
        let api = Arc::new(FakeNodeApi::default());
        let mut s = scaler(api.clone());

        s.scale_up(3, 1_000).await.unwrap();
        assert_eq!(*api.pool_delta.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn min_gap_blocks_back_to_back_actions() {
        let api = Arc::new(FakeNodeApi::default());
        let mut s = scaler(api.clone());

        s.scale_up(1, 1_000).await.unwrap();
        let err = s.scale_up(1, 1_030).await.unwrap_err();
        assert!(matches!(err, ControlError::Transient(_)));

        // Gap elapsed: permitted again.
        s.scale_up(1, 1_060).await.unwrap();
        assert_eq!(*api.pool_delta.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn scale_down_with_no_ready_nodes_grows_instead() {
        let api = Arc::new(FakeNodeApi::default());
        *api.nodes.lock().unwrap() = vec![node("n1", false), node("n2", false)];

        let mut s = scaler(api.clone());
        let reports = s.scale_down(1, 1_000).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, DecisionKind::NodeUp);
        assert_eq!(*api.pool_delta.lock().unwrap(), 1);
        assert!(api.cordoned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn scale_down_drains_least_utilized() {
        let api = Arc::new(FakeNodeApi::default());
        *api.nodes.lock().unwrap() = vec![node("n1", true), node("n2", true)];
        *api.utilization.lock().unwrap() = vec![
            NodeUtilization {
                name: "n1".to_string(),
                cpu_used_millis: 900,
                cpu_allocatable_millis: 1000,
                memory_used_bytes: 0,
                memory_allocatable_bytes: 1,
                pod_count: 5,
            },
            NodeUtilization {
                name: "n2".to_string(),
                cpu_used_millis: 100,
                cpu_allocatable_millis: 1000,
                memory_used_bytes: 0,
                memory_allocatable_bytes: 1,
                pod_count: 1,
            },
        ];

        let mut s = scaler(api.clone());
        let reports = s.scale_down(1, 1_000).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert!(reports[0].success);
        assert!(api.cordoned.lock().unwrap().contains("n2"));
        assert!(!api.cordoned.lock().unwrap().contains("n1"));
        assert_eq!(*api.pool_delta.lock().unwrap(), -1);
    }

    #[test]
    fn propose_scale_up_on_unschedulable_pods() {
        let api = Arc::new(FakeNodeApi::default());
        let s = scaler(api);
        let util = vec![NodeUtilization {
            name: "n1".to_string(),
            cpu_used_millis: 100,
            cpu_allocatable_millis: 1000,
            memory_used_bytes: 1,
            memory_allocatable_bytes: 10,
            pod_count: 3,
        }];

        let (kind, _) = s.propose(&util, 2).unwrap();
        assert_eq!(kind, DecisionKind::NodeUp);
    }

    #[test]
    fn propose_nothing_inside_band() {
        let api = Arc::new(FakeNodeApi::default());
        let s = scaler(api);
        let util = vec![NodeUtilization {
            name: "n1".to_string(),
            cpu_used_millis: 500,
            cpu_allocatable_millis: 1000,
            memory_used_bytes: 5,
            memory_allocatable_bytes: 10,
            pod_count: 3,
        }];

        assert!(s.propose(&util, 0).is_none());
    }

    #[test]
    fn propose_scale_down_needs_spare_node() {
        let api = Arc::new(FakeNodeApi::default());
        let s = scaler(api);
        let idle = NodeUtilization {
            name: "n1".to_string(),
            cpu_used_millis: 100,
            cpu_allocatable_millis: 1000,
            memory_used_bytes: 1,
            memory_allocatable_bytes: 10,
            pod_count: 1,
        };

        // A single idle node is never removed.
        assert!(s.propose(std::slice::from_ref(&idle), 0).is_none());

        let two = vec![
            idle.clone(),
            NodeUtilization {
                name: "n2".to_string(),
                ..idle.clone()
            },
        ];
        let (kind, _) = s.propose(&two, 0).unwrap();
        assert_eq!(kind, DecisionKind::NodeDown);
    }
}
