//! In-memory cluster backend
//!
//! Stands in for provider adapters (Kubernetes client, cloud monitoring)
//! so the daemon can run end-to-end on a laptop: state lives in a mutex
//! and every mutation is applied synchronously. Real deployments replace
//! this by implementing the same traits against their providers.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use pulse_core::cluster::{
    ContainerResources, DeploymentView, MonitoringApi, NodeApi, NodeUtilization, NodeView,
    PodPhase, PodView, WorkloadApi,
};
use pulse_core::error::ControlError;
use pulse_core::models::Taint;

struct SimState {
    replicas: u32,
    memory_limit_bytes: u64,
    memory_request_bytes: u64,
    nodes: Vec<NodeView>,
    queue_depth: f64,
    queue_oldest_age: f64,
}

/// Shared in-memory cluster.
pub struct SimCluster {
    state: Mutex<SimState>,
    deployment: String,
    namespace: String,
}

impl SimCluster {
    pub fn new(namespace: &str, deployment: &str, nodes: u32, replicas: u32) -> Self {
        let nodes = (0..nodes)
            .map(|i| NodeView {
                name: format!("sim-node-{i}"),
                ready: true,
                unschedulable: false,
                taints: vec![],
                last_transition_ts: 0,
            })
            .collect();
        Self {
            state: Mutex::new(SimState {
                replicas,
                memory_limit_bytes: 512 * 1024 * 1024,
                memory_request_bytes: 256 * 1024 * 1024,
                nodes,
                queue_depth: 0.0,
                queue_oldest_age: 0.0,
            }),
            deployment: deployment.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Push queue pressure into the simulation (used by tests and demos).
    pub fn set_backlog(&self, depth: f64, oldest_age: f64) {
        let mut state = self.state.lock().unwrap();
        state.queue_depth = depth;
        state.queue_oldest_age = oldest_age;
    }
}

#[async_trait]
impl WorkloadApi for SimCluster {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentView, ControlError> {
        if namespace != self.namespace || name != self.deployment {
            return Err(ControlError::ExternalUnknown(format!(
                "no such deployment {namespace}/{name}"
            )));
        }
        let state = self.state.lock().unwrap();
        Ok(DeploymentView {
            name: name.to_string(),
            namespace: namespace.to_string(),
            replicas: state.replicas,
            ready_replicas: state.replicas,
            containers: vec![ContainerResources {
                name: "app".to_string(),
                memory_limit_bytes: Some(state.memory_limit_bytes),
                memory_request_bytes: Some(state.memory_request_bytes),
            }],
        })
    }

    async fn patch_replicas(
        &self,
        _namespace: &str,
        _name: &str,
        replicas: u32,
    ) -> Result<(), ControlError> {
        self.state.lock().unwrap().replicas = replicas;
        Ok(())
    }

    async fn patch_container_memory(
        &self,
        _namespace: &str,
        _name: &str,
        _container: &str,
        limit_bytes: u64,
        request_bytes: u64,
    ) -> Result<(), ControlError> {
        let mut state = self.state.lock().unwrap();
        state.memory_limit_bytes = limit_bytes;
        state.memory_request_bytes = request_bytes;
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        _selector: &str,
    ) -> Result<Vec<PodView>, ControlError> {
        let state = self.state.lock().unwrap();
        let node_count = state.nodes.len().max(1);
        Ok((0..state.replicas)
            .map(|i| PodView {
                name: format!("{}-{i}", self.deployment),
                namespace: namespace.to_string(),
                node_name: state.nodes[i as usize % node_count].name.clone(),
                phase: PodPhase::Running,
                ready: true,
                daemonset_owned: false,
                unschedulable_reason: None,
                containers: vec![],
            })
            .collect())
    }
}

#[async_trait]
impl NodeApi for SimCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeView>, ControlError> {
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn node_utilization(&self) -> Result<Vec<NodeUtilization>, ControlError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .iter()
            .map(|n| NodeUtilization {
                name: n.name.clone(),
                cpu_used_millis: 500,
                cpu_allocatable_millis: 1000,
                memory_used_bytes: 2 * 1024 * 1024 * 1024,
                memory_allocatable_bytes: 4 * 1024 * 1024 * 1024,
                pod_count: state.replicas / state.nodes.len().max(1) as u32,
            })
            .collect())
    }

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<PodView>, ControlError> {
        let namespace = self.namespace.clone();
        let pods = self.list_pods(&namespace, "").await?;
        Ok(pods.into_iter().filter(|p| p.node_name == node).collect())
    }

    async fn set_unschedulable(&self, node: &str, unschedulable: bool) -> Result<(), ControlError> {
        let mut state = self.state.lock().unwrap();
        match state.nodes.iter_mut().find(|n| n.name == node) {
            Some(n) => {
                n.unschedulable = unschedulable;
                Ok(())
            }
            None => Err(ControlError::ExternalUnknown(format!("no node {node}"))),
        }
    }

    async fn add_taint(&self, node: &str, taint: &Taint) -> Result<(), ControlError> {
        let mut state = self.state.lock().unwrap();
        match state.nodes.iter_mut().find(|n| n.name == node) {
            Some(n) => {
                if !n.taints.contains(taint) {
                    n.taints.push(taint.clone());
                }
                Ok(())
            }
            None => Err(ControlError::ExternalUnknown(format!("no node {node}"))),
        }
    }

    async fn evict_pod(
        &self,
        _namespace: &str,
        _pod: &str,
        _grace_secs: u32,
    ) -> Result<(), ControlError> {
        Ok(())
    }

    async fn resize_node_pool(&self, delta: i64) -> Result<(), ControlError> {
        let mut state = self.state.lock().unwrap();
        if delta >= 0 {
            let start = state.nodes.len();
            for i in 0..delta as usize {
                state.nodes.push(NodeView {
                    name: format!("sim-node-{}", start + i),
                    ready: true,
                    unschedulable: false,
                    taints: vec![],
                    last_transition_ts: 0,
                });
            }
        } else {
            // Remove cordoned nodes first, mirroring a drain-then-remove flow.
            for _ in 0..(-delta) as usize {
                if let Some(pos) = state.nodes.iter().position(|n| n.unschedulable) {
                    state.nodes.remove(pos);
                } else {
                    state.nodes.pop();
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MonitoringApi for SimCluster {
    async fn fetch(
        &self,
        metric: &str,
        _lookback: Duration,
    ) -> Result<Vec<(i64, f64)>, ControlError> {
        let state = self.state.lock().unwrap();
        let now = chrono::Utc::now().timestamp();
        let value = match metric {
            m if m.contains("num_undelivered") => state.queue_depth,
            m if m.contains("oldest_unacked") => state.queue_oldest_age,
            _ => return Err(ControlError::ExternalUnknown(format!("no metric {metric}"))),
        };
        Ok(vec![(now, value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replicas_round_trip() {
        let sim = SimCluster::new("default", "workload", 3, 4);
        sim.patch_replicas("default", "workload", 7).await.unwrap();

        let deployment = sim.get_deployment("default", "workload").await.unwrap();
        assert_eq!(deployment.replicas, 7);
        assert_eq!(sim.list_pods("default", "").await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn resize_prefers_cordoned_nodes() {
        let sim = SimCluster::new("default", "workload", 3, 2);
        sim.set_unschedulable("sim-node-1", true).await.unwrap();
        sim.resize_node_pool(-1).await.unwrap();

        let names: Vec<String> = sim
            .list_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["sim-node-0", "sim-node-2"]);
    }

    #[tokio::test]
    async fn monitoring_serves_backlog_series() {
        let sim = SimCluster::new("default", "workload", 1, 1);
        sim.set_backlog(1500.0, 90.0);

        let depth = sim
            .fetch("subscription/num_undelivered_messages", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(depth[0].1, 1500.0);
    }
}
