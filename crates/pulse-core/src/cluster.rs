//! Cluster and monitoring API seams
//!
//! The engine never links a cluster client directly; it talks to two narrow
//! traits that together form the least-privilege surface:
//! - `WorkloadApi`: read pods/deployments, patch replicas and resources
//! - `NodeApi`: read/patch nodes, evictions, node-pool resize
//!
//! Mutations go through `retry_with_backoff`, which refetches on conflict
//! and bounds transient retries. Every call site wraps the future in
//! `with_deadline`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ControlError;
use crate::models::Taint;

/// Default deadline for external calls.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for drain evictions, which may wait on disruption budgets.
pub const EVICTION_DEADLINE: Duration = Duration::from_secs(45);

/// Backoff schedule for conflict/transient retries.
const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(400),
    Duration::from_secs(1),
];

/// Deployment snapshot as read from the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentView {
    pub name: String,
    pub namespace: String,
    pub replicas: u32,
    pub ready_replicas: u32,
    pub containers: Vec<ContainerResources>,
}

/// Resource requests/limits of one container template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerResources {
    pub name: String,
    pub memory_limit_bytes: Option<u64>,
    pub memory_request_bytes: Option<u64>,
}

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Running,
    Pending,
    Succeeded,
    Failed,
    Unknown,
}

/// Pod snapshot with the container status fields the engine inspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodView {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    pub phase: PodPhase,
    pub ready: bool,
    /// Owned by a daemon set; excluded from drains
    pub daemonset_owned: bool,
    /// Set when the pod is Pending with an Unschedulable condition
    pub unschedulable_reason: Option<String>,
    pub containers: Vec<ContainerStatusView>,
}

/// Container status slice: waiting reason, last termination, applied limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatusView {
    pub name: String,
    pub ready: bool,
    pub waiting_reason: Option<String>,
    pub last_terminated_reason: Option<String>,
    /// Unix timestamp the last termination finished, if any
    pub last_terminated_at: Option<i64>,
    pub memory_limit_bytes: Option<u64>,
}

/// Node snapshot from the cluster API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeView {
    pub name: String,
    pub ready: bool,
    pub unschedulable: bool,
    pub taints: Vec<Taint>,
    /// Unix timestamp of the last readiness transition
    pub last_transition_ts: i64,
}

/// Per-node utilization from the metrics API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUtilization {
    pub name: String,
    pub cpu_used_millis: u64,
    pub cpu_allocatable_millis: u64,
    pub memory_used_bytes: u64,
    pub memory_allocatable_bytes: u64,
    pub pod_count: u32,
}

impl NodeUtilization {
    /// CPU utilization as a fraction of allocatable, 0 when unknown.
    pub fn cpu_fraction(&self) -> f64 {
        if self.cpu_allocatable_millis == 0 {
            return 0.0;
        }
        self.cpu_used_millis as f64 / self.cpu_allocatable_millis as f64
    }

    /// Memory utilization as a fraction of allocatable, 0 when unknown.
    pub fn memory_fraction(&self) -> f64 {
        if self.memory_allocatable_bytes == 0 {
            return 0.0;
        }
        self.memory_used_bytes as f64 / self.memory_allocatable_bytes as f64
    }
}

/// Workload principal: deployments and pods only.
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentView, ControlError>;

    async fn patch_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> Result<(), ControlError>;

    async fn patch_container_memory(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        limit_bytes: u64,
        request_bytes: u64,
    ) -> Result<(), ControlError>;

    async fn list_pods(&self, namespace: &str, selector: &str)
        -> Result<Vec<PodView>, ControlError>;
}

/// Node principal: nodes, evictions, and pool sizing only.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeView>, ControlError>;

    async fn node_utilization(&self) -> Result<Vec<NodeUtilization>, ControlError>;

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<PodView>, ControlError>;

    async fn set_unschedulable(&self, node: &str, unschedulable: bool)
        -> Result<(), ControlError>;

    async fn add_taint(&self, node: &str, taint: &Taint) -> Result<(), ControlError>;

    /// Evict one pod, honoring disruption budgets.
    async fn evict_pod(
        &self,
        namespace: &str,
        pod: &str,
        grace_secs: u32,
    ) -> Result<(), ControlError>;

    /// Resize the node pool by `delta` nodes (provider-defined mechanism).
    async fn resize_node_pool(&self, delta: i64) -> Result<(), ControlError>;
}

/// Monitoring backend: any transport offering numeric time series.
#[async_trait]
pub trait MonitoringApi: Send + Sync {
    /// Fetch `(timestamp, value)` points for `metric` over `lookback`.
    async fn fetch(
        &self,
        metric: &str,
        lookback: Duration,
    ) -> Result<Vec<(i64, f64)>, ControlError>;
}

/// Apply a deadline to an external call; timeouts classify as transient.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, ControlError>
where
    F: Future<Output = Result<T, ControlError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ControlError::Transient(format!(
            "deadline of {deadline:?} exceeded"
        ))),
    }
}

/// Run a mutation with bounded retries.
///
/// Transient errors retry after a backoff; conflicts retry as well, with
/// the closure expected to refetch current state on each attempt.
/// Non-retryable errors return immediately.
pub async fn retry_with_backoff<T, F, Fut>(label: &str, mut op: F) -> Result<T, ControlError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControlError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < RETRY_BACKOFFS.len() => {
                let backoff = RETRY_BACKOFFS[attempt];
                debug!(
                    op = label,
                    attempt = attempt + 1,
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying after failure"
                );
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                warn!(op = label, error = %err, "Giving up");
                return Err(err);
            }
        }
    }
}
