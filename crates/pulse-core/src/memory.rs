//! OOM remediation
//!
//! Watches pod container statuses for recent OOM kills and raises the
//! owning deployment's memory limit geometrically, capped and
//! escalation-bounded. A remediation only counts as applied once a ready
//! pod is observed running with the new limit. Limits never decrease.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cluster::{retry_with_backoff, with_deadline, PodView, WorkloadApi, DEFAULT_DEADLINE};
use crate::config::PulseConfig;
use crate::error::ControlError;
use crate::models::MemoryEvent;

/// Termination reason reported for OOM-killed containers.
const OOM_REASON: &str = "OOMKilled";

/// Limit assumed when a container template carries none.
const DEFAULT_LIMIT_BYTES: u64 = 256 * 1024 * 1024;

/// Floor for the derived memory request.
const MIN_REQUEST_BYTES: u64 = 128 * 1024 * 1024;

/// Window after which a pod's OOM count resets.
const OOM_COUNT_RESET_SECS: i64 = 3600;

/// Window after which the escalation counter resets.
const ESCALATION_RESET_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy)]
struct OomTrack {
    count: u32,
    last_seen: i64,
    /// Termination timestamp already counted; `lastState` persists across
    /// scans and must not count twice
    counted_termination_ts: i64,
}

/// Reacts to OOM kills by patching deployment memory limits.
pub struct MemoryOptimizer {
    api: Arc<dyn WorkloadApi>,
    namespace: String,
    deployment: String,
    growth: f64,
    cap_bytes: u64,
    lookback_secs: i64,
    trigger_count: u32,
    adjust_cooldown_secs: i64,
    max_escalations: u32,
    oom_counts: HashMap<String, OomTrack>,
    /// Pod with a newly counted OOM kill in the latest scan, if any;
    /// feeds the replica controller's OOM response
    fresh_oom: Option<String>,
    last_adjustment_ts: Option<i64>,
    escalations: u32,
    unsafe_to_optimize: bool,
    /// Adjustments awaiting a ready pod with the new limit
    pending: Vec<MemoryEvent>,
    /// Confirmed or abandoned events, newest last
    history: Vec<MemoryEvent>,
}

impl MemoryOptimizer {
    pub fn new(api: Arc<dyn WorkloadApi>, config: &PulseConfig) -> Self {
        Self {
            api,
            namespace: config.namespace.clone(),
            deployment: config.deployment.clone(),
            growth: config.memory_growth,
            cap_bytes: config.memory_cap_bytes,
            lookback_secs: config.oom_lookback_secs as i64,
            trigger_count: config.oom_trigger_count,
            adjust_cooldown_secs: config.memory_adjust_cooldown_secs as i64,
            max_escalations: config.max_oom_escalations,
            oom_counts: HashMap::new(),
            fresh_oom: None,
            last_adjustment_ts: None,
            escalations: 0,
            unsafe_to_optimize: false,
            pending: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Whether remediation has been disabled after repeated escalations.
    pub fn is_unsafe(&self) -> bool {
        self.unsafe_to_optimize
    }

    /// Pod whose OOM kill was first counted during the latest scan.
    /// Cleared at the start of every scan, so each distinct termination
    /// surfaces exactly once.
    pub fn fresh_oom(&self) -> Option<&str> {
        self.fresh_oom.as_deref()
    }

    /// Confirmed and pending events, for the status endpoint.
    pub fn events(&self) -> Vec<MemoryEvent> {
        let mut all = self.history.clone();
        all.extend(self.pending.iter().cloned());
        all
    }

    /// One scan over current pod statuses. Returns events newly confirmed
    /// or created during this pass.
    pub async fn scan(&mut self, pods: &[PodView], now: i64) -> Vec<MemoryEvent> {
        self.fresh_oom = None;
        let mut activity = self.confirm_pending(pods);

        let oom_pod = self.detect_oom(pods, now);
        let Some((pod_name, container_name)) = oom_pod else {
            return activity;
        };

        if self.unsafe_to_optimize {
            warn!(
                deployment = %self.deployment,
                "OOM observed but deployment is marked unsafe to optimize"
            );
            return activity;
        }
        if !self.cooldown_elapsed(now) {
            info!(
                deployment = %self.deployment,
                "OOM observed, adjustment cooldown still active"
            );
            return activity;
        }

        match self.raise_limit(&pod_name, &container_name, now).await {
            Ok(Some(event)) => {
                info!(
                    pod = %event.pod,
                    previous = event.previous_limit_bytes,
                    new = event.new_limit_bytes,
                    "Memory limit raised"
                );
                activity.push(event.clone());
                self.pending.push(event);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "Memory limit adjustment failed");
            }
        }
        activity
    }

    /// Mark pending events applied once a ready pod carries the new limit.
    fn confirm_pending(&mut self, pods: &[PodView]) -> Vec<MemoryEvent> {
        let mut confirmed = Vec::new();
        let mut still_pending = Vec::new();

        for mut event in self.pending.drain(..) {
            let observed = pods.iter().any(|pod| {
                pod.ready
                    && pod.containers.iter().any(|c| {
                        c.ready && c.memory_limit_bytes == Some(event.new_limit_bytes)
                    })
            });
            if observed {
                event.applied = true;
                confirmed.push(event.clone());
                self.history.push(event);
            } else {
                still_pending.push(event);
            }
        }
        self.pending = still_pending;
        confirmed
    }

    /// Find a pod whose OOM count has reached the trigger threshold.
    fn detect_oom(&mut self, pods: &[PodView], now: i64) -> Option<(String, String)> {
        let cutoff = now - self.lookback_secs;
        let mut triggered = None;

        for pod in pods {
            for container in &pod.containers {
                let terminated_at = match (
                    container.last_terminated_reason.as_deref(),
                    container.last_terminated_at,
                ) {
                    (Some(OOM_REASON), Some(ts)) if ts >= cutoff => ts,
                    _ => continue,
                };

                let is_new = self
                    .oom_counts
                    .get(&pod.name)
                    .is_none_or(|t| t.counted_termination_ts != terminated_at);
                let track = self
                    .oom_counts
                    .entry(pod.name.clone())
                    .and_modify(|t| {
                        if t.counted_termination_ts == terminated_at {
                            return;
                        }
                        if now - t.last_seen > OOM_COUNT_RESET_SECS {
                            t.count = 1;
                        } else {
                            t.count += 1;
                        }
                        t.last_seen = now;
                        t.counted_termination_ts = terminated_at;
                    })
                    .or_insert(OomTrack {
                        count: 1,
                        last_seen: now,
                        counted_termination_ts: terminated_at,
                    });

                if is_new {
                    warn!(
                        pod = %pod.name,
                        container = %container.name,
                        count = track.count,
                        "OOM kill observed"
                    );
                    if self.fresh_oom.is_none() {
                        self.fresh_oom = Some(pod.name.clone());
                    }
                }
                if track.count >= self.trigger_count && triggered.is_none() {
                    triggered = Some((pod.name.clone(), container.name.clone()));
                }
            }
        }
        triggered
    }

    fn cooldown_elapsed(&self, now: i64) -> bool {
        self.last_adjustment_ts
            .is_none_or(|t| now - t >= self.adjust_cooldown_secs)
    }

    /// Compute and patch the raised limit. Returns `None` when the limit is
    /// already at the cap.
    async fn raise_limit(
        &mut self,
        pod_name: &str,
        container_name: &str,
        now: i64,
    ) -> Result<Option<MemoryEvent>, ControlError> {
        let deployment = with_deadline(
            DEFAULT_DEADLINE,
            self.api.get_deployment(&self.namespace, &self.deployment),
        )
        .await?;

        let container = deployment
            .containers
            .iter()
            .find(|c| c.name == container_name)
            .or_else(|| deployment.containers.first())
            .ok_or_else(|| {
                ControlError::InvariantViolation(format!(
                    "deployment {} has no containers",
                    self.deployment
                ))
            })?;

        let previous_limit = container.memory_limit_bytes.unwrap_or(DEFAULT_LIMIT_BYTES);
        if previous_limit >= self.cap_bytes {
            warn!(
                deployment = %self.deployment,
                cap = self.cap_bytes,
                "Memory limit already at cap"
            );
            return Ok(None);
        }

        // Limits only ever grow.
        let new_limit = ((previous_limit as f64 * self.growth).ceil() as u64)
            .min(self.cap_bytes)
            .max(previous_limit);

        let ratio = container
            .memory_request_bytes
            .map(|req| req as f64 / previous_limit as f64)
            .unwrap_or(1.0);
        let new_request = ((new_limit as f64 * ratio).ceil() as u64)
            .max(MIN_REQUEST_BYTES)
            .min(new_limit);

        let api = self.api.clone();
        let (namespace, name, target) = (
            self.namespace.clone(),
            self.deployment.clone(),
            container.name.clone(),
        );
        retry_with_backoff("patch_container_memory", || {
            let api = api.clone();
            let (namespace, name, target) = (namespace.clone(), name.clone(), target.clone());
            async move {
                with_deadline(
                    DEFAULT_DEADLINE,
                    api.patch_container_memory(&namespace, &name, &target, new_limit, new_request),
                )
                .await
            }
        })
        .await?;

        if self
            .last_adjustment_ts
            .is_some_and(|t| now - t <= ESCALATION_RESET_SECS)
        {
            self.escalations += 1;
        } else {
            self.escalations = 1;
        }
        self.last_adjustment_ts = Some(now);

        if self.escalations >= self.max_escalations {
            self.unsafe_to_optimize = true;
            warn!(
                deployment = %self.deployment,
                escalations = self.escalations,
                "Repeated OOM escalations; marking deployment unsafe to optimize"
            );
        }

        Ok(Some(MemoryEvent {
            pod: pod_name.to_string(),
            container: target,
            observed_ts: now,
            previous_limit_bytes: previous_limit,
            new_limit_bytes: new_limit,
            applied: false,
        }))
    }
}

/// Parse a Kubernetes memory quantity (`512Mi`, `2Gi`, plain bytes).
pub fn parse_quantity(value: &str) -> Option<u64> {
    let value = value.trim();
    let parse = |suffix: &str, factor: u64| -> Option<u64> {
        value
            .strip_suffix(suffix)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| (v * factor as f64) as u64)
    };
    parse("Gi", 1024 * 1024 * 1024)
        .or_else(|| parse("Mi", 1024 * 1024))
        .or_else(|| parse("Ki", 1024))
        .or_else(|| value.parse::<u64>().ok())
}

/// Format bytes as the largest clean binary quantity.
pub fn format_quantity(bytes: u64) -> String {
    const GI: u64 = 1024 * 1024 * 1024;
    const MI: u64 = 1024 * 1024;
    const KI: u64 = 1024;
    if bytes >= GI && bytes % GI == 0 {
        format!("{}Gi", bytes / GI)
    } else if bytes >= MI {
        format!("{}Mi", bytes.div_ceil(MI))
    } else {
        format!("{}Ki", bytes.div_ceil(KI))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::cluster::{ContainerResources, ContainerStatusView, DeploymentView, PodPhase};

    struct FakeWorkloadApi {
        limit_bytes: Mutex<Option<u64>>,
        request_bytes: Mutex<Option<u64>>,
        patches: Mutex<Vec<(u64, u64)>>,
    }

    impl FakeWorkloadApi {
        fn with_limit(limit: Option<u64>) -> Self {
            Self {
                limit_bytes: Mutex::new(limit),
                request_bytes: Mutex::new(limit),
                patches: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl WorkloadApi for FakeWorkloadApi {
        async fn get_deployment(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<DeploymentView, ControlError> {
            Ok(DeploymentView {
                name: name.to_string(),
                namespace: namespace.to_string(),
                replicas: 3,
                ready_replicas: 3,
                containers: vec![ContainerResources {
                    name: "app".to_string(),
                    memory_limit_bytes: *self.limit_bytes.lock().unwrap(),
                    memory_request_bytes: *self.request_bytes.lock().unwrap(),
                }],
            })
        }
        async fn patch_replicas(
            &self,
            _namespace: &str,
            _name: &str,
            _replicas: u32,
        ) -> Result<(), ControlError> {
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
            *self.limit_bytes.lock().unwrap() = Some(limit_bytes);
            *self.request_bytes.lock().unwrap() = Some(request_bytes);
            self.patches.lock().unwrap().push((limit_bytes, request_bytes));
            Ok(())
        }
        async fn list_pods(
            &self,
            _namespace: &str,
            _selector: &str,
        ) -> Result<Vec<PodView>, ControlError> {
            Ok(vec![])
        }
    }

    fn oom_pod(name: &str, terminated_at: i64) -> PodView {
        PodView {
            name: name.to_string(),
            namespace: "default".to_string(),
            node_name: "n1".to_string(),
            phase: PodPhase::Running,
            ready: false,
            daemonset_owned: false,
            unschedulable_reason: None,
            containers: vec![ContainerStatusView {
                name: "app".to_string(),
                ready: false,
                waiting_reason: None,
                last_terminated_reason: Some(OOM_REASON.to_string()),
                last_terminated_at: Some(terminated_at),
                memory_limit_bytes: Some(512 * 1024 * 1024),
            }],
        }
    }

    fn ready_pod_with_limit(limit: u64) -> PodView {
        PodView {
            name: "workload-x".to_string(),
            namespace: "default".to_string(),
            node_name: "n1".to_string(),
            phase: PodPhase::Running,
            ready: true,
            daemonset_owned: false,
            unschedulable_reason: None,
            containers: vec![ContainerStatusView {
                name: "app".to_string(),
                ready: true,
                waiting_reason: None,
                last_terminated_reason: None,
                last_terminated_at: None,
                memory_limit_bytes: Some(limit),
            }],
        }
    }

    fn optimizer(api: Arc<FakeWorkloadApi>) -> MemoryOptimizer {
        let config = PulseConfig {
            oom_trigger_count: 2,
            ..PulseConfig::default()
        };
        MemoryOptimizer::new(api, &config)
    }

    #[tokio::test]
    async fn raises_limit_by_growth_factor() {
        let api = Arc::new(FakeWorkloadApi::with_limit(Some(512 * 1024 * 1024)));
        let mut opt = optimizer(api.clone());

        // First OOM: below the trigger threshold.
        let events = opt.scan(&[oom_pod("workload-a", 1_000)], 1_000).await;
        assert!(events.is_empty());

        // Second OOM: remediate. 512Mi * 1.5 = 768Mi.
        let events = opt.scan(&[oom_pod("workload-a", 1_010)], 1_010).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].new_limit_bytes, 768 * 1024 * 1024);
        assert!(!events[0].applied);
        assert_eq!(api.patches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn growth_is_capped() {
        let api = Arc::new(FakeWorkloadApi::with_limit(Some(3 * 1024 * 1024 * 1024)));
        let mut opt = optimizer(api.clone());

        opt.scan(&[oom_pod("p", 0)], 0).await;
        let events = opt.scan(&[oom_pod("p", 10)], 10).await;

        // 3Gi * 1.5 = 4.5Gi, capped to 4Gi.
        assert_eq!(events[0].new_limit_bytes, 4 * 1024 * 1024 * 1024);
    }

    #[tokio::test]
    async fn at_cap_no_patch_is_made() {
        let api = Arc::new(FakeWorkloadApi::with_limit(Some(4 * 1024 * 1024 * 1024)));
        let mut opt = optimizer(api.clone());

        opt.scan(&[oom_pod("p", 0)], 0).await;
        let events = opt.scan(&[oom_pod("p", 10)], 10).await;

        assert!(events.is_empty());
        assert!(api.patches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn event_applies_after_ready_pod_observed() {
        let api = Arc::new(FakeWorkloadApi::with_limit(Some(512 * 1024 * 1024)));
        let mut opt = optimizer(api.clone());

        opt.scan(&[oom_pod("p", 0)], 0).await;
        opt.scan(&[oom_pod("p", 10)], 10).await;

        // Pod restarts with the raised limit.
        let confirmed = opt
            .scan(&[ready_pod_with_limit(768 * 1024 * 1024)], 400)
            .await;
        assert_eq!(confirmed.len(), 1);
        assert!(confirmed[0].applied);
    }

    #[tokio::test]
    async fn adjustment_cooldown_spaces_patches() {
        let api = Arc::new(FakeWorkloadApi::with_limit(Some(256 * 1024 * 1024)));
        let mut opt = optimizer(api.clone());

        opt.scan(&[oom_pod("p", 0)], 0).await;
        opt.scan(&[oom_pod("p", 10)], 10).await; // patch #1

        // More OOMs right away: cooldown holds the next patch.
        opt.scan(&[oom_pod("p", 20)], 20).await;
        assert_eq!(api.patches.lock().unwrap().len(), 1);

        // Past the cooldown the next escalation lands.
        opt.scan(&[oom_pod("p", 320)], 320).await;
        assert_eq!(api.patches.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn repeated_escalations_mark_unsafe() {
        let api = Arc::new(FakeWorkloadApi::with_limit(Some(128 * 1024 * 1024)));
        let mut opt = optimizer(api.clone());

        let mut now = 0;
        opt.scan(&[oom_pod("p", now)], now).await;
        for _ in 0..3 {
            now += 310;
            opt.scan(&[oom_pod("p", now)], now).await;
        }

        assert!(opt.is_unsafe());
        let patches = api.patches.lock().unwrap().len();
        assert_eq!(patches, 3);

        // Further OOMs make no more patches.
        now += 310;
        opt.scan(&[oom_pod("p", now)], now).await;
        assert_eq!(api.patches.lock().unwrap().len(), patches);
    }

    #[tokio::test]
    async fn request_floor_never_exceeds_limit() {
        let api = Arc::new(FakeWorkloadApi::with_limit(Some(64 * 1024 * 1024)));
        *api.request_bytes.lock().unwrap() = Some(32 * 1024 * 1024);
        let mut opt = optimizer(api.clone());

        opt.scan(&[oom_pod("p", 0)], 0).await;
        opt.scan(&[oom_pod("p", 10)], 10).await;

        // 64Mi * 1.5 = 96Mi limit; the 128Mi request floor clamps to it.
        let (limit, request) = api.patches.lock().unwrap()[0];
        assert_eq!(limit, 96 * 1024 * 1024);
        assert_eq!(request, limit);
    }

    #[tokio::test]
    async fn fresh_oom_surfaces_once_per_termination() {
        let api = Arc::new(FakeWorkloadApi::with_limit(Some(512 * 1024 * 1024)));
        let mut opt = optimizer(api);

        opt.scan(&[oom_pod("p", 100)], 100).await;
        assert_eq!(opt.fresh_oom(), Some("p"));

        // The same persisted lastState on the next scan is not fresh.
        opt.scan(&[oom_pod("p", 100)], 110).await;
        assert_eq!(opt.fresh_oom(), None);

        // A new termination surfaces again.
        opt.scan(&[oom_pod("p", 120)], 120).await;
        assert_eq!(opt.fresh_oom(), Some("p"));
    }

    #[test]
    fn quantity_round_trips() {
        assert_eq!(parse_quantity("512Mi"), Some(512 * 1024 * 1024));
        assert_eq!(parse_quantity("2Gi"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_quantity("1024"), Some(1024));
        assert_eq!(parse_quantity("junk"), None);

        assert_eq!(format_quantity(768 * 1024 * 1024), "768Mi");
        assert_eq!(format_quantity(4 * 1024 * 1024 * 1024), "4Gi");
    }
}
