//! Decision orchestrator
//!
//! Owns the metrics window, cooldown ledger, and decision log, and runs the
//! main tick: ingest bus samples, refresh probe snapshots, scan for OOMs,
//! score the window, drive the replica controller, then the node scaler.
//! Within one tick replica scale-up always precedes node scale-up, and a
//! node scale-down never lands on the tick after a replica change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tracing::{info, warn};

use crate::cluster::{with_deadline, WorkloadApi, DEFAULT_DEADLINE};
use crate::config::PulseConfig;
use crate::cooldown::{ActionScope, CooldownLedger};
use crate::decisions::DecisionLog;
use crate::ingest::drain_pending;
use crate::memory::MemoryOptimizer;
use crate::models::{
    BacklogSignal, Decision, DecisionKind, MemoryEvent, MetricSample, Severity,
};
use crate::nodes::{NodeEvent, NodeHealth, NodeHealthSignal, NodeScaler};
use crate::observability::{ControlLogger, PulseMetrics};
use crate::replicas::{CrashLoopGuard, ReplicaController, ReplicaDecision, WorkloadHealth};
use crate::replicas::DecisionContext;
use crate::scorer::{ScoreBreakdown, Scorer, SpikeVerdict};
use crate::window::MetricsWindow;

/// Bytes per Mi, for decision records of memory adjustments.
const MI: u64 = 1024 * 1024;

/// Point-in-time view served by the status endpoint.
#[derive(Debug, Clone, Serialize, Default)]
pub struct StatusSnapshot {
    pub generated_at: i64,
    pub window_samples: usize,
    pub score: Option<ScoreBreakdown>,
    pub spike: Option<SpikeVerdict>,
    pub backlog: Option<BacklogSignal>,
    pub node_health: Option<NodeHealth>,
    pub current_replicas: Option<u32>,
    pub cooldowns_remaining: HashMap<&'static str, i64>,
    pub recent_decisions: Vec<Decision>,
    pub last_failure: Option<Decision>,
    pub memory_events: Vec<MemoryEvent>,
    pub unsafe_to_optimize: bool,
}

/// Channels feeding the orchestrator.
pub struct OrchestratorInputs {
    pub sample_rx: mpsc::Receiver<MetricSample>,
    pub backlog_rx: watch::Receiver<BacklogSignal>,
    pub node_health_rx: watch::Receiver<NodeHealthSignal>,
    pub node_event_rx: mpsc::Receiver<NodeEvent>,
}

/// Owns the decision tick and all orchestrator-scoped state.
pub struct Orchestrator {
    config: PulseConfig,
    scorer: Scorer,
    window: MetricsWindow,
    ledger: CooldownLedger,
    log: DecisionLog,
    controller: ReplicaController,
    node_scaler: NodeScaler,
    memory: MemoryOptimizer,
    crashloop: CrashLoopGuard,
    workload_api: Arc<dyn WorkloadApi>,
    inputs: OrchestratorInputs,
    status_tx: watch::Sender<StatusSnapshot>,
    metrics: PulseMetrics,
    logger: ControlLogger,
    tick_count: u64,
    last_replica_change_tick: Option<u64>,
    last_node_scaler_pass: i64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PulseConfig,
        workload_api: Arc<dyn WorkloadApi>,
        controller: ReplicaController,
        node_scaler: NodeScaler,
        memory: MemoryOptimizer,
        inputs: OrchestratorInputs,
        status_tx: watch::Sender<StatusSnapshot>,
        metrics: PulseMetrics,
    ) -> Self {
        let scorer = Scorer::new(&config);
        let window = MetricsWindow::new(config.window_seconds, config.max_samples);
        let log = DecisionLog::new(config.decision_retention_len, config.decision_retention_secs);
        let crashloop = CrashLoopGuard::new(config.max_crashloop_count);
        let logger = ControlLogger::new(config.deployment.clone());
        Self {
            scorer,
            window,
            ledger: CooldownLedger::new(),
            log,
            controller,
            node_scaler,
            memory,
            crashloop,
            workload_api,
            inputs,
            status_tx,
            metrics,
            logger,
            tick_count: 0,
            last_replica_change_tick: None,
            last_node_scaler_pass: 0,
            config,
        }
    }

    /// Run one decision tick at `now`.
    pub async fn tick(&mut self, now: i64) {
        self.tick_count += 1;

        // 1. Ingest queued samples; the highest severity seen this tick
        //    drives the critical bypass.
        let mut severity = Severity::Normal;
        for sample in drain_pending(&mut self.inputs.sample_rx) {
            severity = severity.max(sample.severity);
            if self.window.insert(sample).is_err() {
                self.metrics.inc_stale_samples();
            }
        }
        self.window.trim(now);

        // 2. Snapshot the probes.
        let backlog = self.inputs.backlog_rx.borrow().clone();
        let node_health = self.inputs.node_health_rx.borrow().clone();

        // 3. Pod scan: crash-loop guard and OOM remediation.
        let pods = self.fetch_pods().await;
        let workload_health = match &pods {
            Some(pods) => self.crashloop.observe(pods),
            None => WorkloadHealth::Healthy,
        };
        if let Some(pods) = &pods {
            for event in self.memory.scan(pods, now).await {
                self.metrics.inc_oom_remediations();
                self.record(Decision {
                    ts: now,
                    kind: DecisionKind::MemoryRaise,
                    from: (event.previous_limit_bytes / MI) as u32,
                    to: (event.new_limit_bytes / MI) as u32,
                    reason: if event.applied {
                        format!("memory limit confirmed on pod {}", event.pod)
                    } else {
                        format!("memory limit raised after OOM on pod {}", event.pod)
                    },
                    severity: Severity::Warning,
                    success: true,
                });
            }
        }

        // 4. Score and spike verdicts.
        let stats = self.window.snapshot(now);
        let score = self.scorer.score(&stats);
        let spike = self.scorer.spike(&stats);
        if let Some(score) = &score {
            self.metrics.set_score(score.composite);
        }
        if let Some(spike) = &spike {
            self.metrics.set_spike_ratio(spike.ratio);
        }

        // 5. Replica decision. Pod scale-up must precede any node scale-up.
        let current_replicas = self
            .drive_replicas(now, severity, score, spike, &stats, &backlog, &workload_health)
            .await;

        // 6. Node events and capacity reactions.
        self.drive_nodes(now, &node_health).await;

        // 7. Bookkeeping and status publication.
        self.log.trim(now);
        self.publish_status(now, &stats, score, spike, &backlog, &node_health, current_replicas);
    }

    async fn fetch_pods(&self) -> Option<Vec<crate::cluster::PodView>> {
        let selector = format!("app={}", self.config.deployment);
        match with_deadline(
            DEFAULT_DEADLINE,
            self.workload_api.list_pods(&self.config.namespace, &selector),
        )
        .await
        {
            Ok(pods) => Some(pods),
            Err(err) => {
                warn!(error = %err, "Pod list failed, skipping pod-derived checks");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_replicas(
        &mut self,
        now: i64,
        severity: Severity,
        score: Option<ScoreBreakdown>,
        spike: Option<SpikeVerdict>,
        stats: &crate::window::Stats,
        backlog: &BacklogSignal,
        workload_health: &WorkloadHealth,
    ) -> Option<u32> {
        if let WorkloadHealth::CrashLooping { pod, observations } = workload_health {
            self.record(Decision {
                ts: now,
                kind: DecisionKind::Hold,
                from: 0,
                to: 0,
                reason: format!("workload unhealthy: {pod} crash-looping ({observations}x)"),
                severity: Severity::Warning,
                success: true,
            });
            return None;
        }

        let current = match self.controller.current_replicas().await {
            Ok(current) => current,
            Err(err) => {
                self.record(Decision {
                    ts: now,
                    kind: DecisionKind::Hold,
                    from: 0,
                    to: 0,
                    reason: format!("deployment unreadable: {err}"),
                    severity: Severity::Warning,
                    success: false,
                });
                return None;
            }
        };
        self.metrics.set_current_replicas(current as i64);

        // Fresh OOM kills from this tick's scan feed the OOM response rule.
        let oom = self.memory.fresh_oom().map(str::to_string);
        let decision = self.controller.decide(&DecisionContext {
            now,
            current_replicas: current,
            sample_count: stats.count,
            severity,
            oom,
            score,
            spike,
            backlog,
            ledger: &self.ledger,
            config: &self.config,
        });

        match decision {
            ReplicaDecision::Hold { reason } => {
                self.record(Decision {
                    ts: now,
                    kind: DecisionKind::Hold,
                    from: current,
                    to: current,
                    reason,
                    severity: Severity::Normal,
                    success: true,
                });
            }
            ReplicaDecision::Scale { intent, scope, rule } => {
                let outcome = self.controller.apply(&intent).await;
                if outcome.success {
                    self.ledger
                        .record(scope, now, self.config.cooldown_for(scope));
                    if outcome.from != outcome.to {
                        self.last_replica_change_tick = Some(self.tick_count);
                    }
                }
                let kind = if intent.target_replicas >= current {
                    DecisionKind::ReplicaUp
                } else {
                    DecisionKind::ReplicaDown
                };
                self.record(Decision {
                    ts: now,
                    kind,
                    from: outcome.from,
                    to: outcome.to,
                    reason: format!("{} ({rule})", intent.reason),
                    severity: intent.severity,
                    success: outcome.success,
                });
            }
        }
        Some(current)
    }

    async fn drive_nodes(&mut self, now: i64, node_health: &NodeHealthSignal) {
        // React to monitor events first: quarantine cordons and recoveries.
        let mut capacity_critical: Option<usize> = None;
        while let Ok(event) = self.inputs.node_event_rx.try_recv() {
            match &event {
                NodeEvent::NodeLost { name } => {
                    self.metrics.inc_node_event("node_lost");
                    let success = self.node_scaler.cordon(name).await.is_ok();
                    self.record(Decision {
                        ts: now,
                        kind: DecisionKind::Cordon,
                        from: 0,
                        to: 0,
                        reason: format!("quarantine {name} after readiness loss"),
                        severity: Severity::Warning,
                        success,
                    });
                }
                NodeEvent::NodeRecovered { name } => {
                    self.metrics.inc_node_event("node_recovered");
                    if let Err(err) = self.node_scaler.uncordon(name).await {
                        warn!(node = %name, error = %err, "Uncordon after recovery failed");
                    }
                }
                NodeEvent::CapacityDegraded { .. } => {
                    self.metrics.inc_node_event("capacity_degraded");
                }
                NodeEvent::CapacityCritical { lost_nodes, .. } => {
                    self.metrics.inc_node_event("capacity_critical");
                    capacity_critical = Some(*lost_nodes);
                }
            }
        }

        if let Some(health) = node_health.health() {
            self.metrics.set_capacity_loss(health.capacity_loss);
        }

        // Emergency pool growth: bypasses the node_up cooldown but still
        // honors the minimum inter-action gap.
        if let Some(lost) = capacity_critical {
            let add = lost.max(1) as u32;
            if self.node_scaler.gap_elapsed(now) {
                let success = match self.node_scaler.scale_up(add, now).await {
                    Ok(()) => {
                        self.ledger.record(
                            ActionScope::NodeUp,
                            now,
                            self.config.cooldown_for(ActionScope::NodeUp),
                        );
                        true
                    }
                    Err(err) => {
                        warn!(error = %err, "Emergency node scale-up failed");
                        false
                    }
                };
                let total = node_health.health().map(|h| h.total as u32).unwrap_or(0);
                self.record(Decision {
                    ts: now,
                    kind: DecisionKind::NodeUp,
                    from: total,
                    to: total + add,
                    reason: format!("capacity critical: {lost} nodes lost"),
                    severity: Severity::Critical,
                    success,
                });
            }
            // A capacity emergency supersedes the routine sizing pass.
            return;
        }

        // Routine utilization-driven sizing at its own slower cadence.
        if now - self.last_node_scaler_pass >= self.config.node_scaler_interval_secs as i64 {
            self.last_node_scaler_pass = now;
            self.utilization_pass(now, node_health).await;
        }
    }

    async fn utilization_pass(&mut self, now: i64, node_health: &NodeHealthSignal) {
        let Some(health) = node_health.health() else {
            return;
        };
        let api = self.node_scaler.api();
        let utilization = match with_deadline(DEFAULT_DEADLINE, api.node_utilization()).await {
            Ok(u) => u,
            Err(err) => {
                warn!(error = %err, "Node utilization unavailable");
                return;
            }
        };
        let unschedulable = self.count_unschedulable_pods().await;

        match self.node_scaler.propose(&utilization, unschedulable) {
            Some((DecisionKind::NodeUp, reason)) => {
                if !self.ledger.permits(ActionScope::NodeUp, now)
                    || !self.node_scaler.gap_elapsed(now)
                {
                    return;
                }
                let success = self.node_scaler.scale_up(1, now).await.is_ok();
                if success {
                    self.ledger.record(
                        ActionScope::NodeUp,
                        now,
                        self.config.cooldown_for(ActionScope::NodeUp),
                    );
                }
                self.record(Decision {
                    ts: now,
                    kind: DecisionKind::NodeUp,
                    from: health.total as u32,
                    to: health.total as u32 + 1,
                    reason,
                    severity: Severity::Warning,
                    success,
                });
            }
            Some((DecisionKind::NodeDown, reason)) => {
                if !self.ledger.permits(ActionScope::NodeDown, now)
                    || !self.node_scaler.gap_elapsed(now)
                {
                    return;
                }
                // Never shrink the pool on the heels of a replica change;
                // give the scheduler one full tick to settle.
                if self
                    .last_replica_change_tick
                    .is_some_and(|t| self.tick_count <= t + 1)
                {
                    return;
                }
                match self.node_scaler.scale_down(1, now).await {
                    Ok(reports) => {
                        let mut any_success = false;
                        for report in reports {
                            any_success |= report.success;
                            self.record(Decision {
                                ts: now,
                                kind: report.kind,
                                from: report.nodes_before,
                                to: report.nodes_after,
                                reason: format!("{reason}; {}", report.reason),
                                severity: Severity::Normal,
                                success: report.success,
                            });
                        }
                        if any_success {
                            self.ledger.record(
                                ActionScope::NodeDown,
                                now,
                                self.config.cooldown_for(ActionScope::NodeDown),
                            );
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Node scale-down pass failed");
                    }
                }
            }
            _ => {}
        }
    }

    async fn count_unschedulable_pods(&self) -> usize {
        self.fetch_pods()
            .await
            .map(|pods| {
                pods.iter()
                    .filter(|p| p.unschedulable_reason.is_some())
                    .count()
            })
            .unwrap_or(0)
    }

    fn record(&mut self, decision: Decision) {
        self.metrics.record_decision(decision.kind, decision.success);
        self.logger.log_decision(&decision);
        self.log.push(decision);
    }

    #[allow(clippy::too_many_arguments)]
    fn publish_status(
        &self,
        now: i64,
        stats: &crate::window::Stats,
        score: Option<ScoreBreakdown>,
        spike: Option<SpikeVerdict>,
        backlog: &BacklogSignal,
        node_health: &NodeHealthSignal,
        current_replicas: Option<u32>,
    ) {
        if let Some(state) = backlog.state() {
            self.metrics
                .set_backlog(state.size as i64, state.oldest_age_s);
        }
        let snapshot = StatusSnapshot {
            generated_at: now,
            window_samples: stats.count,
            score,
            spike,
            backlog: Some(backlog.clone()),
            node_health: node_health.health().cloned(),
            current_replicas,
            cooldowns_remaining: self.ledger.snapshot(now),
            recent_decisions: self.log.tail(20),
            last_failure: self.log.last_failure().cloned(),
            memory_events: self.memory.events(),
            unsafe_to_optimize: self.memory.is_unsafe(),
        };
        let _ = self.status_tx.send(snapshot);
    }

    /// Main loop: one decision tick per interval until shutdown. In-flight
    /// work finishes; no new tick starts after the signal.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            tick_interval_secs = self.config.tick_interval_secs,
            "Starting orchestrator"
        );
        let mut ticker = interval(Duration::from_secs(self.config.tick_interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = std::time::Instant::now();
                    let now = chrono::Utc::now().timestamp();
                    self.tick(now).await;
                    self.metrics
                        .observe_tick_latency(started.elapsed().as_secs_f64());
                }
                _ = shutdown.recv() => {
                    info!("Shutting down orchestrator");
                    break;
                }
            }
        }
    }
}
