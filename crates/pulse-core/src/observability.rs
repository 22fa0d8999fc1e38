//! Observability infrastructure for the control plane
//!
//! Provides:
//! - Prometheus metrics (tick latency, score, backlog, capacity loss,
//!   decision counters)
//! - Structured JSON event logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{Decision, DecisionKind};

/// Histogram buckets for decision-tick latency (in seconds).
const TICK_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PulseMetricsInner> = OnceLock::new();

struct PulseMetricsInner {
    tick_latency_seconds: Histogram,
    composite_score: Gauge,
    spike_ratio: Gauge,
    backlog_size: IntGauge,
    backlog_oldest_age_seconds: Gauge,
    capacity_loss: Gauge,
    current_replicas: IntGauge,
    decisions_total: IntCounterVec,
    action_failures_total: IntCounter,
    malformed_messages_total: IntCounter,
    stale_samples_total: IntCounter,
    oom_remediations_total: IntCounter,
    node_events_total: IntCounterVec,
}

impl PulseMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "pulse_tick_latency_seconds",
                "Time spent in one orchestrator decision tick",
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            composite_score: register_gauge!(
                "pulse_composite_score",
                "Latest composite load score"
            )
            .expect("Failed to register composite_score"),

            spike_ratio: register_gauge!(
                "pulse_spike_ratio",
                "Latest recent/baseline CPU ratio"
            )
            .expect("Failed to register spike_ratio"),

            backlog_size: register_int_gauge!(
                "pulse_backlog_size",
                "Undelivered messages in the monitored queue"
            )
            .expect("Failed to register backlog_size"),

            backlog_oldest_age_seconds: register_gauge!(
                "pulse_backlog_oldest_age_seconds",
                "Age of the oldest unacknowledged message"
            )
            .expect("Failed to register backlog_oldest_age_seconds"),

            capacity_loss: register_gauge!(
                "pulse_capacity_loss",
                "Fraction of nodes lost after hysteresis"
            )
            .expect("Failed to register capacity_loss"),

            current_replicas: register_int_gauge!(
                "pulse_current_replicas",
                "Replica count of the managed deployment"
            )
            .expect("Failed to register current_replicas"),

            decisions_total: register_int_counter_vec!(
                "pulse_decisions_total",
                "Control decisions by kind and outcome",
                &["kind", "success"]
            )
            .expect("Failed to register decisions_total"),

            action_failures_total: register_int_counter!(
                "pulse_action_failures_total",
                "Control actions that failed after retries"
            )
            .expect("Failed to register action_failures_total"),

            malformed_messages_total: register_int_counter!(
                "pulse_malformed_messages_total",
                "Bus messages that failed to decode"
            )
            .expect("Failed to register malformed_messages_total"),

            stale_samples_total: register_int_counter!(
                "pulse_stale_samples_total",
                "Samples rejected for arriving out of order"
            )
            .expect("Failed to register stale_samples_total"),

            oom_remediations_total: register_int_counter!(
                "pulse_oom_remediations_total",
                "Memory limit adjustments made after OOM kills"
            )
            .expect("Failed to register oom_remediations_total"),

            node_events_total: register_int_counter_vec!(
                "pulse_node_events_total",
                "Node monitor events by type",
                &["event"]
            )
            .expect("Failed to register node_events_total"),
        }
    }
}

/// Control-plane metrics for Prometheus exposition.
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct PulseMetrics {
    _private: (),
}

impl Default for PulseMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PulseMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PulseMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn set_score(&self, composite: f64) {
        self.inner().composite_score.set(composite);
    }

    pub fn set_spike_ratio(&self, ratio: f64) {
        self.inner().spike_ratio.set(ratio);
    }

    pub fn set_backlog(&self, size: i64, oldest_age_s: f64) {
        self.inner().backlog_size.set(size);
        self.inner().backlog_oldest_age_seconds.set(oldest_age_s);
    }

    pub fn set_capacity_loss(&self, loss: f64) {
        self.inner().capacity_loss.set(loss);
    }

    pub fn set_current_replicas(&self, replicas: i64) {
        self.inner().current_replicas.set(replicas);
    }

    pub fn record_decision(&self, kind: DecisionKind, success: bool) {
        let kind = match kind {
            DecisionKind::Hold => "hold",
            DecisionKind::ReplicaUp => "replica_up",
            DecisionKind::ReplicaDown => "replica_down",
            DecisionKind::NodeUp => "node_up",
            DecisionKind::NodeDown => "node_down",
            DecisionKind::Cordon => "cordon",
            DecisionKind::Drain => "drain",
            DecisionKind::MemoryRaise => "memory_raise",
        };
        self.inner()
            .decisions_total
            .with_label_values(&[kind, if success { "true" } else { "false" }])
            .inc();
        if !success {
            self.inner().action_failures_total.inc();
        }
    }

    pub fn inc_malformed_messages(&self) {
        self.inner().malformed_messages_total.inc();
    }

    pub fn inc_stale_samples(&self) {
        self.inner().stale_samples_total.inc();
    }

    pub fn inc_oom_remediations(&self) {
        self.inner().oom_remediations_total.inc();
    }

    pub fn inc_node_event(&self, event: &str) {
        self.inner()
            .node_events_total
            .with_label_values(&[event])
            .inc();
    }
}

/// Structured logger for significant control events.
#[derive(Clone)]
pub struct ControlLogger {
    deployment: String,
}

impl ControlLogger {
    pub fn new(deployment: impl Into<String>) -> Self {
        Self {
            deployment: deployment.into(),
        }
    }

    /// Log a decision record as a structured event.
    pub fn log_decision(&self, decision: &Decision) {
        if decision.success {
            info!(
                event = "decision",
                deployment = %self.deployment,
                kind = ?decision.kind,
                from = decision.from,
                to = decision.to,
                reason = %decision.reason,
                "Decision applied"
            );
        } else {
            warn!(
                event = "decision",
                deployment = %self.deployment,
                kind = ?decision.kind,
                from = decision.from,
                to = decision.to,
                reason = %decision.reason,
                "Decision failed"
            );
        }
    }

    pub fn log_startup(&self, version: &str, tick_interval_secs: u64) {
        info!(
            event = "startup",
            deployment = %self.deployment,
            version = %version,
            tick_interval_secs,
            "Control plane started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "shutdown",
            deployment = %self.deployment,
            reason = %reason,
            "Control plane shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    #[test]
    fn metrics_handle_is_usable() {
        let metrics = PulseMetrics::new();
        metrics.observe_tick_latency(0.004);
        metrics.set_score(0.43);
        metrics.set_spike_ratio(1.1);
        metrics.set_backlog(1200, 35.0);
        metrics.set_capacity_loss(0.25);
        metrics.set_current_replicas(4);
        metrics.record_decision(DecisionKind::ReplicaUp, true);
        metrics.record_decision(DecisionKind::NodeDown, false);
        metrics.inc_malformed_messages();
        metrics.inc_node_event("node_lost");
    }

    #[test]
    fn logger_formats_decisions() {
        let logger = ControlLogger::new("workload");
        logger.log_decision(&Decision {
            ts: 0,
            kind: DecisionKind::ReplicaUp,
            from: 4,
            to: 6,
            reason: "composite score 1.24 above threshold".to_string(),
            severity: Severity::Warning,
            success: true,
        });
        logger.log_startup("0.1.0", 10);
        logger.log_shutdown("SIGINT");
    }
}
