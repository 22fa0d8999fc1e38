//! Core data models for the autoscaling control plane

use serde::{Deserialize, Serialize};

/// Severity attached to a metric sample or a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Normal,
    Warning,
    Critical,
}

/// A single metric observation ingested from the bus.
///
/// Samples are immutable once created; the window discards them on eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// Unix timestamp (seconds) of the observation
    pub timestamp: i64,
    /// CPU utilization percentage (0..100, may exceed 100 under burst)
    pub cpu_pct: f64,
    /// Observed p95 latency in milliseconds
    pub latency_p95_ms: f64,
    /// Observed p99 latency in milliseconds
    pub latency_p99_ms: f64,
    /// Error rate percentage
    pub error_rate_pct: f64,
    /// Severity reported by the publisher
    pub severity: Severity,
    /// Free-form source identifier, if the publisher set one
    pub source: Option<String>,
}

/// Wire format of a metrics message on the bus.
///
/// Unknown fields are ignored; a missing timestamp defaults to receive time.
/// `latency` carries the publisher's p95; `latency_p99` is optional and
/// falls back to the p95 value.
#[derive(Debug, Clone, Deserialize)]
pub struct BusMessage {
    pub cpu: f64,
    pub latency: f64,
    #[serde(default)]
    pub latency_p99: Option<f64>,
    pub error_rate: f64,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub source: Option<String>,
}

impl BusMessage {
    /// Convert a decoded bus message into a sample, filling defaults.
    pub fn into_sample(self, received_at: i64) -> MetricSample {
        MetricSample {
            timestamp: self.timestamp.unwrap_or(received_at),
            cpu_pct: self.cpu,
            latency_p95_ms: self.latency,
            latency_p99_ms: self.latency_p99.unwrap_or(self.latency),
            error_rate_pct: self.error_rate,
            severity: self.severity.unwrap_or_default(),
            source: self.source,
        }
    }
}

/// Queue backlog observation derived from the monitoring API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogState {
    /// Undelivered message count
    pub size: u64,
    /// Age of the oldest unacknowledged message, in seconds
    pub oldest_age_s: f64,
    /// Messages per second; `None` until two adjacent size samples exist
    pub growth_rate_per_s: Option<f64>,
    /// Consecutive probe intervals with positive growth
    pub growth_streak: u32,
}

impl BacklogState {
    /// Whether the backlog indicates unmet demand.
    pub fn is_pressuring(&self, size_threshold: u64, age_threshold_s: f64) -> bool {
        self.size > size_threshold
            || self.oldest_age_s > age_threshold_s
            || (self.growth_rate_per_s.is_some_and(|r| r > 0.0) && self.growth_streak >= 2)
    }
}

/// Backlog signal as seen by the decision loop.
///
/// `Unknown` is distinct from an empty backlog: a signal that cannot be
/// read must never be treated as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "freshness", rename_all = "snake_case")]
pub enum BacklogSignal {
    Fresh(BacklogState),
    /// Last known state, returned while the monitoring API is unreachable
    Stale(BacklogState),
    Unknown,
}

impl BacklogSignal {
    /// State usable for decisions, if any.
    pub fn state(&self) -> Option<&BacklogState> {
        match self {
            BacklogSignal::Fresh(s) | BacklogSignal::Stale(s) => Some(s),
            BacklogSignal::Unknown => None,
        }
    }
}

/// Per-node record maintained by the node monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub name: String,
    pub ready: bool,
    pub schedulable: bool,
    pub taints: Vec<Taint>,
    /// Unix timestamp of the last observed readiness transition
    pub last_transition_ts: i64,
    pub quarantined: bool,
}

/// Kubernetes-style node taint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: String,
}

/// Replica change produced by the controller, consumed by the applier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaIntent {
    pub target_replicas: u32,
    pub reason: String,
    pub generated_at: i64,
    pub severity: Severity,
}

/// Kind tag for the decision log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Hold,
    ReplicaUp,
    ReplicaDown,
    NodeUp,
    NodeDown,
    Cordon,
    Drain,
    MemoryRaise,
}

/// Append-only record of one control action (or a deliberate hold).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub ts: i64,
    pub kind: DecisionKind,
    pub from: u32,
    pub to: u32,
    pub reason: String,
    pub severity: Severity,
    pub success: bool,
}

/// OOM remediation record kept by the memory optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub pod: String,
    pub container: String,
    pub observed_ts: i64,
    pub previous_limit_bytes: u64,
    pub new_limit_bytes: u64,
    /// Set once at least one ready pod carries the new limit
    pub applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_message_defaults_timestamp_to_receive_time() {
        let msg: BusMessage =
            serde_json::from_str(r#"{"cpu": 40.0, "latency": 120.0, "error_rate": 0.2}"#).unwrap();
        let sample = msg.into_sample(1_700_000_000);

        assert_eq!(sample.timestamp, 1_700_000_000);
        assert_eq!(sample.severity, Severity::Normal);
        assert_eq!(sample.latency_p99_ms, 120.0);
    }

    #[test]
    fn bus_message_ignores_unknown_fields() {
        let msg: BusMessage = serde_json::from_str(
            r#"{"cpu": 10.0, "latency": 50.0, "error_rate": 0.0, "shard": 7, "region": "a"}"#,
        )
        .unwrap();
        assert_eq!(msg.cpu, 10.0);
    }

    #[test]
    fn bus_message_parses_critical_severity() {
        let msg: BusMessage = serde_json::from_str(
            r#"{"cpu": 95.0, "latency": 900.0, "error_rate": 4.0, "severity": "CRITICAL"}"#,
        )
        .unwrap();
        assert_eq!(msg.severity, Some(Severity::Critical));
    }

    #[test]
    fn backlog_pressure_from_size() {
        let state = BacklogState {
            size: 50_000,
            oldest_age_s: 5.0,
            growth_rate_per_s: None,
            growth_streak: 0,
        };
        assert!(state.is_pressuring(1_000, 60.0));
    }

    #[test]
    fn backlog_growth_needs_two_intervals() {
        let mut state = BacklogState {
            size: 10,
            oldest_age_s: 1.0,
            growth_rate_per_s: Some(5.0),
            growth_streak: 1,
        };
        assert!(!state.is_pressuring(1_000, 60.0));

        state.growth_streak = 2;
        assert!(state.is_pressuring(1_000, 60.0));
    }

    #[test]
    fn unknown_backlog_has_no_state() {
        assert!(BacklogSignal::Unknown.state().is_none());
    }
}
