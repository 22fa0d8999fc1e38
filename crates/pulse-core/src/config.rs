//! Control-plane configuration
//!
//! All tunables live in one immutable value constructed at startup and
//! passed into each component. Reload produces a new value and a controlled
//! swap between ticks; weights only change at restart.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Tolerance for the weight-sum check.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Full configuration for the decision engine.
#[derive(Debug, Clone, Deserialize)]
pub struct PulseConfig {
    /// Target deployment name
    #[serde(default = "default_deployment")]
    pub deployment: String,

    /// Target namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    // --- metrics window ---
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    // --- composite score ---
    #[serde(default = "default_w_cpu")]
    pub w_cpu: f64,
    #[serde(default = "default_w_lat")]
    pub w_lat: f64,
    #[serde(default = "default_w_err")]
    pub w_err: f64,
    #[serde(default = "default_cpu_target")]
    pub cpu_target: f64,
    #[serde(default = "default_latency_target_ms")]
    pub latency_target_ms: f64,
    #[serde(default = "default_error_target_pct")]
    pub error_target_pct: f64,
    #[serde(default = "default_scale_up_score")]
    pub scale_up_score: f64,
    #[serde(default = "default_scale_down_score")]
    pub scale_down_score: f64,
    #[serde(default = "default_critical_score")]
    pub critical_score: f64,
    #[serde(default = "default_spike_ratio")]
    pub spike_ratio: f64,

    // --- replica bounds and steps ---
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,
    #[serde(default = "default_up_step")]
    pub up_step: u32,
    #[serde(default = "default_down_step")]
    pub down_step: u32,
    #[serde(default = "default_critical_factor")]
    pub critical_factor: f64,
    #[serde(default = "default_spike_factor")]
    pub spike_factor: f64,

    // --- cooldowns (seconds) ---
    #[serde(default = "default_cooldown_replica_up")]
    pub cooldown_replica_up: u64,
    #[serde(default = "default_cooldown_replica_down")]
    pub cooldown_replica_down: u64,
    #[serde(default = "default_cooldown_node_up")]
    pub cooldown_node_up: u64,
    #[serde(default = "default_cooldown_node_down")]
    pub cooldown_node_down: u64,
    #[serde(default = "default_cooldown_critical")]
    pub cooldown_critical: u64,
    /// Minimum gap between any two node actions, even on bypass
    #[serde(default = "default_min_node_action_gap")]
    pub min_node_action_gap_secs: u64,

    // --- backlog probe ---
    #[serde(default = "default_backlog_interval")]
    pub backlog_interval_secs: u64,
    #[serde(default = "default_backlog_size_threshold")]
    pub backlog_size_threshold: u64,
    #[serde(default = "default_backlog_age_threshold")]
    pub backlog_age_threshold_s: f64,
    /// Fixed scale-up step under backlog pressure; unset computes
    /// `max(1, ceil(current / 4))`
    #[serde(default)]
    pub backlog_step: Option<u32>,
    #[serde(default = "default_max_stale_intervals")]
    pub max_stale_intervals: u32,

    // --- node health ---
    #[serde(default = "default_node_poll_interval")]
    pub node_poll_interval_secs: u64,
    #[serde(default = "default_not_ready_grace")]
    pub not_ready_grace_secs: u64,
    #[serde(default = "default_critical_capacity_loss")]
    pub critical_capacity_loss: f64,

    // --- node scaler ---
    #[serde(default = "default_node_scaler_interval")]
    pub node_scaler_interval_secs: u64,
    #[serde(default = "default_node_scale_up_utilization")]
    pub node_scale_up_utilization: f64,
    #[serde(default = "default_node_scale_down_utilization")]
    pub node_scale_down_utilization: f64,

    // --- memory optimizer ---
    #[serde(default = "default_memory_growth")]
    pub memory_growth: f64,
    #[serde(default = "default_memory_cap_bytes")]
    pub memory_cap_bytes: u64,
    #[serde(default = "default_max_oom_escalations")]
    pub max_oom_escalations: u32,
    #[serde(default = "default_oom_lookback")]
    pub oom_lookback_secs: u64,
    #[serde(default = "default_oom_trigger_count")]
    pub oom_trigger_count: u32,
    #[serde(default = "default_memory_adjust_cooldown")]
    pub memory_adjust_cooldown_secs: u64,
    /// Replica multiplier applied when a fresh OOM kill is observed
    #[serde(default = "default_oom_scale_factor")]
    pub oom_scale_factor: f64,

    // --- pod health ---
    #[serde(default = "default_max_crashloop_count")]
    pub max_crashloop_count: u32,

    // --- orchestrator ---
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_decision_retention_secs")]
    pub decision_retention_secs: u64,
    #[serde(default = "default_decision_retention_len")]
    pub decision_retention_len: usize,
}

fn default_deployment() -> String {
    "workload".to_string()
}
fn default_namespace() -> String {
    "default".to_string()
}
fn default_window_seconds() -> u64 {
    300
}
fn default_max_samples() -> usize {
    600
}
fn default_w_cpu() -> f64 {
    0.4
}
fn default_w_lat() -> f64 {
    0.4
}
fn default_w_err() -> f64 {
    0.2
}
fn default_cpu_target() -> f64 {
    70.0
}
fn default_latency_target_ms() -> f64 {
    300.0
}
fn default_error_target_pct() -> f64 {
    1.0
}
fn default_scale_up_score() -> f64 {
    1.2
}
fn default_scale_down_score() -> f64 {
    0.5
}
fn default_critical_score() -> f64 {
    2.0
}
fn default_spike_ratio() -> f64 {
    2.0
}
fn default_min_replicas() -> u32 {
    2
}
fn default_max_replicas() -> u32 {
    20
}
fn default_up_step() -> u32 {
    2
}
fn default_down_step() -> u32 {
    1
}
fn default_critical_factor() -> f64 {
    2.0
}
fn default_spike_factor() -> f64 {
    1.5
}
fn default_cooldown_replica_up() -> u64 {
    180
}
fn default_cooldown_replica_down() -> u64 {
    300
}
fn default_cooldown_node_up() -> u64 {
    300
}
fn default_cooldown_node_down() -> u64 {
    600
}
fn default_cooldown_critical() -> u64 {
    30
}
fn default_min_node_action_gap() -> u64 {
    60
}
fn default_backlog_interval() -> u64 {
    15
}
fn default_backlog_size_threshold() -> u64 {
    1_000
}
fn default_backlog_age_threshold() -> f64 {
    60.0
}
fn default_max_stale_intervals() -> u32 {
    4
}
fn default_node_poll_interval() -> u64 {
    10
}
fn default_not_ready_grace() -> u64 {
    60
}
fn default_critical_capacity_loss() -> f64 {
    0.30
}
fn default_node_scaler_interval() -> u64 {
    120
}
fn default_node_scale_up_utilization() -> f64 {
    0.80
}
fn default_node_scale_down_utilization() -> f64 {
    0.35
}
fn default_memory_growth() -> f64 {
    1.5
}
fn default_memory_cap_bytes() -> u64 {
    4 * 1024 * 1024 * 1024
}
fn default_max_oom_escalations() -> u32 {
    3
}
fn default_oom_lookback() -> u64 {
    600
}
fn default_oom_trigger_count() -> u32 {
    2
}
fn default_memory_adjust_cooldown() -> u64 {
    300
}
fn default_oom_scale_factor() -> f64 {
    2.0
}
fn default_max_crashloop_count() -> u32 {
    3
}
fn default_tick_interval() -> u64 {
    10
}
fn default_decision_retention_secs() -> u64 {
    3600
}
fn default_decision_retention_len() -> usize {
    500
}

impl Default for PulseConfig {
    fn default() -> Self {
        // Deserializing an empty map applies every serde default.
        serde_json::from_str("{}").expect("default config must deserialize")
    }
}

impl PulseConfig {
    /// Load configuration from environment (prefix `PULSE_`) and an
    /// optional config file, then validate.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path));
        }
        let raw = builder
            .add_source(config::Environment::with_prefix("PULSE"))
            .build()
            .context("failed to assemble configuration sources")?;

        let cfg: PulseConfig = raw
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the engine cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        let weight_sum = self.w_cpu + self.w_lat + self.w_err;
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            bail!(
                "score weights must sum to 1 (got {:.7}: cpu={} lat={} err={})",
                weight_sum,
                self.w_cpu,
                self.w_lat,
                self.w_err
            );
        }
        if self.min_replicas == 0 || self.min_replicas > self.max_replicas {
            bail!(
                "replica bounds invalid: min={} max={}",
                self.min_replicas,
                self.max_replicas
            );
        }
        if self.scale_down_score >= self.scale_up_score {
            bail!(
                "scale_down_score {} must be below scale_up_score {}",
                self.scale_down_score,
                self.scale_up_score
            );
        }
        if self.critical_factor < 1.0 || self.spike_factor < 1.0 || self.oom_scale_factor < 1.0 {
            bail!("scale factors must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.critical_capacity_loss) {
            bail!(
                "critical_capacity_loss {} outside [0, 1]",
                self.critical_capacity_loss
            );
        }
        Ok(())
    }

    /// Backlog scale-up step for a given replica count.
    pub fn backlog_step_for(&self, current: u32) -> u32 {
        self.backlog_step
            .unwrap_or_else(|| ((current as f64) / 4.0).ceil().max(1.0) as u32)
    }

    /// Cooldown duration for one action scope, in seconds.
    pub fn cooldown_for(&self, scope: crate::cooldown::ActionScope) -> u64 {
        use crate::cooldown::ActionScope;
        match scope {
            ActionScope::ReplicaUp => self.cooldown_replica_up,
            ActionScope::ReplicaDown => self.cooldown_replica_down,
            ActionScope::NodeUp => self.cooldown_node_up,
            ActionScope::NodeDown => self.cooldown_node_down,
            ActionScope::Critical => self.cooldown_critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = PulseConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.window_seconds, 300);
        assert_eq!(cfg.max_samples, 600);
        assert_eq!(cfg.tick_interval_secs, 10);
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let cfg = PulseConfig {
            w_cpu: 0.5,
            w_lat: 0.4,
            w_err: 0.2,
            ..PulseConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_weights_within_tolerance() {
        let cfg = PulseConfig {
            w_cpu: 0.4 + 5e-7,
            ..PulseConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_replica_bounds() {
        let cfg = PulseConfig {
            min_replicas: 10,
            max_replicas: 5,
            ..PulseConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backlog_step_computed_when_unset() {
        let cfg = PulseConfig::default();
        assert_eq!(cfg.backlog_step_for(4), 1);
        assert_eq!(cfg.backlog_step_for(9), 3);
        assert_eq!(cfg.backlog_step_for(1), 1);
    }

    #[test]
    fn backlog_step_fixed_when_set() {
        let cfg = PulseConfig {
            backlog_step: Some(5),
            ..PulseConfig::default()
        };
        assert_eq!(cfg.backlog_step_for(4), 5);
    }
}
