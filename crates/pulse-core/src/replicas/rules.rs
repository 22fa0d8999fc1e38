//! Ordered scaling rules
//!
//! Each rule inspects the decision context and either proposes a replica
//! intent or passes. The controller evaluates rules in a fixed order:
//! critical bypass, OOM response, backlog override, spike response,
//! composite scale-up, composite scale-down. Every proposed target is
//! clamped to the configured replica bounds before it leaves the
//! controller.

use crate::config::PulseConfig;
use crate::cooldown::{ActionScope, CooldownLedger};
use crate::models::{BacklogSignal, ReplicaIntent, Severity};
use crate::scorer::{ScoreBreakdown, ScoreVerdict, SpikeVerdict};

/// Minimum window samples before load-derived rules may act.
pub const MIN_DECISION_SAMPLES: usize = 3;

/// Everything a rule may consult for one decision.
pub struct DecisionContext<'a> {
    pub now: i64,
    pub current_replicas: u32,
    pub sample_count: usize,
    /// Highest severity ingested since the previous tick
    pub severity: Severity,
    /// Pod with a freshly observed OOM kill this tick, if any
    pub oom: Option<String>,
    pub score: Option<ScoreBreakdown>,
    pub spike: Option<SpikeVerdict>,
    pub backlog: &'a BacklogSignal,
    pub ledger: &'a CooldownLedger,
    pub config: &'a PulseConfig,
}

/// A rule's proposal: the intent plus the cooldown scope it consumes.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub intent: ReplicaIntent,
    pub scope: ActionScope,
}

/// One entry in the ordered rule chain.
pub trait ScaleRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &DecisionContext<'_>) -> Option<RuleOutcome>;
}

/// The rule chain in evaluation order.
pub fn default_rules() -> Vec<Box<dyn ScaleRule>> {
    vec![
        Box::new(CriticalBypass),
        Box::new(OomResponse),
        Box::new(BacklogOverride),
        Box::new(SpikeResponse),
        Box::new(CompositeScaleUp),
        Box::new(CompositeScaleDown),
    ]
}

fn up_intent(ctx: &DecisionContext<'_>, target: u32, reason: String, severity: Severity) -> ReplicaIntent {
    ReplicaIntent {
        target_replicas: target.clamp(ctx.config.min_replicas, ctx.config.max_replicas),
        reason,
        generated_at: ctx.now,
        severity,
    }
}

/// Rule 1: CRITICAL severity or a critical score multiplies replicas,
/// gated only by the `critical` cooldown.
pub struct CriticalBypass;

impl ScaleRule for CriticalBypass {
    fn name(&self) -> &'static str {
        "critical_bypass"
    }

    fn evaluate(&self, ctx: &DecisionContext<'_>) -> Option<RuleOutcome> {
        let critical_severity = ctx.severity == Severity::Critical;
        let critical_score = ctx
            .score
            .is_some_and(|s| s.verdict == ScoreVerdict::Critical);
        if !critical_severity && !critical_score {
            return None;
        }
        if !ctx.ledger.permits(ActionScope::Critical, ctx.now) {
            return None;
        }

        let target = ((ctx.current_replicas as f64 * ctx.config.critical_factor).ceil() as u32)
            .min(ctx.config.max_replicas);
        if target == ctx.current_replicas {
            return None;
        }

        let reason = if critical_severity {
            "critical severity event".to_string()
        } else {
            format!(
                "critical composite score {:.2}",
                ctx.score.map(|s| s.composite).unwrap_or_default()
            )
        };
        Some(RuleOutcome {
            intent: up_intent(ctx, target, reason, Severity::Critical),
            scope: ActionScope::Critical,
        })
    }
}

/// Rule 2: a fresh OOM kill multiplies replicas so the restarted pods
/// come back with headroom while the raised memory limit rolls out.
pub struct OomResponse;

impl ScaleRule for OomResponse {
    fn name(&self) -> &'static str {
        "oom_response"
    }

    fn evaluate(&self, ctx: &DecisionContext<'_>) -> Option<RuleOutcome> {
        let pod = ctx.oom.as_deref()?;
        if !ctx.ledger.permits(ActionScope::ReplicaUp, ctx.now) {
            return None;
        }

        let target = ((ctx.current_replicas as f64 * ctx.config.oom_scale_factor).ceil() as u32)
            .min(ctx.config.max_replicas);
        if target == ctx.current_replicas {
            return None;
        }

        Some(RuleOutcome {
            intent: up_intent(
                ctx,
                target,
                format!("oom kill on pod {pod}"),
                Severity::Warning,
            ),
            scope: ActionScope::ReplicaUp,
        })
    }
}

/// Rule 3: backlog pressure adds a step regardless of the score.
pub struct BacklogOverride;

impl ScaleRule for BacklogOverride {
    fn name(&self) -> &'static str {
        "backlog_override"
    }

    fn evaluate(&self, ctx: &DecisionContext<'_>) -> Option<RuleOutcome> {
        let state = ctx.backlog.state()?;
        let config = ctx.config;
        if !state.is_pressuring(config.backlog_size_threshold, config.backlog_age_threshold_s) {
            return None;
        }
        let urgent = state.oldest_age_s > config.backlog_age_threshold_s
            || state.growth_rate_per_s.is_some_and(|r| r > 0.0);
        if !urgent {
            return None;
        }
        if !ctx.ledger.permits(ActionScope::ReplicaUp, ctx.now) {
            return None;
        }

        let step = config.backlog_step_for(ctx.current_replicas);
        let target = (ctx.current_replicas + step).min(config.max_replicas);
        if target == ctx.current_replicas {
            return None;
        }

        Some(RuleOutcome {
            intent: up_intent(
                ctx,
                target,
                format!(
                    "backlog pressure (size {}, oldest {:.0}s)",
                    state.size, state.oldest_age_s
                ),
                Severity::Warning,
            ),
            scope: ActionScope::ReplicaUp,
        })
    }
}

/// Rule 4: a CPU spike scales like a critical event with its own factor.
pub struct SpikeResponse;

impl ScaleRule for SpikeResponse {
    fn name(&self) -> &'static str {
        "spike_response"
    }

    fn evaluate(&self, ctx: &DecisionContext<'_>) -> Option<RuleOutcome> {
        let spike = ctx.spike.filter(|s| s.spiking)?;
        if !ctx.ledger.permits(ActionScope::Critical, ctx.now) {
            return None;
        }

        let target = ((ctx.current_replicas as f64 * ctx.config.spike_factor).ceil() as u32)
            .min(ctx.config.max_replicas);
        if target == ctx.current_replicas {
            return None;
        }

        Some(RuleOutcome {
            intent: up_intent(
                ctx,
                target,
                format!(
                    "cpu spike ({:.0} vs baseline {:.0}, ratio {:.2})",
                    spike.recent_mean, spike.baseline_mean, spike.ratio
                ),
                Severity::Warning,
            ),
            scope: ActionScope::Critical,
        })
    }
}

/// Rule 5: composite score above the scale-up threshold.
pub struct CompositeScaleUp;

impl ScaleRule for CompositeScaleUp {
    fn name(&self) -> &'static str {
        "composite_scale_up"
    }

    fn evaluate(&self, ctx: &DecisionContext<'_>) -> Option<RuleOutcome> {
        let score = ctx.score.filter(|s| s.verdict == ScoreVerdict::ScaleUp)?;
        if ctx.sample_count < MIN_DECISION_SAMPLES {
            return None;
        }
        if !ctx.ledger.permits(ActionScope::ReplicaUp, ctx.now) {
            return None;
        }

        let target = (ctx.current_replicas + ctx.config.up_step).min(ctx.config.max_replicas);
        if target == ctx.current_replicas {
            return None;
        }

        Some(RuleOutcome {
            intent: up_intent(
                ctx,
                target,
                format!("composite score {:.2} above threshold", score.composite),
                Severity::Warning,
            ),
            scope: ActionScope::ReplicaUp,
        })
    }
}

/// Rule 6: composite score below the scale-down threshold, with no backlog
/// pressure and the backlog signal actually known.
pub struct CompositeScaleDown;

impl ScaleRule for CompositeScaleDown {
    fn name(&self) -> &'static str {
        "composite_scale_down"
    }

    fn evaluate(&self, ctx: &DecisionContext<'_>) -> Option<RuleOutcome> {
        let score = ctx.score.filter(|s| s.verdict == ScoreVerdict::ScaleDown)?;
        if ctx.sample_count < MIN_DECISION_SAMPLES {
            return None;
        }
        if ctx.current_replicas <= ctx.config.min_replicas {
            return None;
        }
        // An unknown backlog must not read as an empty one.
        let Some(state) = ctx.backlog.state() else {
            return None;
        };
        if state.is_pressuring(
            ctx.config.backlog_size_threshold,
            ctx.config.backlog_age_threshold_s,
        ) {
            return None;
        }
        if !ctx.ledger.permits(ActionScope::ReplicaDown, ctx.now) {
            return None;
        }

        let target = ctx
            .current_replicas
            .saturating_sub(ctx.config.down_step)
            .max(ctx.config.min_replicas);

        Some(RuleOutcome {
            intent: ReplicaIntent {
                target_replicas: target,
                reason: format!("composite score {:.2} below threshold", score.composite),
                generated_at: ctx.now,
                severity: Severity::Normal,
            },
            scope: ActionScope::ReplicaDown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BacklogState;
    use crate::scorer::Scorer;
    use crate::window::{MetricsWindow, Stats};

    fn stats(cpu: f64, lat: f64, err: f64) -> Stats {
        let mut window = MetricsWindow::new(600, 600);
        for ts in 0..30 {
            window
                .insert(crate::models::MetricSample {
                    timestamp: ts,
                    cpu_pct: cpu,
                    latency_p95_ms: lat,
                    latency_p99_ms: lat * 1.5,
                    error_rate_pct: err,
                    severity: Severity::Normal,
                    source: None,
                })
                .unwrap();
        }
        window.snapshot(30)
    }

    struct Fixture {
        config: PulseConfig,
        ledger: CooldownLedger,
        backlog: BacklogSignal,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                config: PulseConfig::default(),
                ledger: CooldownLedger::new(),
                backlog: BacklogSignal::Fresh(BacklogState {
                    size: 0,
                    oldest_age_s: 0.0,
                    growth_rate_per_s: Some(0.0),
                    growth_streak: 0,
                }),
            }
        }

        fn ctx(&self, current: u32, severity: Severity, s: &Stats) -> DecisionContext<'_> {
            let scorer = Scorer::new(&self.config);
            DecisionContext {
                now: 1_000,
                current_replicas: current,
                sample_count: s.count,
                severity,
                oom: None,
                score: scorer.score(s),
                spike: scorer.spike(s),
                backlog: &self.backlog,
                ledger: &self.ledger,
                config: &self.config,
            }
        }
    }

    #[test]
    fn critical_severity_doubles_replicas() {
        let fixture = Fixture::new();
        let s = stats(40.0, 120.0, 0.2);
        let ctx = fixture.ctx(5, Severity::Critical, &s);

        let outcome = CriticalBypass.evaluate(&ctx).unwrap();
        assert_eq!(outcome.intent.target_replicas, 10);
        assert_eq!(outcome.scope, ActionScope::Critical);
    }

    #[test]
    fn critical_respects_its_own_cooldown() {
        let mut fixture = Fixture::new();
        fixture.ledger.record(ActionScope::Critical, 990, 30);
        let s = stats(40.0, 120.0, 0.2);
        let ctx = fixture.ctx(5, Severity::Critical, &s);

        assert!(CriticalBypass.evaluate(&ctx).is_none());
    }

    #[test]
    fn critical_clamps_to_max() {
        let mut fixture = Fixture::new();
        fixture.config.max_replicas = 8;
        let s = stats(40.0, 120.0, 0.2);
        let ctx = fixture.ctx(5, Severity::Critical, &s);

        let outcome = CriticalBypass.evaluate(&ctx).unwrap();
        assert_eq!(outcome.intent.target_replicas, 8);
    }

    #[test]
    fn oom_doubles_replicas() {
        let fixture = Fixture::new();
        let s = stats(40.0, 120.0, 0.2);
        let mut ctx = fixture.ctx(4, Severity::Normal, &s);
        ctx.oom = Some("workload-2".to_string());

        let outcome = OomResponse.evaluate(&ctx).unwrap();
        assert_eq!(outcome.intent.target_replicas, 8);
        assert_eq!(outcome.scope, ActionScope::ReplicaUp);
        assert!(outcome.intent.reason.contains("workload-2"));
    }

    #[test]
    fn oom_respects_replica_up_cooldown() {
        let mut fixture = Fixture::new();
        fixture.ledger.record(ActionScope::ReplicaUp, 900, 180);
        let s = stats(40.0, 120.0, 0.2);
        let mut ctx = fixture.ctx(4, Severity::Normal, &s);
        ctx.oom = Some("workload-2".to_string());

        assert!(OomResponse.evaluate(&ctx).is_none());
    }

    #[test]
    fn oom_at_max_replicas_passes() {
        let mut fixture = Fixture::new();
        fixture.config.max_replicas = 4;
        let s = stats(40.0, 120.0, 0.2);
        let mut ctx = fixture.ctx(4, Severity::Normal, &s);
        ctx.oom = Some("workload-2".to_string());

        assert!(OomResponse.evaluate(&ctx).is_none());
    }

    #[test]
    fn backlog_age_triggers_step_regardless_of_score() {
        let mut fixture = Fixture::new();
        fixture.backlog = BacklogSignal::Fresh(BacklogState {
            size: 50_000,
            oldest_age_s: 120.0,
            growth_rate_per_s: Some(10.0),
            growth_streak: 3,
        });
        let s = stats(20.0, 50.0, 0.0);
        let ctx = fixture.ctx(4, Severity::Normal, &s);

        let outcome = BacklogOverride.evaluate(&ctx).unwrap();
        assert_eq!(outcome.intent.target_replicas, 5); // 4 + ceil(4/4)
        assert_eq!(outcome.scope, ActionScope::ReplicaUp);
    }

    #[test]
    fn backlog_respects_replica_up_cooldown() {
        let mut fixture = Fixture::new();
        fixture.backlog = BacklogSignal::Fresh(BacklogState {
            size: 50_000,
            oldest_age_s: 120.0,
            growth_rate_per_s: Some(10.0),
            growth_streak: 3,
        });
        fixture.ledger.record(ActionScope::ReplicaUp, 900, 180);
        let s = stats(20.0, 50.0, 0.0);
        let ctx = fixture.ctx(4, Severity::Normal, &s);

        assert!(BacklogOverride.evaluate(&ctx).is_none());
    }

    #[test]
    fn composite_up_uses_configured_step() {
        let fixture = Fixture::new();
        let s = stats(90.0, 450.0, 0.5);
        let ctx = fixture.ctx(4, Severity::Normal, &s);

        let outcome = CompositeScaleUp.evaluate(&ctx).unwrap();
        assert_eq!(outcome.intent.target_replicas, 6);
    }

    #[test]
    fn composite_up_below_threshold_passes() {
        let fixture = Fixture::new();
        let s = stats(85.0, 450.0, 0.5);
        let ctx = fixture.ctx(4, Severity::Normal, &s);

        assert!(CompositeScaleUp.evaluate(&ctx).is_none());
    }

    #[test]
    fn composite_down_blocked_at_min_replicas() {
        let fixture = Fixture::new();
        let s = stats(20.0, 50.0, 0.1);
        let ctx = fixture.ctx(2, Severity::Normal, &s);

        assert!(CompositeScaleDown.evaluate(&ctx).is_none());
    }

    #[test]
    fn composite_down_steps_toward_min() {
        let fixture = Fixture::new();
        let s = stats(20.0, 50.0, 0.1);
        let ctx = fixture.ctx(5, Severity::Normal, &s);

        let outcome = CompositeScaleDown.evaluate(&ctx).unwrap();
        assert_eq!(outcome.intent.target_replicas, 4);
        assert_eq!(outcome.scope, ActionScope::ReplicaDown);
    }

    #[test]
    fn composite_down_blocked_by_unknown_backlog() {
        let mut fixture = Fixture::new();
        fixture.backlog = BacklogSignal::Unknown;
        let s = stats(20.0, 50.0, 0.1);
        let ctx = fixture.ctx(5, Severity::Normal, &s);

        assert!(CompositeScaleDown.evaluate(&ctx).is_none());
    }

    #[test]
    fn composite_down_blocked_by_backlog_pressure() {
        let mut fixture = Fixture::new();
        fixture.backlog = BacklogSignal::Fresh(BacklogState {
            size: 5_000,
            oldest_age_s: 0.0,
            growth_rate_per_s: Some(0.0),
            growth_streak: 0,
        });
        let s = stats(20.0, 50.0, 0.1);
        let ctx = fixture.ctx(5, Severity::Normal, &s);

        assert!(CompositeScaleDown.evaluate(&ctx).is_none());
    }
}
