//! Composite scoring and spike detection
//!
//! Blends normalized CPU, latency, and error-rate indicators into one
//! score, and compares the recent CPU window against the longer baseline
//! to catch spikes that a 5-minute average would smooth away.

use serde::Serialize;

use crate::config::PulseConfig;
use crate::window::Stats;

/// Ceiling applied to each normalized indicator.
const NORM_CEILING: f64 = 3.0;

/// Floor for the baseline mean, so an idle baseline cannot produce an
/// unbounded spike ratio.
const BASELINE_FLOOR: f64 = 1e-3;

/// Minimum samples in the recent window before a spike may be declared.
const MIN_SPIKE_SAMPLES: usize = 3;

/// Verdict derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreVerdict {
    Critical,
    ScaleUp,
    ScaleDown,
    Hold,
}

/// Composite score with its per-indicator components.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoreBreakdown {
    pub composite: f64,
    pub cpu_norm: f64,
    pub latency_norm: f64,
    pub error_norm: f64,
    pub verdict: ScoreVerdict,
}

/// Spike comparison of the recent window against the baseline.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SpikeVerdict {
    pub ratio: f64,
    pub recent_mean: f64,
    pub baseline_mean: f64,
    pub spiking: bool,
}

/// Scoring weights and thresholds, fixed at construction.
#[derive(Debug, Clone)]
pub struct Scorer {
    w_cpu: f64,
    w_lat: f64,
    w_err: f64,
    cpu_target: f64,
    latency_target_ms: f64,
    error_target_pct: f64,
    scale_up_score: f64,
    scale_down_score: f64,
    critical_score: f64,
    spike_ratio: f64,
}

impl Scorer {
    pub fn new(config: &PulseConfig) -> Self {
        Self {
            w_cpu: config.w_cpu,
            w_lat: config.w_lat,
            w_err: config.w_err,
            cpu_target: config.cpu_target,
            latency_target_ms: config.latency_target_ms,
            error_target_pct: config.error_target_pct,
            scale_up_score: config.scale_up_score,
            scale_down_score: config.scale_down_score,
            critical_score: config.critical_score,
            spike_ratio: config.spike_ratio,
        }
    }

    /// Composite score from a window snapshot. `None` when the window holds
    /// no samples; an unknown signal must not score as zero load.
    pub fn score(&self, stats: &Stats) -> Option<ScoreBreakdown> {
        if stats.count == 0 {
            return None;
        }

        let cpu_norm = norm(stats.cpu.p95, self.cpu_target);
        let latency_norm = norm(stats.latency_p95.mean, self.latency_target_ms);
        let error_norm = norm(stats.error_rate.mean, self.error_target_pct);
        let composite = self.w_cpu * cpu_norm + self.w_lat * latency_norm + self.w_err * error_norm;

        let verdict = if composite >= self.critical_score {
            ScoreVerdict::Critical
        } else if composite >= self.scale_up_score {
            ScoreVerdict::ScaleUp
        } else if composite <= self.scale_down_score {
            ScoreVerdict::ScaleDown
        } else {
            ScoreVerdict::Hold
        };

        Some(ScoreBreakdown {
            composite,
            cpu_norm,
            latency_norm,
            error_norm,
            verdict,
        })
    }

    /// Spike check: recent mean against baseline mean. `None` when either
    /// reference window is too thin to compare.
    pub fn spike(&self, stats: &Stats) -> Option<SpikeVerdict> {
        if stats.recent.count < MIN_SPIKE_SAMPLES || stats.baseline.count == 0 {
            return None;
        }
        let recent_mean = stats.recent.mean_cpu;
        let baseline_mean = stats.baseline.mean_cpu;
        let ratio = recent_mean / baseline_mean.max(BASELINE_FLOOR);

        Some(SpikeVerdict {
            ratio,
            recent_mean,
            baseline_mean,
            spiking: ratio >= self.spike_ratio,
        })
    }
}

/// Normalize a reading against its target, clamped to `[0, 3]`.
fn norm(value: f64, target: f64) -> f64 {
    if target <= 0.0 {
        return 0.0;
    }
    (value / target).clamp(0.0, NORM_CEILING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricSample, Severity};
    use crate::window::MetricsWindow;

    fn filled_window(count: usize, cpu: f64, lat95: f64, err: f64) -> MetricsWindow {
        let mut window = MetricsWindow::new(600, 600);
        for ts in 0..count as i64 {
            window
                .insert(MetricSample {
                    timestamp: ts,
                    cpu_pct: cpu,
                    latency_p95_ms: lat95,
                    latency_p99_ms: lat95 * 1.5,
                    error_rate_pct: err,
                    severity: Severity::Normal,
                    source: None,
                })
                .unwrap();
        }
        window
    }

    #[test]
    fn steady_state_scores_below_hold_band() {
        // 60 samples at cpu=40, p95=120ms, err=0.2 → score ≈ 0.428
        let scorer = Scorer::new(&PulseConfig::default());
        let stats = filled_window(60, 40.0, 120.0, 0.2).snapshot(60);

        let breakdown = scorer.score(&stats).unwrap();
        assert!((breakdown.composite - 0.428).abs() < 0.01);
        assert_eq!(breakdown.verdict, ScoreVerdict::ScaleDown);
    }

    #[test]
    fn borderline_load_crosses_threshold_with_cpu() {
        let scorer = Scorer::new(&PulseConfig::default());

        let below = filled_window(60, 85.0, 450.0, 0.5).snapshot(60);
        let breakdown = scorer.score(&below).unwrap();
        assert!(breakdown.composite < 1.2);
        assert_eq!(breakdown.verdict, ScoreVerdict::Hold);

        let above = filled_window(60, 90.0, 450.0, 0.5).snapshot(60);
        let breakdown = scorer.score(&above).unwrap();
        assert!(breakdown.composite >= 1.2);
        assert_eq!(breakdown.verdict, ScoreVerdict::ScaleUp);
    }

    #[test]
    fn saturated_load_is_critical() {
        let scorer = Scorer::new(&PulseConfig::default());
        let stats = filled_window(60, 210.0, 900.0, 3.0).snapshot(60);

        let breakdown = scorer.score(&stats).unwrap();
        assert_eq!(breakdown.verdict, ScoreVerdict::Critical);
    }

    #[test]
    fn indicators_clamp_at_three() {
        let scorer = Scorer::new(&PulseConfig::default());
        // CPU at 10x target still clamps to 3.0.
        let stats = filled_window(60, 700.0, 100.0, 0.0).snapshot(60);
        assert_eq!(scorer.score(&stats).unwrap().cpu_norm, 3.0);
    }

    #[test]
    fn empty_window_is_unknown_not_zero() {
        let scorer = Scorer::new(&PulseConfig::default());
        let stats = MetricsWindow::new(300, 600).snapshot(0);
        assert!(scorer.score(&stats).is_none());
    }

    #[test]
    fn spike_detected_without_high_average() {
        let scorer = Scorer::new(&PulseConfig::default());
        let mut window = MetricsWindow::new(600, 600);
        for ts in 0..300 {
            window
                .insert(MetricSample {
                    timestamp: ts,
                    cpu_pct: 30.0,
                    latency_p95_ms: 100.0,
                    latency_p99_ms: 150.0,
                    error_rate_pct: 0.1,
                    severity: Severity::Normal,
                    source: None,
                })
                .unwrap();
        }
        for ts in 300..330 {
            window
                .insert(MetricSample {
                    timestamp: ts,
                    cpu_pct: 80.0,
                    latency_p95_ms: 100.0,
                    latency_p99_ms: 150.0,
                    error_rate_pct: 0.1,
                    severity: Severity::Normal,
                    source: None,
                })
                .unwrap();
        }

        let stats = window.snapshot(329);
        let spike = scorer.spike(&stats).unwrap();
        assert!(spike.ratio > 2.0);
        assert!(spike.spiking);
    }

    #[test]
    fn spike_needs_three_recent_samples() {
        let scorer = Scorer::new(&PulseConfig::default());
        let mut window = MetricsWindow::new(600, 600);
        for ts in 0..100 {
            window
                .insert(MetricSample {
                    timestamp: ts,
                    cpu_pct: 30.0,
                    latency_p95_ms: 100.0,
                    latency_p99_ms: 150.0,
                    error_rate_pct: 0.1,
                    severity: Severity::Normal,
                    source: None,
                })
                .unwrap();
        }
        // Only two samples land inside the recent 30s.
        for ts in [300, 310] {
            window
                .insert(MetricSample {
                    timestamp: ts,
                    cpu_pct: 90.0,
                    latency_p95_ms: 100.0,
                    latency_p99_ms: 150.0,
                    error_rate_pct: 0.1,
                    severity: Severity::Normal,
                    source: None,
                })
                .unwrap();
        }
        assert!(scorer.spike(&window.snapshot(315)).is_none());
    }

    #[test]
    fn score_is_deterministic() {
        let scorer = Scorer::new(&PulseConfig::default());
        let stats = filled_window(60, 55.0, 220.0, 0.4).snapshot(60);

        let a = scorer.score(&stats).unwrap();
        let b = scorer.score(&stats).unwrap();
        assert_eq!(a.composite, b.composite);
        assert_eq!(a.verdict, b.verdict);
    }
}
