//! Sliding-window metrics store
//!
//! Holds recent metric samples bounded by both age and capacity, and derives
//! the statistics the scorer consumes: per-field means, medians and
//! percentiles, a CPU trend, and the recent/baseline reference windows used
//! for spike detection.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::error::WindowError;
use crate::models::MetricSample;

/// Allowed backwards skew within one source stream, in seconds.
const DEFAULT_SKEW_SECS: i64 = 2;

/// Span of the recent reference window, in seconds.
const RECENT_WINDOW_SECS: i64 = 30;

/// Span of the baseline reference window (excluding the recent span).
const BASELINE_WINDOW_SECS: i64 = 300;

/// Samples fed to the trend regression.
const TREND_SAMPLES: usize = 20;

/// Minimum window size for regression-based trend; below this the trend
/// falls back to a quarter-over-rest mean difference.
const TREND_REGRESSION_MIN: usize = 10;

/// Summary statistics for one numeric field.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FieldSummary {
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

/// Mean CPU over one reference window.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WindowRef {
    pub mean_cpu: f64,
    pub count: usize,
}

/// Statistics derived from one window snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub count: usize,
    pub cpu: FieldSummary,
    pub latency_p95: FieldSummary,
    pub latency_p99: FieldSummary,
    pub error_rate: FieldSummary,
    /// CPU slope in percentage points per second
    pub cpu_trend: f64,
    /// Last 30 s of CPU observations
    pub recent: WindowRef,
    /// The 300 s before the recent window
    pub baseline: WindowRef,
}

/// Bounded buffer of samples ordered by timestamp.
#[derive(Debug)]
pub struct MetricsWindow {
    samples: VecDeque<MetricSample>,
    window_secs: u64,
    max_samples: usize,
    skew_secs: i64,
    /// Newest accepted timestamp per source stream
    stream_heads: HashMap<String, i64>,
}

impl MetricsWindow {
    pub fn new(window_secs: u64, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples.min(1024)),
            window_secs,
            max_samples,
            skew_secs: DEFAULT_SKEW_SECS,
            stream_heads: HashMap::new(),
        }
    }

    /// Override the accepted out-of-order skew.
    pub fn with_skew(mut self, skew_secs: i64) -> Self {
        self.skew_secs = skew_secs;
        self
    }

    /// Insert a sample, rejecting it if it is behind its source stream by
    /// more than the allowed skew. Amortized O(1).
    pub fn insert(&mut self, sample: MetricSample) -> Result<(), WindowError> {
        let stream = sample.source.clone().unwrap_or_default();
        if let Some(head) = self.stream_heads.get(&stream) {
            let behind = head - sample.timestamp;
            if behind > self.skew_secs {
                return Err(WindowError::StaleSample {
                    behind_s: behind,
                    skew_s: self.skew_secs,
                });
            }
        }
        self.stream_heads
            .entry(stream)
            .and_modify(|head| *head = (*head).max(sample.timestamp))
            .or_insert(sample.timestamp);

        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        // Keep the buffer ordered under small cross-source skew.
        let pos = self
            .samples
            .iter()
            .rposition(|s| s.timestamp <= sample.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.samples.insert(pos, sample);
        Ok(())
    }

    /// Evict samples older than the window span.
    pub fn trim(&mut self, now: i64) {
        let cutoff = now - self.window_secs as i64;
        while let Some(front) = self.samples.front() {
            if front.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Compute statistics over the current window contents.
    ///
    /// O(n log n) in window size; the window is bounded so a per-snapshot
    /// sort is acceptable.
    pub fn snapshot(&self, now: i64) -> Stats {
        if self.samples.is_empty() {
            return Stats::default();
        }

        let cpu: Vec<f64> = self.samples.iter().map(|s| s.cpu_pct).collect();
        let lat95: Vec<f64> = self.samples.iter().map(|s| s.latency_p95_ms).collect();
        let lat99: Vec<f64> = self.samples.iter().map(|s| s.latency_p99_ms).collect();
        let errs: Vec<f64> = self.samples.iter().map(|s| s.error_rate_pct).collect();

        let recent_cutoff = now - RECENT_WINDOW_SECS;
        let baseline_cutoff = recent_cutoff - BASELINE_WINDOW_SECS;
        let mut recent = (0.0, 0usize);
        let mut baseline = (0.0, 0usize);
        for s in &self.samples {
            if s.timestamp >= recent_cutoff {
                recent.0 += s.cpu_pct;
                recent.1 += 1;
            } else if s.timestamp >= baseline_cutoff {
                baseline.0 += s.cpu_pct;
                baseline.1 += 1;
            }
        }

        Stats {
            count: self.samples.len(),
            cpu: summarize(&cpu),
            latency_p95: summarize(&lat95),
            latency_p99: summarize(&lat99),
            error_rate: summarize(&errs),
            cpu_trend: self.cpu_trend(),
            recent: window_ref(recent),
            baseline: window_ref(baseline),
        }
    }

    /// CPU trend over the newest samples.
    fn cpu_trend(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        if n >= TREND_REGRESSION_MIN {
            let tail: Vec<(i64, f64)> = self
                .samples
                .iter()
                .skip(n.saturating_sub(TREND_SAMPLES))
                .map(|s| (s.timestamp, s.cpu_pct))
                .collect();
            regression_slope(&tail)
        } else {
            // Mean of the newest quarter minus mean of the rest.
            let quarter = (n / 4).max(1);
            let split = n - quarter;
            let older: f64 =
                self.samples.iter().take(split).map(|s| s.cpu_pct).sum::<f64>() / split as f64;
            let newer: f64 =
                self.samples.iter().skip(split).map(|s| s.cpu_pct).sum::<f64>() / quarter as f64;
            newer - older
        }
    }
}

fn window_ref((sum, count): (f64, usize)) -> WindowRef {
    WindowRef {
        mean_cpu: if count == 0 { 0.0 } else { sum / count as f64 },
        count,
    }
}

/// Least-squares slope of value over time, per second.
fn regression_slope(points: &[(i64, f64)]) -> f64 {
    let n = points.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let t0 = points[0].0 as f64;

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (ts, v) in points {
        let x = *ts as f64 - t0;
        sum_x += x;
        sum_y += v;
        sum_xy += x * v;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Summary over one field's values.
fn summarize(values: &[f64]) -> FieldSummary {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;

    FieldSummary {
        mean,
        median: percentile(&sorted, 50.0),
        p90: percentile(&sorted, 90.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        min: sorted[0],
        max: sorted[n - 1],
    }
}

/// Percentile over pre-sorted values: nearest rank with linear
/// interpolation between neighbors. Below 10 observations the p99 collapses
/// to the maximum; a single observation answers every percentile.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n if n < 10 && p >= 99.0 => sorted[n - 1],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            if lower == upper {
                sorted[lower]
            } else {
                let frac = rank - lower as f64;
                sorted[lower] + (sorted[upper] - sorted[lower]) * frac
            }
        }
    }
}
