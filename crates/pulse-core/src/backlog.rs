//! Queue backlog probe
//!
//! Polls the monitoring API for queue depth and oldest-message age at a
//! fixed cadence, derives the growth rate from adjacent depth samples, and
//! publishes a `BacklogSignal` snapshot for the decision loop. While the
//! API is unreachable the last known state is served with a stale flag;
//! past `max_stale_intervals` the signal degrades to `Unknown`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::cluster::{with_deadline, MonitoringApi, DEFAULT_DEADLINE};
use crate::config::PulseConfig;
use crate::models::{BacklogSignal, BacklogState};

/// Monitoring series for undelivered message count.
const DEPTH_METRIC: &str = "subscription/num_undelivered_messages";

/// Monitoring series for oldest unacknowledged message age (seconds).
const OLDEST_AGE_METRIC: &str = "subscription/oldest_unacked_message_age";

/// Lookback passed to the monitoring API per fetch.
const FETCH_LOOKBACK: Duration = Duration::from_secs(300);

/// Polls queue metrics and tracks backlog growth.
pub struct BacklogProbe {
    monitoring: Arc<dyn MonitoringApi>,
    poll_interval: Duration,
    max_stale_intervals: u32,
    /// Previous depth observation for growth derivation
    prev_depth: Option<(i64, u64)>,
    growth_streak: u32,
    last_known: Option<BacklogState>,
    stale_intervals: u32,
}

impl BacklogProbe {
    pub fn new(monitoring: Arc<dyn MonitoringApi>, config: &PulseConfig) -> Self {
        Self {
            monitoring,
            poll_interval: Duration::from_secs(config.backlog_interval_secs),
            max_stale_intervals: config.max_stale_intervals,
            prev_depth: None,
            growth_streak: 0,
            last_known: None,
            stale_intervals: 0,
        }
    }

    /// One probe cycle.
    pub async fn poll_once(&mut self) -> BacklogSignal {
        let depth = self.fetch_latest(DEPTH_METRIC).await;
        let age = self.fetch_latest(OLDEST_AGE_METRIC).await;

        let (Some((depth_ts, depth_value)), Some((_, age_value))) = (depth, age) else {
            return self.degrade();
        };
        self.stale_intervals = 0;

        let size = depth_value.max(0.0) as u64;
        let growth_rate = self.prev_depth.and_then(|(prev_ts, prev_size)| {
            let elapsed = depth_ts - prev_ts;
            if elapsed <= 0 {
                None
            } else {
                Some((size as f64 - prev_size as f64) / elapsed as f64)
            }
        });
        if growth_rate.is_some_and(|r| r > 0.0) {
            self.growth_streak += 1;
        } else if growth_rate.is_some() {
            self.growth_streak = 0;
        }
        self.prev_depth = Some((depth_ts, size));

        let state = BacklogState {
            size,
            oldest_age_s: age_value.max(0.0),
            growth_rate_per_s: growth_rate,
            growth_streak: self.growth_streak,
        };
        debug!(
            size = state.size,
            oldest_age_s = state.oldest_age_s,
            growth_rate = ?state.growth_rate_per_s,
            "Backlog probed"
        );
        self.last_known = Some(state.clone());
        BacklogSignal::Fresh(state)
    }

    /// Latest point of one series, or `None` when the fetch failed or the
    /// series is empty.
    async fn fetch_latest(&self, metric: &str) -> Option<(i64, f64)> {
        let fetch = self.monitoring.fetch(metric, FETCH_LOOKBACK);
        match with_deadline(DEFAULT_DEADLINE, fetch).await {
            Ok(points) => points.into_iter().max_by_key(|(ts, _)| *ts),
            Err(err) => {
                warn!(metric, error = %err, "Backlog metric fetch failed");
                None
            }
        }
    }

    /// Serve the last known state while within the staleness budget.
    fn degrade(&mut self) -> BacklogSignal {
        self.stale_intervals += 1;
        match (&self.last_known, self.stale_intervals <= self.max_stale_intervals) {
            (Some(state), true) => BacklogSignal::Stale(state.clone()),
            _ => BacklogSignal::Unknown,
        }
    }

    /// Background worker: probe on a timer, publish snapshots, stop on
    /// shutdown.
    pub async fn run(
        mut self,
        tx: watch::Sender<BacklogSignal>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Starting backlog probe"
        );
        let mut ticker = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let signal = self.poll_once().await;
                    let _ = tx.send(signal);
                }
                _ = shutdown.recv() => {
                    info!("Shutting down backlog probe");
                    break;
                }
            }
        }
    }
}
