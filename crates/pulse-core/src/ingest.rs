//! Bus ingestion
//!
//! Decodes raw metric messages from the bus transport into samples for the
//! orchestrator. Malformed payloads are counted and dropped; the transport
//! acknowledges them either way so a poison message cannot wedge the
//! subscription.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::models::{BusMessage, MetricSample};
use crate::observability::PulseMetrics;

/// Decode one bus payload into a sample, stamping `received_at` when the
/// publisher sent no timestamp.
pub fn decode(payload: &[u8], received_at: i64) -> Result<MetricSample, serde_json::Error> {
    let message: BusMessage = serde_json::from_slice(payload)?;
    Ok(message.into_sample(received_at))
}

/// Background pump: raw payloads in, decoded samples out.
pub async fn run(
    mut raw_rx: mpsc::Receiver<Vec<u8>>,
    sample_tx: mpsc::Sender<MetricSample>,
    metrics: PulseMetrics,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("Starting bus ingestion");
    loop {
        tokio::select! {
            payload = raw_rx.recv() => {
                let Some(payload) = payload else {
                    info!("Bus channel closed, stopping ingestion");
                    break;
                };
                let received_at = chrono::Utc::now().timestamp();
                match decode(&payload, received_at) {
                    Ok(sample) => {
                        if sample_tx.send(sample).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        metrics.inc_malformed_messages();
                        debug!(error = %err, bytes = payload.len(), "Malformed bus message");
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Shutting down bus ingestion");
                break;
            }
        }
    }
}

/// Drain every queued sample without blocking. Used by the orchestrator at
/// the top of each tick.
pub fn drain_pending(rx: &mut mpsc::Receiver<MetricSample>) -> Vec<MetricSample> {
    let mut samples = Vec::new();
    while let Ok(sample) = rx.try_recv() {
        samples.push(sample);
    }
    if samples.len() > 256 {
        warn!(count = samples.len(), "Large ingest batch in one tick");
    }
    samples
}
