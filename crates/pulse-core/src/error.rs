//! Error taxonomy for control actions
//!
//! Every failure from an external surface is classified into one of five
//! kinds, each with a fixed handling policy:
//! - `Transient`: retry with bounded backoff
//! - `Conflict`: refetch and retry, bounded
//! - `Permission`: log and alert, never retry
//! - `InvariantViolation`: abort the current tick, never the process
//! - `ExternalUnknown`: treat the dependent signal as unknown, never as zero

use thiserror::Error;

/// Classified failure from a cluster, monitoring, or bus operation.
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("conflict on {resource}: {detail}")]
    Conflict { resource: String, detail: String },

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("external signal unavailable: {0}")]
    ExternalUnknown(String),
}

impl ControlError {
    /// Whether the operation may be retried at all.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControlError::Transient(_) | ControlError::Conflict { .. }
        )
    }

    /// Whether a retry should refetch current state first.
    pub fn needs_refetch(&self) -> bool {
        matches!(self, ControlError::Conflict { .. })
    }

    /// Short kind label for metrics and decision records.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::Transient(_) => "transient",
            ControlError::Conflict { .. } => "conflict",
            ControlError::Permission(_) => "permission",
            ControlError::InvariantViolation(_) => "invariant_violation",
            ControlError::ExternalUnknown(_) => "external_unknown",
        }
    }
}

/// Rejection reasons from the metrics window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    /// Sample timestamp is behind its source stream by more than the skew
    #[error("stale sample: {behind_s}s behind stream head (skew {skew_s}s)")]
    StaleSample { behind_s: i64, skew_s: i64 },
}
