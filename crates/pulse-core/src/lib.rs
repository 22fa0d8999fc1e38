//! Core library for the Pulse autoscaling control plane
//!
//! This crate provides:
//! - Sliding-window metrics storage and derived statistics
//! - Composite scoring and spike detection
//! - Replica scaling with cooldowns, bypass, and backlog awareness
//! - Node health monitoring and node-pool scaling (cordon/drain/resize)
//! - OOM remediation via deployment memory-limit patches
//! - The orchestrator tick that binds them together

pub mod backlog;
pub mod cluster;
pub mod config;
pub mod cooldown;
pub mod decisions;
pub mod error;
pub mod health;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod nodes;
pub mod observability;
pub mod orchestrator;
pub mod replicas;
pub mod scorer;
pub mod window;

pub use config::PulseConfig;
pub use error::ControlError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControlLogger, PulseMetrics};
pub use orchestrator::{Orchestrator, OrchestratorInputs, StatusSnapshot};
