//! Daemon configuration

use anyhow::Result;
use serde::Deserialize;

/// Daemon-level settings; engine tunables live in `PulseConfig`.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Optional engine config file (TOML/YAML/JSON)
    #[serde(default)]
    pub config_file: Option<String>,

    /// Simulated cluster sizing for the bundled in-memory backend
    #[serde(default = "default_sim_nodes")]
    pub sim_nodes: u32,
    #[serde(default = "default_sim_replicas")]
    pub sim_replicas: u32,
}

fn default_api_port() -> u16 {
    8080
}

fn default_sim_nodes() -> u32 {
    3
}

fn default_sim_replicas() -> u32 {
    2
}

impl DaemonConfig {
    /// Load configuration from environment (prefix `PULSED_`).
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PULSED"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| DaemonConfig {
            api_port: default_api_port(),
            config_file: None,
            sim_nodes: default_sim_nodes(),
            sim_replicas: default_sim_replicas(),
        }))
    }
}
