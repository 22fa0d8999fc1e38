//! API client for communicating with the pulsed daemon

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// API client for the daemon's status surface
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// GET that tolerates non-2xx bodies (health endpoints return 503
    /// with a useful payload).
    pub async fn get_lenient<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;
        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub composite: f64,
    pub cpu_norm: f64,
    pub latency_norm: f64,
    pub error_norm: f64,
    pub verdict: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spike {
    pub ratio: f64,
    pub recent_mean: f64,
    pub baseline_mean: f64,
    pub spiking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backlog {
    pub freshness: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub oldest_age_s: Option<f64>,
    #[serde(default)]
    pub growth_rate_per_s: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHealthSummary {
    pub total: usize,
    pub ready: usize,
    pub capacity_loss: f64,
    #[serde(default)]
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    pub ready: bool,
    pub schedulable: bool,
    pub quarantined: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub ts: i64,
    pub kind: String,
    pub from: u32,
    pub to: u32,
    pub reason: String,
    pub severity: String,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub generated_at: i64,
    pub window_samples: usize,
    #[serde(default)]
    pub score: Option<Score>,
    #[serde(default)]
    pub spike: Option<Spike>,
    #[serde(default)]
    pub backlog: Option<Backlog>,
    #[serde(default)]
    pub node_health: Option<NodeHealthSummary>,
    #[serde(default)]
    pub current_replicas: Option<u32>,
    #[serde(default)]
    pub cooldowns_remaining: HashMap<String, i64>,
    #[serde(default)]
    pub recent_decisions: Vec<DecisionRecord>,
    #[serde(default)]
    pub last_failure: Option<DecisionRecord>,
    pub unsafe_to_optimize: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub components: HashMap<String, ComponentReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub ready: bool,
    #[serde(default)]
    pub reason: Option<String>,
}
