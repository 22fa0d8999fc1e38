//! Replica controller
//!
//! `decide` walks the rule chain and returns the first proposal; `apply`
//! patches the deployment with refetch-on-conflict retries. Applying an
//! intent whose target matches the live replica count is a no-op, which
//! makes apply idempotent.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cluster::{retry_with_backoff, with_deadline, WorkloadApi, DEFAULT_DEADLINE};
use crate::config::PulseConfig;
use crate::cooldown::ActionScope;
use crate::error::ControlError;
use crate::models::ReplicaIntent;
use crate::replicas::rules::{default_rules, DecisionContext, ScaleRule};

/// Outcome of one decision pass.
#[derive(Debug, Clone)]
pub enum ReplicaDecision {
    Scale {
        intent: ReplicaIntent,
        scope: ActionScope,
        rule: &'static str,
    },
    Hold {
        reason: String,
    },
}

/// Result of applying an intent to the cluster.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub from: u32,
    pub to: u32,
    pub success: bool,
    pub error: Option<String>,
}

/// Decides and applies replica changes for one deployment.
pub struct ReplicaController {
    api: Arc<dyn WorkloadApi>,
    namespace: String,
    deployment: String,
    rules: Vec<Box<dyn ScaleRule>>,
}

impl ReplicaController {
    pub fn new(api: Arc<dyn WorkloadApi>, config: &PulseConfig) -> Self {
        Self {
            api,
            namespace: config.namespace.clone(),
            deployment: config.deployment.clone(),
            rules: default_rules(),
        }
    }

    /// Evaluate the rule chain; the first proposal wins.
    pub fn decide(&self, ctx: &DecisionContext<'_>) -> ReplicaDecision {
        for rule in &self.rules {
            if let Some(outcome) = rule.evaluate(ctx) {
                info!(
                    rule = rule.name(),
                    target = outcome.intent.target_replicas,
                    reason = %outcome.intent.reason,
                    "Scale rule fired"
                );
                return ReplicaDecision::Scale {
                    intent: outcome.intent,
                    scope: outcome.scope,
                    rule: rule.name(),
                };
            }
        }
        ReplicaDecision::Hold {
            reason: if ctx.sample_count < super::MIN_DECISION_SAMPLES {
                "insufficient data".to_string()
            } else {
                format!(
                    "score {:.2} within hold band",
                    ctx.score.map(|s| s.composite).unwrap_or_default()
                )
            },
        }
    }

    /// Patch the deployment to the intent's target.
    ///
    /// Refetches current state on every attempt so conflicts resolve
    /// against fresh data; repeating the same intent converges to the same
    /// cluster state.
    pub async fn apply(&self, intent: &ReplicaIntent) -> ApplyOutcome {
        let target = intent.target_replicas;
        let api = self.api.clone();
        let (namespace, name) = (self.namespace.clone(), self.deployment.clone());

        let result = retry_with_backoff("patch_replicas", || {
            let api = api.clone();
            let (namespace, name) = (namespace.clone(), name.clone());
            async move {
                let deployment = with_deadline(
                    DEFAULT_DEADLINE,
                    api.get_deployment(&namespace, &name),
                )
                .await?;
                if deployment.replicas == target {
                    return Ok(deployment.replicas);
                }
                with_deadline(
                    DEFAULT_DEADLINE,
                    api.patch_replicas(&namespace, &name, target),
                )
                .await?;
                Ok(deployment.replicas)
            }
        })
        .await;

        match result {
            Ok(from) => {
                if from != target {
                    info!(from, to = target, reason = %intent.reason, "Replicas patched");
                }
                ApplyOutcome {
                    from,
                    to: target,
                    success: true,
                    error: None,
                }
            }
            Err(err) => {
                warn!(error = %err, target, "Replica patch failed");
                ApplyOutcome {
                    from: target,
                    to: target,
                    success: false,
                    error: Some(format!("{}: {}", err.kind(), err)),
                }
            }
        }
    }

    /// Current replica count of the target deployment.
    pub async fn current_replicas(&self) -> Result<u32, ControlError> {
        let deployment = with_deadline(
            DEFAULT_DEADLINE,
            self.api.get_deployment(&self.namespace, &self.deployment),
        )
        .await?;
        Ok(deployment.replicas)
    }
}
