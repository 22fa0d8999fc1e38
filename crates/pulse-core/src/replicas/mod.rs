//! Replica scaling
//!
//! The controller evaluates an ordered chain of rule objects; the first
//! rule to produce an intent wins. Applying an intent patches the target
//! deployment with conflict-aware retries. A crash-loop guard holds all
//! scaling while the workload itself is failing.

mod controller;
mod rules;

pub use controller::{ApplyOutcome, ReplicaController, ReplicaDecision};
pub use rules::{DecisionContext, ScaleRule, MIN_DECISION_SAMPLES};

use std::collections::HashMap;

use crate::cluster::PodView;

/// Waiting reason reported for crash-looping containers.
const CRASHLOOP_REASON: &str = "CrashLoopBackOff";

/// Workload health as judged from pod statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadHealth {
    Healthy,
    /// A pod has been observed crash-looping repeatedly; scaling would
    /// multiply the failure
    CrashLooping { pod: String, observations: u32 },
}

/// Counts repeated crash-loop observations per pod.
#[derive(Debug)]
pub struct CrashLoopGuard {
    threshold: u32,
    counts: HashMap<String, u32>,
}

impl CrashLoopGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            counts: HashMap::new(),
        }
    }

    /// Update counters from the current pod set and judge workload health.
    pub fn observe(&mut self, pods: &[PodView]) -> WorkloadHealth {
        let mut worst: Option<(String, u32)> = None;

        for pod in pods {
            let crashing = pod
                .containers
                .iter()
                .any(|c| c.waiting_reason.as_deref() == Some(CRASHLOOP_REASON));

            if crashing {
                let count = self.counts.entry(pod.name.clone()).or_insert(0);
                *count += 1;
                if *count >= self.threshold
                    && worst.as_ref().is_none_or(|(_, c)| *count > *c)
                {
                    worst = Some((pod.name.clone(), *count));
                }
            } else if pod.ready {
                self.counts.remove(&pod.name);
            }
        }
        self.counts.retain(|name, _| pods.iter().any(|p| &p.name == name));

        match worst {
            Some((pod, observations)) => WorkloadHealth::CrashLooping { pod, observations },
            None => WorkloadHealth::Healthy,
        }
    }
}
