//! Decision history
//!
//! In-memory ring of control decisions kept for introspection. Retention is
//! bounded by both entry count and age; the store is deliberately small so
//! a persistent backend can replace it without touching callers.

use std::collections::VecDeque;

use crate::models::{Decision, DecisionKind};

/// Bounded decision history with age- and count-based eviction.
#[derive(Debug)]
pub struct DecisionLog {
    entries: VecDeque<Decision>,
    max_len: usize,
    retention_secs: u64,
}

impl DecisionLog {
    pub fn new(max_len: usize, retention_secs: u64) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_len.min(128)),
            max_len,
            retention_secs,
        }
    }

    /// Append a decision, evicting the oldest entry past capacity.
    pub fn push(&mut self, decision: Decision) {
        if self.entries.len() == self.max_len {
            self.entries.pop_front();
        }
        self.entries.push_back(decision);
    }

    /// Drop entries older than the retention horizon.
    pub fn trim(&mut self, now: i64) {
        let cutoff = now - self.retention_secs as i64;
        while let Some(front) = self.entries.front() {
            if front.ts < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Most recent `n` decisions, newest first.
    pub fn tail(&self, n: usize) -> Vec<Decision> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    /// Most recent failed decision, if any.
    pub fn last_failure(&self) -> Option<&Decision> {
        self.entries.iter().rev().find(|d| !d.success)
    }

    /// Most recent non-hold decision, if any.
    pub fn last_action(&self) -> Option<&Decision> {
        self.entries
            .iter()
            .rev()
            .find(|d| d.kind != DecisionKind::Hold)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
