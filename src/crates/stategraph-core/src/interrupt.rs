//! Interrupt boundaries: pausing a run before or after designated nodes.
//!
//! An interrupt is not an error. When the scheduler reaches a configured
//! boundary it persists the checkpoint, transitions the run to the
//! interrupted state, and returns control to the caller with the paused
//! state intact. Resuming the same thread re-enters the loop from that
//! exact point; work that was already merged is never re-invoked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Whether the pause happens before invoking a node or after merging its
/// output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InterruptWhen {
    Before,
    After,
}

/// Which node keys the scheduler pauses around.
#[derive(Debug, Clone, Default)]
pub struct InterruptConfig {
    before: HashSet<String>,
    after: HashSet<String>,
}

impl InterruptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause before invoking any of these nodes.
    pub fn with_before(mut self, nodes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.before.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Pause after merging the output of any of these nodes.
    pub fn with_after(mut self, nodes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.after.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    /// Nodes of the upcoming active set that hit a pause-before boundary.
    pub fn matches_before<'a>(&self, active: &'a [String]) -> Vec<&'a String> {
        active.iter().filter(|node| self.before.contains(*node)).collect()
    }

    /// Nodes that just ran and hit a pause-after boundary.
    pub fn matches_after<'a>(&self, ran: &'a [String]) -> Vec<&'a String> {
        ran.iter().filter(|node| self.after.contains(*node)).collect()
    }
}

/// Details of a pause, surfaced to the caller in the run outcome and in
/// streamed events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterruptState {
    /// The boundary node that triggered the pause
    pub node: String,

    /// Before invocation or after merge
    pub when: InterruptWhen,

    /// Super-step at which the run paused
    pub step: i64,

    /// When the pause happened
    pub at: DateTime<Utc>,
}

impl InterruptState {
    pub fn new(node: impl Into<String>, when: InterruptWhen, step: i64) -> Self {
        Self {
            node: node.into(),
            when,
            step,
            at: Utc::now(),
        }
    }
}
