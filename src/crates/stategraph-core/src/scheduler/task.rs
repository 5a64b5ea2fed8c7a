//! Prepared work items for one super-step.

use crate::node::NodeExecutor;
use crate::retry::RetryPolicy;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// One node invocation scheduled for the current super-step.
///
/// Tasks are prepared in deterministic order (the order of the active set)
/// and their collected writes are merged in that same order, so the merged
/// state never depends on invocation completion timing.
#[derive(Clone)]
pub struct ExecutableTask {
    /// Unique id for this invocation, used to attribute buffered writes
    pub id: String,

    /// Node key being invoked
    pub node: String,

    /// Read-only state view handed to the invocable
    pub input: serde_json::Value,

    /// The invocable itself
    pub executor: Arc<dyn NodeExecutor>,

    /// Retry policy, if the node was declared retryable
    pub retry_policy: Option<RetryPolicy>,

    /// Position in the active set; fixes merge order
    pub order: usize,
}

impl ExecutableTask {
    pub fn new(
        node: impl Into<String>,
        input: serde_json::Value,
        executor: Arc<dyn NodeExecutor>,
        order: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node: node.into(),
            input,
            executor,
            retry_policy: None,
            order,
        }
    }

    pub fn with_retry_policy(mut self, policy: Option<RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }
}

impl Debug for ExecutableTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableTask")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("order", &self.order)
            .finish()
    }
}

/// The partial update a completed task produced, tagged with its source.
#[derive(Debug, Clone)]
pub struct TaskWrites {
    pub task_id: String,
    pub node: String,
    pub order: usize,
    /// Channel name to contribution, in the node's returned object
    pub writes: Vec<(String, serde_json::Value)>,
}
