//! Error types for graph construction and execution.
//!
//! The taxonomy separates structural errors (caught at compile time, never
//! retried) from runtime contract violations (fatal to the run, with the
//! last checkpoint still valid for resumption) and backend failures.

use stategraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while building or running a graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Structural validation failure at compile time. Always names the
    /// offending node or channel key.
    #[error("invalid graph definition at '{key}': {message}")]
    GraphDefinition { key: String, message: String },

    /// A routing function returned a branch that was not declared when the
    /// conditional edge was registered. Never silently re-routed.
    #[error("router for node '{node}' returned undeclared branch '{branch}'")]
    InvalidRoute { node: String, branch: String },

    /// The super-step count reached the configured limit with work still
    /// pending. Signals a likely unintended cycle; never silently capped.
    #[error("recursion limit of {limit} super-steps reached without reaching the end of the graph")]
    RecursionLimit { limit: usize },

    /// A node's invocable failed, after exhausting its retry policy if one
    /// was configured.
    #[error("node '{node}' failed after {attempts} attempt(s): {message}")]
    NodeInvocation {
        node: String,
        attempts: usize,
        message: String,
    },

    /// Two runs targeted the same thread id at the same time. Rejected
    /// immediately, never queued.
    #[error("thread '{thread_id}' already has a run in flight")]
    ConcurrentThread { thread_id: String },

    /// A state update violated the schema (unknown channel, malformed
    /// partial update).
    #[error("invalid state update: {0}")]
    State(String),

    /// Persistence backend failure. Fatal: the engine never advances past
    /// an unpersisted super-step.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// State (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Run configuration problem (missing thread id for a checkpointed
    /// run, unparseable config file)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Custom error for node bodies
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Structural error helper, always citing the offending key.
    pub fn definition(key: impl Into<String>, message: impl Into<String>) -> Self {
        GraphError::GraphDefinition {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        GraphError::State(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_error_cites_key() {
        let err = GraphError::definition("worker", "edge targets unknown node");
        assert!(err.to_string().contains("'worker'"));
    }

    #[test]
    fn test_checkpoint_error_converts() {
        let source = CheckpointError::Storage("disk full".to_string());
        let err: GraphError = source.into();
        assert!(matches!(err, GraphError::Checkpoint(_)));
    }
}
