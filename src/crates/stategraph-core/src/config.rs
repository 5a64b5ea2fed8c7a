//! Run configuration.
//!
//! A [`RunConfig`] is an explicit context object handed to each run; there
//! is no ambient global registry. It can be built in code or loaded from a
//! YAML file.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default super-step bound. Cyclic graphs that exceed it fail with a
/// recursion-limit error rather than looping forever.
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

fn default_recursion_limit() -> usize {
    DEFAULT_RECURSION_LIMIT
}

/// Options for one run of a compiled graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Identifier scoping the run's checkpoint lineage. Required when a
    /// checkpointer is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Maximum number of super-steps before the run fails
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,

    /// Cap on concurrent node invocations within one super-step.
    /// Unset means all active nodes run at once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<usize>,

    /// Resume or fork from this checkpoint instead of the thread's latest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,

    /// Payload surfaced to the interrupted node on resume, under the
    /// `__resume__` key of its state view
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_value: Option<serde_json::Value>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            thread_id: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            concurrency_limit: None,
            checkpoint_id: None,
            resume_value: None,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_resume_value(mut self, value: serde_json::Value) -> Self {
        self.resume_value = Some(value);
        self
    }

    /// Load from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GraphError::Configuration(format!("invalid run config: {}", e)))
    }

    /// Load from a YAML file on disk.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GraphError::Configuration(format!(
                "cannot read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.recursion_limit, DEFAULT_RECURSION_LIMIT);
        assert!(config.thread_id.is_none());
        assert!(config.concurrency_limit.is_none());
    }

    #[test]
    fn test_from_yaml() {
        let config = RunConfig::from_yaml(
            "thread_id: session-1\nrecursion_limit: 50\nconcurrency_limit: 4\n",
        )
        .unwrap();
        assert_eq!(config.thread_id.as_deref(), Some("session-1"));
        assert_eq!(config.recursion_limit, 50);
        assert_eq!(config.concurrency_limit, Some(4));
    }

    #[test]
    fn test_from_yaml_applies_default_limit() {
        let config = RunConfig::from_yaml("thread_id: t\n").unwrap();
        assert_eq!(config.recursion_limit, DEFAULT_RECURSION_LIMIT);
    }

    #[test]
    fn test_invalid_yaml_is_configuration_error() {
        let err = RunConfig::from_yaml(": not yaml").unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
    }
}
