//! Channels: named state slots with fixed update policies.
//!
//! Each channel in the schema owns one value and one way of absorbing
//! contributions. The scheduler hands every channel the ordered list of
//! contributions produced for it in a super-step, and the channel's policy
//! decides what the next value is:
//!
//! - [`LastValueChannel`] - overwrite; the last contribution in
//!   deterministic order wins
//! - [`TopicChannel`] - accumulate; contributions are appended in order to
//!   a sequence whose identity element is the empty sequence
//! - [`ReducerChannel`] - fold contributions into the current value with a
//!   registered binary operator
//!
//! A channel's policy is fixed for the lifetime of the schema. Nodes never
//! touch channels directly; they return partial updates and the scheduler
//! applies them here.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// Reducer function for [`ReducerChannel`]
pub type ReducerFn =
    Arc<dyn Fn(serde_json::Value, serde_json::Value) -> serde_json::Value + Send + Sync>;

/// One named slot of the shared state.
pub trait Channel: Send + Sync + Debug {
    /// Current value, if any value has been written or seeded.
    fn get(&self) -> Option<serde_json::Value>;

    /// Absorb one super-step's contributions, in deterministic merge order.
    ///
    /// Returns `true` if the value changed. An empty list is a no-op.
    fn update(&mut self, values: Vec<serde_json::Value>) -> Result<bool>;

    /// Serializable snapshot of the current value, absent if never written.
    fn snapshot(&self) -> Option<serde_json::Value>;

    /// Restore from a snapshot produced by [`snapshot`](Channel::snapshot).
    fn restore(&mut self, snapshot: serde_json::Value) -> Result<()>;

    /// Whether the channel currently holds a value.
    fn is_available(&self) -> bool {
        self.get().is_some()
    }

    fn clone_box(&self) -> Box<dyn Channel>;
}

impl Clone for Box<dyn Channel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Overwrite policy: holds the single most recent contribution.
///
/// When several nodes write this channel in one super-step, the last
/// contribution in deterministic merge order replaces the rest. Overwrite
/// intentionally discards prior values, so this is not an error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LastValueChannel {
    value: Option<serde_json::Value>,
}

impl LastValueChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: serde_json::Value) -> Self {
        Self { value: Some(value) }
    }
}

impl Channel for LastValueChannel {
    fn get(&self) -> Option<serde_json::Value> {
        self.value.clone()
    }

    fn update(&mut self, values: Vec<serde_json::Value>) -> Result<bool> {
        match values.into_iter().last() {
            Some(last) => {
                self.value = Some(last);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn snapshot(&self) -> Option<serde_json::Value> {
        self.value.clone()
    }

    fn restore(&mut self, snapshot: serde_json::Value) -> Result<()> {
        self.value = Some(snapshot);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Accumulate policy: an append-only sequence of contributions.
///
/// The identity element is the empty sequence, so the channel is available
/// from the start and reads as `[]` before any write.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TopicChannel {
    values: Vec<serde_json::Value>,
}

impl TopicChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[serde_json::Value] {
        &self.values
    }
}

impl Channel for TopicChannel {
    fn get(&self) -> Option<serde_json::Value> {
        Some(serde_json::Value::Array(self.values.clone()))
    }

    fn update(&mut self, values: Vec<serde_json::Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        // A contribution that is itself a sequence is spliced in, so a node
        // can append several items in one step.
        for value in values {
            match value {
                serde_json::Value::Array(items) => self.values.extend(items),
                other => self.values.push(other),
            }
        }
        Ok(true)
    }

    fn snapshot(&self) -> Option<serde_json::Value> {
        Some(serde_json::Value::Array(self.values.clone()))
    }

    fn restore(&mut self, snapshot: serde_json::Value) -> Result<()> {
        match snapshot {
            serde_json::Value::Array(items) => {
                self.values = items;
                Ok(())
            }
            other => Err(GraphError::state(format!(
                "accumulate channel snapshot must be a sequence, got {}",
                other
            ))),
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Reducer policy: folds contributions into the current value with a
/// registered binary operator.
///
/// The operator must be associative for the merged result to be independent
/// of contribution grouping across super-steps.
pub struct ReducerChannel {
    value: Option<serde_json::Value>,
    reducer: ReducerFn,
}

impl ReducerChannel {
    pub fn new(reducer: ReducerFn) -> Self {
        Self {
            value: None,
            reducer,
        }
    }

    /// Numeric sum reducer.
    pub fn sum() -> Self {
        Self::new(Arc::new(|a, b| {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            serde_json::json!(a + b)
        }))
    }
}

impl Clone for ReducerChannel {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            reducer: Arc::clone(&self.reducer),
        }
    }
}

impl Debug for ReducerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerChannel")
            .field("value", &self.value)
            .field("reducer", &"<fn>")
            .finish()
    }
}

impl Channel for ReducerChannel {
    fn get(&self) -> Option<serde_json::Value> {
        self.value.clone()
    }

    fn update(&mut self, values: Vec<serde_json::Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let mut acc = self.value.clone();
        for value in values {
            acc = Some(match acc {
                Some(current) => (self.reducer)(current, value),
                None => value,
            });
        }
        self.value = acc;
        Ok(true)
    }

    fn snapshot(&self) -> Option<serde_json::Value> {
        self.value.clone()
    }

    fn restore(&mut self, snapshot: serde_json::Value) -> Result<()> {
        self.value = Some(snapshot);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_value_keeps_latest() {
        let mut channel = LastValueChannel::new();
        assert!(!channel.is_available());

        channel.update(vec![json!(42)]).unwrap();
        assert_eq!(channel.get(), Some(json!(42)));

        channel.update(vec![json!(100)]).unwrap();
        assert_eq!(channel.get(), Some(json!(100)));
    }

    #[test]
    fn test_last_value_concurrent_writes_last_wins() {
        // Two nodes write in the same super-step, declared order P then Q.
        let mut channel = LastValueChannel::new();
        channel.update(vec![json!("P"), json!("Q")]).unwrap();
        assert_eq!(channel.get(), Some(json!("Q")));
    }

    #[test]
    fn test_last_value_empty_update_is_noop() {
        let mut channel = LastValueChannel::new();
        assert!(!channel.update(vec![]).unwrap());
        assert!(!channel.is_available());
    }

    #[test]
    fn test_topic_starts_as_identity() {
        let channel = TopicChannel::new();
        assert!(channel.is_available());
        assert_eq!(channel.get(), Some(json!([])));
    }

    #[test]
    fn test_topic_appends_in_order() {
        let mut channel = TopicChannel::new();
        channel.update(vec![json!("A")]).unwrap();
        channel.update(vec![json!("B"), json!("C")]).unwrap();
        assert_eq!(channel.get(), Some(json!(["A", "B", "C"])));
    }

    #[test]
    fn test_topic_splices_sequence_contributions() {
        let mut channel = TopicChannel::new();
        channel.update(vec![json!(["A", "B"]), json!("C")]).unwrap();
        assert_eq!(channel.get(), Some(json!(["A", "B", "C"])));
    }

    #[test]
    fn test_topic_restore_rejects_non_sequence() {
        let mut channel = TopicChannel::new();
        assert!(channel.restore(json!("not a sequence")).is_err());
    }

    #[test]
    fn test_reducer_sum() {
        let mut channel = ReducerChannel::sum();
        channel.update(vec![json!(1.0), json!(2.0)]).unwrap();
        assert_eq!(channel.get(), Some(json!(3.0)));

        channel.update(vec![json!(4.0)]).unwrap();
        assert_eq!(channel.get(), Some(json!(7.0)));
    }

    #[test]
    fn test_reducer_clone_preserves_operator() {
        let mut channel = ReducerChannel::sum();
        channel.update(vec![json!(5.0)]).unwrap();

        let mut cloned = channel.clone_box();
        cloned.update(vec![json!(2.0)]).unwrap();
        assert_eq!(cloned.get(), Some(json!(7.0)));
        // The original is unaffected.
        assert_eq!(channel.get(), Some(json!(5.0)));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut channel = TopicChannel::new();
        channel.update(vec![json!("A"), json!("B")]).unwrap();

        let snapshot = channel.snapshot().unwrap();
        let mut restored = TopicChannel::new();
        restored.restore(snapshot).unwrap();
        assert_eq!(restored.get(), channel.get());
    }
}
