//! Checkpoint data structures: durable snapshots of a run's state.
//!
//! A [`Checkpoint`] captures everything needed to resume a thread: the value
//! of every channel, per-channel versions, the versions each node has already
//! consumed, and the active set queued for the next super-step. Checkpoints
//! are append-only records keyed by thread id; the latest record for a thread
//! is the authoritative resumption point, and any earlier record can be loaded
//! by id for time-travel.
//!
//! # Core types
//!
//! - [`Checkpoint`] - the snapshot itself
//! - [`CheckpointConfig`] - (thread id, checkpoint id, namespace) addressing
//! - [`CheckpointMetadata`] - step number, source, parent lineage
//! - [`CheckpointTuple`] - a stored record with its config and metadata
//! - [`ChannelVersion`] - monotonically increasing per-channel counter
//!
//! # Step numbering
//!
//! The `step` in metadata is `-1` for the input checkpoint written before the
//! first super-step, `0` for the first super-step, and increases by one per
//! super-step thereafter. Within a thread lineage it is strictly increasing;
//! a fork starts a new lineage whose parent link points at the forked-from
//! record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// A buffered channel write: (task_id, channel, value).
///
/// Pending writes are produced by tasks that completed inside a super-step
/// that was later interrupted; on resume they let the engine replay the
/// completed work instead of re-invoking the node.
pub type PendingWrite = (String, String, serde_json::Value);

/// Monotonically increasing version counter for one channel.
///
/// Versions only ever move forward; comparing a channel's current version
/// against the version a node last saw decides whether the node re-activates.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(transparent)]
pub struct ChannelVersion(pub u64);

impl ChannelVersion {
    /// The version before any write has occurred.
    pub const UNSEEN: ChannelVersion = ChannelVersion(0);

    /// The next version in sequence.
    pub fn next(self) -> Self {
        ChannelVersion(self.0 + 1)
    }
}

/// Mapping from channel name to version
pub type ChannelVersions = HashMap<String, ChannelVersion>;

/// How a checkpoint came to exist.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Written from the caller-supplied input before the first super-step
    Input,
    /// Written by the scheduler at the end of a super-step
    Loop,
    /// Written by a manual state update outside the loop
    Update,
    /// Written as the first record of a lineage forked from an older checkpoint
    Fork,
}

/// Metadata stored alongside a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointMetadata {
    /// Origin of this checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Super-step sequence number: -1 input, 0 first loop step, then +1 per step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    /// Parent checkpoint ids, keyed by checkpoint namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<HashMap<String, CheckpointId>>,

    /// Caller-supplied extra metadata
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_parents(mut self, parents: HashMap<String, CheckpointId>) -> Self {
        self.parents = Some(parents);
        self
    }

    pub fn with_extra(mut self, key: String, value: serde_json::Value) -> Self {
        self.extra.insert(key, value);
        self
    }
}

/// A complete snapshot of a thread's execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version (currently 1)
    pub v: i32,

    /// Unique id of this checkpoint
    pub id: CheckpointId,

    /// When the snapshot was taken
    pub ts: DateTime<Utc>,

    /// Serialized value of every written channel
    pub channel_values: HashMap<String, serde_json::Value>,

    /// Current version of every channel
    pub channel_versions: ChannelVersions,

    /// Per-node record of channel versions already consumed.
    /// A node re-activates when a subscribed channel moves past the
    /// version recorded here.
    pub versions_seen: HashMap<String, ChannelVersions>,

    /// Node keys queued to run in the next super-step, in deterministic
    /// scheduling order. Empty means the run is complete.
    pub active_set: Vec<String>,
}

impl Checkpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: i32 = 1;

    pub fn new(
        id: CheckpointId,
        channel_values: HashMap<String, serde_json::Value>,
        channel_versions: ChannelVersions,
        versions_seen: HashMap<String, ChannelVersions>,
        active_set: Vec<String>,
    ) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id,
            ts: Utc::now(),
            channel_values,
            channel_versions,
            versions_seen,
            active_set,
        }
    }

    /// An empty checkpoint with a fresh id.
    pub fn empty() -> Self {
        Self::new(
            Uuid::new_v4().to_string(),
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            Vec::new(),
        )
    }

    /// An independent copy with a fresh id and timestamp, used when forking
    /// a lineage. The original record is never touched.
    pub fn fork(&self) -> Self {
        Self {
            v: self.v,
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            channel_values: self.channel_values.clone(),
            channel_versions: self.channel_versions.clone(),
            versions_seen: self.versions_seen.clone(),
            active_set: self.active_set.clone(),
        }
    }
}

/// Addresses a checkpoint (or the latest one) within a store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointConfig {
    /// Thread whose lineage is addressed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Specific checkpoint; absent means "latest for the thread"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,

    /// Namespace for nested lineages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_ns: Option<String>,

    /// Extra addressing data
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = Some(checkpoint_ns.into());
        self
    }
}

/// A stored checkpoint record: the snapshot plus its addressing and metadata.
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    /// Config addressing this exact record
    pub config: CheckpointConfig,

    /// The snapshot
    pub checkpoint: Checkpoint,

    /// Step/source/lineage metadata
    pub metadata: CheckpointMetadata,

    /// Config of the record this one follows, if any
    pub parent_config: Option<CheckpointConfig>,

    /// Writes buffered against this record by completed tasks
    pub pending_writes: Vec<PendingWrite>,
}

impl CheckpointTuple {
    pub fn new(
        config: CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            config,
            checkpoint,
            metadata,
            parent_config: None,
            pending_writes: Vec::new(),
        }
    }

    pub fn with_parent_config(mut self, parent_config: CheckpointConfig) -> Self {
        self.parent_config = Some(parent_config);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_checkpoint() {
        let checkpoint = Checkpoint::empty();
        assert_eq!(checkpoint.v, Checkpoint::CURRENT_VERSION);
        assert!(checkpoint.channel_values.is_empty());
        assert!(checkpoint.active_set.is_empty());
    }

    #[test]
    fn test_version_increments() {
        let v = ChannelVersion::UNSEEN;
        assert_eq!(v.next(), ChannelVersion(1));
        assert_eq!(v.next().next(), ChannelVersion(2));
        assert!(v < v.next());
    }

    #[test]
    fn test_fork_gets_fresh_id() {
        let mut original = Checkpoint::empty();
        original
            .channel_values
            .insert("log".to_string(), serde_json::json!(["A"]));

        let forked = original.fork();
        assert_ne!(forked.id, original.id);
        assert_eq!(forked.channel_values, original.channel_values);
    }

    #[test]
    fn test_metadata_builder() {
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Input)
            .with_step(-1)
            .with_extra("run".to_string(), serde_json::json!("abc"));

        assert_eq!(metadata.source, Some(CheckpointSource::Input));
        assert_eq!(metadata.step, Some(-1));
        assert_eq!(metadata.extra.get("run"), Some(&serde_json::json!("abc")));
    }

    #[test]
    fn test_config_addressing() {
        let config = CheckpointConfig::new()
            .with_thread_id("thread-1")
            .with_checkpoint_id("cp-1");

        assert_eq!(config.thread_id.as_deref(), Some("thread-1"));
        assert_eq!(config.checkpoint_id.as_deref(), Some("cp-1"));
    }

    #[test]
    fn test_checkpoint_serde_round_trip() {
        let mut checkpoint = Checkpoint::empty();
        checkpoint
            .channel_values
            .insert("done".to_string(), serde_json::json!(true));
        checkpoint
            .channel_versions
            .insert("done".to_string(), ChannelVersion(3));
        checkpoint.active_set = vec!["worker".to_string()];

        let json = serde_json::to_string(&checkpoint).unwrap();
        let restored: Checkpoint = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.id, checkpoint.id);
        assert_eq!(restored.channel_values, checkpoint.channel_values);
        assert_eq!(restored.channel_versions, checkpoint.channel_versions);
        assert_eq!(restored.active_set, checkpoint.active_set);
    }
}
