//! The [`CheckpointSaver`] trait: the storage contract the engine persists
//! through.
//!
//! A saver is an append-only store of [`CheckpointTuple`] records keyed by
//! thread id. The engine calls [`put`](CheckpointSaver::put) once per
//! super-step and will not report the step complete until it returns, so an
//! implementation's durability boundary is the durability boundary of the
//! whole run. Implementations must be `Send + Sync`; different threads'
//! lineages must be fully independent.
//!
//! The in-memory backend in [`crate::memory`] is the reference
//! implementation; database-backed savers implement the same five methods
//! over their own storage.

use crate::{
    checkpoint::{
        ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
    },
    error::Result,
};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Async stream of checkpoint records, newest first
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send + 'static>>;

/// Storage backend contract for checkpoint persistence.
///
/// Required methods: [`get_tuple`](Self::get_tuple), [`list`](Self::list),
/// [`put`](Self::put), [`put_writes`](Self::put_writes).
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch just the snapshot for a config. Convenience over
    /// [`get_tuple`](Self::get_tuple).
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// Fetch a complete checkpoint record.
    ///
    /// With a `checkpoint_id` in the config, returns that exact record (the
    /// time-travel path). With only a `thread_id`, returns the latest record
    /// for the thread. Returns `Ok(None)` when nothing matches; errors are
    /// reserved for storage failures.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// Stream checkpoint records, newest first.
    ///
    /// `config` restricts to one thread; `filter` matches against metadata
    /// extras; `before` excludes the named record and everything after it
    /// (a pagination cursor); `limit` caps the result count.
    async fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<std::collections::HashMap<String, serde_json::Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream>;

    /// Append a checkpoint record.
    ///
    /// Must be durable before returning: the scheduler treats a returned
    /// `Ok` as permission to report the super-step complete. Never
    /// overwrites an existing record. Returns a config addressing the
    /// stored record (with its checkpoint id filled in).
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig>;

    /// Buffer task writes against an existing record.
    ///
    /// Used when a super-step is interrupted after some tasks completed:
    /// their writes are stored here so resume can apply them without
    /// re-invoking the nodes.
    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, serde_json::Value)>,
        task_id: String,
    ) -> Result<()>;

    /// Remove every record for a thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let _ = thread_id;
        Ok(())
    }
}
