//! In-memory checkpoint backend.
//!
//! Reference implementation of [`CheckpointSaver`]: each thread id maps to an
//! append-only vector of records behind an async `RwLock`. Suitable for
//! tests, development, and single-process runs; durable backends implement
//! the same trait over a database.

use crate::{
    checkpoint::{
        ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple,
        PendingWrite,
    },
    error::{CheckpointError, Result},
    traits::{CheckpointSaver, CheckpointStream},
};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One stored record: the tuple pieces plus buffered task writes.
#[derive(Debug, Clone)]
struct StoredRecord {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    config: CheckpointConfig,
    parent_config: Option<CheckpointConfig>,
    writes: Vec<PendingWrite>,
}

impl StoredRecord {
    fn to_tuple(&self) -> CheckpointTuple {
        CheckpointTuple {
            config: self.config.clone(),
            checkpoint: self.checkpoint.clone(),
            metadata: self.metadata.clone(),
            parent_config: self.parent_config.clone(),
            pending_writes: self.writes.clone(),
        }
    }
}

type Storage = Arc<RwLock<HashMap<String, Vec<StoredRecord>>>>;

/// Thread-safe in-memory checkpoint store.
///
/// Clones share the same underlying storage, so one saver can be handed to
/// the engine and kept by the caller for inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemorySaver {
    storage: Storage,
}

impl InMemorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one checkpoint.
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total checkpoints across all threads.
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|records| records.len())
            .sum()
    }

    /// Drop everything. For tests.
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

fn required_thread_id(config: &CheckpointConfig) -> Result<&String> {
    config
        .thread_id
        .as_ref()
        .ok_or_else(|| CheckpointError::Invalid("thread_id is required".to_string()))
}

#[async_trait]
impl CheckpointSaver for InMemorySaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let storage = self.storage.read().await;
        let thread_id = required_thread_id(config)?;

        let Some(records) = storage.get(thread_id) else {
            return Ok(None);
        };

        let record = match &config.checkpoint_id {
            Some(checkpoint_id) => records
                .iter()
                .find(|record| &record.checkpoint.id == checkpoint_id),
            None => records.last(),
        };

        Ok(record.map(StoredRecord::to_tuple))
    }

    async fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<HashMap<String, serde_json::Value>>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let storage = self.storage.read().await;

        let thread_ids: Vec<String> = match config.and_then(|cfg| cfg.thread_id.clone()) {
            Some(thread_id) => vec![thread_id],
            None => storage.keys().cloned().collect(),
        };

        let mut results = Vec::new();
        'threads: for thread_id in thread_ids {
            let Some(records) = storage.get(&thread_id) else {
                continue;
            };

            // `before` is a position cursor, not an id comparison: everything
            // appended at or after the named record is excluded.
            let cutoff = before
                .and_then(|cfg| cfg.checkpoint_id.as_ref())
                .and_then(|id| records.iter().position(|r| &r.checkpoint.id == id))
                .unwrap_or(records.len());

            for record in records[..cutoff].iter().rev() {
                if let Some(filter_map) = &filter {
                    let matches = filter_map
                        .iter()
                        .all(|(key, value)| record.metadata.extra.get(key) == Some(value));
                    if !matches {
                        continue;
                    }
                }

                results.push(Ok(record.to_tuple()));
                if limit.is_some_and(|lim| results.len() >= lim) {
                    break 'threads;
                }
            }
        }

        Ok(Box::pin(stream::iter(results)))
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: ChannelVersions,
    ) -> Result<CheckpointConfig> {
        let thread_id = required_thread_id(config)?.clone();

        let stored_config = CheckpointConfig {
            thread_id: Some(thread_id.clone()),
            checkpoint_id: Some(checkpoint.id.clone()),
            checkpoint_ns: config.checkpoint_ns.clone(),
            extra: HashMap::new(),
        };

        let record = StoredRecord {
            checkpoint,
            metadata,
            config: stored_config.clone(),
            // The incoming config names the record this one follows.
            parent_config: config.checkpoint_id.as_ref().map(|_| config.clone()),
            writes: Vec::new(),
        };

        let mut storage = self.storage.write().await;
        storage.entry(thread_id).or_default().push(record);

        Ok(stored_config)
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, serde_json::Value)>,
        task_id: String,
    ) -> Result<()> {
        let thread_id = required_thread_id(config)?.clone();
        let checkpoint_id = config
            .checkpoint_id
            .as_ref()
            .ok_or_else(|| CheckpointError::Invalid("checkpoint_id is required".to_string()))?;

        let mut storage = self.storage.write().await;
        let record = storage
            .get_mut(&thread_id)
            .and_then(|records| {
                records
                    .iter_mut()
                    .find(|record| &record.checkpoint.id == checkpoint_id)
            })
            .ok_or_else(|| {
                CheckpointError::NotFound(format!("checkpoint not found: {}", checkpoint_id))
            })?;

        for (channel, value) in writes {
            record.writes.push((task_id.clone(), channel, value));
        }
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointSource;
    use futures::StreamExt;

    fn thread_config(thread_id: &str) -> CheckpointConfig {
        CheckpointConfig::new().with_thread_id(thread_id)
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let saver = InMemorySaver::new();
        let mut checkpoint = Checkpoint::empty();
        checkpoint
            .channel_values
            .insert("log".to_string(), serde_json::json!(["A", "B"]));
        let metadata = CheckpointMetadata::new().with_source(CheckpointSource::Loop);

        let saved = saver
            .put(
                &thread_config("t1"),
                checkpoint.clone(),
                metadata,
                HashMap::new(),
            )
            .await
            .unwrap();
        assert!(saved.checkpoint_id.is_some());

        let tuple = saver.get_tuple(&saved).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.id, checkpoint.id);
        assert_eq!(
            tuple.checkpoint.channel_values,
            checkpoint.channel_values,
        );
    }

    #[tokio::test]
    async fn test_latest_wins_without_checkpoint_id() {
        let saver = InMemorySaver::new();
        let config = thread_config("t1");

        let mut last_id = String::new();
        for step in 0..3 {
            let checkpoint = Checkpoint::empty();
            last_id = checkpoint.id.clone();
            saver
                .put(
                    &config,
                    checkpoint,
                    CheckpointMetadata::new().with_step(step),
                    HashMap::new(),
                )
                .await
                .unwrap();
        }

        let tuple = saver.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.id, last_id);
        assert_eq!(tuple.metadata.step, Some(2));
    }

    #[tokio::test]
    async fn test_get_by_id_time_travel() {
        let saver = InMemorySaver::new();
        let config = thread_config("t1");

        let early = Checkpoint::empty();
        let early_id = early.id.clone();
        saver
            .put(&config, early, CheckpointMetadata::new().with_step(0), HashMap::new())
            .await
            .unwrap();
        saver
            .put(
                &config,
                Checkpoint::empty(),
                CheckpointMetadata::new().with_step(1),
                HashMap::new(),
            )
            .await
            .unwrap();

        let addressed = config.clone().with_checkpoint_id(early_id.clone());
        let tuple = saver.get_tuple(&addressed).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.id, early_id);
        assert_eq!(tuple.metadata.step, Some(0));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let saver = InMemorySaver::new();
        let config = thread_config("t1");

        for step in 0..5 {
            saver
                .put(
                    &config,
                    Checkpoint::empty(),
                    CheckpointMetadata::new().with_step(step),
                    HashMap::new(),
                )
                .await
                .unwrap();
        }

        let stream = saver
            .list(Some(&config), None, None, Some(3))
            .await
            .unwrap();
        let steps: Vec<i64> = stream
            .map(|tuple| tuple.unwrap().metadata.step.unwrap())
            .collect()
            .await;

        assert_eq!(steps, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn test_list_before_cursor() {
        let saver = InMemorySaver::new();
        let config = thread_config("t1");

        let mut ids = Vec::new();
        for step in 0..4 {
            let checkpoint = Checkpoint::empty();
            ids.push(checkpoint.id.clone());
            saver
                .put(
                    &config,
                    checkpoint,
                    CheckpointMetadata::new().with_step(step),
                    HashMap::new(),
                )
                .await
                .unwrap();
        }

        let cursor = config.clone().with_checkpoint_id(ids[2].clone());
        let stream = saver
            .list(Some(&config), None, Some(&cursor), None)
            .await
            .unwrap();
        let steps: Vec<i64> = stream
            .map(|tuple| tuple.unwrap().metadata.step.unwrap())
            .collect()
            .await;

        assert_eq!(steps, vec![1, 0]);
    }

    #[tokio::test]
    async fn test_pending_writes_survive_round_trip() {
        let saver = InMemorySaver::new();
        let saved = saver
            .put(
                &thread_config("t1"),
                Checkpoint::empty(),
                CheckpointMetadata::new(),
                HashMap::new(),
            )
            .await
            .unwrap();

        saver
            .put_writes(
                &saved,
                vec![("log".to_string(), serde_json::json!("A"))],
                "task-a".to_string(),
            )
            .await
            .unwrap();

        let tuple = saver.get_tuple(&saved).await.unwrap().unwrap();
        assert_eq!(
            tuple.pending_writes,
            vec![(
                "task-a".to_string(),
                "log".to_string(),
                serde_json::json!("A")
            )]
        );
    }

    #[tokio::test]
    async fn test_put_writes_unknown_checkpoint_fails() {
        let saver = InMemorySaver::new();
        let config = thread_config("t1").with_checkpoint_id("missing");

        let err = saver
            .put_writes(&config, vec![], "task".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let saver = InMemorySaver::new();
        saver
            .put(
                &thread_config("alice"),
                Checkpoint::empty(),
                CheckpointMetadata::new(),
                HashMap::new(),
            )
            .await
            .unwrap();

        assert!(saver
            .get_tuple(&thread_config("bob"))
            .await
            .unwrap()
            .is_none());

        saver.delete_thread("alice").await.unwrap();
        assert_eq!(saver.thread_count().await, 0);
    }
}
