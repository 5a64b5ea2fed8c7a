//! The executable graph handle.
//!
//! [`CompiledGraph`] is the frozen output of [`crate::graph::StateGraph::compile`].
//! It is cheap to clone and safe to share; each call to [`invoke`] or
//! [`stream`] drives an independent run, except that a thread id admits at
//! most one run at a time.
//!
//! Two caller contracts:
//!
//! - [`invoke`](CompiledGraph::invoke) blocks until the run finishes,
//!   pauses at an interrupt boundary, or fails, and returns the final
//!   merged state.
//! - [`stream`](CompiledGraph::stream) returns immediately with a stream
//!   of [`RunEvent`]s emitted as the run progresses.
//!
//! With a checkpointer attached, [`get_state`](CompiledGraph::get_state),
//! [`get_state_history`](CompiledGraph::get_state_history), and
//! [`update_state`](CompiledGraph::update_state) expose the thread's
//! persisted lineage for inspection, time-travel, and manual edits.

use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::graph::GraphCore;
use crate::interrupt::InterruptConfig;
use crate::scheduler::{RunOutcome, SuperStepLoop};
use crate::stream::{EventSender, RunEvent};
use chrono::{DateTime, Utc};
use stategraph_checkpoint::{
    CheckpointConfig, CheckpointError, CheckpointMetadata, CheckpointSaver, CheckpointTuple,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

/// One persisted point of a thread's lineage, read back for inspection.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Channel values at this point, in schema order
    pub values: serde_json::Value,

    /// Node keys queued to run next; empty means the run had finished
    pub next: Vec<String>,

    /// Config addressing this exact record, usable for time-travel
    pub config: CheckpointConfig,

    /// Step, source, and lineage metadata
    pub metadata: CheckpointMetadata,

    /// Config of the record this one follows
    pub parent_config: Option<CheckpointConfig>,

    /// When the record was written
    pub created_at: DateTime<Utc>,
}

impl StateSnapshot {
    fn from_tuple(core: &GraphCore, tuple: CheckpointTuple) -> Self {
        let mut values = serde_json::Map::new();
        for (name, _spec) in core.schema.iter() {
            if let Some(value) = tuple.checkpoint.channel_values.get(name) {
                values.insert(name.clone(), value.clone());
            }
        }
        Self {
            values: serde_json::Value::Object(values),
            next: tuple.checkpoint.active_set,
            config: tuple.config,
            metadata: tuple.metadata,
            parent_config: tuple.parent_config,
            created_at: tuple.checkpoint.ts,
        }
    }
}

/// A validated graph, ready to run.
#[derive(Clone)]
pub struct CompiledGraph {
    core: Arc<GraphCore>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    interrupts: InterruptConfig,
    /// Thread ids with a run in flight, for single-writer enforcement
    active_threads: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("has_checkpointer", &self.checkpointer.is_some())
            .field("interrupts", &self.interrupts)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    pub(crate) fn new(core: Arc<GraphCore>) -> Self {
        Self {
            core,
            checkpointer: None,
            interrupts: InterruptConfig::new(),
            active_threads: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The immutable graph data.
    pub fn core(&self) -> Arc<GraphCore> {
        Arc::clone(&self.core)
    }

    /// Attach a persistence backend. Runs on this handle then require a
    /// thread id and checkpoint every super-step.
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Pause runs before invoking any of these nodes.
    pub fn with_interrupt_before(
        mut self,
        nodes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.interrupts = self.interrupts.with_before(nodes);
        self
    }

    /// Pause runs after merging the output of any of these nodes.
    pub fn with_interrupt_after(
        mut self,
        nodes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.interrupts = self.interrupts.with_after(nodes);
        self
    }

    /// Run to completion (or interrupt) with default options.
    pub async fn invoke(&self, input: Option<serde_json::Value>) -> Result<RunOutcome> {
        self.invoke_with_config(input, RunConfig::default()).await
    }

    /// Run to completion (or interrupt) under explicit options.
    ///
    /// With a checkpointer and no input, a thread whose latest record left
    /// work queued resumes from that record; `checkpoint_id` in the config
    /// instead forks a new lineage from the named record.
    pub async fn invoke_with_config(
        &self,
        input: Option<serde_json::Value>,
        config: RunConfig,
    ) -> Result<RunOutcome> {
        let _guard = self.claim_thread(&config)?;
        let mut run = self.build_loop(input, config, None).await?;
        run.run().await
    }

    /// Run under explicit options, observing progress as a stream of
    /// [`RunEvent`]s. The run is driven by a background task; dropping the
    /// stream does not cancel it.
    pub fn stream(
        &self,
        input: Option<serde_json::Value>,
        config: RunConfig,
    ) -> Result<ReceiverStream<RunEvent>> {
        let guard = self.claim_thread(&config)?;
        let (events, rx) = EventSender::channel();
        let this = self.clone();
        tokio::spawn(async move {
            match this.build_loop(input, config, Some(events.clone())).await {
                Ok(mut run) => {
                    // Terminal events (Done / Interrupted / Failed) are
                    // emitted by the loop itself.
                    let _ = run.run().await;
                }
                Err(err) => {
                    events
                        .emit(RunEvent::Failed {
                            error: err.to_string(),
                        })
                        .await;
                }
            }
            // Free the thread before the event channel closes, so a caller
            // who drained the stream can start the next run immediately.
            drop(guard);
            drop(events);
        });
        Ok(ReceiverStream::new(rx))
    }

    /// Read back one persisted point of a thread's lineage: the latest
    /// record, or the one named by `checkpoint_id` in the config.
    pub async fn get_state(&self, config: &RunConfig) -> Result<Option<StateSnapshot>> {
        let saver = self.require_checkpointer()?;
        let address = checkpoint_address(config)?;
        Ok(saver
            .get_tuple(&address)
            .await?
            .map(|tuple| StateSnapshot::from_tuple(&self.core, tuple)))
    }

    /// Read back a thread's full lineage, newest first.
    pub async fn get_state_history(&self, config: &RunConfig) -> Result<Vec<StateSnapshot>> {
        use futures::StreamExt;

        let saver = self.require_checkpointer()?;
        let thread_id = required_thread_id(config)?;
        let address = CheckpointConfig::new().with_thread_id(thread_id);

        let mut stream = saver.list(Some(&address), None, None, None).await?;
        let mut snapshots = Vec::new();
        while let Some(tuple) = stream.next().await {
            snapshots.push(StateSnapshot::from_tuple(&self.core, tuple?));
        }
        Ok(snapshots)
    }

    /// Apply a manual partial update to a thread's state and persist it as
    /// a new record. Returns the config addressing the new record.
    pub async fn update_state(
        &self,
        config: RunConfig,
        values: serde_json::Value,
    ) -> Result<CheckpointConfig> {
        let _guard = self.claim_thread(&config)?;
        let saver = self.require_checkpointer()?;
        let address = checkpoint_address(&config)?;

        let tuple = saver.get_tuple(&address).await?.ok_or_else(|| {
            GraphError::Checkpoint(CheckpointError::NotFound(format!(
                "no checkpoint for thread '{}'",
                config.thread_id.as_deref().unwrap_or("")
            )))
        })?;

        let mut run = SuperStepLoop::from_checkpoint(
            Arc::clone(&self.core),
            self.checkpointer.clone(),
            self.interrupts.clone(),
            None,
            config,
            tuple,
        )?;
        run.apply_external_update(values).await?;
        run.last_checkpoint_config().cloned().ok_or_else(|| {
            GraphError::Checkpoint(CheckpointError::Storage(
                "update produced no checkpoint".to_string(),
            ))
        })
    }

    async fn build_loop(
        &self,
        input: Option<serde_json::Value>,
        config: RunConfig,
        events: Option<EventSender>,
    ) -> Result<SuperStepLoop> {
        if self.checkpointer.is_some() && config.thread_id.is_none() {
            return Err(GraphError::Configuration(
                "checkpointed runs require a thread id".to_string(),
            ));
        }

        if let Some(saver) = &self.checkpointer {
            if let Some(checkpoint_id) = &config.checkpoint_id {
                // Time-travel: fork a new lineage from the named record.
                let address = checkpoint_address(&config)?;
                let tuple = saver.get_tuple(&address).await?.ok_or_else(|| {
                    GraphError::Checkpoint(CheckpointError::NotFound(format!(
                        "checkpoint '{}' not found",
                        checkpoint_id
                    )))
                })?;
                let mut run = SuperStepLoop::from_checkpoint(
                    Arc::clone(&self.core),
                    self.checkpointer.clone(),
                    self.interrupts.clone(),
                    events,
                    config,
                    tuple,
                )?;
                run.save_fork().await?;
                return Ok(run);
            }

            if input.is_none() {
                // No input: resume the thread's latest record when it left
                // work queued.
                let address = checkpoint_address(&config)?;
                if let Some(tuple) = saver.get_tuple(&address).await? {
                    if !tuple.checkpoint.active_set.is_empty() {
                        return SuperStepLoop::from_checkpoint(
                            Arc::clone(&self.core),
                            self.checkpointer.clone(),
                            self.interrupts.clone(),
                            events,
                            config,
                            tuple,
                        );
                    }
                }
            }
        }

        SuperStepLoop::fresh(
            Arc::clone(&self.core),
            self.checkpointer.clone(),
            self.interrupts.clone(),
            events,
            config,
            input,
        )
        .await
    }

    /// Claim single-writer access to the run's thread id, if it has one.
    fn claim_thread(&self, config: &RunConfig) -> Result<Option<ThreadGuard>> {
        let Some(thread_id) = &config.thread_id else {
            return Ok(None);
        };
        let mut threads = lock_registry(&self.active_threads);
        if !threads.insert(thread_id.clone()) {
            return Err(GraphError::ConcurrentThread {
                thread_id: thread_id.clone(),
            });
        }
        Ok(Some(ThreadGuard {
            registry: Arc::clone(&self.active_threads),
            thread_id: thread_id.clone(),
        }))
    }

    fn require_checkpointer(&self) -> Result<&Arc<dyn CheckpointSaver>> {
        self.checkpointer.as_ref().ok_or_else(|| {
            GraphError::Configuration("no checkpointer attached to this graph".to_string())
        })
    }
}

/// Releases the thread id when the run finishes, by any path.
struct ThreadGuard {
    registry: Arc<Mutex<HashSet<String>>>,
    thread_id: String,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        lock_registry(&self.registry).remove(&self.thread_id);
    }
}

fn lock_registry(
    registry: &Mutex<HashSet<String>>,
) -> std::sync::MutexGuard<'_, HashSet<String>> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn required_thread_id(config: &RunConfig) -> Result<String> {
    config.thread_id.clone().ok_or_else(|| {
        GraphError::Configuration("a thread id is required for this operation".to_string())
    })
}

fn checkpoint_address(config: &RunConfig) -> Result<CheckpointConfig> {
    let mut address = CheckpointConfig::new().with_thread_id(required_thread_id(config)?);
    if let Some(checkpoint_id) = &config.checkpoint_id {
        address = address.with_checkpoint_id(checkpoint_id.clone());
    }
    Ok(address)
}
