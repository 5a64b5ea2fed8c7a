//! The run state machine.
//!
//! A [`SuperStepLoop`] owns the live channel state of one run and drives it
//! super-step by super-step until the active set empties, an interrupt
//! boundary is hit, the recursion limit fires, or a node exhausts its
//! retries. With a checkpointer attached, every completed super-step is
//! persisted before the loop advances; the loop never outruns its durable
//! record.

use crate::channels::Channel;
use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::graph::GraphCore;
use crate::interrupt::{InterruptConfig, InterruptState, InterruptWhen};
use crate::scheduler::algo;
use crate::scheduler::task::{ExecutableTask, TaskWrites};
use crate::stream::{EventSender, RunEvent};
use stategraph_checkpoint::{
    ChannelVersion, ChannelVersions, Checkpoint, CheckpointConfig, CheckpointMetadata,
    CheckpointSaver, CheckpointSource, CheckpointTuple,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Where a run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not yet driven
    Pending,
    /// Super-steps in flight
    Running,
    /// Paused at an interrupt boundary; resumable
    Interrupted,
    /// Active set emptied; terminal
    Done,
    /// A fatal error ended the run; terminal
    Failed,
}

/// What a blocking run returns.
///
/// An interrupt is a successful outcome, not an error: the caller inspects
/// `status` to tell a finished run from a paused one.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Merged state view at the point the run stopped
    pub state: serde_json::Value,
    /// Super-steps completed
    pub steps: i64,
    /// Present when `status` is [`RunStatus::Interrupted`]
    pub interrupt: Option<InterruptState>,
}

/// Drives one run of a compiled graph.
pub struct SuperStepLoop {
    core: Arc<GraphCore>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    interrupts: InterruptConfig,
    config: RunConfig,
    events: Option<EventSender>,

    channels: HashMap<String, Box<dyn Channel>>,
    versions: ChannelVersions,
    versions_seen: HashMap<String, ChannelVersions>,
    /// Nodes queued for the next super-step, in deterministic order
    active: Vec<String>,
    steps_completed: i64,

    /// Set when resuming: the first boundary check is skipped so the run
    /// moves past the interrupt it paused at.
    skip_next_before: bool,
    /// Consumed by the first super-step after a resume
    resume_value: Option<serde_json::Value>,
    /// Addresses the latest persisted record; parent of the next one
    last_config: Option<CheckpointConfig>,
}

impl SuperStepLoop {
    /// Start a run from caller-supplied input.
    ///
    /// The input, when present, must be a partial update object; it is
    /// applied through the channel policies, persisted as the input
    /// checkpoint, and the entry edge is resolved against the resulting
    /// state.
    pub async fn fresh(
        core: Arc<GraphCore>,
        checkpointer: Option<Arc<dyn CheckpointSaver>>,
        interrupts: InterruptConfig,
        events: Option<EventSender>,
        config: RunConfig,
        input: Option<serde_json::Value>,
    ) -> Result<Self> {
        let channels = build_channels(&core)?;
        let mut run = Self {
            core,
            checkpointer,
            interrupts,
            config,
            events,
            channels,
            versions: ChannelVersions::new(),
            versions_seen: HashMap::new(),
            active: Vec::new(),
            steps_completed: 0,
            skip_next_before: false,
            resume_value: None,
            last_config: None,
        };

        if let Some(input) = input {
            run.apply_partial_update(input)?;
        }
        let view = run.state_view();
        run.active = algo::entry_active_set(&run.core, &view)?;
        run.save_checkpoint(CheckpointSource::Input, -1).await?;
        Ok(run)
    }

    /// Resume a run from a stored checkpoint record.
    ///
    /// The live state is rebuilt entirely from the record: channel values,
    /// versions, and the queued active set. Nothing merged before the pause
    /// is re-invoked.
    pub fn from_checkpoint(
        core: Arc<GraphCore>,
        checkpointer: Option<Arc<dyn CheckpointSaver>>,
        interrupts: InterruptConfig,
        events: Option<EventSender>,
        config: RunConfig,
        tuple: CheckpointTuple,
    ) -> Result<Self> {
        let mut channels = build_channels(&core)?;
        for (name, value) in &tuple.checkpoint.channel_values {
            if let Some(channel) = channels.get_mut(name) {
                channel.restore(value.clone())?;
            }
        }

        let resume_value = config.resume_value.clone();
        Ok(Self {
            core,
            checkpointer,
            interrupts,
            events,
            channels,
            versions: tuple.checkpoint.channel_versions.clone(),
            versions_seen: tuple.checkpoint.versions_seen.clone(),
            active: tuple.checkpoint.active_set.clone(),
            steps_completed: tuple.metadata.step.unwrap_or(-1) + 1,
            skip_next_before: true,
            resume_value,
            last_config: Some(tuple.config),
            config,
        })
    }

    /// Write a forked lineage head: a fresh record carrying this state,
    /// parented on the record the run was loaded from.
    pub async fn save_fork(&mut self) -> Result<()> {
        self.save_checkpoint(CheckpointSource::Fork, self.steps_completed - 1)
            .await
    }

    /// Apply a manual state update outside the loop and persist it.
    pub async fn apply_external_update(&mut self, values: serde_json::Value) -> Result<()> {
        self.apply_partial_update(values)?;
        self.save_checkpoint(CheckpointSource::Update, self.steps_completed - 1)
            .await
    }

    /// The merged state as a JSON object, in schema order.
    pub fn state_view(&self) -> serde_json::Value {
        algo::state_view(&self.core, &self.channels)
    }

    pub fn active_set(&self) -> &[String] {
        &self.active
    }

    pub fn steps_completed(&self) -> i64 {
        self.steps_completed
    }

    pub fn last_checkpoint_config(&self) -> Option<&CheckpointConfig> {
        self.last_config.as_ref()
    }

    /// Drive the run to its next stopping point.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        match self.run_inner().await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.emit(RunEvent::Failed {
                    error: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<RunOutcome> {
        loop {
            if self.active.is_empty() {
                let state = self.state_view();
                self.emit(RunEvent::Done {
                    steps: self.steps_completed,
                    values: state.clone(),
                })
                .await;
                return Ok(RunOutcome {
                    status: RunStatus::Done,
                    state,
                    steps: self.steps_completed,
                    interrupt: None,
                });
            }

            if self.steps_completed >= self.config.recursion_limit as i64 {
                return Err(GraphError::RecursionLimit {
                    limit: self.config.recursion_limit,
                });
            }

            let skip_before = std::mem::take(&mut self.skip_next_before);
            if !skip_before {
                let hits = self.interrupts.matches_before(&self.active);
                if let Some(node) = hits.first() {
                    return self
                        .pause((*node).clone(), InterruptWhen::Before)
                        .await;
                }
            }

            let step = self.steps_completed;
            tracing::debug!(
                step,
                active = ?self.active,
                thread_id = self.config.thread_id.as_deref(),
                "super-step start"
            );
            self.emit(RunEvent::StepStart {
                step,
                active: self.active.clone(),
            })
            .await;

            let view = self.state_view();
            let resume_value = self.resume_value.take();
            let tasks =
                algo::prepare_tasks(&self.core, &self.active, &view, resume_value.as_ref())?;

            let task_writes = self.execute_tasks(&tasks, step).await?;
            self.buffer_writes(&task_writes).await?;

            let updated = algo::apply_writes(&self.core, &mut self.channels, task_writes)?;
            for name in &updated {
                let version = self.versions.entry(name.clone()).or_insert(ChannelVersion::UNSEEN);
                *version = version.next();
            }
            let ran = std::mem::take(&mut self.active);
            for node in &ran {
                self.versions_seen.insert(node.clone(), self.versions.clone());
            }
            self.steps_completed = step + 1;

            let view = self.state_view();
            self.active = algo::next_active_set(&self.core, &ran, &view)?;
            self.save_checkpoint(CheckpointSource::Loop, step).await?;

            self.emit(RunEvent::StateUpdate {
                step,
                values: view,
                updated_channels: updated,
            })
            .await;

            let hits = self.interrupts.matches_after(&ran);
            if let Some(node) = hits.first() {
                return self.pause((*node).clone(), InterruptWhen::After).await;
            }
        }
    }

    async fn pause(&mut self, node: String, when: InterruptWhen) -> Result<RunOutcome> {
        let interrupt = InterruptState::new(node, when, self.steps_completed);
        tracing::debug!(
            node = interrupt.node.as_str(),
            step = interrupt.step,
            "run interrupted"
        );
        self.emit(RunEvent::Interrupted {
            interrupt: interrupt.clone(),
        })
        .await;
        Ok(RunOutcome {
            status: RunStatus::Interrupted,
            state: self.state_view(),
            steps: self.steps_completed,
            interrupt: Some(interrupt),
        })
    }

    /// Invoke every task of the step with bounded parallelism and wait at
    /// the barrier. Results come back in task order regardless of
    /// completion timing.
    async fn execute_tasks(
        &self,
        tasks: &[ExecutableTask],
        step: i64,
    ) -> Result<Vec<TaskWrites>> {
        let semaphore = self
            .config
            .concurrency_limit
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let invocations = tasks.iter().map(|task| {
            let task = task.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = match semaphore {
                    Some(semaphore) => Some(
                        semaphore.acquire_owned().await.map_err(|_| {
                            GraphError::Custom("task semaphore closed".to_string())
                        })?,
                    ),
                    None => None,
                };
                let output = invoke_with_retry(&task).await?;
                Ok::<_, GraphError>((task, output))
            }
        });

        let mut writes = Vec::with_capacity(tasks.len());
        for result in futures::future::join_all(invocations).await {
            let (task, output) = result?;
            self.emit(RunEvent::NodeOutput {
                step,
                node: task.node.clone(),
                output: output.clone(),
            })
            .await;
            writes.push(algo::collect_writes(
                &self.core, &task.id, &task.node, task.order, output,
            )?);
        }
        Ok(writes)
    }

    /// Buffer the step's raw writes against the latest persisted record,
    /// before the merge. A crash between the barrier and the next
    /// checkpoint leaves the completed work inspectable in storage.
    async fn buffer_writes(&self, task_writes: &[TaskWrites]) -> Result<()> {
        let (Some(saver), Some(config)) = (&self.checkpointer, &self.last_config) else {
            return Ok(());
        };
        for task in task_writes {
            if task.writes.is_empty() {
                continue;
            }
            saver
                .put_writes(config, task.writes.clone(), task.task_id.clone())
                .await?;
        }
        Ok(())
    }

    fn apply_partial_update(&mut self, values: serde_json::Value) -> Result<()> {
        let map = match values {
            serde_json::Value::Null => return Ok(()),
            serde_json::Value::Object(map) => map,
            other => {
                return Err(GraphError::state(format!(
                    "state update must be an object, got {}",
                    other
                )))
            }
        };
        for (name, value) in map {
            if !self.core.schema.contains(&name) {
                return Err(GraphError::state(format!(
                    "update writes to undeclared channel '{}'",
                    name
                )));
            }
            let channel = self.channels.get_mut(&name).ok_or_else(|| {
                GraphError::state(format!("channel '{}' missing from live state", name))
            })?;
            if channel.update(vec![value])? {
                let version = self.versions.entry(name).or_insert(ChannelVersion::UNSEEN);
                *version = version.next();
            }
        }
        Ok(())
    }

    async fn save_checkpoint(&mut self, source: CheckpointSource, step: i64) -> Result<()> {
        let Some(saver) = &self.checkpointer else {
            return Ok(());
        };
        let thread_id = self.config.thread_id.clone().ok_or_else(|| {
            GraphError::Configuration("checkpointed runs require a thread id".to_string())
        })?;

        let channel_values: HashMap<String, serde_json::Value> = self
            .channels
            .iter()
            .filter_map(|(name, channel)| channel.snapshot().map(|value| (name.clone(), value)))
            .collect();
        let checkpoint = Checkpoint::new(
            Uuid::new_v4().to_string(),
            channel_values,
            self.versions.clone(),
            self.versions_seen.clone(),
            self.active.clone(),
        );

        let mut metadata = CheckpointMetadata::new().with_source(source).with_step(step);
        let mut put_config = CheckpointConfig::new().with_thread_id(thread_id);
        if let Some(parent_id) = self
            .last_config
            .as_ref()
            .and_then(|config| config.checkpoint_id.clone())
        {
            metadata = metadata
                .with_parents(HashMap::from([(String::new(), parent_id.clone())]));
            put_config = put_config.with_checkpoint_id(parent_id);
        }

        let stored = saver
            .put(&put_config, checkpoint, metadata, self.versions.clone())
            .await?;
        self.last_config = Some(stored);
        Ok(())
    }

    async fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            events.emit(event).await;
        }
    }
}

fn build_channels(core: &GraphCore) -> Result<HashMap<String, Box<dyn Channel>>> {
    core.schema
        .iter()
        .map(|(name, spec)| Ok((name.clone(), spec.build()?)))
        .collect()
}

async fn invoke_with_retry(task: &ExecutableTask) -> Result<serde_json::Value> {
    let mut attempts = 0usize;
    loop {
        attempts += 1;
        match task.executor.invoke(task.input.clone()).await {
            Ok(output) => return Ok(output),
            Err(err) => {
                let retry = task
                    .retry_policy
                    .as_ref()
                    .is_some_and(|policy| policy.should_retry(attempts));
                if !retry {
                    return Err(GraphError::NodeInvocation {
                        node: task.node.clone(),
                        attempts,
                        message: err.to_string(),
                    });
                }
                let delay = task
                    .retry_policy
                    .as_ref()
                    .map(|policy| policy.backoff_delay(attempts - 1))
                    .unwrap_or_default();
                tracing::warn!(
                    node = task.node.as_str(),
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "node invocation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
