//! # stategraph-core - Cyclic Computation Graphs over Shared State
//!
//! A Pregel-style execution engine for graphs whose nodes read a shared
//! state, return partial updates, and route control through an explicit
//! edge table. Cycles are first-class; a recursion limit bounds runaway
//! loops.
//!
//! ## Core Concepts
//!
//! ### 1. StateGraph - Primary API
//!
//! [`StateGraph`] collects the three ingredients of a runnable graph:
//! - **Channels**: named state slots, each with an update policy
//!   (overwrite, accumulate, or a custom reducer)
//! - **Nodes**: async functions from a read-only state view to a partial
//!   update object
//! - **Edges**: direct connections or routing functions over a declared
//!   branch set, including the [`START`](graph::START) and
//!   [`END`](graph::END) markers
//!
//! [`StateGraph::compile`] validates the structure (dangling edges,
//! unreachable nodes, missing entry) and freezes it into a
//! [`CompiledGraph`].
//!
//! ### 2. Super-Step Execution
//!
//! A run proceeds in super-steps: every node in the active set is invoked
//! concurrently against the same state view, the loop waits for all of
//! them at a barrier, merges their writes through the channel policies in
//! deterministic order, and resolves the next active set from the edge
//! table. The run ends when the active set empties.
//!
//! ### 3. Checkpointing and Time Travel
//!
//! With a checkpointer attached, every super-step persists a checkpoint
//! before the run advances. A thread can be resumed from its latest
//! record, inspected at any historical record, forked into an alternate
//! lineage from any record, or edited in place between runs.
//!
//! ### 4. Interrupts
//!
//! Runs can pause before or after designated nodes, returning control to
//! the caller with state intact; resuming the thread continues from the
//! exact pause point without re-invoking merged work.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stategraph_core::{ChannelPolicy, RunConfig, StateGraph, StateSchema, END};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stategraph_core::GraphError> {
//!     let schema = StateSchema::new()
//!         .channel("log", ChannelPolicy::Accumulate)
//!         .channel("done", ChannelPolicy::Overwrite);
//!
//!     let mut graph = StateGraph::new(schema);
//!     graph.add_node("plan", |_state| async move { Ok(json!({"log": "planned"})) });
//!     graph.add_node("work", |_state| async move {
//!         Ok(json!({"log": "worked", "done": true}))
//!     });
//!     graph.set_entry("plan");
//!     graph.add_edge("plan", "work");
//!     graph.add_edge("work", END);
//!
//!     let compiled = graph.compile()?;
//!     let outcome = compiled.invoke(None).await?;
//!     println!("{} steps: {}", outcome.steps, outcome.state);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Map
//!
//! - [`graph`] - construction, validation, compilation
//! - [`channels`] - state slots and their update policies
//! - [`node`] - the invocable contract
//! - [`scheduler`] - the super-step loop and its deterministic algorithms
//! - [`compiled`] - the run surface: invoke, stream, state inspection
//! - [`interrupt`] - pause boundaries
//! - [`retry`] - per-node retry policies
//! - [`config`] - per-run options
//! - [`stream`] - run event types
//! - [`error`] - the error taxonomy

pub mod channels;
pub mod compiled;
pub mod config;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod node;
pub mod retry;
pub mod scheduler;
pub mod stream;

pub use channels::{Channel, LastValueChannel, ReducerChannel, ReducerFn, TopicChannel};
pub use compiled::{CompiledGraph, StateSnapshot};
pub use config::{RunConfig, DEFAULT_RECURSION_LIMIT};
pub use error::{GraphError, Result};
pub use graph::{ChannelPolicy, ChannelSpec, Edge, StateGraph, StateSchema, END, START};
pub use interrupt::{InterruptConfig, InterruptState, InterruptWhen};
pub use node::{FnNode, NodeExecutor, NodeFuture, NodeSpec};
pub use retry::RetryPolicy;
pub use scheduler::{RunOutcome, RunStatus, SuperStepLoop};
pub use stream::{EventSender, RunEvent};

// Persistence types callers need alongside the engine.
pub use stategraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointError, CheckpointMetadata, CheckpointSaver,
    CheckpointSource, CheckpointTuple, InMemorySaver,
};
