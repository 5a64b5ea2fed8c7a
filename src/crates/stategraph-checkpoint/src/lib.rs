//! # stategraph-checkpoint - durable state persistence for graph runs
//!
//! Checkpoints are append-only snapshots of a run's state, written after
//! every super-step of the execution engine. They make runs resumable after
//! interrupts and crashes, and any historical checkpoint can be loaded by id
//! to replay or fork a thread from that point (time-travel).
//!
//! This crate holds the storage-facing half of the system:
//!
//! - [`Checkpoint`] / [`CheckpointTuple`] / [`CheckpointMetadata`] - the
//!   snapshot data model, including per-channel versions, per-node
//!   versions-seen, and the active set queued for the next super-step
//! - [`CheckpointSaver`] - the async trait storage backends implement
//! - [`InMemorySaver`] - the reference backend over a per-thread vector
//! - [`SnapshotSerializer`] - pluggable JSON/bincode codecs
//!
//! ## Example
//!
//! ```rust,no_run
//! use stategraph_checkpoint::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, InMemorySaver,
//! };
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = InMemorySaver::new();
//!     let config = CheckpointConfig::new().with_thread_id("thread-1");
//!
//!     let saved = saver
//!         .put(&config, Checkpoint::empty(), CheckpointMetadata::new(), HashMap::new())
//!         .await?;
//!
//!     let tuple = saver.get_tuple(&saved).await?;
//!     assert!(tuple.is_some());
//!     Ok(())
//! }
//! ```
//!
//! Guarantees the engine relies on: `put` is append-only and durable before
//! it returns; records for different thread ids are independent; `get_tuple`
//! without a checkpoint id returns the latest record for the thread.

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    ChannelVersion, ChannelVersions, Checkpoint, CheckpointConfig, CheckpointId,
    CheckpointMetadata, CheckpointSource, CheckpointTuple, PendingWrite,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemorySaver;
pub use serializer::{BincodeSerializer, JsonSerializer, SnapshotSerializer};
pub use traits::{CheckpointSaver, CheckpointStream};
