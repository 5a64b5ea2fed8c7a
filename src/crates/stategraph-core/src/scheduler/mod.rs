//! The super-step scheduler.
//!
//! One logical thread of control drives the run: each super-step prepares
//! tasks from the active set, invokes them with bounded parallelism, waits
//! at the barrier, applies all writes through the channel policies in
//! deterministic order, checkpoints the result, and resolves the next
//! active set from the edge table. Super-steps are strictly sequential;
//! step N+1 never begins before step N's merge and checkpoint complete.
//!
//! ```text
//!   active set ──► prepare tasks ──► invoke (parallel, bounded)
//!                                          │  barrier
//!                                          ▼
//!   next active ◄── route edges ◄── apply writes ──► checkpoint
//! ```
//!
//! Submodules: [`task`] (prepared work items), [`algo`] (the deterministic
//! ordering, merge, and routing algorithms), [`loop_impl`] (the run state
//! machine).

pub mod algo;
pub mod loop_impl;
pub mod task;

pub use loop_impl::{RunOutcome, RunStatus, SuperStepLoop};
pub use task::ExecutableTask;
