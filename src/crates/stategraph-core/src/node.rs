//! Node invocables: the units of work the scheduler drives.
//!
//! A node receives a read-only view of the current state (a JSON object of
//! channel values) and returns a partial update: a JSON object touching a
//! subset of channels. Nodes never mutate state directly; the scheduler
//! applies their outputs through the channel policies.
//!
//! Contract obligations for implementors: treat the input as immutable, do
//! not retain it across invocations, and keep side effects idempotent with
//! respect to resume (the engine guarantees it will not re-invoke a node
//! whose output is already in a loaded checkpoint, but a crash before the
//! checkpoint write can repeat the invocation).

use crate::error::Result;
use crate::retry::RetryPolicy;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a node invocation
pub type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'a>>;

/// An invocable unit registered under a node key.
pub trait NodeExecutor: Send + Sync {
    /// Invoke with a read-only state view; return a partial update.
    ///
    /// The returned value must be a JSON object mapping channel names to
    /// contributions, or `null` for "no writes".
    fn invoke(&self, state: serde_json::Value) -> NodeFuture<'_>;
}

/// Adapter turning an async closure into a [`NodeExecutor`].
pub struct FnNode<F> {
    f: F,
}

impl<F, Fut> FnNode<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> NodeExecutor for FnNode<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    fn invoke(&self, state: serde_json::Value) -> NodeFuture<'_> {
        Box::pin((self.f)(state))
    }
}

/// A registered node: key, invocable, and optional retry policy.
///
/// Immutable after graph construction. The same underlying invocable may be
/// registered under several keys.
#[derive(Clone)]
pub struct NodeSpec {
    pub key: String,
    pub executor: Arc<dyn NodeExecutor>,
    pub retry_policy: Option<RetryPolicy>,
}

impl NodeSpec {
    pub fn new(key: impl Into<String>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            key: key.into(),
            executor,
            retry_policy: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

impl Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("key", &self.key)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}
