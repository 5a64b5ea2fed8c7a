//! Graph construction and compilation.
//!
//! A [`StateGraph`] collects the three ingredients of a runnable graph: the
//! state schema (channels and their policies), the node registry, and the
//! edge table. [`StateGraph::compile`] validates the structure and freezes
//! it into an immutable [`CompiledGraph`]; every check failure is a
//! [`GraphError::GraphDefinition`] citing the offending key.
//!
//! Two reserved keys mark the boundary of the graph: [`START`] is the
//! virtual source whose outgoing edges resolve the entry node(s), and
//! [`END`] is the terminal marker a route may target to finish the run.
//!
//! ```rust,no_run
//! use stategraph_core::graph::{StateGraph, StateSchema, ChannelPolicy, END};
//! use serde_json::json;
//!
//! let schema = StateSchema::new()
//!     .channel("log", ChannelPolicy::Accumulate)
//!     .channel("done", ChannelPolicy::Overwrite);
//!
//! let mut graph = StateGraph::new(schema);
//! graph.add_node("work", |_state| async move { Ok(json!({"log": "worked"})) });
//! graph.set_entry("work");
//! graph.add_edge("work", END);
//! let compiled = graph.compile().unwrap();
//! ```

use crate::channels::{Channel, LastValueChannel, ReducerChannel, ReducerFn, TopicChannel};
use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::node::{FnNode, NodeExecutor, NodeSpec};
use crate::retry::RetryPolicy;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// Virtual source node; its outgoing edges resolve the entry.
pub const START: &str = "__start__";

/// Terminal marker; routing here completes the run.
pub const END: &str = "__end__";

/// Routing function: read-only state view to branch label.
pub type RouterFn = Arc<dyn Fn(&serde_json::Value) -> String + Send + Sync>;

/// Update policy for one channel.
#[derive(Clone)]
pub enum ChannelPolicy {
    /// New contribution replaces the current value
    Overwrite,
    /// Contributions append to a sequence; identity is the empty sequence
    Accumulate,
    /// Contributions fold into the current value with a registered operator
    Reduce(ReducerFn),
}

impl Debug for ChannelPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelPolicy::Overwrite => write!(f, "Overwrite"),
            ChannelPolicy::Accumulate => write!(f, "Accumulate"),
            ChannelPolicy::Reduce(_) => write!(f, "Reduce(<fn>)"),
        }
    }
}

/// One channel declaration: policy plus optional default value.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub policy: ChannelPolicy,
    pub default: Option<serde_json::Value>,
}

impl ChannelSpec {
    pub fn new(policy: ChannelPolicy) -> Self {
        Self {
            policy,
            default: None,
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Build the live channel for this spec, seeded with the default.
    pub(crate) fn build(&self) -> Result<Box<dyn Channel>> {
        let mut channel: Box<dyn Channel> = match &self.policy {
            ChannelPolicy::Overwrite => Box::new(LastValueChannel::new()),
            ChannelPolicy::Accumulate => Box::new(TopicChannel::new()),
            ChannelPolicy::Reduce(reducer) => Box::new(ReducerChannel::new(Arc::clone(reducer))),
        };
        if let Some(default) = &self.default {
            channel.restore(default.clone())?;
        }
        Ok(channel)
    }
}

/// Ordered mapping of channel name to channel declaration.
///
/// Declaration order is preserved; it fixes the iteration order of state
/// views and snapshots.
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    channels: Vec<(String, ChannelSpec)>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(mut self, name: impl Into<String>, policy: ChannelPolicy) -> Self {
        self.channels.push((name.into(), ChannelSpec::new(policy)));
        self
    }

    pub fn channel_with_default(
        mut self,
        name: impl Into<String>,
        policy: ChannelPolicy,
        default: serde_json::Value,
    ) -> Self {
        self.channels
            .push((name.into(), ChannelSpec::new(policy).with_default(default)));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ChannelSpec)> {
        self.channels.iter().map(|(n, s)| (n, s))
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// A directed connection in the edge table.
#[derive(Clone)]
pub enum Edge {
    /// Fixed next node
    Direct { source: String, target: String },
    /// Routing function over a declared, finite branch set
    Conditional {
        source: String,
        router: RouterFn,
        /// Branch label to destination key. The router must return one of
        /// these labels; anything else is an invalid route at runtime.
        branches: BTreeMap<String, String>,
    },
}

impl Edge {
    pub fn source(&self) -> &str {
        match self {
            Edge::Direct { source, .. } => source,
            Edge::Conditional { source, .. } => source,
        }
    }

    /// Every destination this edge can produce.
    pub fn destinations(&self) -> Vec<&str> {
        match self {
            Edge::Direct { target, .. } => vec![target.as_str()],
            Edge::Conditional { branches, .. } => {
                branches.values().map(String::as_str).collect()
            }
        }
    }
}

impl Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct { source, target } => {
                write!(f, "{} -> {}", source, target)
            }
            Edge::Conditional { source, branches, .. } => {
                write!(f, "{} -> ?{:?}", source, branches)
            }
        }
    }
}

/// Mutable graph under construction.
pub struct StateGraph {
    schema: StateSchema,
    nodes: HashMap<String, NodeSpec>,
    /// Edges in declaration order; this order drives deterministic
    /// scheduling and merge ordering.
    edges: Vec<Edge>,
}

impl StateGraph {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            nodes: HashMap::new(),
            edges: Vec::new(),
        }
    }

    /// Register a node under `key`.
    ///
    /// The closure receives the state view and returns a partial update.
    pub fn add_node<F, Fut>(&mut self, key: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let key = key.into();
        self.nodes
            .insert(key.clone(), NodeSpec::new(key, Arc::new(FnNode::new(f))));
        self
    }

    /// Register a node backed by an existing executor, e.g. one shared
    /// across several keys.
    pub fn add_node_executor(
        &mut self,
        key: impl Into<String>,
        executor: Arc<dyn NodeExecutor>,
    ) -> &mut Self {
        let key = key.into();
        self.nodes.insert(key.clone(), NodeSpec::new(key, executor));
        self
    }

    /// Attach a retry policy to an already-registered node.
    pub fn set_retry_policy(&mut self, key: &str, policy: RetryPolicy) -> &mut Self {
        if let Some(spec) = self.nodes.get_mut(key) {
            spec.retry_policy = Some(policy);
        }
        self
    }

    /// Unconditional edge.
    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>) -> &mut Self {
        self.edges.push(Edge::Direct {
            source: source.into(),
            target: target.into(),
        });
        self
    }

    /// Conditional edge: `router` maps the merged state to a branch label,
    /// and `branches` maps each declared label to a destination key.
    pub fn add_conditional_edges<F>(
        &mut self,
        source: impl Into<String>,
        router: F,
        branches: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> String + Send + Sync + 'static,
    {
        self.edges.push(Edge::Conditional {
            source: source.into(),
            router: Arc::new(router),
            branches: branches
                .into_iter()
                .map(|(label, dest)| (label.into(), dest.into()))
                .collect(),
        });
        self
    }

    /// Fixed entry node. Sugar for an edge from [`START`].
    pub fn set_entry(&mut self, key: impl Into<String>) -> &mut Self {
        self.add_edge(START, key)
    }

    /// Entry resolved by routing the initial state. Sugar for a conditional
    /// edge from [`START`].
    pub fn set_conditional_entry<F>(
        &mut self,
        router: F,
        branches: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> String + Send + Sync + 'static,
    {
        self.add_conditional_edges(START, router, branches)
    }

    /// Validate the structure and freeze it into an executable graph.
    pub fn compile(self) -> Result<CompiledGraph> {
        self.validate()?;
        Ok(CompiledGraph::new(Arc::new(GraphCore {
            schema: self.schema,
            nodes: self.nodes,
            edges: self.edges,
        })))
    }

    fn validate(&self) -> Result<()> {
        if self.schema.is_empty() {
            return Err(GraphError::definition(
                "schema",
                "state schema declares no channels",
            ));
        }

        for key in self.nodes.keys() {
            if key == START || key == END {
                return Err(GraphError::definition(
                    key.clone(),
                    "node key collides with a reserved marker",
                ));
            }
            if key.is_empty() {
                return Err(GraphError::definition("", "node key is empty"));
            }
        }

        // Every edge endpoint must name a registered node or a marker.
        for edge in &self.edges {
            let source = edge.source();
            if source != START && !self.nodes.contains_key(source) {
                return Err(GraphError::definition(
                    source,
                    "edge source is not a registered node",
                ));
            }
            for dest in edge.destinations() {
                if dest != END && !self.nodes.contains_key(dest) {
                    return Err(GraphError::definition(
                        dest,
                        "edge destination is not a registered node",
                    ));
                }
                if dest == START {
                    return Err(GraphError::definition(
                        dest,
                        "edges may not target the start marker",
                    ));
                }
            }
        }

        // Exactly one entry resolution: a single edge out of START.
        let entry_edges = self
            .edges
            .iter()
            .filter(|edge| edge.source() == START)
            .count();
        match entry_edges {
            0 => {
                return Err(GraphError::definition(
                    START,
                    "no entry point: add set_entry or set_conditional_entry",
                ))
            }
            1 => {}
            n => {
                return Err(GraphError::definition(
                    START,
                    format!("ambiguous entry point: {} edges out of the start marker", n),
                ))
            }
        }

        // Reachability from START over all possible destinations.
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(START);
        while let Some(current) = queue.pop_front() {
            for edge in self.edges.iter().filter(|e| e.source() == current) {
                for dest in edge.destinations() {
                    if dest != END && reachable.insert(dest) {
                        queue.push_back(dest);
                    }
                }
            }
        }
        for key in self.nodes.keys() {
            if !reachable.contains(key.as_str()) {
                return Err(GraphError::definition(
                    key.clone(),
                    "node is unreachable from the start marker",
                ));
            }
        }

        Ok(())
    }
}

/// Validated, immutable graph data shared by the scheduler.
pub struct GraphCore {
    pub schema: StateSchema,
    pub nodes: HashMap<String, NodeSpec>,
    pub edges: Vec<Edge>,
}

impl GraphCore {
    pub fn node(&self, key: &str) -> Option<&NodeSpec> {
        self.nodes.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_channel_schema() -> StateSchema {
        StateSchema::new()
            .channel("log", ChannelPolicy::Accumulate)
            .channel("done", ChannelPolicy::Overwrite)
    }

    fn noop_graph() -> StateGraph {
        let mut graph = StateGraph::new(two_channel_schema());
        graph.add_node("work", |_| async { Ok(json!(null)) });
        graph
    }

    #[test]
    fn test_compile_minimal_graph() {
        let mut graph = noop_graph();
        graph.set_entry("work");
        graph.add_edge("work", END);
        assert!(graph.compile().is_ok());
    }

    #[test]
    fn test_empty_schema_rejected() {
        let mut graph = StateGraph::new(StateSchema::new());
        graph.add_node("work", |_| async { Ok(json!(null)) });
        graph.set_entry("work");
        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::GraphDefinition { ref key, .. } if key == "schema"));
    }

    #[test]
    fn test_reserved_key_rejected() {
        let mut graph = StateGraph::new(two_channel_schema());
        graph.add_node(END, |_| async { Ok(json!(null)) });
        graph.set_entry(END);
        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::GraphDefinition { ref key, .. } if key == END));
    }

    #[test]
    fn test_dangling_edge_destination_cites_key() {
        let mut graph = noop_graph();
        graph.set_entry("work");
        graph.add_edge("work", "missing");
        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::GraphDefinition { ref key, .. } if key == "missing"));
    }

    #[test]
    fn test_dangling_conditional_branch_cites_key() {
        let mut graph = noop_graph();
        graph.set_entry("work");
        graph.add_conditional_edges(
            "work",
            |_state| "stop".to_string(),
            [("stop", END), ("again", "nowhere")],
        );
        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::GraphDefinition { ref key, .. } if key == "nowhere"));
    }

    #[test]
    fn test_missing_entry_rejected() {
        let mut graph = noop_graph();
        graph.add_edge("work", END);
        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::GraphDefinition { ref key, .. } if key == START));
    }

    #[test]
    fn test_ambiguous_entry_rejected() {
        let mut graph = noop_graph();
        graph.add_node("other", |_| async { Ok(json!(null)) });
        graph.set_entry("work");
        graph.set_entry("other");
        graph.add_edge("work", END);
        graph.add_edge("other", END);
        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::GraphDefinition { ref key, .. } if key == START));
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let mut graph = noop_graph();
        graph.add_node("island", |_| async { Ok(json!(null)) });
        graph.set_entry("work");
        graph.add_edge("work", END);
        graph.add_edge("island", END);
        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::GraphDefinition { ref key, .. } if key == "island"));
    }

    #[test]
    fn test_cycles_are_legal() {
        let mut graph = StateGraph::new(two_channel_schema());
        graph.add_node("a", |_| async { Ok(json!(null)) });
        graph.add_node("b", |_| async { Ok(json!(null)) });
        graph.set_entry("a");
        graph.add_conditional_edges(
            "a",
            |_state| "next".to_string(),
            [("next", "b"), ("stop", END)],
        );
        graph.add_edge("b", "a");
        assert!(graph.compile().is_ok());
    }

    #[test]
    fn test_conditional_entry() {
        let mut graph = noop_graph();
        graph.set_conditional_entry(|_state| "go".to_string(), [("go", "work")]);
        graph.add_edge("work", END);
        assert!(graph.compile().is_ok());
    }
}
