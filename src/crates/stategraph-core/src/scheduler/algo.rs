//! Deterministic scheduling and merge algorithms.
//!
//! Everything order-sensitive lives here:
//!
//! - the state view handed to nodes (channel values in schema order)
//! - task preparation from the active set
//! - the write merge: contributions grouped per channel and applied in
//!   task order, never completion order
//! - next-active-set resolution: edges evaluated in declaration order,
//!   ties broken by destination-key lexical order, duplicates dropped
//!
//! Keeping these pure functions separate from the loop makes the
//! determinism properties directly testable.

use crate::error::{GraphError, Result};
use crate::channels::Channel;
use crate::graph::{Edge, GraphCore, END, START};
use crate::scheduler::task::{ExecutableTask, TaskWrites};
use std::collections::HashMap;

/// Key under which a resume payload is surfaced in a state view.
pub const RESUME_KEY: &str = "__resume__";

/// Build the read-only state view: a JSON object of every available
/// channel's value, in schema declaration order. Channels that were never
/// written and have no default are absent.
pub fn state_view(
    core: &GraphCore,
    channels: &HashMap<String, Box<dyn Channel>>,
) -> serde_json::Value {
    let mut view = serde_json::Map::new();
    for (name, _spec) in core.schema.iter() {
        if let Some(value) = channels.get(name).and_then(|channel| channel.get()) {
            view.insert(name.clone(), value);
        }
    }
    serde_json::Value::Object(view)
}

/// Prepare the executable tasks for one super-step.
///
/// The active set is already in deterministic order; each task records its
/// position so the merge can honor it. A resume payload, when present, is
/// added to every task input under [`RESUME_KEY`].
pub fn prepare_tasks(
    core: &GraphCore,
    active: &[String],
    view: &serde_json::Value,
    resume_value: Option<&serde_json::Value>,
) -> Result<Vec<ExecutableTask>> {
    let mut tasks = Vec::with_capacity(active.len());
    for (order, node_key) in active.iter().enumerate() {
        let spec = core.node(node_key).ok_or_else(|| {
            GraphError::definition(node_key.clone(), "active set names an unregistered node")
        })?;

        let mut input = view.clone();
        if let (Some(resume), serde_json::Value::Object(map)) = (resume_value, &mut input) {
            map.insert(RESUME_KEY.to_string(), resume.clone());
        }

        tasks.push(
            ExecutableTask::new(node_key.clone(), input, spec.executor.clone(), order)
                .with_retry_policy(spec.retry_policy.clone()),
        );
    }
    Ok(tasks)
}

/// Validate a node's partial update and flatten it into channel writes.
///
/// `null` means "no writes". Anything else must be an object whose keys
/// are declared channels.
pub fn collect_writes(
    core: &GraphCore,
    task_id: &str,
    node: &str,
    order: usize,
    output: serde_json::Value,
) -> Result<TaskWrites> {
    let writes = match output {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::Object(map) => {
            let mut writes = Vec::with_capacity(map.len());
            for (channel, value) in map {
                if !core.schema.contains(&channel) {
                    return Err(GraphError::state(format!(
                        "node '{}' wrote to undeclared channel '{}'",
                        node, channel
                    )));
                }
                writes.push((channel, value));
            }
            writes
        }
        other => {
            return Err(GraphError::state(format!(
                "node '{}' returned {} instead of a partial update object",
                node, other
            )))
        }
    };

    Ok(TaskWrites {
        task_id: task_id.to_string(),
        node: node.to_string(),
        order,
        writes,
    })
}

/// Apply one super-step's writes through the channel policies.
///
/// Contributions are grouped per channel in task order (the deterministic
/// merge order), then each channel absorbs its group in a single update.
/// Returns the names of channels that changed, in schema order.
pub fn apply_writes(
    core: &GraphCore,
    channels: &mut HashMap<String, Box<dyn Channel>>,
    mut task_writes: Vec<TaskWrites>,
) -> Result<Vec<String>> {
    task_writes.sort_by_key(|writes| writes.order);

    let mut grouped: HashMap<&str, Vec<serde_json::Value>> = HashMap::new();
    for task in &task_writes {
        for (channel, value) in &task.writes {
            grouped.entry(channel.as_str()).or_default().push(value.clone());
        }
    }

    let mut updated = Vec::new();
    for (name, _spec) in core.schema.iter() {
        if let Some(values) = grouped.remove(name.as_str()) {
            let channel = channels.get_mut(name).ok_or_else(|| {
                GraphError::state(format!("channel '{}' missing from live state", name))
            })?;
            if channel.update(values)? {
                updated.push(name.clone());
            }
        }
    }
    Ok(updated)
}

/// Resolve the next active set from the nodes that just ran.
///
/// Edges are evaluated in declaration order against the freshly merged
/// state; the resulting destinations are ordered by (edge declaration
/// index, destination key) and de-duplicated keeping the earliest
/// occurrence. The terminal marker is dropped from the set; an empty
/// result means the run is done.
pub fn next_active_set(
    core: &GraphCore,
    ran: &[String],
    view: &serde_json::Value,
) -> Result<Vec<String>> {
    let mut triggered: Vec<(usize, String)> = Vec::new();

    for (edge_index, edge) in core.edges.iter().enumerate() {
        if !ran.iter().any(|node| node == edge.source()) {
            continue;
        }
        match edge {
            Edge::Direct { target, .. } => {
                triggered.push((edge_index, target.clone()));
            }
            Edge::Conditional {
                source,
                router,
                branches,
            } => {
                let label = router(view);
                let destination = branches.get(&label).ok_or_else(|| {
                    GraphError::InvalidRoute {
                        node: source.clone(),
                        branch: label.clone(),
                    }
                })?;
                triggered.push((edge_index, destination.clone()));
            }
        }
    }

    triggered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut next = Vec::new();
    for (_, destination) in triggered {
        if destination == END {
            continue;
        }
        if !next.contains(&destination) {
            next.push(destination);
        }
    }
    Ok(next)
}

/// Resolve the entry active set against the initial state.
pub fn entry_active_set(core: &GraphCore, view: &serde_json::Value) -> Result<Vec<String>> {
    next_active_set(core, &[START.to_string()], view)
}
