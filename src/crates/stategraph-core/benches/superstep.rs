use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use stategraph_core::{
    ChannelPolicy, CompiledGraph, InMemorySaver, RunConfig, StateGraph, StateSchema, END,
};
use std::sync::Arc;

fn linear_pipeline(nodes: usize) -> CompiledGraph {
    let schema = StateSchema::new().channel("log", ChannelPolicy::Accumulate);
    let mut graph = StateGraph::new(schema);
    for i in 0..nodes {
        let key = format!("n{}", i);
        graph.add_node(key.clone(), move |_| async move { Ok(json!({"log": 1})) });
        if i == 0 {
            graph.set_entry(key);
        } else {
            graph.add_edge(format!("n{}", i - 1), key);
        }
    }
    graph.add_edge(format!("n{}", nodes - 1), END);
    graph.compile().unwrap()
}

fn fan_out(width: usize) -> CompiledGraph {
    let schema = StateSchema::new().channel("log", ChannelPolicy::Accumulate);
    let mut graph = StateGraph::new(schema);
    graph.add_node("fan", |_| async { Ok(json!(null)) });
    graph.set_entry("fan");
    for i in 0..width {
        let key = format!("w{}", i);
        graph.add_node(key.clone(), move |_| async move { Ok(json!({"log": 1})) });
        graph.add_edge("fan", key.clone());
        graph.add_edge(key, END);
    }
    graph.compile().unwrap()
}

fn linear_run_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let graph = linear_pipeline(10);

    c.bench_function("10-node linear run", |b| {
        b.to_async(&runtime).iter(|| async {
            graph
                .invoke_with_config(None, RunConfig::default().with_recursion_limit(32))
                .await
                .unwrap();
        });
    });
}

fn fan_out_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let graph = fan_out(32);

    c.bench_function("32-wide fan-out step", |b| {
        b.to_async(&runtime).iter(|| async {
            graph.invoke(None).await.unwrap();
        });
    });
}

fn checkpointed_run_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("10-node linear run with checkpointing", |b| {
        b.to_async(&runtime).iter(|| async {
            let graph = linear_pipeline(10).with_checkpointer(Arc::new(InMemorySaver::new()));
            graph
                .invoke_with_config(
                    None,
                    RunConfig::default()
                        .with_thread_id("bench")
                        .with_recursion_limit(32),
                )
                .await
                .unwrap();
        });
    });
}

criterion_group!(
    benches,
    linear_run_benchmark,
    fan_out_benchmark,
    checkpointed_run_benchmark
);
criterion_main!(benches);
