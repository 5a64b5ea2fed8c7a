use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stategraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
    InMemorySaver,
};
use std::collections::HashMap;

fn sample_checkpoint(step: i64) -> Checkpoint {
    let mut checkpoint = Checkpoint::empty();
    checkpoint
        .channel_values
        .insert("log".to_string(), serde_json::json!(["a", "b", "c"]));
    checkpoint
        .channel_values
        .insert("step".to_string(), serde_json::json!(step));
    checkpoint.active_set = vec!["worker".to_string()];
    checkpoint
}

fn checkpoint_put_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("checkpoint put", |b| {
        b.to_async(&runtime).iter(|| async {
            let saver = InMemorySaver::new();
            let config = CheckpointConfig::new().with_thread_id("bench-thread");
            let metadata = CheckpointMetadata::new()
                .with_source(CheckpointSource::Loop)
                .with_step(0);

            saver
                .put(
                    &config,
                    black_box(sample_checkpoint(0)),
                    black_box(metadata),
                    HashMap::new(),
                )
                .await
                .unwrap();
        });
    });
}

fn checkpoint_get_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("checkpoint get latest of 100", |b| {
        b.to_async(&runtime).iter(|| async {
            let saver = InMemorySaver::new();
            let config = CheckpointConfig::new().with_thread_id("bench-thread");
            for step in 0..100 {
                let metadata = CheckpointMetadata::new()
                    .with_source(CheckpointSource::Loop)
                    .with_step(step);
                saver
                    .put(&config, sample_checkpoint(step), metadata, HashMap::new())
                    .await
                    .unwrap();
            }
            saver.get_tuple(black_box(&config)).await.unwrap();
        });
    });
}

criterion_group!(benches, checkpoint_put_benchmark, checkpoint_get_benchmark);
criterion_main!(benches);
