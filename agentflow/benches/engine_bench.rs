//! Benchmarks for pipeline execution.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use agentflow::config::EngineConfig;
use agentflow::pipeline::EngineBuilder;
use agentflow::stages::{PluginDescriptor, PluginKind, Stage};
use agentflow::testing::RespondingPlugin;

fn engine_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");

    let engine = runtime.block_on(async {
        let config = EngineConfig::new().with_plugin(
            PluginDescriptor::new("greeter", PluginKind::Adapter).with_stages([Stage::Deliver]),
        );
        EngineBuilder::new(config)
            .plugin(Arc::new(RespondingPlugin::new("greeter", serde_json::json!("hi"))))
            .build()
            .await
            .expect("engine builds")
    });

    c.bench_function("single_iteration_run", |b| {
        b.iter(|| {
            let result =
                runtime.block_on(engine.execute(black_box("hello"), "bench-user", "bench"));
            black_box(result)
        })
    });
}

criterion_group!(benches, engine_benchmark);
criterion_main!(benches);
