use std::fs;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use toggle_engine::{Context, Engine, EngineConfig};

fn criterion_benchmark(c: &mut Criterion) {
    let state = fs::read_to_string("test-data/features.json").unwrap();
    let engine = {
        let mut config = EngineConfig::new();
        config.record_metrics(false);
        config.to_engine()
    };
    engine.load_state(&state).unwrap();

    {
        let mut group = c.benchmark_group("load");
        group.throughput(Throughput::Bytes(state.len() as u64));
        group.bench_function("load_state", |b| {
            b.iter(|| engine.load_state(black_box(&state)))
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("rollout-50");
        group.throughput(Throughput::Elements(1));
        let context = Context::new().user_id("u4");
        group.bench_function("is_enabled", |b| {
            b.iter(|| engine.is_enabled(black_box("rollout-50"), black_box(&context)))
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("beta-segment");
        group.throughput(Throughput::Elements(1));
        let context = Context::new()
            .property("region", "eu")
            .property("plan", "pro");
        group.bench_function("is_enabled", |b| {
            b.iter(|| engine.is_enabled(black_box("beta-segment"), black_box(&context)))
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("colors");
        group.throughput(Throughput::Elements(1));
        let context = Context::new().user_id("u2");
        group.bench_function("get_variant", |b| {
            b.iter(|| engine.get_variant(black_box("colors"), black_box(&context)))
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("all-toggles");
        let context = Context::new()
            .user_id("alice")
            .app_name("mobile")
            .property("appVersion", "2.4.1");
        let toggles = engine.snapshot().len() as u64;
        group.throughput(Throughput::Elements(toggles));
        group.bench_function("resolve_all", |b| {
            b.iter(|| engine.resolve_all(black_box(&context)))
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("metrics");
        group.throughput(Throughput::Elements(1));
        let counting = Engine::new();
        counting.load_state(&state).unwrap();
        let context = Context::new().user_id("u1");
        group.bench_function("is_enabled_counted", |b| {
            b.iter(|| counting.is_enabled(black_box("rollout-50"), black_box(&context)))
        });
        group.bench_function("drain", |b| b.iter(|| counting.drain_metrics()));
        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
