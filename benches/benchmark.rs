use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hcaptcha_pool::{site_link, MemoryStore, Outcome, ProxyConfig, ResultStore, SolveRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use uuid::Uuid;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn benchmark_proxy_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("proxy");
    configure_fast_group(&mut group);

    let specs = vec![
        "1.2.3.4:8080",
        "http:1.2.3.4:8080:user:pass",
        "not-a-proxy",
    ];

    group.bench_function("parse", |b| {
        b.iter(|| {
            for spec in &specs {
                black_box(ProxyConfig::parse(spec));
            }
        });
    });

    group.finish();
}

fn benchmark_site_link(c: &mut Criterion) {
    let mut group = c.benchmark_group("site_link");
    configure_fast_group(&mut group);

    group.bench_function("build", |b| {
        b.iter(|| {
            let _ = black_box(site_link("914e63b4-ac20-4c24-bc92-cdb6950ccfde"));
        });
    });

    group.finish();
}

fn benchmark_record_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve_record");
    configure_fast_group(&mut group);

    let record = SolveRecord {
        token: "P1_eyJ0eXAiOiJKV1QiLCJhbGciOiJIUzI1NiJ9".to_string(),
        elapsed_time: 12.345,
        error: None,
    };
    let encoded = serde_json::to_string(&record).unwrap();

    group.bench_function("serialize", |b| {
        b.iter(|| black_box(serde_json::to_string(&record).unwrap()));
    });

    group.bench_function("deserialize", |b| {
        b.iter(|| black_box(serde_json::from_str::<SolveRecord>(&encoded).unwrap()));
    });

    group.finish();
}

fn benchmark_result_store(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("result_store");
    configure_fast_group(&mut group);

    let store = rt.block_on(ResultStore::load(Arc::new(MemoryStore::new())));

    group.bench_function("pending_then_outcome", |b| {
        b.to_async(&rt).iter(|| async {
            let id = Uuid::new_v4();
            store.put_pending(id).unwrap();
            store
                .put_outcome(id, Outcome::success("token", Duration::from_millis(1500)))
                .await
                .unwrap();
            black_box(store.get(&id));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_proxy_parsing,
    benchmark_site_link,
    benchmark_record_serialization,
    benchmark_result_store
);
criterion_main!(benches);
