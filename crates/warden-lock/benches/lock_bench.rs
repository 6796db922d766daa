// Benchmarks for lock acquire/release over the in-memory store
// Measures the uncontended round trip and the cost of a contended attempt

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use warden_lock::{LockConfig, LockManager, LockName, MemoryStore};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn manager() -> LockManager {
    LockManager::new(Arc::new(MemoryStore::new()), LockConfig::default())
}

fn bench_acquire_release(c: &mut Criterion) {
    let rt = runtime();
    let manager = manager();
    let name = LockName::new("product_001").unwrap();

    c.bench_function("acquire_release", |b| {
        b.to_async(&rt).iter(|| async {
            let handle = manager.acquire(black_box(&name)).await.unwrap();
            manager.release(handle).await.unwrap()
        })
    });
}

fn bench_contended_attempt(c: &mut Criterion) {
    let rt = runtime();
    let manager = manager();
    let name = LockName::new("product_001").unwrap();
    let _holder = rt.block_on(manager.acquire(&name)).unwrap();

    c.bench_function("try_acquire_contended", |b| {
        b.to_async(&rt)
            .iter(|| async { manager.try_acquire(black_box(&name)).await.unwrap() })
    });
}

fn bench_run_exclusive(c: &mut Criterion) {
    let rt = runtime();
    let manager = manager();
    let mut group = c.benchmark_group("run_exclusive");

    for watchdog in [false, true] {
        let name = LockName::new("product_001").unwrap();
        let options = manager.default_options().with_watchdog(watchdog);
        group.bench_with_input(
            BenchmarkId::new("watchdog", watchdog),
            &options,
            |b, options| {
                b.to_async(&rt).iter(|| async {
                    manager
                        .run_exclusive_with(&name, *options, |_| async { black_box(1u64) })
                        .await
                        .unwrap()
                })
            },
        );
    }

    group.finish();
}

fn bench_distinct_names(c: &mut Criterion) {
    let rt = runtime();
    let manager = manager();
    let names: Vec<LockName> = (0..1000)
        .map(|i| LockName::new(format!("product_{:03}", i)).unwrap())
        .collect();

    c.bench_function("acquire_release_distinct_names", |b| {
        let mut next = 0usize;
        b.to_async(&rt).iter(|| {
            let name = &names[next % names.len()];
            next += 1;
            let manager = &manager;
            async move {
                let handle = manager.acquire(name).await.unwrap();
                manager.release(handle).await.unwrap()
            }
        })
    });
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_contended_attempt,
    bench_run_exclusive,
    bench_distinct_names,
);
criterion_main!(benches);
