//! Benchmarks for lock acquisition under varying contention
//!
//! The uncontended path should stay in the low microseconds; contended
//! runs show the cost of queueing and handoff between waiters.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use slotwarden::application::CoordinatorOptions;
use slotwarden::coordination::{FairnessPolicy, ResourceLockTable};
use slotwarden::domain::ResourceKey;
use slotwarden::Coordinator;
use std::hint::black_box;
use tokio::runtime::Runtime;
use tokio::task::JoinSet;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("runtime builds")
}

fn key(raw: &str) -> ResourceKey {
    ResourceKey::try_new(raw).expect("valid key")
}

/// Acquire and release one key with no competition
fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");

    group.bench_function("try_acquire_release", |b| {
        let table = ResourceLockTable::default();
        let slot = key("slot:bench");
        b.iter(|| {
            let acquisition = table.try_acquire(black_box(&slot));
            table.release_lock(&slot);
            black_box(acquisition)
        });
    });

    let rt = runtime();
    group.bench_function("with_lock", |b| {
        let coordinator = Coordinator::default();
        let slot = key("slot:bench");
        b.to_async(&rt).iter(|| {
            let coordinator = coordinator.clone();
            let slot = slot.clone();
            async move {
                black_box(
                    coordinator
                        .with_lock(&slot, |version| async move { Ok::<_, String>(version) })
                        .await,
                )
            }
        });
    });

    group.finish();
}

/// Many tasks racing for the same key
fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_with_lock");
    group.sample_size(30);
    let rt = runtime();

    for fairness in [FairnessPolicy::Fifo, FairnessPolicy::Barging] {
        for callers in [4_usize, 16, 64] {
            group.bench_with_input(
                BenchmarkId::new(format!("{fairness:?}"), callers),
                &callers,
                |b, &callers| {
                    b.to_async(&rt).iter(|| async move {
                        let coordinator = Coordinator::new(CoordinatorOptions {
                            fairness,
                            ..CoordinatorOptions::default()
                        });
                        let slot = key("slot:hot");
                        let mut tasks = JoinSet::new();
                        for _ in 0..callers {
                            let coordinator = coordinator.clone();
                            let slot = slot.clone();
                            tasks.spawn(async move {
                                coordinator
                                    .with_lock(&slot, |_| async { Ok::<_, String>(()) })
                                    .await
                                    .is_success()
                            });
                        }
                        while let Some(joined) = tasks.join_next().await {
                            black_box(joined.ok());
                        }
                    });
                },
            );
        }
    }

    group.finish();
}

/// Independent keys should not contend with each other
fn bench_independent_keys(c: &mut Criterion) {
    let rt = runtime();
    let keys: Vec<_> = (0..64).map(|n| key(&format!("seat:{n}"))).collect();

    c.bench_function("independent_keys_64", |b| {
        b.to_async(&rt).iter(|| {
            let keys = keys.clone();
            async move {
                let coordinator = Coordinator::default();
                let mut tasks = JoinSet::new();
                for slot in keys {
                    let coordinator = coordinator.clone();
                    tasks.spawn(async move {
                        coordinator
                            .with_lock(&slot, |_| async { Ok::<_, String>(()) })
                            .await
                            .is_success()
                    });
                }
                while let Some(joined) = tasks.join_next().await {
                    black_box(joined.ok());
                }
            }
        });
    });
}

criterion_group!(
    benches,
    bench_uncontended,
    bench_contended,
    bench_independent_keys
);

criterion_main!(benches);
