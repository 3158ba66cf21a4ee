use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use futures::future::join_all;

use shot_gate::Gate;
use shot_gate::GateConfig;

fn make_gate(rt: &tokio::runtime::Runtime, limit: usize) -> Arc<Gate> {
    let config = GateConfig::new(NonZeroUsize::new(limit).unwrap())
        .with_acquire_timeout(Duration::from_secs(5));
    Arc::new(rt.block_on(async { Gate::new(config) }).unwrap())
}

fn bench_uncontended(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let gate = make_gate(&rt, 16);
    let mut group = c.benchmark_group("gate/uncontended");

    group.bench_function("acquire-release", |b| {
        b.to_async(&rt).iter(|| {
            let gate = Arc::clone(&gate);
            async move {
                gate.acquire("micky").await.unwrap();
                black_box(gate.release("micky")).unwrap();
            }
        });
    });

    group.bench_function("guard", |b| {
        b.to_async(&rt).iter(|| {
            let gate = Arc::clone(&gate);
            async move {
                let guard = gate.acquire_guard("micky").await.unwrap();
                drop(black_box(guard));
            }
        });
    });

    group.finish();
}

fn bench_many_identities(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("gate/identities");

    for identities in [1usize, 16, 256].iter() {
        let gate = make_gate(&rt, 4);
        let names: Arc<Vec<String>> =
            Arc::new((0..*identities).map(|i| format!("user-{i}")).collect());

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{identities}-identities")),
            identities,
            |b, _| {
                b.to_async(&rt).iter_custom(|iters| {
                    let gate = Arc::clone(&gate);
                    let names = Arc::clone(&names);
                    async move {
                        let start = Instant::now();
                        let tasks = (0..64).map(|t| {
                            let gate = Arc::clone(&gate);
                            let names = Arc::clone(&names);
                            tokio::spawn(async move {
                                for i in 0..iters as usize {
                                    let name = &names[(t + i) % names.len()];
                                    gate.acquire(name.as_str()).await.unwrap();
                                    gate.release(name.as_str()).unwrap();
                                }
                            })
                        });
                        join_all(tasks).await;
                        start.elapsed()
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_many_identities);
criterion_main!(benches);
