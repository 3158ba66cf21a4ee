use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use criterion::BenchmarkGroup;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::measurement::WallTime;
use futures::stream::FuturesUnordered;
use futures::stream::StreamExt;
use shot_gate::Gate;
use shot_gate::GateConfig;
use tower::BoxError;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tower::service_fn;
use tower::util::BoxCloneSyncService;
use tower_gate::ServiceBuilderExt;

// --- HELPERS & TYPES ---

type BenchService = BoxCloneSyncService<String, String, BoxError>;

async fn echo_handler(user: String) -> Result<String, BoxError> {
    Ok(user)
}

fn user_of(user: &String) -> Option<String> {
    Some(user.clone())
}

fn gated(rt: &tokio::runtime::Runtime, limit: usize) -> BenchService {
    let config = GateConfig::new(NonZeroUsize::new(limit).unwrap())
        .with_acquire_timeout(Duration::from_secs(5));
    let gate: Arc<Gate> = Arc::new(rt.block_on(async { Gate::new(config) }).unwrap());

    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .identity_limit(gate, user_of)
            .service(service_fn(echo_handler)),
    )
}

/// Generic runner for single-call overhead benchmarks
fn bench_overhead(
    group: &mut BenchmarkGroup<WallTime>,
    rt: &tokio::runtime::Runtime,
    id: &str,
    svc: BenchService,
) {
    group.bench_function(id, |b| {
        b.to_async(rt).iter(|| {
            let mut s = svc.clone();
            async move {
                let res = s.ready().await.unwrap().call("micky".to_string()).await;
                black_box(res)
            }
        });
    });
}

/// Generic runner for burst benchmarks spread over several users
fn bench_burst(
    group: &mut BenchmarkGroup<WallTime>,
    rt: &tokio::runtime::Runtime,
    id: &str,
    svc: BenchService,
    users: usize,
) {
    group.bench_function(id, |b| {
        b.to_async(rt).iter(|| {
            let svc = svc.clone();
            async move {
                let mut calls = (0..100)
                    .map(|i| svc.clone().oneshot(format!("user-{}", i % users)))
                    .collect::<FuturesUnordered<_>>();
                while let Some(res) = calls.next().await {
                    black_box(res).unwrap();
                }
            }
        });
    });
}

fn bench_layers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("overhead");
    bench_overhead(
        &mut group,
        &rt,
        "raw",
        BoxCloneSyncService::new(service_fn(echo_handler)),
    );
    bench_overhead(&mut group, &rt, "gated", gated(&rt, 8));
    group.finish();

    let mut group = c.benchmark_group("burst");
    for users in [1, 10, 100] {
        bench_burst(
            &mut group,
            &rt,
            &format!("{users}-users"),
            gated(&rt, 100),
            users,
        );
    }
    group.finish();
}

criterion_group!(benches, bench_layers);
criterion_main!(benches);
