use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use hdrhistogram::Histogram;
use rand::Rng;
use shot_gate::Gate;
use shot_gate::GateConfig;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower::service_fn;
use tower_gate::GateRejection;
use tower_gate::IdentityLimitLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn mock_lookup(user: String) -> Result<String, BoxError> {
    // Simulate real-world work (50ms of lookup latency)
    sleep(Duration::from_millis(50)).await;
    Ok(user)
}

#[derive(Default)]
struct RejectionCounter {
    too_many: usize,
    cancelled: usize,
    missing: usize,
    inner: usize,
    unknown: usize,
}

async fn run_load_test<S>(name: &str, svc: S, users: usize, total_reqs: usize)
where
    S: Service<String, Response = String, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send,
{
    let mut hist_elapsed = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();

    let mut tasks = JoinSet::new();
    let mut rejections = RejectionCounter::default();

    let start = Instant::now();

    let barrier = Arc::new(Barrier::new(total_reqs));

    for _ in 0..total_reqs {
        let local_svc = svc.clone();
        let bar = barrier.clone();
        let user = format!("user-{}", rand::rng().random_range(0..users));
        tasks.spawn(async move {
            bar.wait().await;
            let req_start = Instant::now();
            let res = local_svc.oneshot(user).await;
            (res, req_start.elapsed())
        });
    }

    let mut success_count = 0;

    while let Some(task) = tasks.join_next().await {
        let (res, elapsed) = task.expect("Task panicked");
        match res {
            Ok(_) => {
                success_count += 1;
                hist_elapsed.record(elapsed.as_micros() as u64).unwrap();
            }
            Err(e) => {
                if let Some(rejection) = e.downcast_ref::<GateRejection>() {
                    match rejection {
                        GateRejection::TooManyRequests => rejections.too_many += 1,
                        GateRejection::Cancelled => rejections.cancelled += 1,
                        GateRejection::MissingIdentity => rejections.missing += 1,
                        GateRejection::Inner(_) => rejections.inner += 1,
                    }
                } else {
                    rejections.unknown += 1;
                }
            }
        }
    }

    let total_duration = start.elapsed();
    let goodput = success_count as f64 / total_duration.as_secs_f64();

    println!("--- {} ---", name);
    println!("Total Duration:  {:.2?}", total_duration);
    println!("Success/Total:   {}/{}", success_count, total_reqs);
    println!("Success Rate:    {:.2} req/sec (Goodput)", goodput);

    if success_count > 0 {
        println!("P50 (Elapsed):   {}µs", hist_elapsed.value_at_quantile(0.5));
        println!(
            "P99 (Elapsed):   {}µs",
            hist_elapsed.value_at_quantile(0.99)
        );
    }

    let total_errors = rejections.too_many
        + rejections.cancelled
        + rejections.missing
        + rejections.inner
        + rejections.unknown;
    println!("Errors:          {}", total_errors);
    if total_errors > 0 {
        println!("  └─ TooMany:    {}", rejections.too_many);
        if rejections.cancelled > 0 {
            println!("  └─ Cancelled:  {}", rejections.cancelled);
        }
        if rejections.missing > 0 {
            println!("  └─ Missing:    {}", rejections.missing);
        }
        if rejections.inner > 0 {
            println!("  └─ Inner:      {}", rejections.inner);
        }
        if rejections.unknown > 0 {
            println!("  └─ Unknown:    {}", rejections.unknown);
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let total_reqs = 20_000;

    for (users, limit, timeout) in [
        (10usize, 5usize, Duration::from_millis(100)),
        (100, 5, Duration::from_millis(100)),
        (1_000, 20, Duration::from_millis(500)),
    ] {
        let config = GateConfig::new(NonZeroUsize::try_from(limit)?).with_acquire_timeout(timeout);
        let gate = Arc::new(Gate::new(config)?);
        let svc = IdentityLimitLayer::new(Arc::clone(&gate), |user: &String| Some(user.clone()))
            .layer(service_fn(mock_lookup));

        let name = format!("{users} users, limit {limit}, timeout {timeout:?}");
        run_load_test(&name, svc, users, total_reqs).await;

        info!(tracked = gate.tracked_identities(), "identities tracked after run");
        gate.close().await;
    }

    Ok(())
}
