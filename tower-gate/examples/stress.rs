use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use shot_gate::Gate;
use shot_gate::GateConfig;
use tokio::time::sleep;
use tower::Layer;
use tower::ServiceExt;
use tower_gate::GateRejection;
use tower_gate::IdentityLimitLayer;

/// Fire a burst of requests for a handful of users through a gated service.
#[derive(Parser, Debug)]
struct Args {
    /// Distinct users sending requests
    #[arg(long, default_value_t = 3)]
    users: usize,

    /// Requests sent per user
    #[arg(long, default_value_t = 10)]
    requests: usize,

    /// Concurrent requests allowed per user
    #[arg(long, default_value_t = 5)]
    limit: usize,

    /// How long each request holds its permit
    #[arg(long, value_parser = humantime::parse_duration, default_value = "200ms")]
    hold: Duration,

    /// How long a request waits for a permit
    #[arg(long, value_parser = humantime::parse_duration, default_value = "50ms")]
    timeout: Duration,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // 1. Setup Gate
    let limit = args.limit.try_into().expect("limit must be non-zero");
    let config = GateConfig::new(limit).with_acquire_timeout(args.timeout);
    let gate = Arc::new(Gate::new(config).expect("valid gate configuration"));

    // 2. Define a "Work" service
    let hold = args.hold;
    let service = tower::service_fn(move |user: String| async move {
        sleep(hold).await;
        Ok::<String, tower::BoxError>(format!("served {user}"))
    });

    let gated = IdentityLimitLayer::new(Arc::clone(&gate), |user: &String| Some(user.clone()))
        .layer(service);

    println!("🚀 Starting Stress Test...");
    println!(
        "Users: {}, Requests/user: {}, Limit: {}, Hold: {:?}, Acquire timeout: {:?}\n",
        args.users, args.requests, args.limit, args.hold, args.timeout
    );

    // 3. Fire every request at once
    let mut tasks = Vec::new();
    for u in 0..args.users {
        for i in 0..args.requests {
            let svc = gated.clone();
            let user = format!("user-{u}");
            let call: futures::future::BoxFuture<'static, Result<String, tower::BoxError>> =
                Box::pin(svc.oneshot(user.clone()));
            tasks.push(tokio::spawn(async move {
                match call.await {
                    Ok(resp) => println!("[{user} #{i:03}] ✅ {resp}"),
                    Err(e) => {
                        if let Some(rejection) = e.downcast_ref::<GateRejection>() {
                            println!("[{user} #{i:03}] ❌ Gate Rejected: {rejection}");
                        } else {
                            println!("[{user} #{i:03}] 💥 Unexpected Error: {e}");
                        }
                    }
                }
            }));
        }
    }

    // Wait for all requests to finish
    for t in tasks {
        let _ = t.await;
    }

    println!("\nIdentities tracked: {}", gate.tracked_identities());
    gate.close().await;
}
