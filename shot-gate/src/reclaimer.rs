use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio::time::interval_at;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;

use crate::Identity;
use crate::gate::Shared;

/// Owner of the background eviction task.
#[derive(Debug)]
pub(crate) struct Reclaimer {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Reclaimer {
    pub(crate) fn spawn<K: Identity>(runtime: &Handle, shared: Arc<Shared<K>>) -> Self {
        let token = CancellationToken::new();
        let handle = runtime.spawn(run(shared, token.clone()));
        Self { token, handle }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Stops the task and waits up to `wait` for it to finish its current pass.
    ///
    /// Returns `true` if the task stopped cleanly in time.
    pub(crate) async fn shutdown(self, wait: Duration) -> bool {
        self.token.cancel();
        match timeout(wait, self.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!(%err, "reclaimer task failed");
                false
            }
            Err(_) => {
                error!(?wait, "reclaimer did not stop in time");
                false
            }
        }
    }
}

async fn run<K: Identity>(shared: Arc<Shared<K>>, token: CancellationToken) {
    let period = shared.config.eviction_period;
    // The first pass runs one full period after start.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(?period, expiry = ?shared.config.expiry, "reclaimer started");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                shared.reclaim();
            }
        }
    }

    debug!("reclaimer stopped");
}
