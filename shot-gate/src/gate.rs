use std::borrow::Borrow;
use std::fmt;
use std::fmt::Display;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::GateConfig;
use crate::GateError;
use crate::Identity;
use crate::metrics::GateMetrics;
use crate::reclaimer::Reclaimer;
use crate::table::PermitTable;
use crate::table::ReleaseOutcome;

/// State shared between a [`Gate`], its guards and its reclaimer task.
#[derive(Debug)]
pub(crate) struct Shared<K> {
    pub(crate) config: GateConfig,
    table: PermitTable<K>,
    metrics: GateMetrics,
}

impl<K: Identity> Shared<K> {
    fn new(config: GateConfig) -> Self {
        Self {
            table: PermitTable::new(config.limit.get()),
            config,
            metrics: GateMetrics::new(),
        }
    }

    async fn acquire<Q>(&self, identity: &Q) -> Result<(), GateError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ToOwned<Owned = K> + ?Sized,
    {
        let waiter = self.table.checkout(identity);
        trace!(identity = %identity, available = waiter.available(), "acquiring permit");

        match timeout(self.config.acquire_timeout, waiter.take()).await {
            Ok(Ok(())) => {
                self.metrics.acquired.add(1, &[]);
                Ok(())
            }
            Ok(Err(_closed)) => {
                self.metrics.cancelled.add(1, &[]);
                Err(GateError::Cancelled)
            }
            Err(_elapsed) => {
                warn!(
                    identity = %identity,
                    limit = self.config.limit.get(),
                    "too many concurrent requests"
                );
                self.metrics.rejected.add(1, &[]);
                Err(GateError::LimitExceeded {
                    identity: identity.to_string(),
                })
            }
        }
    }

    fn release<Q>(&self, identity: &Q) -> Result<(), GateError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ?Sized,
    {
        let reason = match self.table.release(identity) {
            ReleaseOutcome::Returned { available } => {
                trace!(identity = %identity, available, "released permit");
                return Ok(());
            }
            ReleaseOutcome::UnknownIdentity => "identity is not tracked",
            ReleaseOutcome::NothingHeld => "identity holds no permits",
        };

        error!(identity = %identity, reason, "release without matching acquire");
        self.metrics.misuse.add(1, &[]);
        Err(GateError::MisuseDetected {
            identity: identity.to_string(),
        })
    }

    /// One reclaimer pass. Returns the number of identities evicted.
    pub(crate) fn reclaim(&self) -> usize {
        if self.table.is_empty() {
            return 0;
        }

        let candidates = self.table.idle_candidates(self.config.expiry);
        if candidates.is_empty() {
            trace!(tracked = self.table.len(), "no idle identities to evict");
            return 0;
        }

        let evicted = self.table.evict(candidates, self.config.expiry);
        if evicted > 0 {
            self.metrics.evicted.add(evicted as u64, &[]);
        }
        debug!(evicted, tracked = self.table.len(), "reclaimer pass complete");
        evicted
    }
}

/// Per-identity concurrent request limiter.
///
/// Call [`acquire`](Gate::acquire) before protected work and
/// [`release`](Gate::release) exactly once afterwards, whether or not the work
/// succeeded. [`acquire_guard`](Gate::acquire_guard) wraps the pair in a guard
/// that releases on drop.
///
/// Creating a gate spawns its reclaimer on the current tokio runtime. Call
/// [`close`](Gate::close) during shutdown to stop it and wait for the pass in
/// progress; dropping the gate only signals the task to stop.
pub struct Gate<K: Identity = String> {
    shared: Arc<Shared<K>>,
    reclaimer: Mutex<Option<Reclaimer>>,
}

impl<K: Identity> fmt::Debug for Gate<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("config", &self.shared.config)
            .field("tracked", &self.shared.table.len())
            .finish()
    }
}

impl<K: Identity> Gate<K> {
    /// Creates a gate and starts its reclaimer.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidConfig`] if `config` fails validation and
    /// [`GateError::NoRuntime`] when called outside a tokio runtime.
    pub fn new(config: GateConfig) -> Result<Self, GateError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| GateError::NoRuntime)?;

        debug!(
            limit = config.limit.get(),
            acquire_timeout = ?config.acquire_timeout,
            eviction_period = ?config.eviction_period,
            expiry = ?config.expiry,
            "starting gate"
        );
        let shared = Arc::new(Shared::new(config));
        let reclaimer = Reclaimer::spawn(&runtime, Arc::clone(&shared));

        Ok(Self {
            shared,
            reclaimer: Mutex::new(Some(reclaimer)),
        })
    }

    /// Creates a gate with default timings and the given per-identity limit.
    ///
    /// # Errors
    ///
    /// See [`Gate::new`].
    pub fn with_limit(limit: NonZeroUsize) -> Result<Self, GateError> {
        Self::new(GateConfig::new(limit))
    }

    /// Takes one permit for `identity`, waiting up to the configured acquire timeout.
    ///
    /// Dropping the returned future gives up the wait without consuming a permit.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::LimitExceeded`] if no permit was freed in time.
    pub async fn acquire<Q>(&self, identity: &Q) -> Result<(), GateError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ToOwned<Owned = K> + ?Sized,
    {
        self.shared.acquire(identity).await
    }

    /// Like [`acquire`](Gate::acquire), but gives up as soon as `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Cancelled`] if the token fires first, otherwise as
    /// [`acquire`](Gate::acquire).
    pub async fn acquire_with_cancel<Q>(
        &self,
        identity: &Q,
        token: &CancellationToken,
    ) -> Result<(), GateError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ToOwned<Owned = K> + ?Sized,
    {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(identity = %identity, "acquire cancelled by caller");
                self.shared.metrics.cancelled.add(1, &[]);
                Err(GateError::Cancelled)
            }
            res = self.shared.acquire(identity) => res,
        }
    }

    /// Takes one permit and returns a guard that releases it when dropped.
    ///
    /// # Errors
    ///
    /// As [`acquire`](Gate::acquire).
    pub async fn acquire_guard<Q>(&self, identity: &Q) -> Result<PermitGuard<K>, GateError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ToOwned<Owned = K> + ?Sized,
    {
        self.shared.acquire(identity).await?;
        Ok(self.guard_for(identity))
    }

    /// Like [`acquire_guard`](Gate::acquire_guard), but gives up as soon as `token` is cancelled.
    ///
    /// # Errors
    ///
    /// As [`acquire_with_cancel`](Gate::acquire_with_cancel).
    pub async fn acquire_guard_with_cancel<Q>(
        &self,
        identity: &Q,
        token: &CancellationToken,
    ) -> Result<PermitGuard<K>, GateError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ToOwned<Owned = K> + ?Sized,
    {
        self.acquire_with_cancel(identity, token).await?;
        Ok(self.guard_for(identity))
    }

    fn guard_for<Q>(&self, identity: &Q) -> PermitGuard<K>
    where
        Q: ToOwned<Owned = K> + ?Sized,
    {
        PermitGuard {
            shared: Arc::clone(&self.shared),
            identity: identity.to_owned(),
        }
    }

    /// Returns one permit for `identity` and records the release time. Never waits.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::MisuseDetected`] when there is no outstanding
    /// permit to return. The gate's counters are not changed in that case.
    pub fn release<Q>(&self, identity: &Q) -> Result<(), GateError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ?Sized,
    {
        self.shared.release(identity)
    }

    /// Stops the reclaimer, waiting up to the configured shutdown timeout.
    ///
    /// Returns `true` if the reclaimer stopped in time, or was already stopped.
    pub async fn close(&self) -> bool {
        let reclaimer = self.reclaimer.lock().take();
        match reclaimer {
            Some(reclaimer) => {
                debug!("closing gate");
                reclaimer.shutdown(self.shared.config.shutdown_timeout).await
            }
            None => true,
        }
    }

    /// Runs one reclaimer pass now. Returns the number of identities evicted.
    pub fn reclaim_idle(&self) -> usize {
        self.shared.reclaim()
    }

    /// Permits each identity may hold at once.
    pub fn limit(&self) -> NonZeroUsize {
        self.shared.config.limit
    }

    /// The validated configuration this gate was built with.
    pub fn config(&self) -> &GateConfig {
        &self.shared.config
    }

    /// Free permits for `identity`, or `None` if it is not tracked.
    pub fn available_permits<Q>(&self, identity: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.table.available(identity)
    }

    /// Number of identities currently held in the permit table.
    pub fn tracked_identities(&self) -> usize {
        self.shared.table.len()
    }
}

impl<K: Identity> Drop for Gate<K> {
    fn drop(&mut self) {
        if let Some(reclaimer) = self.reclaimer.get_mut().as_ref() {
            reclaimer.cancel();
        }
    }
}

/// A held permit. Releases it exactly once when dropped.
#[must_use = "dropping the guard releases the permit immediately"]
pub struct PermitGuard<K: Identity> {
    shared: Arc<Shared<K>>,
    identity: K,
}

impl<K: Identity> PermitGuard<K> {
    /// The identity whose permit this guard holds.
    pub fn identity(&self) -> &K {
        &self.identity
    }
}

impl<K: Identity> fmt::Debug for PermitGuard<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermitGuard")
            .field("identity", &format_args!("{}", self.identity))
            .finish()
    }
}

impl<K: Identity> Drop for PermitGuard<K> {
    fn drop(&mut self) {
        // Misuse is already logged and counted by release.
        let _ = self.shared.release(&self.identity);
    }
}
