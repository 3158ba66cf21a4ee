use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::AcquireError;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::trace;

use crate::Identity;

/// Permit accounting for a single identity.
#[derive(Debug)]
pub(crate) struct PermitEntry {
    semaphore: Semaphore,
    held: AtomicUsize,
    /// Acquirers that looked this entry up and have not finished waiting yet.
    waiters: AtomicUsize,
    /// Nanos from the table anchor. Starts at creation time.
    last_release: AtomicU64,
}

impl PermitEntry {
    fn new(limit: usize, now: u64) -> Self {
        Self {
            semaphore: Semaphore::new(limit),
            held: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
            last_release: AtomicU64::new(now),
        }
    }

    pub(crate) fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a permit and keeps it until the matching `give_back`.
    ///
    /// Dropping the returned future before it completes leaves the permit count
    /// untouched.
    pub(crate) async fn take(&self) -> Result<(), AcquireError> {
        let permit = self.semaphore.acquire().await?;
        self.held.fetch_add(1, Ordering::AcqRel);
        permit.forget();
        Ok(())
    }

    fn give_back(&self, now: u64) -> bool {
        let returned = self
            .held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                held.checked_sub(1)
            })
            .is_ok();

        if returned {
            // Stamp before the permit becomes visible so a scan never sees a
            // fully idle entry with a stale timestamp.
            self.last_release.store(now, Ordering::Release);
            self.semaphore.add_permits(1);
        }
        returned
    }

    fn is_reclaimable(&self, limit: usize, now: u64, expiry: u64) -> bool {
        self.waiters.load(Ordering::Acquire) == 0
            && self.semaphore.available_permits() == limit
            && now.saturating_sub(self.last_release.load(Ordering::Acquire)) > expiry
    }
}

/// A checked out entry. The reclaimer will not evict an entry while any
/// `Waiter` for it is alive.
#[derive(Debug)]
pub(crate) struct Waiter {
    entry: Arc<PermitEntry>,
}

impl Waiter {
    fn register(entry: &Arc<PermitEntry>) -> Self {
        entry.waiters.fetch_add(1, Ordering::AcqRel);
        Self {
            entry: Arc::clone(entry),
        }
    }
}

impl Deref for Waiter {
    type Target = PermitEntry;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.entry.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReleaseOutcome {
    Returned { available: usize },
    UnknownIdentity,
    NothingHeld,
}

/// Identity to permit entry map, guarded by a single readers-writer lock.
///
/// Routine lookups share the read guard. The write guard is only taken to
/// create an entry for an unseen identity and to evict idle ones.
#[derive(Debug)]
pub(crate) struct PermitTable<K> {
    limit: usize,
    anchor: Instant,
    entries: RwLock<HashMap<K, Arc<PermitEntry>>>,
}

impl<K: Identity> PermitTable<K> {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            anchor: Instant::now(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn now(&self) -> u64 {
        Instant::now().duration_since(self.anchor).as_nanos() as u64
    }

    /// Looks up the entry for `identity`, creating it on first use, and
    /// registers the caller as a waiter on it.
    pub(crate) fn checkout<Q>(&self, identity: &Q) -> Waiter
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(entry) = self.entries.read().get(identity) {
            return Waiter::register(entry);
        }

        let now = self.now();
        let mut entries = self.entries.write();
        let entry = entries.entry(identity.to_owned()).or_insert_with(|| {
            trace!(identity = %identity, limit = self.limit, "creating permit entry");
            Arc::new(PermitEntry::new(self.limit, now))
        });
        Waiter::register(entry)
    }

    pub(crate) fn release<Q>(&self, identity: &Q) -> ReleaseOutcome
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.now();
        let entries = self.entries.read();
        match entries.get(identity) {
            None => ReleaseOutcome::UnknownIdentity,
            Some(entry) if entry.give_back(now) => ReleaseOutcome::Returned {
                available: entry.available(),
            },
            Some(_) => ReleaseOutcome::NothingHeld,
        }
    }

    pub(crate) fn available<Q>(&self, identity: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.read().get(identity).map(|entry| entry.available())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Scan phase: collects identities that look evictable, under the read guard.
    pub(crate) fn idle_candidates(&self, expiry: Duration) -> Vec<K> {
        let now = self.now();
        let expiry = nanos(expiry);
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_reclaimable(self.limit, now, expiry))
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    /// Evict phase: re-checks each candidate under the write guard and removes
    /// the ones that are still idle. Returns how many were removed.
    pub(crate) fn evict(&self, candidates: Vec<K>, expiry: Duration) -> usize {
        let expiry = nanos(expiry);
        let mut entries = self.entries.write();
        let now = self.now();

        let mut evicted = 0;
        for identity in candidates {
            let still_idle = entries
                .get(&identity)
                .is_some_and(|entry| entry.is_reclaimable(self.limit, now, expiry));
            if still_idle {
                entries.remove(&identity);
                evicted += 1;
            } else {
                trace!(identity = %identity, "identity became active, skipping eviction");
            }
        }
        evicted
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
