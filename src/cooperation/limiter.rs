//! Admission control for leaders.
//!
//! Two ceilings are enforced before a leader may run its call: one per key
//! (`threads_per_key`) and one across the whole instance (`total_threads`).
//! Both are `tokio::sync::Semaphore`s, so queued leaders are served in
//! arrival order. The per-key semaphores live in a `DashMap` and are pruned
//! once idle.

use crate::core::config::CapacityPolicy;
use crate::core::key::CooperationKey;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

// Roughly 30 years, the same horizon tokio uses for "never"
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating at a far-future instant instead of overflowing
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// Why an admission was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityDenial {
    pub resource: &'static str,
    pub current: u64,
    pub limit: u64,
}

#[derive(Debug)]
pub struct CapacityLimiter<K: CooperationKey> {
    threads_per_key: usize,
    total_threads: usize,
    global: Arc<Semaphore>,
    per_key: DashMap<K, Arc<Semaphore>>,
    peak: AtomicUsize,
    denials: AtomicU64,
}

impl<K: CooperationKey> CapacityLimiter<K> {
    pub fn new(threads_per_key: usize, total_threads: usize) -> Self {
        Self {
            threads_per_key,
            total_threads,
            global: Arc::new(Semaphore::new(total_threads)),
            per_key: DashMap::new(),
            peak: AtomicUsize::new(0),
            denials: AtomicU64::new(0),
        }
    }

    fn key_semaphore(&self, key: &K) -> Arc<Semaphore> {
        let entry = self
            .per_key
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(self.threads_per_key)));
        Arc::clone(entry.value())
    }

    /// Claim one slot for `key` in both ceilings, or neither.
    pub fn try_admit(self: &Arc<Self>, key: &K) -> Result<CapacityPermit<K>, CapacityDenial> {
        let key_slot = match self.key_semaphore(key).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.prune(key);
                return Err(self.deny_key(key));
            }
        };
        let global_slot = match Arc::clone(&self.global).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                drop(key_slot);
                self.prune(key);
                return Err(self.deny_total());
            }
        };
        Ok(self.permit(key, key_slot, global_slot))
    }

    /// Admit under `policy`: fail fast, or queue in arrival order until
    /// `wait` elapses.
    pub async fn admit(
        self: &Arc<Self>,
        key: &K,
        policy: CapacityPolicy,
        wait: Duration,
    ) -> Result<CapacityPermit<K>, CapacityDenial> {
        if policy == CapacityPolicy::FailFast {
            return self.try_admit(key);
        }

        let deadline = deadline_after(wait);
        let acquired = timeout_at(deadline, self.key_semaphore(key).acquire_owned()).await;
        let key_slot = match acquired {
            Ok(Ok(permit)) => permit,
            _ => {
                self.prune(key);
                return Err(self.deny_key(key));
            }
        };
        if self.global.available_permits() == 0 {
            debug!(key = ?key, in_use = self.in_use(), "Queued for capacity");
        }
        let acquired = timeout_at(deadline, Arc::clone(&self.global).acquire_owned()).await;
        let global_slot = match acquired {
            Ok(Ok(permit)) => permit,
            _ => {
                drop(key_slot);
                self.prune(key);
                return Err(self.deny_total());
            }
        };
        Ok(self.permit(key, key_slot, global_slot))
    }

    fn permit(
        self: &Arc<Self>,
        key: &K,
        key_slot: OwnedSemaphorePermit,
        global_slot: OwnedSemaphorePermit,
    ) -> CapacityPermit<K> {
        let in_use = self.in_use();
        self.peak.fetch_max(in_use, Ordering::Relaxed);
        debug!(key = ?key, in_use, "Admitted leader");
        CapacityPermit {
            limiter: Arc::clone(self),
            key: key.clone(),
            key_slot: Some(key_slot),
            global_slot: Some(global_slot),
        }
    }

    fn deny_total(&self) -> CapacityDenial {
        self.denials.fetch_add(1, Ordering::Relaxed);
        CapacityDenial {
            resource: "total_threads",
            current: self.in_use() as u64,
            limit: self.total_threads as u64,
        }
    }

    fn deny_key(&self, key: &K) -> CapacityDenial {
        self.denials.fetch_add(1, Ordering::Relaxed);
        CapacityDenial {
            resource: "threads_per_key",
            current: self.in_use_for(key) as u64,
            limit: self.threads_per_key as u64,
        }
    }

    // Drop the key's semaphore once nobody holds or awaits it
    fn prune(&self, key: &K) {
        self.per_key.remove_if(key, |_, semaphore| {
            Arc::strong_count(semaphore) == 1
                && semaphore.available_permits() == self.threads_per_key
        });
    }

    /// Leaders currently admitted across all keys
    pub fn in_use(&self) -> usize {
        self.total_threads
            .saturating_sub(self.global.available_permits())
    }

    /// Leaders currently admitted for one key
    pub fn in_use_for(&self, key: &K) -> usize {
        self.per_key
            .get(key)
            .map(|semaphore| self.threads_per_key.saturating_sub(semaphore.available_permits()))
            .unwrap_or(0)
    }

    /// Free global slots
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    /// Highest number of simultaneously admitted leaders seen so far
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Number of refused admissions
    pub fn denials(&self) -> u64 {
        self.denials.load(Ordering::Relaxed)
    }
}

/// RAII admission; returns both slots on drop
#[derive(Debug)]
pub struct CapacityPermit<K: CooperationKey> {
    limiter: Arc<CapacityLimiter<K>>,
    key: K,
    key_slot: Option<OwnedSemaphorePermit>,
    global_slot: Option<OwnedSemaphorePermit>,
}

impl<K: CooperationKey> Drop for CapacityPermit<K> {
    fn drop(&mut self) {
        self.global_slot.take();
        self.key_slot.take();
        self.limiter.prune(&self.key);
    }
}
