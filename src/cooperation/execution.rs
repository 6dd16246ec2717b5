//! Leader/follower protocol
//!
//! The first caller for a key leads: it passes admission control, runs the
//! call with no registry lock held and publishes the outcome. Everyone who
//! arrives meanwhile follows: they wait on the leader's outcome in
//! `minor_timeout` slices until `major_timeout` runs out. A follower that
//! outlives a vanished leader takes over once, and its call is told it is a
//! failover.

use crate::cooperation::limiter::{deadline_after, CapacityLimiter};
use crate::cooperation::registry::{
    ExecutionSnapshot, FollowerSlot, InFlightRegistry, LeaderSlot, Role, Wait,
};
use crate::core::config::CooperationConfig;
use crate::core::errors::{CooperationError, Outcome};
use crate::core::key::CooperationKey;
use crate::core::stats::{CooperationStats, CooperationStatsSnapshot};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Consulted by waiting followers; `Some` ends the wait with that value
pub type CheckFn<V> = Box<dyn Fn() -> BoxFuture<'static, Option<V>> + Send + Sync>;

enum Followed<V, E> {
    Done(Outcome<V, E>),
    Vanished(Uuid),
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Admission counters of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub in_use: usize,
    pub available: usize,
    pub peak: usize,
    pub denials: u64,
}

/// Coordinating cooperation: one registry and one limiter per instance
#[derive(Debug)]
pub struct CooperatingEngine<K: CooperationKey, V, E> {
    id: String,
    config: CooperationConfig,
    registry: Arc<InFlightRegistry<K, V, E>>,
    limiter: Arc<CapacityLimiter<K>>,
    stats: Arc<CooperationStats>,
}

impl<K, V, E> CooperatingEngine<K, V, E>
where
    K: CooperationKey,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// `config` is expected to be validated already
    pub fn new(id: impl Into<String>, config: CooperationConfig) -> Self {
        let stats = Arc::new(CooperationStats::new());
        Self {
            id: id.into(),
            registry: Arc::new(InFlightRegistry::new(
                config.max_waiters_per_key,
                Arc::clone(&stats),
            )),
            limiter: Arc::new(CapacityLimiter::new(
                config.threads_per_key,
                config.total_threads,
            )),
            config,
            stats,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &CooperationConfig {
        &self.config
    }

    pub fn capacity(&self) -> CapacitySnapshot {
        CapacitySnapshot {
            in_use: self.limiter.in_use(),
            available: self.limiter.available(),
            peak: self.limiter.peak(),
            denials: self.limiter.denials(),
        }
    }

    pub fn active_keys(&self) -> Vec<K> {
        self.registry.active_keys()
    }

    pub fn waiter_counts(&self) -> HashMap<K, usize> {
        self.registry.waiter_counts()
    }

    pub fn executions(&self) -> Vec<ExecutionSnapshot<K>> {
        self.registry.executions()
    }

    pub fn stats(&self) -> CooperationStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run `call` for `key`, or share the outcome of the execution already
    /// running for it.
    pub async fn cooperate<F, Fut>(
        &self,
        key: K,
        call: F,
        check: Option<CheckFn<V>>,
    ) -> Outcome<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.cooperate_within(key, move |_failover| call(), check, self.config.major_timeout)
            .await
    }

    /// Like [`cooperate`](Self::cooperate), but this caller waits at most
    /// `major_timeout` instead of the configured one, both as a follower and
    /// while queued for capacity as a leader.
    ///
    /// `call` receives `true` when it runs because the leader this caller
    /// was following vanished, so it can re-check whatever the lost leader
    /// may already have produced.
    #[instrument(skip(self, call, check), fields(cooperation = %self.id))]
    pub async fn cooperate_within<F, Fut>(
        &self,
        key: K,
        call: F,
        check: Option<CheckFn<V>>,
        major_timeout: Duration,
    ) -> Outcome<V, E>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut reelected = false;
        loop {
            match self.registry.acquire_or_join(key.clone()) {
                Err(refused) => {
                    self.stats.record_capacity_rejection();
                    warn!(waiters = refused.current, "Too many threads waiting on key");
                    return Err(CooperationError::capacity_exceeded(
                        key.describe(),
                        "waiters_per_key",
                        refused.current as u64,
                        refused.limit as u64,
                    ));
                }
                Ok(Role::Leader(slot)) => {
                    return self.lead(slot, call, major_timeout, reelected).await
                }
                Ok(Role::Follower(slot)) => match self
                    .follow(slot, &key, check.as_ref(), major_timeout)
                    .await
                {
                    Followed::Done(outcome) => return outcome,
                    Followed::Vanished(id) if !reelected => {
                        reelected = true;
                        self.registry.evict_if_vanished(&key, id);
                        self.stats.record_reelection();
                        warn!(execution = %id, "Leader vanished without publishing, retrying once");
                    }
                    Followed::Vanished(id) => {
                        self.stats.record_cancellation();
                        self.registry.evict_if_vanished(&key, id);
                        return Err(CooperationError::cancelled(
                            key.describe(),
                            "leader vanished without publishing",
                        ));
                    }
                },
            }
        }
    }

    async fn lead<F, Fut>(
        &self,
        slot: LeaderSlot<K, V, E>,
        call: F,
        major_timeout: Duration,
        failover: bool,
    ) -> Outcome<V, E>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.stats.record_leader();

        let permit = match self
            .limiter
            .admit(slot.key(), self.config.capacity_policy, major_timeout)
            .await
        {
            Ok(permit) => permit,
            Err(denial) => {
                self.stats.record_capacity_rejection();
                warn!(
                    resource = denial.resource,
                    current = denial.current,
                    limit = denial.limit,
                    policy = ?self.config.capacity_policy,
                    "Leader denied admission"
                );
                let error = CooperationError::capacity_exceeded(
                    slot.key().describe(),
                    denial.resource,
                    denial.current,
                    denial.limit,
                );
                // followers get the same denial and the key is freed for later callers
                slot.publish(Err(error.clone()));
                return Err(error);
            }
        };

        slot.mark_running();
        debug!(execution = %slot.execution().id(), failover, "Leader running call");

        let outcome = match call(failover).await {
            Ok(value) => Ok(value),
            Err(error) => {
                self.stats.record_call_failure();
                Err(CooperationError::call(error))
            }
        };
        drop(permit);

        slot.publish(outcome.clone());
        outcome
    }

    async fn follow(
        &self,
        mut slot: FollowerSlot<K, V, E>,
        key: &K,
        check: Option<&CheckFn<V>>,
        major: Duration,
    ) -> Followed<V, E> {
        self.stats.record_follower();
        let id = slot.execution().id();
        let deadline = deadline_after(major);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match slot.wait(self.config.minor_timeout.min(remaining)).await {
                Wait::Ready(outcome) => {
                    self.stats.record_shared_outcome();
                    debug!(execution = %id, ok = outcome.is_ok(), "Follower received shared outcome");
                    return Followed::Done(outcome);
                }
                Wait::Vanished => return Followed::Vanished(id),
                Wait::Pending => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    debug!(
                        execution = %id,
                        waited_ms = millis(slot.execution().elapsed()),
                        state = ?slot.execution().state(),
                        "Still waiting on leader"
                    );
                    if let Some(value) = self.run_check(check).await {
                        return Followed::Done(Ok(value));
                    }
                }
            }
        }

        if let Some(value) = self.run_check(check).await {
            return Followed::Done(Ok(value));
        }

        self.stats.record_timeout();
        warn!(
            execution = %id,
            timeout_ms = millis(major),
            "Gave up waiting on leader"
        );
        Followed::Done(Err(CooperationError::timeout(
            key.describe(),
            millis(major),
        )))
    }

    /// Wait on an I/O dependency of a cooperating call, for at most
    /// `minor_timeout`.
    pub async fn join<T, Fut>(&self, dependency: Fut) -> Result<T, CooperationError<E>>
    where
        Fut: Future<Output = T>,
    {
        let minor = self.config.minor_timeout;
        match tokio::time::timeout(minor, dependency).await {
            Ok(value) => Ok(value),
            Err(_elapsed) => {
                self.stats.record_timeout();
                warn!(cooperation = %self.id, timeout_ms = millis(minor), "Dependency wait timed out");
                Err(CooperationError::timeout("dependency", millis(minor)))
            }
        }
    }

    async fn run_check(&self, check: Option<&CheckFn<V>>) -> Option<V> {
        let value = match check {
            Some(check) => check().await,
            None => None,
        };
        if value.is_some() {
            self.stats.record_check_hit();
            debug!("Check function satisfied the wait");
        }
        value
    }
}
