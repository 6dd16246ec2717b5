//! In-flight registry
//!
//! Maps each live key to the execution currently serving it. Role assignment
//! is a single `DashMap::entry` call, so only the key's shard is locked and
//! never across an `.await`. Outcomes travel through a per-execution `watch`
//! channel: the leader owns the sender, followers each hold a receiver.

use crate::core::errors::{CooperationError, Outcome};
use crate::core::key::CooperationKey;
use crate::core::stats::CooperationStats;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExecutionState {
    /// Leader chosen, waiting for admission
    Pending = 0,
    /// Call is running
    Running = 1,
    Completed = 2,
    Failed = 3,
}

impl From<u8> for ExecutionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ExecutionState::Pending,
            1 => ExecutionState::Running,
            2 => ExecutionState::Completed,
            _ => ExecutionState::Failed,
        }
    }
}

type OutcomeCell<V, E> = Option<Outcome<V, E>>;

/// The state shared by one leader and its followers
#[derive(Debug)]
pub struct InFlightExecution<K, V, E> {
    id: Uuid,
    key: K,
    state: AtomicU8,
    waiter_count: AtomicUsize,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    outcome: watch::Receiver<OutcomeCell<V, E>>,
}

impl<K: CooperationKey, V, E> InFlightExecution<K, V, E> {
    fn new(key: K, outcome: watch::Receiver<OutcomeCell<V, E>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            state: AtomicU8::new(ExecutionState::Pending as u8),
            waiter_count: AtomicUsize::new(0),
            started_at: Instant::now(),
            started_wall: Utc::now(),
            outcome,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn state(&self) -> ExecutionState {
        ExecutionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn waiter_count(&self) -> usize {
        self.waiter_count.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The leader went away without publishing anything
    fn is_vanished(&self) -> bool {
        self.outcome.has_changed().is_err() && self.outcome.borrow().is_none()
    }

    fn snapshot(&self) -> ExecutionSnapshot<K> {
        ExecutionSnapshot {
            id: self.id,
            key: self.key.clone(),
            state: self.state(),
            waiter_count: self.waiter_count(),
            started_at: self.started_wall,
            elapsed: self.elapsed(),
        }
    }
}

/// Read-only view of an in-flight execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot<K> {
    pub id: Uuid,
    pub key: K,
    pub state: ExecutionState,
    pub waiter_count: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// A join refused because the key already has the maximum number of followers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRefused {
    pub current: usize,
    pub limit: usize,
}

pub enum Role<K: CooperationKey, V, E> {
    Leader(LeaderSlot<K, V, E>),
    Follower(FollowerSlot<K, V, E>),
}

#[derive(Debug)]
pub struct InFlightRegistry<K: CooperationKey, V, E> {
    entries: DashMap<K, Arc<InFlightExecution<K, V, E>>>,
    max_waiters_per_key: Option<usize>,
    stats: Arc<CooperationStats>,
}

impl<K: CooperationKey, V, E> InFlightRegistry<K, V, E> {
    pub fn new(max_waiters_per_key: Option<usize>, stats: Arc<CooperationStats>) -> Self {
        Self {
            entries: DashMap::new(),
            max_waiters_per_key,
            stats,
        }
    }

    /// Become the leader for `key`, or join the execution already serving it.
    pub fn acquire_or_join(self: &Arc<Self>, key: K) -> Result<Role<K, V, E>, JoinRefused> {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                let execution = Arc::clone(entry.get());
                let current = execution.waiter_count.load(Ordering::Acquire);
                if let Some(limit) = self.max_waiters_per_key {
                    if current >= limit {
                        return Err(JoinRefused { current, limit });
                    }
                }
                execution.waiter_count.fetch_add(1, Ordering::AcqRel);
                let receiver = execution.outcome.clone();
                debug!(key = ?execution.key, execution = %execution.id, waiters = current + 1, "Joined in-flight execution");
                Ok(Role::Follower(FollowerSlot {
                    execution,
                    receiver,
                }))
            }
            Entry::Vacant(entry) => {
                let (sender, receiver) = watch::channel(None);
                let execution = Arc::new(InFlightExecution::new(entry.key().clone(), receiver));
                entry.insert(Arc::clone(&execution));
                debug!(key = ?execution.key, execution = %execution.id, "Registered leader");
                Ok(Role::Leader(LeaderSlot {
                    registry: Arc::clone(self),
                    execution,
                    sender: Some(sender),
                }))
            }
        }
    }

    fn remove_execution(&self, key: &K, id: Uuid) -> bool {
        self.entries.remove_if(key, |_, execution| execution.id == id).is_some()
    }

    /// Drop the entry for `key` if it is still execution `id` and its leader
    /// disappeared without publishing.
    pub fn evict_if_vanished(&self, key: &K, id: Uuid) -> bool {
        let evicted = self
            .entries
            .remove_if(key, |_, execution| execution.id == id && execution.is_vanished())
            .is_some();
        if evicted {
            warn!(key = ?key, execution = %id, "Evicted execution whose leader vanished");
        }
        evicted
    }

    pub fn active_keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn waiter_counts(&self) -> HashMap<K, usize> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().waiter_count()))
            .collect()
    }

    pub fn executions(&self) -> Vec<ExecutionSnapshot<K>> {
        self.entries
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Held by the single leader of an execution.
///
/// Dropping the slot without publishing (the leader's future was dropped or
/// its call panicked) publishes `Cancelled`, so followers are never stranded.
pub struct LeaderSlot<K: CooperationKey, V, E> {
    registry: Arc<InFlightRegistry<K, V, E>>,
    execution: Arc<InFlightExecution<K, V, E>>,
    sender: Option<watch::Sender<OutcomeCell<V, E>>>,
}

impl<K: CooperationKey, V, E> LeaderSlot<K, V, E> {
    pub fn execution(&self) -> &Arc<InFlightExecution<K, V, E>> {
        &self.execution
    }

    pub fn key(&self) -> &K {
        &self.execution.key
    }

    /// Admission done, the call is about to start
    pub fn mark_running(&self) {
        self.execution
            .state
            .store(ExecutionState::Running as u8, Ordering::Release);
    }

    /// Hand the outcome to every follower, then retire the entry.
    pub fn publish(mut self, outcome: Outcome<V, E>) {
        self.publish_inner(outcome);
    }

    fn publish_inner(&mut self, outcome: Outcome<V, E>) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        let state = if outcome.is_ok() {
            ExecutionState::Completed
        } else {
            ExecutionState::Failed
        };
        self.execution.state.store(state as u8, Ordering::Release);
        sender.send_replace(Some(outcome));
        // followers registered so far hold receivers that already see the value
        self.registry
            .remove_execution(&self.execution.key, self.execution.id);
        debug!(
            key = ?self.execution.key,
            execution = %self.execution.id,
            state = ?state,
            waiters = self.execution.waiter_count(),
            elapsed_ms = self.execution.elapsed().as_millis() as u64,
            "Published outcome"
        );
    }

    /// Give up leadership without publishing, as if the leader had vanished
    #[cfg(test)]
    pub(crate) fn abandon(mut self) {
        self.sender.take();
    }
}

impl<K: CooperationKey, V, E> Drop for LeaderSlot<K, V, E> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            warn!(
                key = ?self.execution.key,
                execution = %self.execution.id,
                "Leader dropped before publishing, cancelling followers"
            );
            self.registry.stats.record_cancellation();
            let key = self.execution.key.describe();
            self.publish_inner(Err(CooperationError::cancelled(
                key,
                "leader dropped before publishing",
            )));
        }
    }
}

/// What a single bounded wait on the leader produced
pub enum Wait<V, E> {
    Ready(Outcome<V, E>),
    Pending,
    Vanished,
}

/// Held by each follower; leaving decrements the waiter count
pub struct FollowerSlot<K: CooperationKey, V, E> {
    execution: Arc<InFlightExecution<K, V, E>>,
    receiver: watch::Receiver<OutcomeCell<V, E>>,
}

impl<K, V, E> FollowerSlot<K, V, E>
where
    K: CooperationKey,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn execution(&self) -> &Arc<InFlightExecution<K, V, E>> {
        &self.execution
    }

    /// Wait up to `limit` for the leader's outcome.
    pub async fn wait(&mut self, limit: Duration) -> Wait<V, E> {
        let waited = tokio::time::timeout(limit, self.receiver.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(cell)) => match cell.as_ref() {
                Some(outcome) => Wait::Ready(outcome.clone()),
                None => Wait::Vanished,
            },
            Ok(Err(_closed)) => Wait::Vanished,
            Err(_elapsed) => Wait::Pending,
        }
    }
}

impl<K: CooperationKey, V, E> Drop for FollowerSlot<K, V, E> {
    fn drop(&mut self) {
        self.execution.waiter_count.fetch_sub(1, Ordering::AcqRel);
    }
}
