//! Construction of cooperation instances.
//!
//! A factory is an ordinary value owned by whoever needs cooperation; every
//! `build` creates an independent instance with its own registry and
//! capacity budget, so congestion in one domain cannot starve another.

use crate::cooperation::disabled::DisabledCooperation;
use crate::cooperation::execution::{CapacitySnapshot, CooperatingEngine};
use crate::cooperation::registry::ExecutionSnapshot;
use crate::cooperation::request::CooperationRequest;
use crate::core::config::{CapacityPolicy, CooperationConfig};
use crate::core::errors::{ConfigError, CooperationError, Outcome};
use crate::core::key::CooperationKey;
use crate::core::stats::CooperationStatsSnapshot;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A named cooperation instance.
///
/// Chosen once at construction; callers use the methods below and never need
/// to know which variant they hold.
pub enum Cooperation<K: CooperationKey, V, E> {
    Coordinated(Arc<CooperatingEngine<K, V, E>>),
    Disabled(Arc<DisabledCooperation<K, V, E>>),
}

impl<K: CooperationKey, V, E> Clone for Cooperation<K, V, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Coordinated(engine) => Self::Coordinated(Arc::clone(engine)),
            Self::Disabled(disabled) => Self::Disabled(Arc::clone(disabled)),
        }
    }
}

impl<K, V, E> Cooperation<K, V, E>
where
    K: CooperationKey,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Run `call` under cooperation for `key`
    pub async fn cooperate<F, Fut>(&self, key: K, call: F) -> Outcome<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.on(call).cooperate(key).await
    }

    /// Start a request that can be refined before cooperating
    pub fn on<F, Fut>(&self, call: F) -> CooperationRequest<'_, K, V, E, impl FnOnce(bool) -> Fut>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        CooperationRequest::new(self, move |_failover: bool| call())
    }

    /// Like [`on`](Self::on) for calls that want to know whether they run
    /// as a failover, i.e. after the leader they were following vanished.
    pub fn on_failover<F, Fut>(&self, call: F) -> CooperationRequest<'_, K, V, E, F>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        CooperationRequest::new(self, call)
    }

    /// Wait on an I/O dependency from inside a cooperating call, bounded by
    /// the minor timeout. Unbounded when cooperation is disabled.
    pub async fn join<T, Fut>(&self, dependency: Fut) -> Result<T, CooperationError<E>>
    where
        Fut: Future<Output = T>,
    {
        match self {
            Self::Coordinated(engine) => engine.join(dependency).await,
            Self::Disabled(_) => Ok(dependency.await),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Coordinated(engine) => engine.id(),
            Self::Disabled(disabled) => disabled.id(),
        }
    }

    pub fn config(&self) -> &CooperationConfig {
        match self {
            Self::Coordinated(engine) => engine.config(),
            Self::Disabled(disabled) => disabled.config(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Coordinated(_))
    }

    /// Keys with an execution in flight
    pub fn active_keys(&self) -> Vec<K> {
        match self {
            Self::Coordinated(engine) => engine.active_keys(),
            Self::Disabled(_) => Vec::new(),
        }
    }

    /// Followers currently waiting, per key
    pub fn waiter_counts(&self) -> HashMap<K, usize> {
        match self {
            Self::Coordinated(engine) => engine.waiter_counts(),
            Self::Disabled(_) => HashMap::new(),
        }
    }

    pub fn executions(&self) -> Vec<ExecutionSnapshot<K>> {
        match self {
            Self::Coordinated(engine) => engine.executions(),
            Self::Disabled(_) => Vec::new(),
        }
    }

    pub fn stats(&self) -> CooperationStatsSnapshot {
        match self {
            Self::Coordinated(engine) => engine.stats(),
            Self::Disabled(disabled) => disabled.stats(),
        }
    }

    /// Admission counters; `None` when cooperation is disabled
    pub fn capacity(&self) -> Option<CapacitySnapshot> {
        match self {
            Self::Coordinated(engine) => Some(engine.capacity()),
            Self::Disabled(_) => None,
        }
    }
}

/// Hands out configured cooperation instances
#[derive(Debug, Clone, Default)]
pub struct CooperationFactory {
    defaults: CooperationConfig,
}

impl CooperationFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose builders start from `defaults`
    pub fn with_defaults(defaults: CooperationConfig) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &CooperationConfig {
        &self.defaults
    }

    pub fn configure(&self) -> ConfigBuilder {
        ConfigBuilder {
            config: self.defaults.clone(),
        }
    }
}

/// Chainable configuration for one or more cooperation instances
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: CooperationConfig,
}

impl ConfigBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn threads_per_key(mut self, threads_per_key: usize) -> Self {
        self.config.threads_per_key = threads_per_key;
        self
    }

    pub fn total_threads(mut self, total_threads: usize) -> Self {
        self.config.total_threads = total_threads;
        self
    }

    pub fn major_timeout(mut self, timeout: Duration) -> Self {
        self.config.major_timeout = timeout;
        self
    }

    pub fn minor_timeout(mut self, timeout: Duration) -> Self {
        self.config.minor_timeout = timeout;
        self
    }

    pub fn capacity_policy(mut self, policy: CapacityPolicy) -> Self {
        self.config.capacity_policy = policy;
        self
    }

    pub fn max_waiters_per_key(mut self, max_waiters: Option<usize>) -> Self {
        self.config.max_waiters_per_key = max_waiters;
        self
    }

    /// Replace the whole configuration, e.g. with one loaded from a file
    pub fn config(mut self, config: CooperationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn current(&self) -> &CooperationConfig {
        &self.config
    }

    /// Validate and build an instance named `id`. The builder can be reused.
    pub fn build<K, V, E>(&self, id: impl Into<String>) -> Result<Cooperation<K, V, E>, ConfigError>
    where
        K: CooperationKey,
        V: Clone + Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        self.config.validate()?;
        let id = id.into();
        let config = self.config.clone();

        if config.enabled {
            info!(
                cooperation = %id,
                threads_per_key = config.threads_per_key,
                total_threads = config.total_threads,
                major_timeout = ?config.major_timeout,
                minor_timeout = ?config.minor_timeout,
                policy = ?config.capacity_policy,
                "Built cooperation"
            );
            Ok(Cooperation::Coordinated(Arc::new(CooperatingEngine::new(
                id, config,
            ))))
        } else {
            info!(cooperation = %id, "Built disabled cooperation");
            Ok(Cooperation::Disabled(Arc::new(DisabledCooperation::new(
                id, config,
            ))))
        }
    }
}
