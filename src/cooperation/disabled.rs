use crate::core::config::CooperationConfig;
use crate::core::errors::{CooperationError, Outcome};
use crate::core::stats::{CooperationStats, CooperationStatsSnapshot};
use std::future::Future;
use std::marker::PhantomData;
use tracing::trace;

/// Pass-through cooperation: every caller runs its own call, keys are ignored
#[derive(Debug)]
pub struct DisabledCooperation<K, V, E> {
    id: String,
    config: CooperationConfig,
    stats: CooperationStats,
    _marker: PhantomData<fn(K) -> (V, E)>,
}

impl<K, V, E> DisabledCooperation<K, V, E> {
    pub fn new(id: impl Into<String>, config: CooperationConfig) -> Self {
        Self {
            id: id.into(),
            config,
            stats: CooperationStats::new(),
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &CooperationConfig {
        &self.config
    }

    pub fn stats(&self) -> CooperationStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn cooperate<F, Fut>(&self, _key: K, call: F) -> Outcome<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.stats.record_leader();
        trace!(cooperation = %self.id, "Cooperation disabled, calling directly");
        call().await.map_err(|error| {
            self.stats.record_call_failure();
            CooperationError::call(error)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_caller_runs_its_own_call() {
        let disabled: Arc<DisabledCooperation<&'static str, usize, String>> =
            Arc::new(DisabledCooperation::new("test", CooperationConfig::disabled()));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let disabled = Arc::clone(&disabled);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    disabled
                        .cooperate("same", || async move {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(calls.fetch_add(1, Ordering::SeqCst))
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(disabled.stats().leaders, 3);
    }

    #[tokio::test]
    async fn test_errors_are_wrapped() {
        let disabled: DisabledCooperation<u32, (), String> =
            DisabledCooperation::new("test", CooperationConfig::disabled());
        let err = disabled
            .cooperate(1, || async { Err("boom".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err.category(), "call");
        assert_eq!(disabled.stats().call_failures, 1);
    }
}
