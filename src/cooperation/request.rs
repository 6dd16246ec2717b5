use crate::cooperation::execution::CheckFn;
use crate::cooperation::factory::Cooperation;
use crate::core::errors::Outcome;
use crate::core::key::CooperationKey;
use futures::FutureExt;
use std::future::Future;
use std::time::Duration;

/// A call waiting to be cooperated on.
///
/// Built with [`Cooperation::on`] or [`Cooperation::on_failover`]; optionally
/// given a check function that waiting followers consult before the leader
/// finishes. The call receives `true` when it runs as a failover.
pub struct CooperationRequest<'a, K: CooperationKey, V, E, F> {
    cooperation: &'a Cooperation<K, V, E>,
    call: F,
    check: Option<CheckFn<V>>,
    major_timeout: Option<Duration>,
}

impl<'a, K, V, E, F> CooperationRequest<'a, K, V, E, F>
where
    K: CooperationKey,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub(crate) fn new(cooperation: &'a Cooperation<K, V, E>, call: F) -> Self {
        Self {
            cooperation,
            call,
            check: None,
            major_timeout: None,
        }
    }

    /// Look for the value elsewhere while waiting, e.g. in a cache the leader
    /// fills. Ignored when cooperation is disabled.
    pub fn check_function<C, Fut>(mut self, check: C) -> Self
    where
        C: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<V>> + Send + 'static,
    {
        self.check = Some(Box::new(move || check().boxed()));
        self
    }

    /// Override the instance's major timeout for this caller only
    pub fn major_timeout(mut self, timeout: Duration) -> Self {
        self.major_timeout = Some(timeout);
        self
    }

    pub fn has_check(&self) -> bool {
        self.check.is_some()
    }

    pub async fn cooperate<Fut>(self, key: K) -> Outcome<V, E>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        match self.cooperation {
            Cooperation::Coordinated(engine) => {
                let major_timeout = self
                    .major_timeout
                    .unwrap_or(engine.config().major_timeout);
                engine
                    .cooperate_within(key, self.call, self.check, major_timeout)
                    .await
            }
            Cooperation::Disabled(disabled) => {
                let call = self.call;
                disabled.cooperate(key, move || call(false)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooperation::factory::CooperationFactory;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_check_function_reads_shared_cache() {
        let cooperation: Cooperation<&'static str, u32, String> = CooperationFactory::new()
            .configure()
            .major_timeout(Duration::from_secs(2))
            .minor_timeout(Duration::from_millis(25))
            .build("cache")
            .unwrap();
        let cached = Arc::new(AtomicBool::new(false));

        let leader = {
            let cooperation = cooperation.clone();
            let cached = Arc::clone(&cached);
            tokio::spawn(async move {
                cooperation
                    .cooperate("item", || async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        cached.store(true, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(800)).await;
                        Ok(7)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let request = cooperation
            .on(|| async { Err("follower must not run".to_string()) })
            .check_function({
                let cached = Arc::clone(&cached);
                move || {
                    let hit = cached.load(Ordering::SeqCst);
                    async move { hit.then_some(7) }
                }
            });
        assert!(request.has_check());

        let started = tokio::time::Instant::now();
        assert_eq!(request.cooperate("item").await.unwrap(), 7);
        assert!(started.elapsed() < Duration::from_millis(600));
        assert_eq!(leader.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_disabled_request_runs_call() {
        let cooperation: Cooperation<u8, &'static str, String> = CooperationFactory::new()
            .configure()
            .enabled(false)
            .build("off")
            .unwrap();

        let value = cooperation
            .on(|| async { Ok("direct") })
            .check_function(|| async { Some("never consulted") })
            .cooperate(1)
            .await
            .unwrap();
        assert_eq!(value, "direct");
    }

    #[tokio::test]
    async fn test_failover_call_rechecks_cache_through_join() {
        let cooperation: Cooperation<&'static str, String, String> = CooperationFactory::new()
            .configure()
            .major_timeout(Duration::from_secs(1))
            .minor_timeout(Duration::from_millis(50))
            .build("failover")
            .unwrap();

        let value = cooperation
            .on_failover(|failover| {
                let cooperation = cooperation.clone();
                async move {
                    if failover {
                        match cooperation.join(async { Some("cached".to_string()) }).await {
                            Ok(Some(cached)) => return Ok(cached),
                            Ok(None) => {}
                            Err(e) => return Err(e.to_string()),
                        }
                    }
                    Ok::<String, String>(format!("fetched failover={}", failover))
                }
            })
            .cooperate("pkg")
            .await
            .unwrap();
        assert_eq!(value, "fetched failover=false");

        let disabled: Cooperation<&'static str, String, String> = CooperationFactory::new()
            .configure()
            .enabled(false)
            .build("off")
            .unwrap();
        let value = disabled
            .on_failover(|failover| async move { Ok(failover.to_string()) })
            .cooperate("pkg")
            .await
            .unwrap();
        assert_eq!(value, "false");
        let joined = disabled
            .join(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                7
            })
            .await
            .unwrap();
        assert_eq!(joined, 7);
    }
}
