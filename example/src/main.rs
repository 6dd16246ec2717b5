use anyhow::{Context, Result};
use cooperage::{AnyCooperation, CooperationConfig, CooperationFactory};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const CONFIG: &str = r#"
enabled: true
threads_per_key: 1
total_threads: 4
major_timeout_ms: 2000
minor_timeout_ms: 250
capacity_policy: queue
"#;

// Stand-in for a remote repository download
async fn slow_fetch(path: &str, fetches: &AtomicUsize) -> Result<Arc<String>> {
    fetches.fetch_add(1, Ordering::SeqCst);
    info!(path, "Fetching from upstream");
    tokio::time::sleep(Duration::from_millis(500)).await;
    if path.ends_with(".missing") {
        anyhow::bail!("{} not found upstream", path);
    }
    Ok(Arc::new(format!("{}-content", path)))
}

async fn burst(
    proxy: &AnyCooperation<String, Arc<String>>,
    path: &'static str,
    callers: usize,
    fetches: &Arc<AtomicUsize>,
) -> Result<()> {
    let started = Instant::now();
    let results = join_all((0..callers).map(|_| {
        let proxy = proxy.clone();
        let fetches = Arc::clone(fetches);
        tokio::spawn(async move {
            proxy
                .cooperate(path.to_string(), || async move {
                    slow_fetch(path, &fetches).await
                })
                .await
        })
    }))
    .await;

    let mut served = 0;
    for result in results {
        match result.context("caller task panicked")? {
            Ok(_) => served += 1,
            Err(e) => info!(path, error = %e, retryable = e.is_retryable(), "Caller failed"),
        }
    }
    info!(
        path,
        callers,
        served,
        upstream_fetches = fetches.swap(0, Ordering::SeqCst),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Burst finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = CooperationConfig::from_yaml_str(CONFIG)?;
    let factory = CooperationFactory::with_defaults(config);
    let proxy: AnyCooperation<String, Arc<String>> =
        factory.configure().build("central:proxy")?;
    let direct: AnyCooperation<String, Arc<String>> =
        factory.configure().enabled(false).build("central:direct")?;

    let fetches = Arc::new(AtomicUsize::new(0));

    burst(&proxy, "artifact-A", 10, &fetches).await?;
    burst(&proxy, "artifact-B.missing", 5, &fetches).await?;
    burst(&direct, "artifact-A", 3, &fetches).await?;

    info!(stats = ?proxy.stats(), "Cooperation stats");
    println!("{}", serde_yaml::to_string(&proxy.stats())?);
    Ok(())
}
