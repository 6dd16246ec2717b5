//! Keyed cooperation for async callers.
//!
//! When several tasks ask for the same logical work at once, one of them (the
//! leader) runs it and the rest (followers) wait for and share its outcome.
//! Leaders are bounded per key and per instance; followers give up after a
//! configurable timeout.
//!
//! ```no_run
//! use cooperage::{Cooperation, CooperationFactory};
//! use std::time::Duration;
//!
//! # async fn fetch(path: &str) -> Result<String, std::io::Error> { Ok(path.to_string()) }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let proxy: Cooperation<String, String, std::io::Error> = CooperationFactory::new()
//!     .configure()
//!     .threads_per_key(1)
//!     .total_threads(100)
//!     .major_timeout(Duration::from_secs(30))
//!     .build("central:proxy")?;
//!
//! let body = proxy
//!     .cooperate("org/acme/lib.jar".to_string(), || fetch("org/acme/lib.jar"))
//!     .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

// Core types shared by every cooperation variant
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod key;
    pub mod stats;
}

pub mod cooperation;

// Re-exports for convenience
pub use crate::core::config::{CapacityPolicy, CooperationConfig};
pub use crate::core::errors::{ConfigError, CooperationError, Outcome};
pub use crate::core::key::CooperationKey;
pub use crate::core::stats::{CooperationStats, CooperationStatsSnapshot};
pub use crate::cooperation::{
    CapacitySnapshot, CheckFn, ConfigBuilder, Cooperation, CooperationFactory, CooperationRequest,
    ExecutionSnapshot, ExecutionState,
};

/// Cooperation over calls that fail with `anyhow::Error`
pub type AnyCooperation<K, V> = Cooperation<K, V, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::time::Duration;

    #[tokio::test]
    async fn test_any_cooperation_shares_anyhow_failures() {
        let cooperation: AnyCooperation<&'static str, u32> = CooperationFactory::new()
            .configure()
            .major_timeout(Duration::from_secs(1))
            .minor_timeout(Duration::from_millis(100))
            .build("anyhow")
            .unwrap();

        let err = cooperation
            .cooperate("missing", || async { Err(anyhow!("artifact not found")) })
            .await
            .unwrap_err();

        assert_eq!(err.category(), "call");
        assert!(!err.is_retryable());
        let source = err.call_error().unwrap();
        assert_eq!(source.to_string(), "artifact not found");
        assert!(cooperation.active_keys().is_empty());
    }
}
