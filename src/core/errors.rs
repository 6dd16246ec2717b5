use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Everything a caller of `cooperate` can observe besides a value.
///
/// `E` is the error type of the wrapped call. It is held behind an `Arc` so
/// the leader and every follower receive the very same error object.
#[derive(Error)]
pub enum CooperationError<E> {
    /// The wrapped call itself failed
    #[error("Call failed: {0}")]
    Call(Arc<E>),

    /// A follower waited longer than the major timeout
    #[error("Cooperation timed out waiting on {key} (timeout: {timeout_ms}ms)")]
    Timeout { key: String, timeout_ms: u64 },

    /// Admission denied by the capacity limiter
    #[error("Thread cooperation maxed for {key}: {resource} (current: {current}, limit: {limit})")]
    CapacityExceeded {
        key: String,
        resource: String,
        current: u64,
        limit: u64,
    },

    /// The leader was dropped, panicked or vanished before publishing
    #[error("Cooperation cancelled for {key}: {reason}")]
    Cancelled { key: String, reason: String },
}

impl<E> CooperationError<E> {
    /// Wrap an error produced by the call
    pub fn call(error: E) -> Self {
        Self::Call(Arc::new(error))
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(key: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            key: key.into(),
            timeout_ms,
        }
    }

    /// Create a capacity error
    pub fn capacity_exceeded<S: Into<String>, R: Into<String>>(
        key: S,
        resource: R,
        current: u64,
        limit: u64,
    ) -> Self {
        Self::CapacityExceeded {
            key: key.into(),
            resource: resource.into(),
            current,
            limit,
        }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>, R: Into<String>>(key: S, reason: R) -> Self {
        Self::Cancelled {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Errors produced by the engine rather than the call are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Call(_) => false,
            Self::Timeout { .. } | Self::CapacityExceeded { .. } | Self::Cancelled { .. } => true,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Call(_) => "call",
            Self::Timeout { .. } => "timeout",
            Self::CapacityExceeded { .. } => "capacity",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// The call's own error, if this is a call failure
    pub fn call_error(&self) -> Option<&Arc<E>> {
        match self {
            Self::Call(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> Clone for CooperationError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Call(e) => Self::Call(Arc::clone(e)),
            Self::Timeout { key, timeout_ms } => Self::Timeout {
                key: key.clone(),
                timeout_ms: *timeout_ms,
            },
            Self::CapacityExceeded {
                key,
                resource,
                current,
                limit,
            } => Self::CapacityExceeded {
                key: key.clone(),
                resource: resource.clone(),
                current: *current,
                limit: *limit,
            },
            Self::Cancelled { key, reason } => Self::Cancelled {
                key: key.clone(),
                reason: reason.clone(),
            },
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for CooperationError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call(e) => f.debug_tuple("Call").field(e).finish(),
            Self::Timeout { key, timeout_ms } => f
                .debug_struct("Timeout")
                .field("key", key)
                .field("timeout_ms", timeout_ms)
                .finish(),
            Self::CapacityExceeded {
                key,
                resource,
                current,
                limit,
            } => f
                .debug_struct("CapacityExceeded")
                .field("key", key)
                .field("resource", resource)
                .field("current", current)
                .field("limit", limit)
                .finish(),
            Self::Cancelled { key, reason } => f
                .debug_struct("Cancelled")
                .field("key", key)
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Result of a cooperative call
pub type Outcome<V, E> = std::result::Result<V, CooperationError<E>>;

/// Configuration errors, raised while building a cooperation instance
#[derive(Debug, Clone, Error)]
#[error("Configuration error: {message}")]
pub struct ConfigError {
    pub message: String,
    pub field: Option<String>,
}

impl ConfigError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    pub fn field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::new(format!("invalid yaml: {}", err))
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid json: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let err: CooperationError<String> = CooperationError::timeout("k", 100);
        assert_eq!(err.category(), "timeout");
        assert!(err.is_retryable());

        let err: CooperationError<String> = CooperationError::call("boom".to_string());
        assert_eq!(err.category(), "call");
        assert!(!err.is_retryable());
        assert_eq!(err.call_error().map(|e| e.as_str()), Some("boom"));
    }

    #[test]
    fn test_clone_shares_call_error() {
        let err: CooperationError<String> = CooperationError::call("boom".to_string());
        let copy = err.clone();
        match (&err, &copy) {
            (CooperationError::Call(a), CooperationError::Call(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("Expected call errors"),
        }
    }

    #[test]
    fn test_display() {
        let err: CooperationError<String> =
            CooperationError::capacity_exceeded("\"artifact\"", "total_threads", 4, 4);
        let display = err.to_string();
        assert!(display.contains("Thread cooperation maxed"));
        assert!(display.contains("total_threads"));

        let err = ConfigError::field("must be greater than 0", "threads_per_key");
        assert_eq!(err.field.as_deref(), Some("threads_per_key"));
        assert!(err.to_string().contains("must be greater than 0"));
    }
}
