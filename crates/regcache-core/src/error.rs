//! Error types for cache operations

use thiserror::Error;

/// Main error type for all cache operations
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Key not found in cache
    #[error("key not found: {0}")]
    NotFound(String),

    /// Key or value failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Write would exceed a tier's size limit
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Backend connection failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Backend operation failed
    #[error("backend error: {0}")]
    Backend(String),

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,

    /// Tier is currently marked unavailable
    #[error("tier unavailable: {0}")]
    Unavailable(String),

    /// Circuit breaker is rejecting requests
    #[error("circuit open for {0}")]
    CircuitOpen(String),

    /// Operation attempted on a disposed cache
    #[error("cache disposed")]
    Disposed,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Whether a retry policy should re-attempt after this error.
    ///
    /// Transport-level failures are retryable; validation, capacity and
    /// lifecycle errors are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::Connection(_)
                | CacheError::Backend(_)
                | CacheError::Timeout
                | CacheError::Internal(_)
        )
    }

    /// Whether this error counts as a failure for circuit breaker accounting
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            CacheError::Connection(_)
                | CacheError::Backend(_)
                | CacheError::Timeout
                | CacheError::Internal(_)
                | CacheError::Unavailable(_)
        )
    }

    /// Short stable label for error-history aggregation
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::NotFound(_) => "not_found",
            CacheError::Validation(_) => "validation",
            CacheError::Config(_) => "config",
            CacheError::Capacity(_) => "capacity",
            CacheError::Serialization(_) => "serialization",
            CacheError::Deserialization(_) => "deserialization",
            CacheError::Connection(_) => "connection",
            CacheError::Backend(_) => "backend",
            CacheError::Timeout => "timeout",
            CacheError::Unavailable(_) => "unavailable",
            CacheError::CircuitOpen(_) => "circuit_open",
            CacheError::Disposed => "disposed",
            CacheError::Internal(_) => "internal",
        }
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::NotFound("component:react:button".to_string());
        assert_eq!(err.to_string(), "key not found: component:react:button");

        let err = CacheError::Capacity("memory tier full".to_string());
        assert_eq!(err.to_string(), "capacity exceeded: memory tier full");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CacheError::Timeout.is_retryable());
        assert!(CacheError::Connection("reset".into()).is_retryable());
        assert!(!CacheError::Validation("bad key".into()).is_retryable());
        assert!(!CacheError::Config("bad strategy".into()).is_retryable());
        assert!(!CacheError::Capacity("full".into()).is_retryable());
        assert!(!CacheError::Disposed.is_retryable());
    }

    #[test]
    fn test_breaker_classification() {
        assert!(CacheError::Backend("boom".into()).is_breaker_failure());
        assert!(!CacheError::NotFound("k".into()).is_breaker_failure());
        assert!(!CacheError::CircuitOpen("remote".into()).is_breaker_failure());
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(CacheError::Timeout.kind(), "timeout");
        assert_eq!(CacheError::Disposed.kind(), "disposed");
    }
}
