//! Error taxonomy for the governance layer.
//!
//! Every failure that leaves the orchestrator is one of these variants; raw
//! transport errors from the backend are classified before they cross the
//! boundary. All variants are recoverable from the end user's point of view:
//! the caller degrades to a non-AI fallback.

use crate::backend::BackendError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for governance operations
pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Errors surfaced by the governance layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GovernanceError {
    /// Per-identity rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimitExceeded {
        /// Milliseconds until the current window resets
        retry_after_ms: u64,
    },

    /// Circuit breaker rejected the call
    #[error("Circuit open for '{operation}', retry after {retry_after_ms}ms")]
    CircuitOpen {
        /// Operation class guarded by the breaker
        operation: String,
        /// Milliseconds until a trial call is permitted
        retry_after_ms: u64,
    },

    /// Cache backend unreachable
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Backend call timed out
    #[error("Backend timed out after {timeout_ms}ms ({attempts} attempt(s))")]
    BackendTimeout {
        /// Timeout applied to each attempt
        timeout_ms: u64,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Backend rejected the credentials
    #[error("Backend authentication failed: {0}")]
    BackendAuth(String),

    /// Backend returned a response that could not be interpreted
    #[error("Invalid response format: {0}")]
    InvalidResponseFormat(String),

    /// Backend failed (transport error, 5xx, provider throttling)
    #[error("Backend unavailable: {message}")]
    BackendUnavailable {
        /// Error message
        message: String,
        /// HTTP status code, if known
        status_code: Option<u16>,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GovernanceError {
    /// Create a rate limit error
    #[must_use]
    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self::RateLimitExceeded { retry_after_ms }
    }

    /// Create a circuit open error
    #[must_use]
    pub fn circuit_open(operation: impl Into<String>, retry_after_ms: u64) -> Self {
        Self::CircuitOpen {
            operation: operation.into(),
            retry_after_ms,
        }
    }

    /// Create a cache unavailable error
    #[must_use]
    pub fn cache_unavailable(message: impl Into<String>) -> Self {
        Self::CacheUnavailable(message.into())
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classify a backend error after `attempts` attempts
    #[must_use]
    pub fn from_backend(error: BackendError, attempts: u32) -> Self {
        match error {
            BackendError::Timeout { timeout_ms } => Self::BackendTimeout {
                timeout_ms,
                attempts,
            },
            BackendError::Authentication(message) => Self::BackendAuth(message),
            BackendError::InvalidResponse(message) => Self::InvalidResponseFormat(message),
            BackendError::Unavailable {
                message,
                status_code,
            } => {
                // 401/403 from a transport layer are credential problems
                if matches!(status_code, Some(401 | 403)) {
                    Self::BackendAuth(message)
                } else {
                    Self::BackendUnavailable {
                        message,
                        status_code,
                        attempts,
                    }
                }
            }
        }
    }

    /// Get the error kind
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            Self::BackendTimeout { .. } => ErrorKind::BackendTimeout,
            Self::BackendAuth(_) => ErrorKind::BackendAuth,
            Self::InvalidResponseFormat(_) => ErrorKind::InvalidResponseFormat,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if the orchestrator may retry the backend call automatically
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendTimeout { .. }
                | Self::BackendUnavailable { .. }
                | Self::InvalidResponseFormat(_)
        )
    }

    /// Check if the error indicates an operator-level problem
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BackendAuth(_) | Self::Configuration(_) | Self::Internal(_)
        )
    }

    /// Check if the error counts as a backend failure for the circuit breaker
    #[must_use]
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendTimeout { .. }
                | Self::BackendAuth(_)
                | Self::InvalidResponseFormat(_)
                | Self::BackendUnavailable { .. }
        )
    }

    /// Suggested wait before the caller tries again, if known
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_ms }
            | Self::CircuitOpen { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// The caller should take its non-AI fallback path.
    ///
    /// No governance error ever blocks the surrounding workflow.
    #[must_use]
    pub fn fallback_recommended(&self) -> bool {
        true
    }
}

/// Stable, serializable error classification used in metrics and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rate limit exceeded
    RateLimitExceeded,
    /// Circuit open
    CircuitOpen,
    /// Cache unavailable
    CacheUnavailable,
    /// Backend timeout
    BackendTimeout,
    /// Backend authentication failure
    BackendAuth,
    /// Invalid response format
    InvalidResponseFormat,
    /// Backend unavailable
    BackendUnavailable,
    /// Configuration error
    Configuration,
    /// Internal error
    Internal,
}

impl ErrorKind {
    /// Returns the kind as a static string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::CircuitOpen => "circuit_open",
            Self::CacheUnavailable => "cache_unavailable",
            Self::BackendTimeout => "backend_timeout",
            Self::BackendAuth => "backend_auth",
            Self::InvalidResponseFormat => "invalid_response_format",
            Self::BackendUnavailable => "backend_unavailable",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_classification() {
        let err = GovernanceError::from_backend(BackendError::Timeout { timeout_ms: 100 }, 3);
        assert_eq!(
            err,
            GovernanceError::BackendTimeout {
                timeout_ms: 100,
                attempts: 3
            }
        );
        assert!(err.is_retryable());
        assert!(err.is_backend_failure());

        let err = GovernanceError::from_backend(BackendError::unavailable("forbidden", Some(403)), 1);
        assert_eq!(err.kind(), ErrorKind::BackendAuth);
        assert!(!err.is_retryable());
        assert!(err.is_fatal());

        let err = GovernanceError::from_backend(BackendError::unavailable("bad gateway", Some(502)), 2);
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(GovernanceError::rate_limited(1500).retry_after_ms(), Some(1500));
        assert_eq!(
            GovernanceError::circuit_open("chat", 30_000).retry_after_ms(),
            Some(30_000)
        );
        assert_eq!(GovernanceError::internal("boom").retry_after_ms(), None);
    }

    #[test]
    fn test_admission_errors_are_not_backend_failures() {
        assert!(!GovernanceError::rate_limited(1).is_backend_failure());
        assert!(!GovernanceError::circuit_open("chat", 1).is_backend_failure());
        assert!(!GovernanceError::cache_unavailable("down").is_backend_failure());
    }

    #[test]
    fn test_error_kind_serde() {
        let json = serde_json::to_string(&ErrorKind::BackendTimeout).expect("serialize");
        assert_eq!(json, "\"backend_timeout\"");
        assert_eq!(ErrorKind::BackendTimeout.to_string(), "backend_timeout");
    }
}
