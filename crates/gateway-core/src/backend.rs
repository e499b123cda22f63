//! Outbound AI backend contract.
//!
//! The backend is an external dependency with no contract beyond
//! success/failure and token accounting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request sent to the AI backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Target model
    pub model: String,
    /// Prompt text
    pub prompt: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
}

impl BackendRequest {
    /// Create a new backend request
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens,
        }
    }
}

/// Successful backend response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendResponse {
    /// Generated content
    pub content: String,
    /// Total tokens billed for the call
    pub tokens_used: u32,
}

impl BackendResponse {
    /// Create a new backend response
    #[must_use]
    pub fn new(content: impl Into<String>, tokens_used: u32) -> Self {
        Self {
            content: content.into(),
            tokens_used,
        }
    }
}

/// Typed errors an AI backend may report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The call exceeded its deadline
    #[error("Backend call timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// Credentials rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Response could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Transport failure or error status
    #[error("Backend unavailable: {message}")]
    Unavailable {
        /// Error message
        message: String,
        /// HTTP status code, if any
        status_code: Option<u16>,
    },
}

impl BackendError {
    /// Create an unavailable error
    #[must_use]
    pub fn unavailable(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Unavailable {
            message: message.into(),
            status_code,
        }
    }

    /// Create an authentication error
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// Create an invalid response error
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }
}

/// A generative-AI backend
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Execute a completion
    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError>;

    /// Backend name for logs and metrics
    fn name(&self) -> &str;
}

/// Source of a moving-average backend latency.
///
/// Implemented by the metrics service and consumed by the request queue to
/// estimate wait times.
pub trait LatencyEstimator: Send + Sync {
    /// Moving average latency of recent backend calls, if any were observed
    fn moving_average_latency_ms(&self) -> Option<f64>;
}
