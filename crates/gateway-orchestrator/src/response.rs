//! Result of one governed request.

use gateway_core::{ErrorKind, GovernanceError};
use gateway_resilience::QueueTicket;

/// Outcome of [`crate::GatewayOrchestrator::execute`].
///
/// Exactly one of `result` and `error` is set. Every error means the caller
/// should degrade to its non-AI fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    /// Generated content
    pub result: Option<String>,
    /// Whether `result` came from the response cache
    pub cache_hit: bool,
    /// Structured failure
    pub error: Option<GovernanceError>,
    /// Queue position for throttled or circuit-blocked callers
    pub queue_position: Option<usize>,
    /// Milliseconds the caller should wait before retrying
    pub retry_after_ms: Option<u64>,
    /// Queue ticket for throttled or circuit-blocked callers
    pub ticket: Option<QueueTicket>,
    /// Backend calls made
    pub attempts: u32,
    /// End-to-end latency
    pub latency_ms: u64,
}

impl GatewayResponse {
    pub(crate) fn success(content: String, attempts: u32, latency_ms: u64) -> Self {
        Self {
            result: Some(content),
            cache_hit: false,
            error: None,
            queue_position: None,
            retry_after_ms: None,
            ticket: None,
            attempts,
            latency_ms,
        }
    }

    pub(crate) fn cached(content: String, latency_ms: u64) -> Self {
        Self {
            cache_hit: true,
            ..Self::success(content, 0, latency_ms)
        }
    }

    pub(crate) fn failure(error: GovernanceError, attempts: u32, latency_ms: u64) -> Self {
        Self {
            result: None,
            cache_hit: false,
            retry_after_ms: error.retry_after_ms(),
            error: Some(error),
            queue_position: None,
            ticket: None,
            attempts,
            latency_ms,
        }
    }

    pub(crate) fn rate_limited(ticket: QueueTicket, retry_after_ms: u64, latency_ms: u64) -> Self {
        Self::queued(GovernanceError::rate_limited(retry_after_ms), ticket, latency_ms)
    }

    pub(crate) fn unavailable(
        ticket: QueueTicket,
        operation: &str,
        retry_after_ms: u64,
        latency_ms: u64,
    ) -> Self {
        Self::queued(
            GovernanceError::circuit_open(operation, retry_after_ms),
            ticket,
            latency_ms,
        )
    }

    fn queued(error: GovernanceError, ticket: QueueTicket, latency_ms: u64) -> Self {
        Self {
            queue_position: Some(ticket.position),
            ticket: Some(ticket),
            ..Self::failure(error, 0, latency_ms)
        }
    }

    #[must_use]
    pub(crate) fn with_retry_after(mut self, retry_after_ms: u64) -> Self {
        self.retry_after_ms = Some(retry_after_ms);
        self
    }

    /// Whether content was produced
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Failure class, if any
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(GovernanceError::kind)
    }

    /// Whether the caller should switch to its fallback
    #[must_use]
    pub fn fallback_recommended(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(GovernanceError::fallback_recommended)
    }
}
