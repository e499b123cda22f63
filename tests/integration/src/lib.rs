//! Integration tests for the AI Gateway Governance layer
//!
//! This crate exercises the governance components together:
//! - Rate limiting and the advisory queue
//! - Circuit breaking around a misbehaving backend
//! - Response caching, warming and cache outages
//! - Cost tracking, budget alerts and reports
//! - End-to-end governed request flows

pub mod fixtures;
pub mod helpers;
pub mod mock_backends;

// Re-export commonly used items
pub use fixtures::*;
pub use helpers::*;
pub use mock_backends::*;

#[cfg(test)]
mod cache_tests;
#[cfg(test)]
mod circuit_breaker_tests;
#[cfg(test)]
mod cost_tests;
#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod rate_limit_tests;
