//! # Gateway Orchestrator
//!
//! Composes the governance components into a single entry point:
//! rate limiting, circuit breaking, caching, backend calls with retries,
//! metrics and spend tracking.
//!
//! ```ignore
//! let gateway = GatewayOrchestrator::builder()
//!     .config(config)
//!     .backend(backend)
//!     .build()?;
//!
//! let response = gateway.execute(Operation::Analysis, &identity, prompt).await;
//! if response.fallback_recommended() {
//!     // serve the non-AI fallback
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod convert;
pub mod health;
pub mod orchestrator;
pub mod response;

pub use health::{GatewayHealth, HealthStatus, OperationHealth};
pub use orchestrator::{GatewayOrchestrator, GatewayOrchestratorBuilder, MaintenanceReport};
pub use response::GatewayResponse;
