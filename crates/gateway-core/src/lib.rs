//! # Gateway Core
//!
//! Core types, traits, and error handling shared by the governance crates.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - Caller identity and operation classes
//! - The outbound AI backend contract
//! - The governance error taxonomy
//! - Clock abstraction for time-dependent state

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod clock;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use backend::{AiBackend, BackendError, BackendRequest, BackendResponse, LatencyEstimator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, GovernanceError, GovernanceResult};
pub use types::{Identity, Operation, Tier};
