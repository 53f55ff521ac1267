//! Mentor SDK
//!
//! Shared vocabulary for the Mentor engine: the error taxonomy, the
//! structured result every task executor returns, and the capability
//! descriptors and argument types the delegation router works with.
//! This crate performs no I/O.

/// Error types and handling
pub mod errors;

/// Capability descriptors and parameter schemas
pub mod schema;

/// Capability input/output types
pub mod types;

// Re-export commonly used types
pub use errors::{CoachErrorExt, EngineError};
pub use schema::{CapabilityCost, CapabilitySpec, ParamKind, ParamSpec};
pub use types::{ArgError, CapabilityArgs, ExecutionResult};
