//! Agent Loop Core
//!
//! The delegation router, the per-turn persona prompt and the working
//! memory the master persona reasons over.

pub mod core;
pub mod prompt;
pub mod working_memory;

pub use core::{inference_error, DelegationRouter, RouteOutcome, RouterLimits};
pub use prompt::PolicyBlock;
pub use working_memory::{HistoryEntry, WorkingMemory};
