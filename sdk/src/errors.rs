//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Mentor engine.
//! All errors implement the `CoachErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Taxonomy
//!
//! - **Validation**: bad capability arguments. Recovered inside the executor
//!   and reported as a structured failure result.
//! - **StoreUnavailable**: record store unreachable. Reads degrade to empty
//!   results, required writes surface as capability failures.
//! - **CapabilityTimeout**: recovered by the router; the turn still composes.
//! - **PolicyBlocked**: the safety gate tripped; the turn short-circuits.
//! - **InferenceUnavailable**: the reasoning backend failed; fatal for the turn.
//!
//! # Security
//!
//! Error messages may contain internal detail and are meant for logs. Only
//! `user_hint()` is safe to show to an end user.

use thiserror::Error;

/// Trait for Mentor error extensions
///
/// Provides additional context for errors, including user-friendly hints and
/// recoverability information.
pub trait CoachErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint never contains secrets, row contents or internal identifiers.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable within the current turn
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{CoachErrorExt, EngineError};
///
/// let error = EngineError::Validation("kg must be between 20 and 500".to_string());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::InferenceUnavailable("all providers failed".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    // Capability errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Capability '{name}' timed out after {secs}s")]
    CapabilityTimeout { name: String, secs: u64 },

    // Policy errors
    #[error("Turn blocked by policy: {category}")]
    PolicyBlocked { category: String },

    // Inference errors
    #[error("Inference unavailable: {0}")]
    InferenceUnavailable(String),

    #[error("Inference call timed out")]
    InferenceTimeout,

    #[error("All LLM providers exhausted")]
    AllProvidersExhausted,

    #[error("Reasoning step limit exceeded ({0} steps)")]
    MaxStepsExceeded(usize),

    // Transport errors
    #[error("Request deadline of {0}s exceeded")]
    RequestDeadlineExceeded(u64),

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoachErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::Database(_) => "Database operation failed. Try again shortly",
            Self::StoreUnavailable(_) => "Storage is temporarily unavailable. Try again shortly",

            Self::Validation(_) => "Some of the supplied values were not accepted",
            Self::CapabilityNotFound(_) => "The requested action is not available",
            Self::CapabilityTimeout { .. } => "The action took too long. Try again",

            Self::PolicyBlocked { .. } => "This request is outside what the coach can help with",

            Self::InferenceUnavailable(_) | Self::AllProvidersExhausted => {
                "The coach is unavailable right now. Check provider configuration"
            }
            Self::InferenceTimeout => "The coach took too long to respond. Try again",
            Self::MaxStepsExceeded(_) => "Request too complex. Try breaking it into smaller steps",

            Self::RequestDeadlineExceeded(_) => "The request took too long. Try again",

            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",
            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Serialization(_) => "Received malformed data",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Fatal for the turn
            Self::InferenceUnavailable(_)
            | Self::AllProvidersExhausted
            | Self::InferenceTimeout
            | Self::RequestDeadlineExceeded(_)
            | Self::Config(_) => false,

            _ => true,
        }
    }
}
