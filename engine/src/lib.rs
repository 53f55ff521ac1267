//! Mentor Engine Library
//!
//! This library provides the core functionality of the Mentor engine.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// Database persistence module
pub mod db;

/// LLM provider abstraction layer
pub mod llm;

/// Per-turn user and coach context
pub mod context;

/// Task executors and delegates
pub mod capabilities;

/// Delegation router, persona prompt and working memory
pub mod agent;

/// Safety and language gates
pub mod policy;

/// Turn pipeline
pub mod turn;

/// HTTP transport
pub mod server;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
