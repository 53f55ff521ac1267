//! CLI interface for Mentor
//!
//! Command-line surface built with clap's derive API: run the HTTP server,
//! drive a single turn from the terminal, inspect stored plans and manage
//! configuration and provider keys.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Mentor coaching engine
///
/// Routes each chat turn from the coach persona to specialised task
/// executors that log and store the user's training and nutrition data.
#[derive(Parser, Debug)]
#[command(name = "mentor")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single turn and print the reply
    Chat {
        /// User the turn belongs to
        #[arg(long)]
        user: String,

        /// Coach whose persona answers
        #[arg(long)]
        coach: String,

        /// The message to send
        message: String,
    },

    /// List the latest stored plans for a user
    Plans {
        #[arg(long)]
        user: String,
    },

    /// Show the effective configuration
    Config,

    /// Run system diagnostics
    Doctor,

    /// Manage provider keys in the OS keychain
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SecretAction {
    /// Store a key (read from stdin when no value is given)
    Set {
        /// Secret name, e.g. openai_api_key
        key: String,
        value: Option<String>,
    },

    /// Delete a key
    Remove { key: String },
}
