// Mentor coaching engine
// Main entry point for the mentor binary

use clap::Parser;
use mentor_engine::cli::{Cli, Command};
use mentor_engine::config::Config;
use mentor_engine::handlers::{
    handle_chat, handle_config, handle_doctor, handle_plans, handle_secret, handle_serve,
    OutputFormat,
};
use mentor_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(config_path) => Config::load_from_path(config_path),
        None => Config::load_or_create(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // The subscriber can only be installed once: --log wins over the
    // config, RUST_LOG wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    tracing::info!(
        "Mentor Engine v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Serve { port } => {
            tracing::info!("Starting server...");
            handle_serve(&config, port).await
        }

        Command::Chat {
            user,
            coach,
            message,
        } => handle_chat(&config, &user, &coach, &message, format).await,

        Command::Plans { user } => handle_plans(&config, &user, format).await,

        Command::Config => handle_config(&config, format),

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }

        Command::Secret { action } => handle_secret(action, format),
    }
}
