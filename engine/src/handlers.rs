//! Command handlers for CLI operations
//!
//! - serve: run the HTTP transport
//! - chat: run one turn from the terminal
//! - plans: list a user's stored plan versions
//! - config: print the effective configuration
//! - doctor: validate configuration, storage and providers
//! - secret: store or delete provider keys

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;

use crate::cli::SecretAction;
use crate::config::Config;
use crate::db::{Database, RecordStore};
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::router::LLMRouter;
use crate::llm::LLMProvider;
use crate::secrets::{SecretCache, SecretManager, OPENAI_API_KEY};
use crate::server::{self, AppState};
use crate::turn::TurnHandler;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Providers available under `config`, default first
///
/// OpenAI is only registered when its key resolves, so a keyless setup
/// falls through to a local Ollama without prompting.
pub fn build_providers(config: &Config, secrets: &Arc<SecretManager>) -> Vec<Box<dyn LLMProvider>> {
    let mut providers: Vec<Box<dyn LLMProvider>> = Vec::new();

    if secrets.has_secret(OPENAI_API_KEY) {
        let cache = Arc::new(SecretCache::new(Arc::clone(secrets)));
        providers.push(Box::new(OpenAIProvider::new(config.llm.openai.clone(), cache)));
    } else {
        tracing::warn!(
            "No OpenAI key found; set {} or run 'mentor secret set {}'",
            OPENAI_API_KEY.to_ascii_uppercase(),
            OPENAI_API_KEY
        );
    }

    if config.llm.ollama.enabled {
        providers.push(Box::new(OllamaProvider::new(
            config.llm.ollama.base_url.clone(),
            config.llm.ollama.model.clone(),
        )));
    }

    providers
}

fn build_llm(config: &Config) -> Result<Arc<LLMRouter>> {
    let secrets = Arc::new(SecretManager::default());
    let providers = build_providers(config, &secrets);
    if providers.is_empty() {
        anyhow::bail!(
            "No LLM providers configured. Set {} or enable [llm.ollama] in config.toml",
            OPENAI_API_KEY.to_ascii_uppercase()
        );
    }
    Ok(Arc::new(LLMRouter::new(
        providers,
        config.llm.default_provider.clone(),
        config.agent.inference_timeout(),
    )))
}

async fn open_store(config: &Config) -> Result<(Database, Arc<dyn RecordStore>)> {
    let database = Database::new(&config.core.database_path())
        .await
        .context("Failed to open database")?;
    let store: Arc<dyn RecordStore> = Arc::new(database.store());
    Ok((database, store))
}

/// Run the HTTP server until Ctrl-C
pub async fn handle_serve(config: &Config, port: Option<u16>) -> Result<()> {
    let (database, store) = open_store(config).await?;
    let llm = build_llm(config)?;
    let turns = Arc::new(TurnHandler::new(config, Arc::clone(&store), llm));
    tracing::info!("Master catalog: {}", turns.catalog().names().join(", "));

    let state = AppState { turns, store };
    let port = port.unwrap_or(config.server.port);
    server::serve(state, &config.server.host, port, config.server.debug_endpoints).await?;

    database.close().await
}

/// Run a single turn without history
pub async fn handle_chat(
    config: &Config,
    user_id: &str,
    coach_id: &str,
    message: &str,
    format: OutputFormat,
) -> Result<()> {
    let (database, store) = open_store(config).await?;
    let llm = build_llm(config)?;
    let turns = TurnHandler::new(config, store, llm);

    let outcome = turns
        .handle_turn(user_id, coach_id, message, &[])
        .await
        .context("Turn failed")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        OutputFormat::Text => {
            println!("{}: {}", outcome.agent_name, outcome.reply);
            println!();
            if outcome.blocked {
                println!(
                    "✗ Blocked ({})",
                    outcome.blocked_reason.as_deref().unwrap_or("policy")
                );
            }
            for record in &outcome.invocations {
                println!(
                    "  {}{} {} ({}ms){}",
                    "  ".repeat(record.depth),
                    if record.success { "✓" } else { "✗" },
                    record.name,
                    record.elapsed_ms,
                    if record.timed_out { " timed out" } else { "" }
                );
            }
            if outcome.language_flagged() {
                println!("  ! Reply flagged by the language gate");
            }
            println!("  Duration: {}ms", outcome.elapsed_ms);
        }
    }

    database.close().await
}

/// Latest plan versions for a user
pub async fn handle_plans(config: &Config, user_id: &str, format: OutputFormat) -> Result<()> {
    let (database, store) = open_store(config).await?;
    let overview = server::plan_overview(store.as_ref(), user_id)
        .await
        .context("Failed to read plans")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&overview)?),
        OutputFormat::Text => {
            println!("Plans for {}", user_id);
            for (title, key) in [("Training", "training_plans"), ("Nutrition", "nutrition_plans")] {
                println!();
                println!("{}:", title);
                let plans = overview[key].as_array().cloned().unwrap_or_default();
                if plans.is_empty() {
                    println!("  (none)");
                }
                for plan in plans {
                    println!(
                        "  v{} {} {}",
                        plan["version"],
                        plan["created_at"].as_str().unwrap_or(""),
                        plan["reason"].as_str().unwrap_or("")
                    );
                }
            }
        }
    }

    database.close().await
}

/// Print the effective configuration
pub fn handle_config(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!(
            "{}",
            toml::to_string_pretty(config).context("Failed to render config")?
        ),
    }
    Ok(())
}

/// Validate configuration and check dependencies
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(&str, String)> = Vec::new();

    // Config is validated when loaded
    checks.push(("Configuration", "Valid".to_string()));

    let db_path = config.core.database_path();
    match Database::new(&db_path).await {
        Ok(database) => {
            checks.push(("Database", format!("OK ({})", db_path.display())));
            database.close().await.ok();
        }
        Err(e) => {
            checks.push(("Database", "Failed".to_string()));
            issues.push(format!("Cannot open database: {:#}", e));
        }
    }

    let secrets = Arc::new(SecretManager::default());
    if secrets.has_secret(OPENAI_API_KEY) {
        checks.push(("OpenAI API key", "Configured".to_string()));
    } else {
        checks.push(("OpenAI API key", "Not configured".to_string()));
    }

    let providers = build_providers(config, &secrets);
    if providers.is_empty() {
        issues.push("No LLM providers available. Configure at least one provider.".to_string());
    } else {
        let router = LLMRouter::new(
            providers,
            config.llm.default_provider.clone(),
            config.agent.inference_timeout(),
        );
        for (name, healthy) in router.check_health().await {
            if healthy {
                checks.push((provider_label(name), "Available".to_string()));
            } else {
                checks.push((provider_label(name), "Not available".to_string()));
                issues.push(format!("Provider '{}' failed its health check", name));
            }
        }
    }

    match format {
        OutputFormat::Json => {
            let output = json!({
                "checks": checks
                    .iter()
                    .map(|(name, status)| json!({ "name": name, "status": status }))
                    .collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("Mentor diagnostics");
            println!();
            for (name, status) in &checks {
                println!("  {:<20} {}", name, status);
            }
            println!();
            if issues.is_empty() {
                println!("✓ All checks passed");
            } else {
                println!("✗ {} issue(s) found:", issues.len());
                for issue in &issues {
                    println!("  - {}", issue);
                }
            }
        }
    }

    Ok(())
}

fn provider_label(name: &str) -> &'static str {
    match name {
        "openai" => "OpenAI",
        "ollama" => "Ollama",
        _ => "Provider",
    }
}

/// Store or delete a provider key in the OS keychain
pub fn handle_secret(action: SecretAction, format: OutputFormat) -> Result<()> {
    let manager = SecretManager::default();
    let (key, verb) = match action {
        SecretAction::Set { key, value } => {
            let value = match value {
                Some(v) => v,
                None => manager.prompt_for_secret(&key)?,
            };
            manager.set_secret(&key, &value)?;
            (key, "stored")
        }
        SecretAction::Remove { key } => {
            manager.delete_secret(&key)?;
            (key, "removed")
        }
    };

    match format {
        OutputFormat::Json => println!("{}", json!({ "key": key, "status": verb })),
        OutputFormat::Text => println!("Secret '{}' {}", key, verb),
    }
    Ok(())
}
