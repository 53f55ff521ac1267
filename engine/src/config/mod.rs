//! Configuration management
//!
//! This module handles loading, validation, and management of the Mentor configuration.
//! Configuration is stored in TOML format at ~/.mentor/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Inference provider settings and per-role models
//! - **agent**: Conversation window, reasoning limits, capability timeouts
//! - **policy**: Safety and language gate settings
//! - **server**: HTTP transport bind address
//! - **persona_cache**: Coach persona cache sizing
//!
//! Provider API keys are never stored here; see [`crate::secrets`].
//!
//! # Examples
//!
//! ```no_run
//! use mentor_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("History window: {}", config.agent.history_window);
//! println!("Default provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Inference provider configuration
    pub llm: LLMConfig,

    /// Delegation router settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Turn policy gate settings
    #[serde(default)]
    pub policy: PolicyConfig,

    /// HTTP transport settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Coach persona cache settings
    #[serde(default)]
    pub persona_cache: PersonaCacheConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl CoreConfig {
    /// Location of the SQLite record store
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("mentor.db")
    }
}

/// Inference provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default provider (openai, ollama); the others act as fallbacks
    pub default_provider: String,

    /// Sampling temperature for the master persona
    #[serde(default = "default_master_temperature")]
    pub master_temperature: f32,

    /// Sampling temperature for delegated sub-reasoning
    #[serde(default = "default_delegate_temperature")]
    pub delegate_temperature: f32,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for the chat completions API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model used by the master persona
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Model used by delegated sub-reasoning
    #[serde(default = "default_openai_small_model")]
    pub delegate_model: String,

    /// Model used by the policy gate classifiers
    #[serde(default = "default_openai_small_model")]
    pub classifier_model: String,
    // Note: API key resolved from OPENAI_API_KEY or the OS keychain, not config
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Enable Ollama as a provider
    #[serde(default)]
    pub enabled: bool,

    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name (used for every role)
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// Delegation router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Number of most recent history entries handed to the router
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Upper bound on reasoning steps in one router run
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Timeout for standard capabilities (seconds)
    #[serde(default = "default_capability_timeout")]
    pub default_capability_timeout_secs: u64,

    /// Timeout for extended capabilities such as training-plan saves (seconds)
    #[serde(default = "default_long_capability_timeout")]
    pub long_capability_timeout_secs: u64,

    /// Timeout for a single inference call (seconds)
    #[serde(default = "default_inference_timeout")]
    pub inference_timeout_secs: u64,

    /// Overall deadline for one turn (seconds)
    #[serde(default = "default_request_deadline")]
    pub request_deadline_secs: u64,

    /// Display name used when the coach has no user row
    #[serde(default = "default_coach_display_name")]
    pub coach_display_name: String,

    /// Prefix the first user message with the onboarding summary
    #[serde(default = "default_true")]
    pub inject_profile_prefix: bool,
}

impl AgentConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_steps: default_max_steps(),
            default_capability_timeout_secs: default_capability_timeout(),
            long_capability_timeout_secs: default_long_capability_timeout(),
            inference_timeout_secs: default_inference_timeout(),
            request_deadline_secs: default_request_deadline(),
            coach_display_name: default_coach_display_name(),
            inject_profile_prefix: true,
        }
    }
}

/// Turn policy gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Run the pre-turn safety classifier
    #[serde(default = "default_true")]
    pub safety_enabled: bool,

    /// Run the post-turn language classifier
    #[serde(default = "default_true")]
    pub language_enabled: bool,

    /// Language every reply must predominantly be written in
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Replies shorter than this (after trimming) skip the language check
    #[serde(default = "default_language_min_chars")]
    pub language_min_chars: usize,

    /// Number of reply characters handed to the language classifier
    #[serde(default = "default_language_sample_chars")]
    pub language_sample_chars: usize,

    /// Timeout for a single classifier call (seconds)
    #[serde(default = "default_gate_timeout")]
    pub gate_timeout_secs: u64,
}

impl PolicyConfig {
    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_secs)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            safety_enabled: true,
            language_enabled: true,
            target_language: default_target_language(),
            language_min_chars: default_language_min_chars(),
            language_sample_chars: default_language_sample_chars(),
            gate_timeout_secs: default_gate_timeout(),
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Expose the /debug routes
    #[serde(default)]
    pub debug_endpoints: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            debug_endpoints: false,
        }
    }
}

/// Coach persona cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaCacheConfig {
    /// Maximum number of coaches kept in memory
    #[serde(default = "default_persona_cache_capacity")]
    pub capacity: usize,
}

impl Default for PersonaCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_persona_cache_capacity(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.mentor")
}

fn default_master_temperature() -> f32 {
    0.7
}

fn default_delegate_temperature() -> f32 {
    0.2
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_small_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_history_window() -> usize {
    20
}

fn default_max_steps() -> usize {
    10
}

fn default_capability_timeout() -> u64 {
    30
}

fn default_long_capability_timeout() -> u64 {
    45
}

fn default_inference_timeout() -> u64 {
    60
}

fn default_request_deadline() -> u64 {
    120
}

fn default_coach_display_name() -> String {
    "Coach Majen".to_string()
}

fn default_target_language() -> String {
    "Norwegian".to_string()
}

fn default_language_min_chars() -> usize {
    20
}

fn default_language_sample_chars() -> usize {
    500
}

fn default_gate_timeout() -> u64 {
    15
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8100
}

fn default_persona_cache_capacity() -> usize {
    64
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            delegate_model: default_openai_small_model(),
            classifier_model: default_openai_small_model(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            master_temperature: default_master_temperature(),
            delegate_temperature: default_delegate_temperature(),
            openai: OpenAIConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.mentor/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        // Serialize before path expansion so the file keeps the portable ~ form
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.mentor/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".mentor").join("config.toml"))
    }

    /// Create a default configuration (paths not yet expanded)
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            llm: LLMConfig::default(),
            agent: AgentConfig::default(),
            policy: PolicyConfig::default(),
            server: ServerConfig::default(),
            persona_cache: PersonaCacheConfig::default(),
        }
    }

    /// Validate and process configuration
    ///
    /// - Validates enumerated fields and numeric bounds
    /// - Expands ~ in the data directory
    /// - Creates the data directory if it doesn't exist
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["openai", "ollama"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        for (name, temperature) in [
            ("master_temperature", self.llm.master_temperature),
            ("delegate_temperature", self.llm.delegate_temperature),
        ] {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(EngineError::Config(format!(
                    "{} must be between 0.0 and 2.0",
                    name
                )));
            }
        }

        if self.agent.history_window == 0 {
            return Err(EngineError::Config(
                "history_window must be at least 1".to_string(),
            ));
        }
        if self.agent.max_steps == 0 {
            return Err(EngineError::Config(
                "max_steps must be at least 1".to_string(),
            ));
        }

        for (name, secs) in [
            (
                "default_capability_timeout_secs",
                self.agent.default_capability_timeout_secs,
            ),
            (
                "long_capability_timeout_secs",
                self.agent.long_capability_timeout_secs,
            ),
            ("inference_timeout_secs", self.agent.inference_timeout_secs),
            ("request_deadline_secs", self.agent.request_deadline_secs),
            ("gate_timeout_secs", self.policy.gate_timeout_secs),
        ] {
            if secs == 0 {
                return Err(EngineError::Config(format!("{} must be positive", name)));
            }
        }

        if self.persona_cache.capacity == 0 {
            return Err(EngineError::Config(
                "persona_cache.capacity must be at least 1".to_string(),
            ));
        }

        // Expand and create data directory
        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.default_provider, "openai");
        assert_eq!(config.agent.history_window, 20);
        assert_eq!(config.agent.default_capability_timeout_secs, 30);
        assert_eq!(config.agent.long_capability_timeout_secs, 45);
        assert_eq!(config.policy.language_min_chars, 20);
        assert_eq!(config.server.port, 8100);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_database_path_under_data_dir() {
        let core = CoreConfig {
            log_level: "info".to_string(),
            data_dir: PathBuf::from("/var/lib/mentor"),
        };
        assert_eq!(core.database_path(), PathBuf::from("/var/lib/mentor/mentor.db"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.agent.history_window,
            deserialized.agent.history_window
        );
        assert_eq!(
            config.policy.target_language,
            deserialized.policy.target_language
        );
    }
}
