//! Engine configuration.
//!
//! Loads, validates, and normalizes the JSON config that picks the provider,
//! the dispatch strategy and the retry and cache bounds. Every field has a
//! default, so `{}` is a valid config.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::client::{AiClient, CommandClient, OpenAiCompatibleClient, OpenAiSettings};
use crate::dispatch::{RetryPolicy, StrategyConfig};

/// Current schema version for the engine config file.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Fallback LM command when neither the CLI nor the config names a provider.
pub const LM_COMMAND_ENV: &str = "LMENRICH_LM_COMMAND";
/// Fallback API key for OpenAI-compatible providers.
pub const API_KEY_ENV: &str = "LMENRICH_API_KEY";

const APP_DIR: &str = "lmenrich";
const CONFIG_FILE: &str = "config.json";
const SCHEMA_STORE_FILE: &str = "schemas.json";

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,
    pub strategy: StrategyConfig,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
    /// Default job context, overridden by `--context`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            provider: None,
            strategy: StrategyConfig::default(),
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            context: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Snapshot file loaded before and saved after each run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            path: None,
        }
    }
}

/// Which AI client variant to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible {
        #[serde(default = "default_base_url")]
        base_url: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        /// Environment variable holding the key, checked when `api_key` is unset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key_env: Option<String>,
        #[serde(default = "default_temperature")]
        temperature: f64,
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Local command reading the prompt on stdin (parsed with shell quoting).
    Command { command: String },
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_timeout_secs() -> u64 {
    180
}

impl ProviderConfig {
    pub fn openai_defaults() -> Self {
        Self::OpenAiCompatible {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            api_key_env: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::OpenAiCompatible {
                base_url,
                model,
                temperature,
                timeout_secs,
                ..
            } => {
                if base_url.trim().is_empty() {
                    return Err(anyhow!("provider base_url must be non-empty"));
                }
                if model.trim().is_empty() {
                    return Err(anyhow!("provider model must be non-empty"));
                }
                if !(0.0..=2.0).contains(temperature) {
                    return Err(anyhow!(
                        "provider temperature must be between 0 and 2 (got {temperature})"
                    ));
                }
                if *timeout_secs == 0 {
                    return Err(anyhow!("provider timeout_secs must be at least 1"));
                }
            }
            Self::Command { command } => {
                if command.trim().is_empty() {
                    return Err(anyhow!("provider command must be non-empty"));
                }
            }
        }
        Ok(())
    }

    /// Build the client, reading API keys from the process environment.
    pub fn build(&self) -> Result<Arc<dyn AiClient>> {
        self.build_with_env(|name| std::env::var(name).ok())
    }

    pub fn build_with_env(&self, env: impl Fn(&str) -> Option<String>) -> Result<Arc<dyn AiClient>> {
        self.validate()?;
        match self {
            Self::OpenAiCompatible {
                base_url,
                model,
                temperature,
                max_tokens,
                timeout_secs,
                ..
            } => {
                let api_key = self.api_key_with_env(&env);
                if api_key.is_none() {
                    tracing::warn!(base_url = %base_url, "no API key configured for provider");
                }
                Ok(Arc::new(OpenAiCompatibleClient::new(OpenAiSettings {
                    base_url: base_url.clone(),
                    model: model.clone(),
                    api_key,
                    temperature: *temperature,
                    max_tokens: *max_tokens,
                    timeout: Duration::from_secs(*timeout_secs),
                })))
            }
            Self::Command { command } => Ok(Arc::new(CommandClient::new(command)?)),
        }
    }

    /// Config `api_key` > env var named by `api_key_env` > `LMENRICH_API_KEY`.
    fn api_key_with_env(&self, env: &impl Fn(&str) -> Option<String>) -> Option<String> {
        let Self::OpenAiCompatible {
            api_key,
            api_key_env,
            ..
        } = self
        else {
            return None;
        };
        let non_empty = |value: Option<String>| value.filter(|key| !key.trim().is_empty());
        non_empty(api_key.clone())
            .or_else(|| api_key_env.as_deref().and_then(|name| non_empty(env(name))))
            .or_else(|| non_empty(env(API_KEY_ENV)))
    }
}

/// Pick the provider: CLI `--lm-command` > config > `LMENRICH_LM_COMMAND`.
pub fn resolve_provider(cli_command: Option<&str>, config: &EngineConfig) -> Result<ProviderConfig> {
    resolve_provider_with_env(cli_command, config, |name| std::env::var(name).ok())
}

pub fn resolve_provider_with_env(
    cli_command: Option<&str>,
    config: &EngineConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ProviderConfig> {
    if let Some(command) = cli_command.filter(|command| !command.trim().is_empty()) {
        return Ok(ProviderConfig::Command {
            command: command.to_string(),
        });
    }
    if let Some(provider) = &config.provider {
        return Ok(provider.clone());
    }
    if let Some(command) = env(LM_COMMAND_ENV).filter(|command| !command.trim().is_empty()) {
        return Ok(ProviderConfig::Command { command });
    }
    Err(anyhow!(
        "no provider configured; set `provider` in the config, pass --lm-command, or set {LM_COMMAND_ENV}"
    ))
}

/// Default engine config, with an example provider filled in.
pub fn default_config() -> EngineConfig {
    EngineConfig {
        provider: Some(ProviderConfig::openai_defaults()),
        ..EngineConfig::default()
    }
}

/// Pretty JSON for `lmenrich init`.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_config()).context("serialize config stub")
}

pub fn validate_config(config: &EngineConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    config.strategy.validate()?;
    if config.cache.max_entries == 0 {
        return Err(anyhow!("cache max_entries must be at least 1"));
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        return Err(anyhow!(
            "retry max_delay_ms ({}) must not be below base_delay_ms ({})",
            config.retry.max_delay_ms,
            config.retry.base_delay_ms
        ));
    }
    if let Some(provider) = &config.provider {
        provider.validate()?;
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: EngineConfig = serde_json::from_slice(&bytes).context("parse config JSON")?;
    validate_config(&config)?;
    Ok(config)
}

/// Load `path`, or fall back to defaults (no provider) when it does not exist.
pub fn load_config_or_default(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config not found; using defaults");
        return Ok(EngineConfig::default());
    }
    load_config(path)
}

pub fn write_config(path: &Path, config: &EngineConfig) -> Result<()> {
    let text = serde_json::to_string_pretty(config).context("serialize config")?;
    write_text(path, &text)
}

/// Write the `lmenrich init` stub to `path`.
pub fn write_config_stub(path: &Path) -> Result<()> {
    write_text(path, &config_stub()?)
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create config dir")?;
    }
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn app_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| anyhow!("cannot determine the user config directory; pass a path explicitly"))
}

/// `<config dir>/lmenrich/config.json`.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_dir()?.join(CONFIG_FILE))
}

/// `<config dir>/lmenrich/schemas.json`.
pub fn default_schema_store_path() -> Result<PathBuf> {
    Ok(app_dir()?.join(SCHEMA_STORE_FILE))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
