//! Configuration module for the RAG server.
//!
//! Handles loading, validating, and providing default configuration values.
//! A JSON file supplies the base values; `API_PROVIDER` in the environment
//! (or a `.env` file) overrides the embedding provider.
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Environment variable selecting the embedding provider.
pub const PROVIDER_ENV: &str = "API_PROVIDER";

// ── Default value functions ──────────────────────────────────────────

fn default_dimensions() -> usize {
    1536
}

fn default_timeout_secs() -> u64 {
    30
}

/// Log level used until (and unless) a config file says otherwise.
pub const DEFAULT_LOG_LEVEL: &str = "info";

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn resolve_path(config_path: &str) -> &str {
    if config_path.is_empty() {
        "config.json"
    } else {
        config_path
    }
}

// ── Provider kinds ───────────────────────────────────────────────────

/// Embedding backend, chosen once at startup.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    DeepSeek,
    OpenAi,
    Ali,
    Claude,
    /// Offline feature-hashing embedder.
    Hashing,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek",
            Self::OpenAi => "openai",
            Self::Ali => "ali",
            Self::Claude => "claude",
            Self::Hashing => "hashing",
        }
    }

    #[must_use]
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::DeepSeek => Some("https://api.deepseek.com/v1"),
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Ali => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            Self::Claude => Some("https://api.anthropic.com/v1"),
            Self::Hashing => None,
        }
    }

    #[must_use]
    pub fn default_model(self) -> Option<&'static str> {
        match self {
            Self::DeepSeek | Self::OpenAi | Self::Claude => Some("text-embedding-3-small"),
            Self::Ali => Some("text-embedding-v4"),
            Self::Hashing => None,
        }
    }

    /// Name of the environment variable holding the provider's API key.
    #[must_use]
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Ali => Some("DASHSCOPE_API_KEY"),
            Self::Claude => Some("ANTHROPIC_API_KEY"),
            Self::Hashing => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Ok(Self::DeepSeek),
            "openai" => Ok(Self::OpenAi),
            "ali" => Ok(Self::Ali),
            "claude" => Ok(Self::Claude),
            "hashing" => Ok(Self::Hashing),
            other => anyhow::bail!("unsupported API provider: {other}"),
        }
    }
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Overrides the provider's default base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Overrides the provider's default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Outcome of reading a config file.
#[derive(Debug)]
pub enum ConfigSource {
    File(Config),
    Missing,
    Invalid(serde_json::Error),
}

impl ConfigSource {
    /// Log level to start with before the config is resolved.
    #[must_use]
    pub fn log_level(&self) -> &str {
        match self {
            Self::File(cfg) => &cfg.log_level,
            Self::Missing | Self::Invalid(_) => DEFAULT_LOG_LEVEL,
        }
    }
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: None,
            model: None,
            dimensions: default_dimensions(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl EmbeddingConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// A missing file or invalid JSON yields the default config.
    pub fn load(config_path: &str) -> Result<Self> {
        let source = Self::read(config_path)?;
        Ok(Self::resolve(config_path, source))
    }

    /// Read `config_path` without logging or falling back.
    ///
    /// Only I/O failures are errors; a missing file and unparseable JSON are
    /// reported through [`ConfigSource`].
    pub fn read(config_path: &str) -> Result<ConfigSource> {
        let path = resolve_path(config_path);
        if !Path::new(path).exists() {
            return Ok(ConfigSource::Missing);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        Ok(match serde_json::from_str(&data) {
            Ok(cfg) => ConfigSource::File(cfg),
            Err(e) => ConfigSource::Invalid(e),
        })
    }

    /// Turn a [`ConfigSource`] into a config, logging how it was obtained.
    pub fn resolve(config_path: &str, source: ConfigSource) -> Self {
        let path = resolve_path(config_path);
        match source {
            ConfigSource::File(cfg) => {
                info!("Loaded configuration from {path}");
                cfg
            }
            ConfigSource::Missing => {
                info!("{path} not found, using defaults");
                Self::default()
            }
            ConfigSource::Invalid(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                Self::default()
            }
        }
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(PROVIDER_ENV).filter(|v| !v.trim().is_empty()) {
            self.embedding.provider = value
                .parse()
                .with_context(|| format!("invalid {PROVIDER_ENV}"))?;
        }
        Ok(())
    }

    /// Save configuration to a JSON file.
    ///
    /// An existing file that does not parse as a config is left untouched.
    pub fn save(&self, path: &str) -> Result<()> {
        if let ConfigSource::Invalid(e) = Self::read(path)? {
            anyhow::bail!("refusing to overwrite {path}: existing file is not valid config JSON ({e})");
        }
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            self.embedding.timeout_secs > 0,
            "embedding.timeout_secs must be positive"
        );
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
