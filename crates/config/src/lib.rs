//! Configuration loading, validation, and management for LocalMind.
//!
//! Loads configuration from `~/.localmind/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use localmind_core::RecordLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.localmind/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which generation backend to load, and from where
    #[serde(default)]
    pub model: ModelConfig,

    /// Bounded memory store settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Document compression settings
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Context assembly settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Response generation settings
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Where generation happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// In-process GGUF inference
    #[default]
    Local,
    /// A local OpenAI-compatible server (llama.cpp server, Ollama, vLLM)
    Server,
}

impl std::fmt::Display for ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Server => write!(f, "server"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub backend: ModelBackend,

    /// GGUF weights file (local backend); `tokenizer.json` is expected next to it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Server endpoint (server backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model name reported to the server and shown in the UI
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Prompt window of the loaded model, in tokens
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Prompt format for the local backend: instruct, chatml, tinyllama, llama2, llama3
    #[serde(default = "default_chat_template")]
    pub chat_template: String,
}

fn default_model_name() -> String {
    "tinyllama-1.1b-chat".into()
}
fn default_context_window() -> usize {
    4096
}
fn default_chat_template() -> String {
    "instruct".into()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::default(),
            path: None,
            base_url: None,
            name: default_model_name(),
            api_key: None,
            context_window: default_context_window(),
            chat_template: default_chat_template(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("backend", &self.backend)
            .field("path", &self.path)
            .field("base_url", &self.base_url)
            .field("name", &self.name)
            .field("api_key", &redact(&self.api_key))
            .field("context_window", &self.context_window)
            .field("chat_template", &self.chat_template)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Store file
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,

    /// Hard ceiling on the summed record sizes, in KiB
    #[serde(default = "default_capacity_kb")]
    pub capacity_kb: u64,

    /// Fraction of capacity above which eviction starts (0, 1]. At 1.0 the
    /// store evicts only once it is strictly over capacity.
    #[serde(default = "default_eviction_trigger")]
    pub eviction_trigger: f64,

    /// Raw text kept per record for citations
    #[serde(default = "default_excerpt_max_chars")]
    pub excerpt_max_chars: usize,

    /// How long a snapshot waits for the store lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_memory_path() -> PathBuf {
    AppConfig::config_dir()
        .join("memory")
        .join("compressed_memory.json")
}
fn default_capacity_kb() -> u64 {
    2000
}
fn default_eviction_trigger() -> f64 {
    1.0
}
fn default_excerpt_max_chars() -> usize {
    10_000
}
fn default_lock_timeout_ms() -> u64 {
    2000
}

impl MemoryConfig {
    pub fn capacity_bytes(&self) -> usize {
        (self.capacity_kb as usize).saturating_mul(1024)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: default_memory_path(),
            capacity_kb: default_capacity_kb(),
            eviction_trigger: default_eviction_trigger(),
            excerpt_max_chars: default_excerpt_max_chars(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Document text beyond this many chars is not shown to the model
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_compression_temperature")]
    pub temperature: f32,

    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,

    #[serde(default = "default_max_key_concepts")]
    pub max_key_concepts: usize,

    #[serde(default = "default_max_facts")]
    pub max_facts: usize,
}

fn default_max_input_chars() -> usize {
    6000
}
fn default_max_output_tokens() -> u32 {
    600
}
fn default_compression_temperature() -> f32 {
    0.2
}
fn default_summary_max_chars() -> usize {
    500
}
fn default_max_key_concepts() -> usize {
    15
}
fn default_max_facts() -> usize {
    20
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_input_chars: default_max_input_chars(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_compression_temperature(),
            summary_max_chars: default_summary_max_chars(),
            max_key_concepts: default_max_key_concepts(),
            max_facts: default_max_facts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the learned-knowledge block
    #[serde(default = "default_max_memory_tokens")]
    pub max_memory_tokens: usize,

    /// Most recent non-system messages sent with each turn
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_max_memory_tokens() -> usize {
    1536
}
fn default_history_window() -> usize {
    10
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_memory_tokens: default_max_memory_tokens(),
            history_window: default_history_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: usize,

    /// The response reserve is never shrunk below this to fit the window
    #[serde(default = "default_min_response_tokens")]
    pub min_response_tokens: usize,

    #[serde(default = "default_profile")]
    pub default_profile: String,
}

fn default_max_response_tokens() -> usize {
    512
}
fn default_min_response_tokens() -> usize {
    100
}
fn default_profile() -> String {
    "general".into()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_response_tokens: default_max_response_tokens(),
            min_response_tokens: default_min_response_tokens(),
            default_profile: default_profile(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.localmind/config.toml).
    ///
    /// Environment variables override file values:
    /// - `LOCALMIND_MODEL_PATH`
    /// - `LOCALMIND_BASE_URL`
    /// - `LOCALMIND_MODEL`
    /// - `LOCALMIND_API_KEY`
    /// - `LOCALMIND_MEMORY_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `LOCALMIND_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("LOCALMIND_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup("LOCALMIND_BASE_URL") {
            self.model.base_url = Some(url);
        }
        if let Some(name) = lookup("LOCALMIND_MODEL") {
            self.model.name = name;
        }
        if let Some(key) = lookup("LOCALMIND_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(path) = lookup("LOCALMIND_MEMORY_PATH") {
            self.memory.path = PathBuf::from(path);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".localmind")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.capacity_kb == 0 {
            return Err(ConfigError::ValidationError(
                "memory.capacity_kb must be > 0".into(),
            ));
        }

        let trigger = self.memory.eviction_trigger;
        if !(trigger > 0.0 && trigger <= 1.0) {
            return Err(ConfigError::ValidationError(
                "memory.eviction_trigger must be in (0.0, 1.0]".into(),
            ));
        }

        if self.generation.min_response_tokens > self.generation.max_response_tokens {
            return Err(ConfigError::ValidationError(
                "generation.min_response_tokens must not exceed max_response_tokens".into(),
            ));
        }

        if self.model.context_window <= self.generation.min_response_tokens {
            return Err(ConfigError::ValidationError(
                "model.context_window must be larger than generation.min_response_tokens".into(),
            ));
        }

        let temperature = self.compression.temperature;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::ValidationError(
                "compression.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        Ok(())
    }

    /// Record field caps derived from `[compression]` and `[memory]`.
    pub fn record_limits(&self) -> RecordLimits {
        RecordLimits {
            summary_max_chars: self.compression.summary_max_chars,
            max_key_concepts: self.compression.max_key_concepts,
            max_facts: self.compression.max_facts,
            excerpt_max_chars: self.memory.excerpt_max_chars,
        }
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
