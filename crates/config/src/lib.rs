//! Configuration loading, validation, and management for AgentX.
//!
//! Loads configuration from `~/.agentx/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.agentx/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key handed to whichever provider adapter the embedder wires in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// LLM request settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Task engine limits
    #[serde(default)]
    pub engine: EngineConfig,

    /// Agent retry behaviour
    #[serde(default)]
    pub agent: AgentConfig,

    /// Pipe composition behaviour
    #[serde(default)]
    pub pipe: PipeConfig,

    /// Conversation memory
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("llm", &self.llm)
            .field("engine", &self.engine)
            .field("agent", &self.agent)
            .field("pipe", &self.pipe)
            .field("memory", &self.memory)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard ceiling on step-equivalents per task-engine run
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_steps() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Attempts per agent before giving up on its goal
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
}

fn default_max_retry() -> u32 {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retry: default_max_retry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Halt the pipe when an agent exhausts its retries
    #[serde(default)]
    pub stop_on_unsatisfied: bool,

    /// Maximum memories recalled before each agent
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
}

fn default_recall_limit() -> usize {
    5
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            stop_on_unsatisfied: false,
            recall_limit: default_recall_limit(),
        }
    }
}

/// Which memory backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackendKind {
    /// No memory at all
    #[default]
    None,
    /// Process-local, lost on exit
    InMemory,
    /// JSON-lines file
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackendKind,

    /// File path for the `file` backend (defaults to `~/.agentx/memory/memories.jsonl`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl MemoryConfig {
    /// Resolved path for the file backend.
    pub fn file_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            AppConfig::config_dir()
                .join("memory")
                .join("memories.jsonl")
        })
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentx/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `AGENTX_API_KEY`
    /// - `AGENTX_MODEL`
    /// - `AGENTX_MAX_STEPS`
    /// - `AGENTX_MAX_RETRY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("AGENTX_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("AGENTX_MODEL") {
            self.llm.model = model;
        }
        if let Some(raw) = lookup("AGENTX_MAX_STEPS") {
            self.engine.max_steps = parse_env("AGENTX_MAX_STEPS", &raw)?;
        }
        if let Some(raw) = lookup("AGENTX_MAX_RETRY") {
            self.agent.max_retry = parse_env("AGENTX_MAX_RETRY", &raw)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.engine.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_steps must be greater than 0".into(),
            ));
        }
        if self.agent.max_retry == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_retry must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentx")
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} must be a positive integer, got '{raw}'")))
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_steps, 100);
        assert_eq!(config.agent.max_retry, 3);
        assert!(!config.pipe.stop_on_unsatisfied);
        assert_eq!(config.memory.backend, MemoryBackendKind::None);
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = AppConfig::default_toml();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.llm.model, "gpt-4o-mini");
        assert_eq!(parsed.pipe.recall_limit, 5);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[engine]
max_steps = 7

[pipe]
stop_on_unsatisfied = true

[memory]
backend = "file"
path = "/tmp/agentx-mem.jsonl"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.engine.max_steps, 7);
        assert_eq!(config.agent.max_retry, 3);
        assert!(config.pipe.stop_on_unsatisfied);
        assert_eq!(config.memory.backend, MemoryBackendKind::File);
        assert_eq!(config.memory.file_path(), PathBuf::from("/tmp/agentx-mem.jsonl"));
    }

    #[test]
    fn zero_budget_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nmax_steps = 0\n").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine\nmax_steps = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.engine.max_steps, 100);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("AGENTX_MODEL", "local-llama"),
            ("AGENTX_MAX_STEPS", "12"),
            ("AGENTX_MAX_RETRY", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.llm.model, "local-llama");
        assert_eq!(config.engine.max_steps, 12);
        assert_eq!(config.agent.max_retry, 1);
    }

    #[test]
    fn non_numeric_env_override_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|key| (key == "AGENTX_MAX_STEPS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("AGENTX_MAX_STEPS"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let text = format!("{config:?}");
        assert!(!text.contains("sk-secret"));
        assert!(text.contains("[REDACTED]"));
    }
}
