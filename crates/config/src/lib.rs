//! Configuration loading, validation, and management for Everloop.
//!
//! Loads configuration from `~/.everloop/everloop.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.everloop/everloop.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Control loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Daily quota settings
    #[serde(default)]
    pub governor: GovernorConfig,

    /// Memory tier settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Consolidation cadence settings
    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    /// Reasoning engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("agent", &self.agent)
            .field("governor", &self.governor)
            .field("memory", &self.memory)
            .field("consolidation", &self.consolidation)
            .field("engine", &self.engine)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Standing directive sent to the engine every iteration
    #[serde(default)]
    pub directive: String,

    /// Initial goal (operators can replace it at runtime)
    #[serde(default)]
    pub goal: String,

    #[serde(default = "default_loop_interval_secs")]
    pub loop_interval_secs: u64,

    /// Wait after a failed iteration before trying again
    #[serde(default = "default_recovery_delay_secs")]
    pub recovery_delay_secs: u64,

    #[serde(default = "default_max_parallel_actions")]
    pub max_parallel_actions: usize,

    #[serde(default = "default_max_actions_per_iteration")]
    pub max_actions_per_iteration: usize,

    /// Iterations between memory-context rebuilds
    #[serde(default = "default_context_refresh_iterations")]
    pub context_refresh_iterations: u64,
}

fn default_loop_interval_secs() -> u64 {
    60
}
fn default_recovery_delay_secs() -> u64 {
    300
}
fn default_max_parallel_actions() -> usize {
    3
}
fn default_max_actions_per_iteration() -> usize {
    5
}
fn default_context_refresh_iterations() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            directive: String::new(),
            goal: String::new(),
            loop_interval_secs: default_loop_interval_secs(),
            recovery_delay_secs: default_recovery_delay_secs(),
            max_parallel_actions: default_max_parallel_actions(),
            max_actions_per_iteration: default_max_actions_per_iteration(),
            context_refresh_iterations: default_context_refresh_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_max_loops_per_day")]
    pub max_loops_per_day: u32,

    #[serde(default = "default_max_tokens_per_day")]
    pub max_tokens_per_day: u64,

    /// Days of usage history kept before pruning
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_max_loops_per_day() -> u32 {
    500
}
fn default_max_tokens_per_day() -> u64 {
    2_000_000
}
fn default_retention_days() -> i64 {
    7
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_loops_per_day: default_max_loops_per_day(),
            max_tokens_per_day: default_max_tokens_per_day(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Blob store root; None means `~/.everloop/store`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Days of partitions an id-less long-term scan covers
    #[serde(default = "default_scan_window_days")]
    pub scan_window_days: i64,

    /// Entries included in the rendered memory context
    #[serde(default = "default_context_entries")]
    pub context_entries: usize,
}

fn default_scan_window_days() -> i64 {
    30
}
fn default_context_entries() -> usize {
    25
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            root: None,
            scan_window_days: default_scan_window_days(),
            context_entries: default_context_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Loop iterations between batches
    #[serde(default = "default_iteration_threshold")]
    pub iteration_threshold: u64,

    /// Wall-clock hours between batches
    #[serde(default = "default_interval_hours")]
    pub interval_hours: i64,

    /// Minimum entries of one kind before asking for a summary
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
}

fn default_iteration_threshold() -> u64 {
    100
}
fn default_interval_hours() -> i64 {
    4
}
fn default_min_group_size() -> usize {
    3
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            iteration_threshold: default_iteration_threshold(),
            interval_hours: default_interval_hours(),
            min_group_size: default_min_group_size(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// API key for the engine adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Adapter endpoint; None means the adapter's built-in default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_model() -> String {
    "claude-sonnet-4".into()
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            endpoint: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.everloop/everloop.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `ELOOP_API_KEY` — engine credential
    /// - `ELOOP_MODEL` — engine model
    /// - `ELOOP_STORE_ROOT` — blob store root directory
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("everloop.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.engine.api_key.is_none() {
            config.engine.api_key = std::env::var("ELOOP_API_KEY").ok();
        }
        if let Ok(model) = std::env::var("ELOOP_MODEL") {
            config.engine.model = model;
        }
        if let Ok(root) = std::env::var("ELOOP_STORE_ROOT") {
            config.memory.root = Some(PathBuf::from(root));
        }

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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".everloop")
    }

    /// The blob store root, honoring the configured override.
    pub fn store_root(&self) -> PathBuf {
        self.memory
            .root
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("store"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.governor.max_loops_per_day == 0 {
            return Err(ConfigError::ValidationError(
                "governor.max_loops_per_day must be at least 1".into(),
            ));
        }
        if self.governor.max_tokens_per_day == 0 {
            return Err(ConfigError::ValidationError(
                "governor.max_tokens_per_day must be at least 1".into(),
            ));
        }
        if self.agent.max_parallel_actions == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_parallel_actions must be at least 1".into(),
            ));
        }
        if self.memory.scan_window_days < 1 {
            return Err(ConfigError::ValidationError(
                "memory.scan_window_days must be at least 1".into(),
            ));
        }
        if self.consolidation.min_group_size < 2 {
            return Err(ConfigError::ValidationError(
                "consolidation.min_group_size must be at least 2".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string (for first-run setup).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            governor: GovernorConfig::default(),
            memory: MemoryConfig::default(),
            consolidation: ConsolidationConfig::default(),
            engine: EngineConfig::default(),
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.governor.max_loops_per_day, 500);
        assert_eq!(config.agent.loop_interval_secs, 60);
        assert_eq!(config.consolidation.iteration_threshold, 100);
        assert!(config.engine.api_key.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/everloop.toml")).unwrap();
        assert_eq!(config.memory.scan_window_days, 30);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("everloop.toml");
        std::fs::write(
            &path,
            r#"
[agent]
directive = "stay curious"
loop_interval_secs = 5

[governor]
max_loops_per_day = 10
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.agent.directive, "stay curious");
        assert_eq!(config.agent.loop_interval_secs, 5);
        assert_eq!(config.governor.max_loops_per_day, 10);
        // Untouched sections keep their defaults
        assert_eq!(config.governor.max_tokens_per_day, 2_000_000);
        assert_eq!(config.consolidation.min_group_size, 3);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("everloop.toml");
        std::fs::write(&path, "[governor]\nmax_loops_per_day = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("everloop.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn debug_output_redacts_the_api_key() {
        let mut config = AppConfig::default();
        config.engine.api_key = Some("sk-secret-value".into());
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("sk-secret-value"));
    }

    #[test]
    fn default_toml_round_trips() {
        let rendered = AppConfig::default_toml();
        let back: AppConfig = toml::from_str(&rendered).unwrap();
        assert!(back.validate().is_ok());
    }
}
