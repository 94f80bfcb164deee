//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::timeline::TimelineOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Graph store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("timeline-index").to_string_lossy().to_string())
        .unwrap_or_else(|| "./timeline_data".to_string())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Timeline behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_calendar_index")]
    pub calendar_index: bool,

    /// Removals per unit of work when draining a timeline
    #[serde(default = "default_clear_batch_size")]
    pub clear_batch_size: usize,
}

fn default_calendar_index() -> bool {
    true
}

fn default_clear_batch_size() -> usize {
    1000
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            calendar_index: default_calendar_index(),
            clear_batch_size: default_clear_batch_size(),
        }
    }
}

impl TimelineConfig {
    pub fn options(&self) -> TimelineOptions {
        TimelineOptions {
            calendar_index: self.calendar_index,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("timeline-index").join("config.toml")),
            Some(PathBuf::from("./timeline.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Store overrides
        if let Some(data_dir) = var("TIMELINE_DATA_DIR") {
            self.store.data_dir = data_dir;
        }

        // Timeline overrides
        if let Some(flag) = var("TIMELINE_CALENDAR_INDEX") {
            match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.timeline.calendar_index = true,
                "0" | "false" | "no" | "off" => self.timeline.calendar_index = false,
                other => tracing::warn!("Ignoring TIMELINE_CALENDAR_INDEX={}", other),
            }
        }
        if let Some(batch) = var("TIMELINE_CLEAR_BATCH") {
            match batch.parse() {
                Ok(n) if n > 0 => self.timeline.clear_batch_size = n,
                _ => tracing::warn!("Ignoring TIMELINE_CLEAR_BATCH={}", batch),
            }
        }

        // Logging overrides
        if let Some(level) = var("TIMELINE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("TIMELINE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Data directory with a leading `~` expanded
    pub fn data_dir(&self) -> PathBuf {
        match self.store.data_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.store.data_dir)),
            None => PathBuf::from(&self.store.data_dir),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Timeline Index Configuration
#
# Environment variables override these settings:
# - TIMELINE_DATA_DIR
# - TIMELINE_CALENDAR_INDEX
# - TIMELINE_CLEAR_BATCH
# - TIMELINE_LOG_LEVEL
# - TIMELINE_LOG_FORMAT

[store]
# Directory holding timeline.db
data_dir = "~/.local/share/timeline-index"

[timeline]
# Maintain the year/month/day/hour tree for exact-timestamp lookups.
# Keep this the same for the lifetime of a timeline.
calendar_index = true

# Removals per transaction when draining a timeline with `clear --batch`
clear_batch_size = 1000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/timeline-index/timeline.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.timeline.calendar_index);
        assert_eq!(config.timeline.clear_batch_size, 1000);
        assert_eq!(config.logging.level, "info");
        assert!(config.timeline.options().calendar_index);
    }

    #[test]
    fn test_generated_config_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();
        assert_eq!(config.store.data_dir, "~/.local/share/timeline-index");
        assert_eq!(config.logging.format, "pretty");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_partial_file() {
        let config = Config::parse("[timeline]\ncalendar_index = false\n").unwrap();
        assert!(!config.timeline.calendar_index);
        assert_eq!(config.timeline.clear_batch_size, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[timeline\ncalendar_index = ").unwrap();
        assert!(matches!(Config::load(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TIMELINE_DATA_DIR", "/tmp/tl"),
            ("TIMELINE_CALENDAR_INDEX", "off"),
            ("TIMELINE_CLEAR_BATCH", "50"),
            ("TIMELINE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.store.data_dir, "/tmp/tl");
        assert!(!config.timeline.calendar_index);
        assert_eq!(config.timeline.clear_batch_size, 50);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "TIMELINE_CALENDAR_INDEX" => Some("maybe".to_string()),
            "TIMELINE_CLEAR_BATCH" => Some("0".to_string()),
            _ => None,
        });
        assert!(config.timeline.calendar_index);
        assert_eq!(config.timeline.clear_batch_size, 1000);
    }

    #[test]
    fn test_data_dir_expansion() {
        let mut config = Config::default();
        config.store.data_dir = "/var/lib/tl".to_string();
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/tl"));

        config.store.data_dir = "~/tl".to_string();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.data_dir(), home.join("tl"));
        }
    }
}
