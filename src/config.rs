//! Configuration management for lnd-graph-sync
//!
//! Configuration is loaded from a TOML file, then overridden by environment
//! variables, then validated.
//!
//! # Example Configuration File
//!
//! ```toml
//! [source]
//! db_path = "/data/channel.db"
//! scratch_path = "/tmp/channel_copy.db"
//! open_attempts = 5
//! open_retry_delay_ms = 500
//!
//! [sync]
//! interval_minutes = 30
//! batch_size = 5000
//! track_alias_history = false
//!
//! [database]
//! url = "sqlite:/var/lib/lnd-graph-sync/graph.db"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! # Environment Overrides
//!
//! `LND_DB_PATH`, `SCRATCH_DB_PATH`, `SOURCE_OPEN_ATTEMPTS`,
//! `SOURCE_OPEN_RETRY_DELAY_MS`, `SYNC_INTERVAL_MINUTES`, `SYNC_BATCH_SIZE`,
//! `TRACK_ALIAS_HISTORY`, `DATABASE_URL`, `LOG_LEVEL`, `LOG_FORMAT`.
//! Empty values are ignored.

use crate::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source graph file configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Sync cycle configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Destination database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source graph file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the live graph file written by the node
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Scratch location the live file is copied to before each cycle
    #[serde(default = "default_scratch_path")]
    pub scratch_path: PathBuf,

    /// How many times opening the scratch copy is attempted per cycle
    #[serde(default = "default_open_attempts")]
    pub open_attempts: u32,

    /// Fixed delay between open attempts in milliseconds
    #[serde(default = "default_open_retry_delay_ms")]
    pub open_retry_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scratch_path: default_scratch_path(),
            open_attempts: default_open_attempts(),
            open_retry_delay_ms: default_open_retry_delay_ms(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/data/channel.db")
}

fn default_scratch_path() -> PathBuf {
    std::env::temp_dir().join("channel_copy.db")
}

fn default_open_attempts() -> u32 {
    5
}

fn default_open_retry_delay_ms() -> u64 {
    500
}

/// Sync cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minutes between the start of one idle wait and the next cycle
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Rows per multi-row upsert statement
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Key node announcements on (node_id, alias, rgb_color) instead of node_id,
    /// keeping one row per alias/color a node has used
    #[serde(default)]
    pub track_alias_history: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            batch_size: default_batch_size(),
            track_alias_history: false,
        }
    }
}

fn default_interval_minutes() -> u64 {
    30
}

fn default_batch_size() -> usize {
    crate::db::DEFAULT_BATCH_SIZE
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL or path
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:lnd-graph.db".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Time to wait between sync cycles
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_minutes.saturating_mul(60))
    }

    /// Delay between attempts to open the scratch copy
    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.source.open_retry_delay_ms)
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) -> SyncResult<()> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an environment-style lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> SyncResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LND_DB_PATH") {
            self.source.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("SCRATCH_DB_PATH") {
            self.source.scratch_path = PathBuf::from(v);
        }
        if let Some(v) = get("SOURCE_OPEN_ATTEMPTS") {
            self.source.open_attempts = parse_env("SOURCE_OPEN_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("SOURCE_OPEN_RETRY_DELAY_MS") {
            self.source.open_retry_delay_ms = parse_env("SOURCE_OPEN_RETRY_DELAY_MS", &v)?;
        }
        if let Some(v) = get("SYNC_INTERVAL_MINUTES") {
            self.sync.interval_minutes = parse_env("SYNC_INTERVAL_MINUTES", &v)?;
        }
        if let Some(v) = get("SYNC_BATCH_SIZE") {
            self.sync.batch_size = parse_env("SYNC_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("TRACK_ALIAS_HISTORY") {
            self.sync.track_alias_history = parse_env("TRACK_ALIAS_HISTORY", &v)?;
        }
        if let Some(v) = get("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.logging.format = v;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.source.db_path.as_os_str().is_empty() {
            return Err("Source database path cannot be empty".to_string());
        }

        if self.source.scratch_path.as_os_str().is_empty() {
            return Err("Scratch path cannot be empty".to_string());
        }

        // Copying onto the live file would truncate it.
        if self.source.scratch_path == self.source.db_path {
            return Err(format!(
                "Scratch path must differ from the source path ({})",
                self.source.db_path.display()
            ));
        }

        if self.source.open_attempts == 0 {
            return Err("Source open attempts must be at least 1".to_string());
        }

        if self.sync.interval_minutes == 0 {
            return Err("Sync interval must be at least 1 minute".to_string());
        }

        if self.sync.batch_size == 0 {
            return Err("Batch size must be at least 1".to_string());
        }

        if self.database.url.trim().is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(format!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format, valid_formats
            ));
        }

        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> SyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| SyncError::Config(format!("{} has invalid value {:?}: {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync_interval(), Duration::from_secs(30 * 60));
        assert_eq!(config.sync.batch_size, 5000);
        assert_eq!(config.source.open_attempts, 5);
        assert_eq!(config.open_retry_delay(), Duration::from_millis(500));
        assert!(!config.sync.track_alias_history);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(lookup(&[
                ("LND_DB_PATH", "/srv/lnd/channel.db"),
                ("SYNC_INTERVAL_MINUTES", "5"),
                ("SYNC_BATCH_SIZE", "250"),
                ("DATABASE_URL", "sqlite:/tmp/graph.db"),
                ("TRACK_ALIAS_HISTORY", "true"),
                ("LOG_LEVEL", ""),
            ]))
            .unwrap();

        assert_eq!(config.source.db_path, PathBuf::from("/srv/lnd/channel.db"));
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
        assert_eq!(config.sync.batch_size, 250);
        assert_eq!(config.database.url, "sqlite:/tmp/graph.db");
        assert!(config.sync.track_alias_history);
        // Empty values leave the default in place
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(lookup(&[("SYNC_INTERVAL_MINUTES", "half an hour")]))
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_validate_config() {
        let mut config = Config::default();

        config.sync.interval_minutes = 0;
        assert!(config.validate().is_err());

        config.sync.interval_minutes = 1;
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());

        config.sync.batch_size = 10;
        config.source.scratch_path = config.source.db_path.clone();
        assert!(config.validate().is_err());

        config.source.scratch_path = PathBuf::from("/tmp/copy.db");
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        config.logging.format = "json".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [source]
            db_path = "/mnt/lnd/channel.db"

            [sync]
            interval_minutes = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.source.db_path, PathBuf::from("/mnt/lnd/channel.db"));
        assert_eq!(config.sync.interval_minutes, 10);
        assert_eq!(config.sync.batch_size, 5000);
        assert_eq!(config.database.url, "sqlite:lnd-graph.db");
    }
}
