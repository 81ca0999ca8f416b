// Configuration File Support
//
// This module provides configuration file parsing for the hookwarden engine.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from XDG config directory: ~/.config/hookwarden/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::webhooks::retry::{
    validate_schedule, RetryPolicy, DEFAULT_BACKOFF_SCHEDULE_MINUTES, DEFAULT_MAX_ATTEMPTS,
};
use crate::webhooks::{EngineSettings, ProcessorSettings, SweepSettings};

/// Upper bound on records attempted by a single sweep
pub const MAX_SWEEP_BATCH_LIMIT: usize = 1000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Default retry policy and attempt timing
    pub retry: RetryConfig,

    /// Retry sweeper configuration
    pub sweeper: SweeperConfig,

    /// Retention of terminal records
    pub retention: RetentionConfig,

    /// Record store location
    pub store: StoreConfig,

    /// HTTP forwarding handler used by the CLI
    pub forward: ForwardConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts allowed per record, including the first
    pub max_attempts: u32,

    /// Minutes to wait after each failed attempt; the last entry repeats
    pub backoff_schedule_minutes: Vec<u32>,

    /// Upper bound on a single handler invocation
    pub handler_timeout_secs: u64,

    /// Lease time past the handler timeout before an attempt counts as lost
    pub lease_grace_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_schedule_minutes: DEFAULT_BACKOFF_SCHEDULE_MINUTES.to_vec(),
            handler_timeout_secs: 30,
            lease_grace_secs: 30,
        }
    }
}

/// Retry sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,

    /// Records attempted per sweep
    pub batch_limit: usize,

    /// Attempts in flight at once within a sweep
    pub concurrency: usize,

    /// Seconds a pending record may sit untouched before a sweep picks it up
    pub pending_grace_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_limit: 100,
            concurrency: 4,
            pending_grace_secs: 60,
        }
    }
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days to keep success and failed records
    pub retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { retention_days: 90 }
    }
}

/// Record store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON store file; records are kept in memory only when unset
    pub path: Option<PathBuf>,
}

/// HTTP forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ForwardConfig {
    /// Endpoint receiving record payloads
    pub url: Option<String>,

    /// Bearer token for the endpoint
    pub auth_token: Option<String>,

    /// Extra headers sent with every request
    pub headers: HashMap<String, String>,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve metrics
    pub enabled: bool,

    /// Port for metrics server
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// Environment overrides are applied on top of the file (or the defaults
    /// when the file does not exist) and the result is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/hookwarden/config.toml` on Linux/Mac
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "hookwarden", "Hookwarden") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("hookwarden").join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values. Values
    /// that fail to parse or fall outside their allowed range are ignored:
    /// - HOOKWARDEN_LOG_LEVEL
    /// - HOOKWARDEN_LOG_FORMAT
    /// - HOOKWARDEN_MAX_ATTEMPTS
    /// - HOOKWARDEN_HANDLER_TIMEOUT_SECS
    /// - HOOKWARDEN_SWEEP_INTERVAL_SECS
    /// - HOOKWARDEN_SWEEP_BATCH_LIMIT
    /// - HOOKWARDEN_RETENTION_DAYS
    /// - HOOKWARDEN_STORE_PATH
    /// - HOOKWARDEN_FORWARD_URL
    /// - HOOKWARDEN_METRICS_ENABLED
    /// - HOOKWARDEN_METRICS_PORT
    fn apply_env_overrides(mut self) -> Self {
        // Logging overrides
        if let Ok(level) = std::env::var("HOOKWARDEN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("HOOKWARDEN_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Retry overrides
        if let Some(attempts) = env_parse::<u32>("HOOKWARDEN_MAX_ATTEMPTS") {
            if attempts > 0 {
                self.retry.max_attempts = attempts;
            }
        }
        if let Some(timeout) = env_parse::<u64>("HOOKWARDEN_HANDLER_TIMEOUT_SECS") {
            if timeout > 0 {
                self.retry.handler_timeout_secs = timeout;
            }
        }

        // Sweeper overrides
        if let Some(interval) = env_parse::<u64>("HOOKWARDEN_SWEEP_INTERVAL_SECS") {
            if interval > 0 {
                self.sweeper.interval_secs = interval;
            }
        }
        if let Some(limit) = env_parse::<usize>("HOOKWARDEN_SWEEP_BATCH_LIMIT") {
            if limit > 0 && limit <= MAX_SWEEP_BATCH_LIMIT {
                self.sweeper.batch_limit = limit;
            }
        }

        if let Some(days) = env_parse::<u32>("HOOKWARDEN_RETENTION_DAYS") {
            self.retention.retention_days = days;
        }

        if let Ok(path) = std::env::var("HOOKWARDEN_STORE_PATH") {
            if !path.is_empty() {
                self.store.path = Some(PathBuf::from(path));
            }
        }
        if let Ok(url) = std::env::var("HOOKWARDEN_FORWARD_URL") {
            if !url.is_empty() {
                self.forward.url = Some(url);
            }
        }

        // Metrics overrides
        if let Ok(enabled) = std::env::var("HOOKWARDEN_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }
        if let Some(port) = env_parse::<u16>("HOOKWARDEN_METRICS_PORT") {
            self.metrics.port = port;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        // Validate retry configuration
        validate_schedule(self.retry.max_attempts, &self.retry.backoff_schedule_minutes)
            .map_err(|e| anyhow::anyhow!("Invalid retry policy: {}", e))?;
        if self.retry.handler_timeout_secs == 0 {
            anyhow::bail!("Handler timeout must be at least 1 second");
        }

        // Validate sweeper configuration
        if self.sweeper.interval_secs == 0 {
            anyhow::bail!("Sweep interval must be at least 1 second");
        }
        if self.sweeper.batch_limit == 0 || self.sweeper.batch_limit > MAX_SWEEP_BATCH_LIMIT {
            anyhow::bail!(
                "Sweep batch limit must be between 1 and {}",
                MAX_SWEEP_BATCH_LIMIT
            );
        }
        if self.sweeper.concurrency == 0 {
            anyhow::bail!("Sweep concurrency must be > 0");
        }

        // Validate metrics configuration
        if self.metrics.port == 0 {
            anyhow::bail!("Metrics port must be > 0");
        }

        // Validate forwarding configuration
        if let Some(url) = &self.forward.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("Forward URL must start with http:// or https://: {}", url);
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Engine settings derived from the retry and sweeper sections
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_policy: RetryPolicy::new(
                self.retry.max_attempts,
                self.retry.backoff_schedule_minutes.clone(),
            ),
            processor: ProcessorSettings {
                handler_timeout: std::time::Duration::from_secs(self.retry.handler_timeout_secs),
                lease_grace: std::time::Duration::from_secs(self.retry.lease_grace_secs),
            },
            sweep: SweepSettings {
                interval: std::time::Duration::from_secs(self.sweeper.interval_secs),
                batch_limit: self.sweeper.batch_limit,
                concurrency: self.sweeper.concurrency,
                pending_grace: chrono::Duration::seconds(
                    i64::try_from(self.sweeper.pending_grace_secs).unwrap_or(i64::MAX / 1000),
                ),
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}
