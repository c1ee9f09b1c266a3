//! Runtime configuration.
//!
//! Configuration is TOML with one table per component. Every field has a
//! default, so an empty document is a valid configuration.
//!
//! ```toml
//! [queue]
//! name = "impulse.serial"
//!
//! [timer]
//! refresh_interval_ms = 30000
//!
//! [cache]
//! policy = "return_cache_then_load"
//!
//! [persister]
//! directory = "/var/cache/impulse"
//! ```
//!
//! # Example
//!
//! ```
//! use impulse_core::CachePolicy;
//! use impulse_runtime::config::RuntimeConfig;
//! use impulse_runtime::recurring::TimerMode;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RuntimeConfig::from_toml_str(
//!     r#"
//!     [timer]
//!     refresh_interval_ms = 500
//!
//!     [cache]
//!     policy = "cache_only"
//!     "#,
//! )?;
//!
//! assert_eq!(config.timer.mode(), TimerMode::Repeating(Duration::from_millis(500)));
//! assert_eq!(config.cache.policy, CachePolicy::CacheOnly);
//! # Ok(())
//! # }
//! ```

use crate::error::ConfigError;
use crate::recurring::TimerMode;
use impulse_core::CachePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a TOML file to load.
pub const CONFIG_PATH_VAR: &str = "IMPULSE_CONFIG";

/// Environment variable overriding `timer.refresh_interval_ms`.
pub const REFRESH_INTERVAL_VAR: &str = "IMPULSE_REFRESH_INTERVAL_MS";

/// Environment variable overriding `cache.policy`.
pub const CACHE_POLICY_VAR: &str = "IMPULSE_CACHE_POLICY";

/// Serial queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name of the queue's worker thread.
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "impulse.serial".to_string(),
        }
    }
}

/// Refresh timer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Interval between background refreshes. No refresh when absent.
    pub refresh_interval_ms: Option<u64>,
}

impl TimerConfig {
    /// The timer mode described by this configuration.
    #[must_use]
    pub const fn mode(&self) -> TimerMode {
        match self.refresh_interval_ms {
            Some(ms) => TimerMode::Repeating(Duration::from_millis(ms)),
            None => TimerMode::None,
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How cached states and loads are combined.
    pub policy: CachePolicy,
}

/// Disk persister settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersisterConfig {
    /// Directory holding one file per cached entry.
    pub directory: PathBuf,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join("impulse-cache"),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Serial queue settings.
    pub queue: QueueConfig,
    /// Refresh timer settings.
    pub timer: TimerConfig,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Disk persister settings.
    pub persister: PersisterConfig,
}

impl RuntimeConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Validation`] for invalid values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the file cannot be read or parsed,
    /// and [`ConfigError::Validation`] for invalid values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Load configuration from the environment.
    ///
    /// Starts from the file named by `IMPULSE_CONFIG` (or the defaults when
    /// unset), then applies `IMPULSE_REFRESH_INTERVAL_MS` and
    /// `IMPULSE_CACHE_POLICY` on top.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvVar`] when an override cannot be parsed, and
    /// the errors of [`from_file`](Self::from_file) for the base file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`from_env`](Self::from_env) with a custom variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(value) = lookup(REFRESH_INTERVAL_VAR) {
            let ms = value.trim().parse::<u64>().map_err(|_| ConfigError::EnvVar {
                name: REFRESH_INTERVAL_VAR.to_string(),
                value: value.clone(),
            })?;
            config.timer.refresh_interval_ms = Some(ms);
        }

        if let Some(value) = lookup(CACHE_POLICY_VAR) {
            config.cache.policy = parse_policy(&value).ok_or_else(|| ConfigError::EnvVar {
                name: CACHE_POLICY_VAR.to_string(),
                value: value.clone(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values no component can work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an empty queue name or a zero
    /// refresh interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.name.trim().is_empty() {
            return Err(ConfigError::Validation("queue.name must not be empty".to_string()));
        }
        if self.timer.refresh_interval_ms == Some(0) {
            return Err(ConfigError::Validation(
                "timer.refresh_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_policy(value: &str) -> Option<CachePolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "return_cache_then_load" => Some(CachePolicy::ReturnCacheThenLoad),
        "return_cache_else_load" => Some(CachePolicy::ReturnCacheElseLoad),
        "cache_only" => Some(CachePolicy::CacheOnly),
        _ => None,
    }
}
