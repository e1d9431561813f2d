//! Configuration model and loader.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. `~/.config/lectern/lectern.toml`
//! 3. `./lectern.toml`
//! 4. `LECTERN_*` environment variables: `LECTERN_<SECTION>_<KEY>` for any
//!    field (`LECTERN_STORAGE_FALLBACK_DIR`), plus the short forms
//!    `LECTERN_MIN_FLUSH_INTERVAL_MS`, `LECTERN_STORAGE_DIR`,
//!    `LECTERN_LOG_LEVEL` and `LECTERN_LOG_FORMAT`

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Top-level configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LecternConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Delay applied to scheduled flushes, and the minimum gap between two
    /// non-forced syncs.
    #[serde(default = "default_min_flush_interval_ms")]
    pub min_flush_interval_ms: u64,
}

impl ServiceConfig {
    pub fn min_flush_interval(&self) -> Duration {
        Duration::from_millis(self.min_flush_interval_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            min_flush_interval_ms: default_min_flush_interval_ms(),
        }
    }
}

fn default_min_flush_interval_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Where the stores live when it is writable.
    #[serde(default = "default_preferred_dir")]
    pub preferred_dir: PathBuf,

    /// Application-private directory used when `preferred_dir` is unusable.
    #[serde(default = "default_fallback_dir")]
    pub fallback_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            preferred_dir: default_preferred_dir(),
            fallback_dir: default_fallback_dir(),
        }
    }
}

fn default_preferred_dir() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".lectern"))
        .unwrap_or_else(|| PathBuf::from(".lectern"))
}

fn default_fallback_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("lectern"))
        .unwrap_or_else(|| PathBuf::from("lectern-data"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from the standard locations with env var overrides.
pub fn load_config() -> Result<LecternConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(LecternConfig::default()))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("lectern/lectern.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("lectern.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from one file, with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<LecternConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(LecternConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only. Used by tests.
pub fn load_config_from_str(toml_content: &str) -> Result<LecternConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(LecternConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Maps `LECTERN_SECTION_KEY` to `section.key` without splitting keys that
/// contain underscores themselves.
fn env_provider() -> Env {
    Env::prefixed("LECTERN_").map(|key| env_key(key.as_str()).into())
}

fn env_key(key: &str) -> String {
    match key {
        "min_flush_interval_ms" => "service.min_flush_interval_ms".to_string(),
        "storage_dir" => "storage.preferred_dir".to_string(),
        "log_level" => "logging.level".to_string(),
        "log_format" => "logging.format".to_string(),
        other => other
            .replacen("service_", "service.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("logging_", "logging.", 1),
    }
}
