use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

use crate::services::batch_runner::BatchPolicy;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_MIN_CODE_LENGTH: usize = 6;

/// Scanner settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ScanConfig {
    /// Codes shorter than this are rejected before any remote call
    #[serde(default = "default_min_code_length")]
    #[validate(range(min = 1))]
    pub min_code_length: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_code_length: DEFAULT_MIN_CODE_LENGTH,
        }
    }
}

/// One named batch policy as written in configuration files
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BatchPolicyConfig {
    #[validate(range(min = 1))]
    pub batch_size: usize,
    #[validate(range(min = 1, max = 64))]
    pub worker_count: usize,
    #[serde(default)]
    pub item_delay_ms: u64,
    #[serde(default)]
    pub batch_delay_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff_factor_ms: u64,
}

impl From<&BatchPolicyConfig> for BatchPolicy {
    fn from(cfg: &BatchPolicyConfig) -> Self {
        BatchPolicy {
            batch_size: cfg.batch_size,
            worker_count: cfg.worker_count,
            item_delay: Duration::from_millis(cfg.item_delay_ms),
            batch_delay: Duration::from_millis(cfg.batch_delay_ms),
            max_retries: cfg.max_retries,
            backoff_factor: Duration::from_millis(cfg.backoff_factor_ms),
        }
    }
}

/// Batch policies for the bulk operations
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Courier dispatch: worker pool, no retry
    #[serde(default = "default_dispatch_policy")]
    #[validate]
    pub dispatch: BatchPolicyConfig,

    /// Label printing: one printer, one label at a time
    #[serde(default = "default_printing_policy")]
    #[validate]
    pub printing: BatchPolicyConfig,

    /// Variant creation: sequential with rate-limit retries
    #[serde(default = "default_variant_creation_policy")]
    #[validate]
    pub variant_creation: BatchPolicyConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            dispatch: default_dispatch_policy(),
            printing: default_printing_policy(),
            variant_creation: default_variant_creation_policy(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Capacity of the domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub scan: ScanConfig,

    #[serde(default)]
    #[validate]
    pub batch: BatchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            scan: ScanConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn dispatch_policy(&self) -> BatchPolicy {
        (&self.batch.dispatch).into()
    }

    pub fn printing_policy(&self) -> BatchPolicy {
        (&self.batch.printing).into()
    }

    pub fn variant_creation_policy(&self) -> BatchPolicy {
        (&self.batch.variant_creation).into()
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_min_code_length() -> usize {
    DEFAULT_MIN_CODE_LENGTH
}

fn default_dispatch_policy() -> BatchPolicyConfig {
    BatchPolicyConfig {
        batch_size: 50,
        worker_count: 5,
        item_delay_ms: 0,
        batch_delay_ms: 1000,
        max_retries: 0,
        backoff_factor_ms: 0,
    }
}

fn default_printing_policy() -> BatchPolicyConfig {
    BatchPolicyConfig {
        batch_size: 20,
        worker_count: 1,
        item_delay_ms: 500,
        batch_delay_ms: 0,
        max_retries: 0,
        backoff_factor_ms: 0,
    }
}

fn default_variant_creation_policy() -> BatchPolicyConfig {
    BatchPolicyConfig {
        batch_size: 5,
        worker_count: 1,
        item_delay_ms: 200,
        batch_delay_ms: 2000,
        max_retries: 3,
        backoff_factor_ms: 1000,
    }
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("retail_ops_engine={}", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    load_config_from(Path::new(CONFIG_DIR), &run_env, true)
}

/// Loads configuration from an explicit directory; `use_env` layers `APP__*` variables on top.
pub fn load_config_from(
    dir: &Path,
    run_env: &str,
    use_env: bool,
) -> Result<AppConfig, AppConfigError> {
    let mut builder = Config::builder()
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("event_channel_capacity", DEFAULT_EVENT_CHANNEL_CAPACITY as i64)?
        .add_source(File::with_name(&dir.join("default").to_string_lossy()).required(false))
        .add_source(File::with_name(&dir.join(run_env).to_string_lossy()).required(false));

    if use_env {
        builder = builder.add_source(Environment::with_prefix("APP").separator("__"));
    }

    let app_config: AppConfig = builder.build()?.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    #[test]
    fn defaults_apply_without_files() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config_from(dir.path(), "development", false).unwrap();

        assert_eq!(cfg.environment, "development");
        assert_eq!(cfg.scan.min_code_length, 6);
        assert_eq!(cfg.dispatch_policy().worker_count, 5);
        assert_eq!(cfg.printing_policy().item_delay, Duration::from_millis(500));
        assert_eq!(cfg.variant_creation_policy().max_retries, 3);
    }

    #[test]
    fn environment_file_overrides_default_file() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "default.toml",
            "log_level = \"debug\"\n[scan]\nmin_code_length = 8\n",
        );
        write(
            &dir,
            "staging.toml",
            "[batch.dispatch]\nbatch_size = 10\nworker_count = 3\n",
        );

        let cfg = load_config_from(dir.path(), "staging", false).unwrap();
        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.log_level(), "debug");
        assert_eq!(cfg.scan.min_code_length, 8);
        let dispatch = cfg.dispatch_policy();
        assert_eq!(dispatch.batch_size, 10);
        assert_eq!(dispatch.worker_count, 3);
        assert_eq!(dispatch.max_retries, 0);
    }

    #[test]
    fn zero_worker_count_is_rejected() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "default.toml",
            "[batch.printing]\nbatch_size = 10\nworker_count = 0\n",
        );
        assert_matches!(
            load_config_from(dir.path(), "development", false),
            Err(AppConfigError::Validation(_))
        );
    }

    #[test]
    fn tracing_can_be_initialised_twice() {
        init_tracing("debug", false);
        init_tracing("info", true);
        tracing::info!("still logging");
    }

    #[test]
    fn zero_event_channel_capacity_is_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "default.toml", "event_channel_capacity = 0\n");
        assert_matches!(
            load_config_from(dir.path(), "development", false),
            Err(AppConfigError::Validation(_))
        );

        let cfg = AppConfig {
            event_channel_capacity: 16,
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let cfg = AppConfig {
            log_level: "loud".into(),
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
