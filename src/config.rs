use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

use crate::ml::{DEFAULT_MIN_HISTORY_ROWS, FORECAST_HORIZON_DAYS};
use crate::services::sink::FIRESTORE_BATCH_LIMIT;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8000;
const CONFIG_DIR: &str = "config";
const DEFAULT_CREDENTIALS_PATH: &str = "serviceAccountKey.json";
const DEFAULT_MODELS_DIR: &str = "models";
const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const DEFAULT_FIRESTORE_DATABASE: &str = "(default)";
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_COMMIT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_COMMIT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_RIDGE_ALPHA: f64 = 0.01;
const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Application environment (development, production)
    #[validate(length(min = 1))]
    pub environment: String,

    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit JSON formatted logs
    pub log_json: bool,

    /// Service account key file used to authenticate against Firestore
    pub credentials_path: PathBuf,

    /// Directory holding one sub-directory of model artifacts per account
    pub models_dir: PathBuf,

    /// Firestore REST base URL, up to and including the API version
    #[validate(length(min = 1))]
    pub firestore_base_url: String,

    pub firestore_database: String,

    /// `host:port` of a local Firestore emulator; disables authentication
    pub firestore_emulator_host: Option<String>,

    /// Project id; read from the service account key when unset
    pub firestore_project_id: Option<String>,

    /// Timeout applied to every document store request
    #[validate(range(min = 1, max = 600))]
    pub store_timeout_secs: u64,

    /// Forecast rows per commit
    #[validate(range(min = 1, max = 500))]
    pub batch_size: usize,

    #[validate(range(min = 1, max = 10))]
    pub commit_max_attempts: u32,

    pub commit_initial_backoff_ms: u64,

    /// Feature rows an item needs before a model is trained for it
    #[validate(range(min = 1))]
    pub min_history_rows: usize,

    #[validate(range(min = 1, max = 366))]
    pub horizon_days: usize,

    #[validate(custom = "validate_ridge_alpha")]
    pub ridge_alpha: f64,

    /// Comma separated list of allowed CORS origins
    pub cors_allowed_origins: String,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn commit_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.commit_initial_backoff_ms)
    }

    /// Configured CORS origins, trimmed, empty entries removed.
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment: DEFAULT_ENV.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            firestore_base_url: DEFAULT_FIRESTORE_BASE_URL.to_string(),
            firestore_database: DEFAULT_FIRESTORE_DATABASE.to_string(),
            firestore_emulator_host: None,
            firestore_project_id: None,
            store_timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
            batch_size: FIRESTORE_BATCH_LIMIT,
            commit_max_attempts: DEFAULT_COMMIT_MAX_ATTEMPTS,
            commit_initial_backoff_ms: DEFAULT_COMMIT_INITIAL_BACKOFF_MS,
            min_history_rows: DEFAULT_MIN_HISTORY_ROWS,
            horizon_days: FORECAST_HORIZON_DAYS,
            ridge_alpha: DEFAULT_RIDGE_ALPHA,
            cors_allowed_origins: DEFAULT_CORS_ORIGINS.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
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

fn validate_ridge_alpha(alpha: f64) -> Result<(), ValidationError> {
    if alpha.is_finite() && alpha >= 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("ridge_alpha");
        err.message = Some("Must be a finite, non-negative number".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("menu_forecast={},tower_http=debug", level);
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
/// 5. `SERVICE_ACCOUNT_PATH`, `MODELS_DIR` and `FIRESTORE_EMULATOR_HOST`
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

    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Loads configuration with files read from `config_dir`.
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    let defaults = AppConfig::default();
    let default_file = config_dir.join("default");
    let env_file = config_dir.join(run_env);

    let config = Config::builder()
        .set_default("host", defaults.host)?
        .set_default("port", i64::from(defaults.port))?
        .set_default("environment", run_env)?
        .set_default("log_level", defaults.log_level)?
        .set_default("log_json", defaults.log_json)?
        .set_default("credentials_path", DEFAULT_CREDENTIALS_PATH)?
        .set_default("models_dir", DEFAULT_MODELS_DIR)?
        .set_default("firestore_base_url", defaults.firestore_base_url)?
        .set_default("firestore_database", defaults.firestore_database)?
        .set_default("store_timeout_secs", defaults.store_timeout_secs)?
        .set_default("batch_size", defaults.batch_size as u64)?
        .set_default("commit_max_attempts", u64::from(defaults.commit_max_attempts))?
        .set_default("commit_initial_backoff_ms", defaults.commit_initial_backoff_ms)?
        .set_default("min_history_rows", defaults.min_history_rows as u64)?
        .set_default("horizon_days", defaults.horizon_days as u64)?
        .set_default("ridge_alpha", defaults.ridge_alpha)?
        .set_default("cors_allowed_origins", defaults.cors_allowed_origins)?
        .add_source(File::from(default_file).required(false))
        .add_source(File::from(env_file).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .set_override_option("credentials_path", env::var("SERVICE_ACCOUNT_PATH").ok())?
        .set_override_option("models_dir", env::var("MODELS_DIR").ok())?
        .set_override_option(
            "firestore_emulator_host",
            env::var("FIRESTORE_EMULATOR_HOST").ok(),
        )?
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
