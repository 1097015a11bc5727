use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_MIN_ORDER_TOTAL: u32 = 100;
const DEFAULT_FIRST_ORDER_DISCOUNT_PERCENT: u32 = 20;
const DEFAULT_RECEIPT_POLL_INTERVAL_SECS: u64 = 20;

/// Payment gateway connection settings.
///
/// The gateway speaks JSON over HTTPS and authenticates every request with a
/// SHA-256 token over the alphabetically sorted scalar parameters plus the
/// shared password.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL of the gateway API, e.g. "https://securepay.example.com/v2"
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Merchant terminal identifier issued by the gateway
    #[serde(default)]
    pub terminal_key: String,

    /// Shared signing secret issued by the gateway
    #[serde(default)]
    pub password: String,

    /// URL the gateway pushes payment notifications to
    #[serde(default)]
    pub notification_url: String,

    /// Customer redirect after a successful payment
    #[serde(default)]
    pub success_url: String,

    /// Customer redirect after a failed payment
    #[serde(default)]
    pub fail_url: String,

    /// Taxation system code stamped on fiscal receipts
    #[serde(default = "default_taxation")]
    pub taxation: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            terminal_key: String::new(),
            password: String::new(),
            notification_url: String::new(),
            success_url: String::new(),
            fail_url: String::new(),
            taxation: default_taxation(),
        }
    }
}

/// SMS provider settings. Disabled by default; the service logs instead of
/// sending when no provider is configured.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SmsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Provider send endpoint
    #[serde(default)]
    pub api_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Sender name shown to the customer
    #[serde(default)]
    pub sender: String,
}

/// Operator alert channel (Telegram message to the staff chat).
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AlertConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub bot_token: String,

    /// Chat id of the staff channel that receives alerts
    #[serde(default)]
    pub chat_id: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: default_telegram_api_base(),
            bot_token: String::new(),
            chat_id: String::new(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// ISO currency code used for order totals
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Orders below this total (base currency units) are rejected
    #[serde(default = "default_min_order_total")]
    pub min_order_total: u32,

    /// One-time discount applied to a customer's first order
    #[serde(default = "default_first_order_discount_percent")]
    #[validate(range(max = 100))]
    pub first_order_discount_percent: u32,

    /// Static bearer token for the admin back office; empty disables admin routes
    #[serde(default)]
    pub admin_token: String,

    /// How often the receipt poller scans for due jobs
    #[serde(default = "default_receipt_poll_interval_secs")]
    pub receipt_poll_interval_secs: u64,

    /// Bounded capacity of the in-process event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,

    #[serde(default)]
    #[validate]
    pub sms: SmsConfig,

    #[serde(default)]
    #[validate]
    pub alerts: AlertConfig,
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling.
    pub fn new(
        database_url: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            host: host.into(),
            port,
            environment: environment.into(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            currency: default_currency(),
            min_order_total: default_min_order_total(),
            first_order_discount_percent: default_first_order_discount_percent(),
            admin_token: String::new(),
            receipt_poll_interval_secs: default_receipt_poll_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            gateway: GatewayConfig::default(),
            sms: SmsConfig::default(),
            alerts: AlertConfig::default(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    /// Cross-field constraints that the derive-based validation cannot express.
    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() {
            if self.gateway.terminal_key.trim().is_empty()
                || self.gateway.password.trim().is_empty()
            {
                let mut err = ValidationError::new("gateway");
                err.message =
                    Some("gateway.terminal_key and gateway.password are required outside development".into());
                errors.add("gateway", err);
            }
            if self.admin_token.trim().is_empty() {
                let mut err = ValidationError::new("admin_token");
                err.message = Some("admin_token is required outside development".into());
                errors.add("admin_token", err);
            }
        }

        if self.alerts.enabled
            && (self.alerts.bot_token.trim().is_empty() || self.alerts.chat_id.trim().is_empty())
        {
            let mut err = ValidationError::new("alerts");
            err.message = Some("alerts.bot_token and alerts.chat_id are required when alerts are enabled".into());
            errors.add("alerts", err);
        }

        if self.sms.enabled && self.sms.api_url.trim().is_empty() {
            let mut err = ValidationError::new("sms");
            err.message = Some("sms.api_url is required when sms is enabled".into());
            errors.add("sms", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_currency() -> String {
    "RUB".to_string()
}
fn default_min_order_total() -> u32 {
    DEFAULT_MIN_ORDER_TOTAL
}
fn default_first_order_discount_percent() -> u32 {
    DEFAULT_FIRST_ORDER_DISCOUNT_PERCENT
}
fn default_receipt_poll_interval_secs() -> u64 {
    DEFAULT_RECEIPT_POLL_INTERVAL_SECS
}
fn default_event_channel_capacity() -> usize {
    1024
}
fn default_gateway_base_url() -> String {
    "https://securepay.example.com/v2".to_string()
}
fn default_taxation() -> String {
    "usn_income".to_string()
}
fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
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

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(ValidationErrors),
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("teahouse_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
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

    let builder = Config::builder()
        .set_default("database_url", "sqlite://teahouse.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new("sqlite::memory:", "127.0.0.1", 8080, "production")
    }

    #[test]
    fn production_requires_gateway_credentials() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn production_with_credentials_passes() {
        let mut cfg = base_config();
        cfg.gateway.terminal_key = "TinkoffBankTest".into();
        cfg.gateway.password = "not-a-real-password".into();
        cfg.admin_token = "staff-token".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn development_allows_empty_credentials() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn enabled_alerts_require_chat_configuration() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.alerts.enabled = true;
        assert!(cfg.validate_additional_constraints().is_err());
    }
}
