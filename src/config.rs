use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::services::notifications::TokenSelection;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_BASE_CURRENCY: &str = "INR";
const DEFAULT_SETTLEMENT_CURRENCY: &str = "USD";
const DEFAULT_PUSH_BATCH_SIZE: usize = 500;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 15;
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// PayPal REST credentials. Absent means gateway checkout is unavailable.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PayPalConfig {
    #[validate(length(min = 1))]
    pub client_id: String,
    #[validate(length(min = 1))]
    pub client_secret: String,
    /// Sandbox or live API root
    #[serde(default = "default_paypal_api_base")]
    pub api_base: String,
    /// Where the buyer lands after approving the payment
    pub return_url: String,
    /// Where the buyer lands after cancelling
    pub cancel_url: String,
    #[serde(default = "default_store_name")]
    pub brand_name: String,
}

/// Firebase service account used for FCM HTTP v1
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FcmConfig {
    #[validate(length(min = 1))]
    pub project_id: String,
    #[validate(email)]
    pub client_email: String,
    /// PEM encoded RSA key; literal "\n" sequences are accepted
    #[validate(length(min = 1))]
    pub private_key: String,
    #[serde(default = "default_fcm_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_fcm_api_base")]
    pub api_base: String,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SmtpConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[validate(email)]
    pub from_email: String,
    #[serde(default = "default_store_name")]
    pub from_name: String,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key (minimum 64 characters)
    #[validate(custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: usize,

    /// JWT issuer name
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// JWT audience
    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

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

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Currency the catalog is priced in
    #[serde(default = "default_base_currency")]
    #[validate(custom = "validate_currency_code")]
    pub base_currency: String,

    /// Currencies the payment gateway cannot settle in; checkout in one of
    /// these needs an exchange rate and settles in `settlement_currency`
    #[serde(
        default = "default_unsupported_currencies",
        deserialize_with = "deserialize_currency_list"
    )]
    #[validate(custom = "validate_currency_list")]
    pub unsupported_currencies: Vec<String>,

    #[serde(default = "default_settlement_currency")]
    #[validate(custom = "validate_currency_code")]
    pub settlement_currency: String,

    /// Which device tokens of a user receive a push
    #[serde(default)]
    pub push_token_selection: TokenSelection,

    /// Tokens per multicast request
    #[serde(default = "default_push_batch_size")]
    #[validate(range(min = 1, max = 500))]
    pub push_batch_size: usize,

    /// Upper bound for any single payment/push provider call
    #[serde(default = "default_provider_timeout_secs")]
    #[validate(range(min = 1))]
    pub provider_timeout_secs: u64,

    /// Default page size for paginated API responses
    #[serde(default = "default_api_page_size")]
    pub api_default_page_size: u64,

    /// Maximum page size allowed for paginated API responses
    #[serde(default = "default_api_max_page_size")]
    pub api_max_page_size: u64,

    /// Shown in emails and as the PayPal brand when none is configured
    #[serde(default = "default_store_name")]
    pub store_name: String,

    #[serde(default)]
    #[validate]
    pub paypal: Option<PayPalConfig>,

    #[serde(default)]
    #[validate]
    pub fcm: Option<FcmConfig>,

    #[serde(default)]
    #[validate]
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    /// Creates a configuration with every optional section left at its default
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration: default_jwt_expiration(),
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            base_currency: default_base_currency(),
            unsupported_currencies: default_unsupported_currencies(),
            settlement_currency: default_settlement_currency(),
            push_token_selection: TokenSelection::default(),
            push_batch_size: default_push_batch_size(),
            provider_timeout_secs: default_provider_timeout_secs(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            store_name: default_store_name(),
            paypal: None,
            fcm: None,
            smtp: None,
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider_timeout_secs)
    }

    /// Currency policy applied to gateway checkouts
    pub fn currency_policy(&self) -> crate::services::currency::CurrencyPolicy {
        crate::services::currency::CurrencyPolicy::new(
            self.base_currency.clone(),
            self.unsupported_currencies.clone(),
            self.settlement_currency.clone(),
        )
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self
            .unsupported_currencies
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&self.settlement_currency))
        {
            let mut err = ValidationError::new("settlement_currency_unsupported");
            err.message =
                Some("settlement_currency cannot also be listed as unsupported".into());
            errors.add("settlement_currency", err);
        }

        if self.api_default_page_size == 0 || self.api_default_page_size > self.api_max_page_size {
            let mut err = ValidationError::new("api_default_page_size");
            err.message = Some("api_default_page_size must be between 1 and api_max_page_size".into());
            errors.add("api_default_page_size", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Deserializes and validates an already layered configuration
    pub fn from_config(config: Config) -> Result<Self, AppConfigError> {
        if config.get_string("jwt_secret").is_err() {
            error!("JWT secret is not configured. Set APP__JWT_SECRET environment variable with a secure random string (minimum 64 characters).");
            return Err(AppConfigError::Load(ConfigError::NotFound(
                "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                    .into(),
            )));
        }

        let mut app_config: AppConfig = config.try_deserialize()?;
        app_config.normalize();

        app_config.validate().map_err(|e| {
            error!("Configuration validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })?;

        app_config.validate_additional_constraints().map_err(|e| {
            error!("Configuration security validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })?;

        if app_config.is_production() {
            if let Some(paypal) = app_config.paypal.as_ref() {
                if paypal.api_base.contains("sandbox") {
                    warn!(api_base = %paypal.api_base, "production is configured against the PayPal sandbox");
                }
            }
            if app_config.fcm.is_none() {
                warn!("production is running without FCM credentials; push notifications are disabled");
            }
        }

        Ok(app_config)
    }

    fn normalize(&mut self) {
        self.base_currency = self.base_currency.trim().to_ascii_uppercase();
        self.settlement_currency = self.settlement_currency.trim().to_ascii_uppercase();
        for code in &mut self.unsupported_currencies {
            *code = code.trim().to_ascii_uppercase();
        }
        if let Some(fcm) = self.fcm.as_mut() {
            fcm.private_key = fcm.private_key.replace("\\n", "\n");
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_jwt_expiration() -> usize {
    3600
}

fn default_auth_issuer() -> String {
    "storefront-api".to_string()
}

fn default_auth_audience() -> String {
    "storefront-auth".to_string()
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_base_currency() -> String {
    DEFAULT_BASE_CURRENCY.to_string()
}

fn default_unsupported_currencies() -> Vec<String> {
    vec![DEFAULT_BASE_CURRENCY.to_string()]
}

fn default_settlement_currency() -> String {
    DEFAULT_SETTLEMENT_CURRENCY.to_string()
}

fn default_push_batch_size() -> usize {
    DEFAULT_PUSH_BATCH_SIZE
}

fn default_provider_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

fn default_api_page_size() -> u64 {
    20
}

fn default_api_max_page_size() -> u64 {
    100
}

fn default_store_name() -> String {
    "Jewelry Store".to_string()
}

fn default_paypal_api_base() -> String {
    "https://api-m.sandbox.paypal.com".to_string()
}

fn default_fcm_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_fcm_api_base() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

/// Accepts either a list or a comma separated string (the form env vars arrive in)
fn deserialize_currency_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<String>),
        Csv(String),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(list) => list,
        OneOrMany::Csv(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    })
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

fn validate_currency_code(code: &str) -> Result<(), ValidationError> {
    let code = code.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency_code");
        err.message = Some("Currency must be a three letter ISO 4217 code".into());
        Err(err)
    }
}

fn validate_currency_list(codes: &[String]) -> Result<(), ValidationError> {
    codes.iter().try_for_each(|code| validate_currency_code(code))
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 64 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must be at least 64 characters for adequate security".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    let weak_fragments = ["changeme", "password", "12345", "abcdef"];
    if weak_fragments.iter().any(|pattern| lower.contains(pattern)) {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some(
            "JWT secret appears to be weak; use a cryptographically strong random string".into(),
        );
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_api={},tower_http=debug", level);
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
        warn!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config = AppConfig::from_config(config)?;
    info!(
        environment = %app_config.environment,
        paypal = app_config.paypal.is_some(),
        fcm = app_config.fcm.is_some(),
        smtp = app_config.smtp.is_some(),
        "Configuration loaded successfully"
    );
    Ok(app_config)
}
