use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fmt;
use tracing::info;
use tracing_subscriber::EnvFilter;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;
const CONFIG_DIR: &str = "config";

/// Which durable store backs carts, orders, and checkout attempts.
///
/// Chosen once at startup and injected into the services; there is no runtime
/// switch between the two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    Database,
    InMemory,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::InMemory
    }
}

/// The concrete payment provider the gateway adapter is wired to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentProviderKind {
    /// Tokenized card charge against a card processor.
    Card,
    /// PayPal order create + capture.
    Paypal,
    /// Hosted payment element: the client confirms the intent, the server
    /// verifies and (if needed) captures it.
    PaymentElement,
}

impl fmt::Display for PaymentProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentProviderKind::Card => write!(f, "card"),
            PaymentProviderKind::Paypal => write!(f, "paypal"),
            PaymentProviderKind::PaymentElement => write!(f, "payment-element"),
        }
    }
}

/// Payment provider connection settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaymentConfig {
    #[serde(default = "default_provider")]
    pub provider: PaymentProviderKind,

    /// Base URL of the provider's API.
    #[validate(length(min = 1))]
    pub endpoint: String,

    /// Bearer credential for the provider. Obtained out of band.
    #[serde(default)]
    pub api_key: String,

    /// Per-call timeout applied by the orchestrator to authorize and capture.
    /// A timeout is treated as provider-unavailable, never as a decline.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: "http://localhost:9090".to_string(),
            api_key: String::new(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

/// Catalog gateway settings. Read-only, used for checkout revalidation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CatalogConfig {
    #[validate(length(min = 1))]
    pub endpoint: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9091".to_string(),
        }
    }
}

/// Application configuration, layered from `config/{default,<env>}.toml` and
/// `APP_*` environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_env")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging).
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// Required when `storage_backend = "database"`.
    #[serde(default)]
    pub database_url: String,

    /// Settlement currency. Single-currency deployment; the cart and every
    /// charge use this.
    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    #[validate]
    pub payment: PaymentConfig,

    #[serde(default)]
    #[validate]
    pub catalog: CatalogConfig,
}

impl AppConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.payment.timeout_secs)
    }

    fn validate_storage(&self) -> Result<(), ConfigError> {
        if self.storage_backend == StorageBackend::Database && self.database_url.is_empty() {
            return Err(ConfigError::Message(
                "database_url is required when storage_backend is \"database\"".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_provider() -> PaymentProviderKind {
    PaymentProviderKind::Card
}

fn default_provider_timeout() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

/// Loads configuration: `config/default.toml`, then `config/<APP_ENV>.toml`,
/// then `APP_*` environment overrides (e.g. `APP_PAYMENT__PROVIDER=paypal`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let env = std::env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let builder = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;
    cfg.validate_storage()?;

    info!(
        environment = %cfg.environment,
        storage = ?cfg.storage_backend,
        provider = %cfg.payment.provider,
        "configuration loaded"
    );
    Ok(cfg)
}

/// Initializes the global tracing subscriber. `RUST_LOG` wins over the
/// configured level when set.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_backend_requires_url() {
        let cfg = AppConfig {
            host: default_host(),
            port: default_port(),
            environment: default_env(),
            log_level: default_log_level(),
            log_json: false,
            storage_backend: StorageBackend::Database,
            database_url: String::new(),
            currency: default_currency(),
            payment: PaymentConfig::default(),
            catalog: CatalogConfig::default(),
        };
        assert!(cfg.validate_storage().is_err());
    }

    #[test]
    fn in_memory_backend_needs_no_url() {
        let cfg = AppConfig {
            host: default_host(),
            port: default_port(),
            environment: default_env(),
            log_level: default_log_level(),
            log_json: false,
            storage_backend: StorageBackend::InMemory,
            database_url: String::new(),
            currency: default_currency(),
            payment: PaymentConfig::default(),
            catalog: CatalogConfig::default(),
        };
        assert!(cfg.validate_storage().is_ok());
    }
}
