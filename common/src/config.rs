use crate::yaml_include::render_yaml_with_includes;
use serde::Deserialize;
use std::{env, error::Error, path::Path};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CommonConfig {
    pub project_name: String,
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub server_address: String,
    pub log_level: String,
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
    /// Idle seconds before a visitor session is dropped.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_session_sweep_secs")]
    pub session_sweep_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            server_address: "0.0.0.0:8000".to_string(),
            log_level: "info".to_string(),
            allowed_origin: default_allowed_origin(),
            session_ttl_secs: default_session_ttl_secs(),
            session_sweep_secs: default_session_sweep_secs(),
        }
    }
}

fn default_allowed_origin() -> String {
    "http://localhost:5173".to_string()
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_session_sweep_secs() -> u64 {
    5 * 60
}

/// Payment provider settings, handed to the gateway client at construction.
#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    pub base_url: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.paystack.co".to_string(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            currency: default_currency(),
            success_url: "http://127.0.0.1:8000/orders/success".to_string(),
            cancel_url: "http://127.0.0.1:8000/orders/cancel".to_string(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Tax settings. The rate is kept as text and parsed into a fixed-point
/// decimal by the storefront crate.
#[derive(Debug, Deserialize, Clone)]
pub struct TaxConfig {
    #[serde(default = "default_tax_rate")]
    pub default_rate: String,
    #[serde(default = "default_region")]
    pub default_region: String,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            default_rate: default_tax_rate(),
            default_region: default_region(),
        }
    }
}

fn default_tax_rate() -> String {
    "0.08".to_string()
}

fn default_region() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub common: CommonConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub tax: TaxConfig,
}

impl Config {
    pub fn load(config_path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let contents = render_yaml_with_includes(Path::new(config_path))?;
        let mut config: Config = serde_yml::from_str(&contents)?;
        config.apply_env_overrides();

        Ok(config)
    }

    /// Secrets and the database URL may come from the environment instead
    /// of the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("DATABASE_URL") {
            info!("DATABASE_URL set, overriding common.database_url");
            self.common.database_url = url;
        }
        if let Ok(key) = env::var("PAYMENTS_SECRET_KEY") {
            self.payments.secret_key = key;
        }
        if let Ok(secret) = env::var("PAYMENTS_WEBHOOK_SECRET") {
            self.payments.webhook_secret = secret;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_sections_and_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.yaml");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(
                b"common:\n  project_name: storefront\n  database_url: sqlite::memory:\npayments:\n  base_url: http://localhost:9999\n  success_url: http://localhost/ok\n  cancel_url: http://localhost/cancel\n",
            )
            .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.common.project_name, "storefront");
        assert_eq!(config.payments.base_url, "http://localhost:9999");
        assert_eq!(config.payments.currency, "usd");
        assert_eq!(config.tax.default_rate, "0.08");
        assert_eq!(config.backend.log_level, "info");
        assert_eq!(config.backend.session_ttl_secs, 86_400);
        assert_eq!(config.backend.session_sweep_secs, 300);
    }
}
