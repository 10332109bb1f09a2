use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub environment: String,

    pub database_url: String,

    pub secret_key: String,
    pub access_token_expire_minutes: i64,
    #[serde(default)]
    pub allowed_origins: String,

    pub tron_grid_api_key: String,
    pub tron_network: String,
    pub usdt_contract_address: String,

    pub webhook_secret: String,

    pub payment_timeout_minutes: i64,
    pub required_confirmations: i64,

    pub tick_seconds: u64,
    pub error_backoff_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8080)?
            .set_default("log_level", "info")?
            .set_default("environment", "development")?
            .set_default("secret_key", "change-this-secret-key-in-production")?
            .set_default("access_token_expire_minutes", 60 * 24 * 8)?
            .set_default("allowed_origins", "")?
            .set_default("tron_grid_api_key", "")?
            .set_default("tron_network", "mainnet")?
            .set_default(
                "usdt_contract_address",
                "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
            )?
            .set_default("webhook_secret", "webhook-secret-change-this")?
            .set_default("payment_timeout_minutes", 15)?
            .set_default("required_confirmations", 1)?
            .set_default("tick_seconds", 30)?
            .set_default("error_backoff_seconds", 60)?
            .add_source(config::Environment::default())
            .build()?;

        cfg.try_deserialize()
    }

    pub fn tron_grid_base_url(&self) -> &'static str {
        if self.tron_network == "mainnet" {
            "https://api.trongrid.io"
        } else {
            "https://api.shasta.trongrid.io"
        }
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
