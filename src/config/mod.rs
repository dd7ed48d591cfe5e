//! Configuration management for the trading engine.
//!
//! Loads venue credentials, HTTP policy and engine settings from environment
//! variables and config files.

mod settings;

pub use settings::{ExitGuard, Preset, Settings, SettingsHandle};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Alpaca endpoints and credentials
    #[serde(default)]
    pub venue: VenueConfig,
    /// Timeout and retry policy shared by every venue call
    #[serde(default)]
    pub http: HttpConfig,
    /// Operator-tunable trading settings
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Sent as `APCA-API-KEY-ID`
    #[serde(default)]
    pub api_key: String,
    /// Sent as `APCA-API-SECRET-KEY`
    #[serde(default)]
    pub secret_key: String,
    /// Trading API root, e.g. the paper endpoint
    #[serde(default = "default_trading_url")]
    pub trading_url: String,
    /// Market data API root
    #[serde(default = "default_data_url")]
    pub data_url: String,
    /// Crypto data locations, tried in order
    #[serde(default = "default_crypto_locations")]
    pub crypto_locations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base for 429/5xx responses (doubles per attempt)
    #[serde(default = "default_status_backoff_ms")]
    pub status_backoff_ms: u64,
    /// Backoff base for timeouts and connection failures
    #[serde(default = "default_transport_backoff_ms")]
    pub transport_backoff_ms: u64,
}

fn default_trading_url() -> String {
    "https://paper-api.alpaca.markets".to_string()
}
fn default_data_url() -> String {
    "https://data.alpaca.markets".to_string()
}
fn default_crypto_locations() -> Vec<String> {
    vec!["us".to_string(), "global".to_string()]
}
fn default_timeout_ms() -> u64 {
    8000
}
fn default_max_retries() -> u32 {
    2
}
fn default_status_backoff_ms() -> u64 {
    500
}
fn default_transport_backoff_ms() -> u64 {
    350
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            trading_url: default_trading_url(),
            data_url: default_data_url(),
            crypto_locations: default_crypto_locations(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            status_backoff_ms: default_status_backoff_ms(),
            transport_backoff_ms: default_transport_backoff_ms(),
        }
    }
}

impl Config {
    /// Load configuration from environment and optional config file.
    ///
    /// Environment variables use the `BOB` prefix and `__` as the nesting
    /// separator, e.g. `BOB__SETTINGS__SPREAD_MAX_BPS=40`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("BOB"))
            .build()
            .context("Failed to build configuration")?;

        let mut loaded: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        loaded.settings = loaded.settings.clamped();
        Ok(loaded)
    }

    /// Validate configuration values that clamping cannot repair.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.http.timeout_ms > 0, "http.timeout_ms must be positive");

        anyhow::ensure!(
            !self.venue.crypto_locations.is_empty(),
            "at least one crypto data location is required"
        );

        anyhow::ensure!(
            self.venue.trading_url.starts_with("http") && self.venue.data_url.starts_with("http"),
            "venue urls must be absolute http(s) urls"
        );

        Ok(())
    }

    /// Credentials are required for anything that talks to the venue.
    pub fn require_credentials(&self) -> Result<()> {
        anyhow::ensure!(
            !self.venue.api_key.is_empty() && !self.venue.secret_key.is_empty(),
            "venue.api_key and venue.secret_key must be set (BOB__VENUE__API_KEY / BOB__VENUE__SECRET_KEY)"
        );
        Ok(())
    }
}
