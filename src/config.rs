use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub aprs: AprsConfig,
    #[serde(default = "default_defaults_config")]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AprsConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

/// Settings a chat starts with before it has issued any /setstation
/// or /setinterval command.
#[derive(Debug, Deserialize, Clone)]
pub struct DefaultsConfig {
    #[serde(default = "default_station")]
    pub station: String,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
}

fn default_base_url() -> String {
    "https://api.aprs.fi/api/get".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

// N0CALL is the conventional placeholder callsign; the bot never
// tracks a real station until the user picks one.
fn default_station() -> String {
    "N0CALL-99".to_string()
}

fn default_interval() -> u64 {
    3600
}

fn default_defaults_config() -> DefaultsConfig {
    DefaultsConfig {
        station: default_station(),
        interval_seconds: default_interval(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Invalid TOML")?;

        if config.defaults.interval_seconds == 0 {
            bail!("defaults.interval_seconds must be a positive number of seconds");
        }
        if config.aprs.request_timeout_seconds == 0 {
            bail!("aprs.request_timeout_seconds must be a positive number of seconds");
        }

        Ok(config)
    }
}
