//! Handles settings for the application. Configuration is read from
//! `settings.toml` and can be overridden by `BUDGEE__SECTION__KEY`
//! environment variables.
//!
//! See `settings.example.toml` for the configuration.
use config::{Config, ConfigError, Environment, File};
use engine::PlaidEnvironment;
use serde::Deserialize;

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize)]
pub struct App {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

#[derive(Debug, Deserialize)]
pub struct Server {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub admin_users: Vec<String>,
    /// Shared secret expected in the `plaid-verification` header. Webhooks
    /// are refused when empty.
    #[serde(default)]
    pub webhook_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct Plaid {
    pub environment: PlaidEnvironment,
    pub client_id: String,
    pub secret: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Scheduler {
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub server: Option<Server>,
    pub plaid: Plaid,
    pub scheduler: Option<Scheduler>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_database_url() -> String {
    "sqlite:./budgee.db?mode=rwc".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_sync_interval_secs() -> u64 {
    DAY_SECS
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("settings").required(false))
            .add_source(
                Environment::with_prefix("BUDGEE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.admin_users"),
            )
            .build()?;

        settings.try_deserialize()
    }
}
