use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::OnceLock;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub telegram_bot_token: String,
    /// Chat that receives every notification (single delivery target).
    pub telegram_chat_id: i64,

    pub overseerr_api_url: String,
    pub overseerr_api_key: String,

    /// Bearer secret the webhook sender must present.
    pub webhook_secret: String,
    /// Argon2 PHC hash of the admin password, produced by /generatehash.
    pub admin_password_hash: String,

    #[serde(default = "default_admins_file")]
    pub admins_file: String,
    #[serde(default = "default_users_file")]
    pub users_file: String,
    #[serde(default = "default_message_config_file")]
    pub message_config_file: String,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Long-poll timeout for getUpdates, in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Capacity of the webhook-to-dispatcher queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_admins_file() -> String { "data/admins.json".into() }
fn default_users_file() -> String { "data/users.json".into() }
fn default_message_config_file() -> String { "message_config.yml".into() }
fn default_listen_addr() -> String { "0.0.0.0:8000".into() }
fn default_poll_timeout() -> u64 { 30 }
fn default_queue_capacity() -> usize { 100 }

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Load settings from the environment. Called once at startup so a missing
/// required variable is reported before any listener binds.
pub fn init() -> Result<&'static Settings> {
    let loaded = config::Config::builder()
        .add_source(config::Environment::with_prefix("RR"))
        .build()
        .context("failed to read environment")?
        .try_deserialize::<Settings>()
        .context("missing or invalid required configuration")?;

    Ok(SETTINGS.get_or_init(|| loaded))
}

pub fn settings() -> &'static Settings {
    SETTINGS.get().expect("config::init() called at startup")
}
