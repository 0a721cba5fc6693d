//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `BRIDGEKEEPER_DISCORD_TOKEN` - Discord bot token
//! - `BRIDGEKEEPER_OPS_CHANNEL` - operational error report channel id
//! - `BRIDGEKEEPER_CONFIG` - config file path

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "BRIDGEKEEPER";

/// Apply environment variable overrides to a config.
///
/// This allows sensitive values like tokens to be provided via
/// environment variables instead of the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(token) = env::var(format!("{}_DISCORD_TOKEN", ENV_PREFIX)) {
        config.discord.token = token;
    }

    if let Ok(channel) = env::var(format!("{}_OPS_CHANNEL", ENV_PREFIX)) {
        if let Ok(id) = channel.parse() {
            config.discord.ops_channel = Some(id);
        }
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `BRIDGEKEEPER_CONFIG`, otherwise returns "bridgekeeper.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "bridgekeeper.conf".to_string())
}
