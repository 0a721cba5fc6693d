//! Configuration validation.

use crate::common::error::ConfigError;
use crate::config::types::Config;

fn fail(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        message: message.into(),
    }
}

/// Validate a loaded configuration before any connection is attempted.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.discord.token.trim().is_empty() {
        return Err(fail("discord.token must not be empty"));
    }

    if config.accounts.is_empty() {
        return Err(fail("at least one account must be configured"));
    }

    for account in &config.accounts {
        if account.username.trim().is_empty() {
            return Err(fail("account username must not be empty"));
        }
        if !account.gateway.contains(':') {
            return Err(fail(format!(
                "account '{}': gateway must be host:port, got '{}'",
                account.username, account.gateway
            )));
        }
        let channels = &account.channels;
        if channels.guild.is_none() && channels.officer.is_none() && channels.party.is_none() {
            return Err(fail(format!(
                "account '{}': at least one of channels.guild/officer/party is required",
                account.username
            )));
        }
    }

    if config.limits.max_parts == 0 {
        return Err(fail("limits.max_parts must be at least 1"));
    }

    if let Some(filters) = &config.filters {
        for pattern in filters.blocked.iter().chain(filters.allowed_urls.iter()) {
            fancy_regex::Regex::new(pattern).map_err(|e| {
                fail(format!("invalid filter pattern '{}': {}", pattern, e))
            })?;
        }
    }

    for pattern in [
        &config.patterns.unknown_command,
        &config.patterns.pagination_divider,
    ] {
        fancy_regex::Regex::new(pattern)
            .map_err(|e| fail(format!("invalid pattern '{}': {}", pattern, e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::load_config_str;

    fn base_config() -> Config {
        load_config_str(
            r#"
            discord { token = "t" }
            accounts = [
                { username = "Bot", gateway = "localhost:25560", channels { guild = 1 } }
            ]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn test_empty_token_rejected() {
        let mut config = base_config();
        config.discord.token = "  ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_no_accounts_rejected() {
        let mut config = base_config();
        config.accounts.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_channelless_account_rejected() {
        let mut config = base_config();
        config.accounts[0].channels.guild = None;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_gateway_rejected() {
        let mut config = base_config();
        config.accounts[0].gateway = "not-an-address".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_filter_pattern_rejected() {
        let mut config = base_config();
        config.filters = Some(crate::config::types::FiltersConfig {
            blocked: vec!["[unclosed".to_string()],
            allowed_urls: vec![],
        });
        assert!(validate(&config).is_err());
    }
}
