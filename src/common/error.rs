//! Error types for the application.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::common::types::humanize_until;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Game gateway connection errors. Fatal to the connection; the
/// reconnect loop handles them with backoff.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Invalid gateway frame: {0}")]
    InvalidFrame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discord relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Webhook was deleted")]
    WebhookDeleted,

    #[error("Missing permission: {0}")]
    MissingPermission(String),

    #[error("Channel {channel_id} already has {limit} webhooks")]
    WebhookQuotaExceeded { channel_id: u64, limit: usize },

    #[error("Channel not found: {0}")]
    ChannelNotFound(u64),

    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl RelayError {
    /// Permission and quota failures are fatal to linking; everything
    /// else is retryable or self-healing.
    pub fn fatal_to_linking(&self) -> bool {
        matches!(
            self,
            Self::MissingPermission(_) | Self::WebhookQuotaExceeded { .. } | Self::ChannelNotFound(_)
        )
    }
}

/// A forward rejected before any packet was written. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendRejection {
    #[error("Your message matched the bridge's blocked-content filter")]
    LocalBlocked,

    #[error("Your message would need {parts} chat lines (limit {max})")]
    MessageCount { parts: usize, max: usize },

    #[error("There was nothing to send")]
    Empty,

    #[error("You are muted in-game, expires {}", humanize_until(*.until))]
    PlayerMuted { until: DateTime<Utc> },

    #[error("You were muted by the bridge for repeated violations, expires {}", humanize_until(*.until))]
    AutoMuted { until: DateTime<Utc> },

    #[error("The whole guild chat is muted, expires {}", humanize_until(*.until))]
    GuildMuted { until: DateTime<Utc> },

    #[error("The bridge bot itself is muted in-game, expires {}", humanize_until(*.until))]
    BotMuted { until: DateTime<Utc> },
}

/// Outcome of a failed `chat()` call.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Rejected(#[from] SendRejection),

    #[error("The server kept suppressing the message as a duplicate ({attempts} attempts)")]
    SpamFilter { attempts: u32 },

    #[error("The server blocked the message for its content")]
    ServerBlocked,

    #[error("The bridge is not connected to the game")]
    NotReady,

    #[error("The source message was deleted before sending")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] ConnectionError),
}

/// Outcome of a failed `command()` call.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Timed out waiting for a command response")]
    Timeout,

    #[error("Command response collection was aborted")]
    Aborted,

    #[error("The bridge is not connected to the game")]
    NotReady,

    #[error(transparent)]
    Transport(#[from] ConnectionError),
}
