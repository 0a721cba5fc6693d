//! Shared types used across the application.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Addressable outgoing chat type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatKind {
    Guild,
    Officer,
    Party,
    Whisper,
}

impl ChatKind {
    /// Command prefix the game expects for this chat type.
    ///
    /// Whispers carry the target name, so their prefix is built at send time.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Guild => "/gc ",
            Self::Officer => "/oc ",
            Self::Party => "/pc ",
            Self::Whisper => "/msg ",
        }
    }

    /// Pacing delay after a successful send, before the next queued part.
    pub fn pacing(&self) -> Duration {
        match self {
            Self::Guild | Self::Officer | Self::Party => Duration::from_millis(600),
            Self::Whisper => Duration::from_millis(1000),
        }
    }

    /// Which duplicate ring buffer this chat type shares.
    ///
    /// The server's duplicate filter tracks public chat and whispers
    /// separately, so guild/officer/party share one buffer.
    pub fn ring(&self) -> RingKey {
        match self {
            Self::Guild | Self::Officer | Self::Party => RingKey::Guild,
            Self::Whisper => RingKey::Whisper,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guild => "guild",
            Self::Officer => "officer",
            Self::Party => "party",
            Self::Whisper => "whisper",
        }
    }
}

/// Key into the per-account duplicate ring buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingKey {
    Guild,
    Whisper,
}

/// Classified kind of an inbound chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Guild,
    Officer,
    Party,
    Whisper,
    System,
}

impl MessageKind {
    /// The outgoing chat type that replies to this kind of message.
    pub fn reply_kind(&self) -> Option<ChatKind> {
        match self {
            Self::Guild => Some(ChatKind::Guild),
            Self::Officer => Some(ChatKind::Officer),
            Self::Party => Some(ChatKind::Party),
            Self::Whisper => Some(ChatKind::Whisper),
            Self::System => None,
        }
    }
}

/// Game protocol generation, which determines the chat line limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Older servers cap a chat line at 100 characters.
    Legacy,
    /// Modern servers cap a chat line at 256 characters.
    Modern,
}

impl ProtocolVersion {
    pub fn line_limit(&self) -> usize {
        match self {
            Self::Legacy => 100,
            Self::Modern => 256,
        }
    }
}

/// The bot's own in-game identity, known once the connection has spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub ign: String,
    pub uuid: String,
}

/// The in-game guild a bridge is linked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedGuild {
    pub id: String,
    pub name: String,
}

/// A mute with an expiry time, as reported by the player directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteState {
    pub until: DateTime<Utc>,
}

impl MuteState {
    pub fn active(&self) -> bool {
        self.until > Utc::now()
    }
}

/// Render a future instant as a human phrase like "in 10 minutes".
///
/// Already-elapsed instants render as "now".
pub fn humanize_until(until: DateTime<Utc>) -> String {
    let secs = (until - Utc::now()).num_seconds();
    if secs <= 0 {
        return "now".to_string();
    }
    let (value, unit) = if secs < 60 {
        (secs, "second")
    } else if secs < 3600 {
        // Round to the nearest minute so "9m59s" reads as "10 minutes".
        ((secs + 30) / 60, "minute")
    } else if secs < 86_400 {
        ((secs + 1800) / 3600, "hour")
    } else {
        ((secs + 43_200) / 86_400, "day")
    };
    if value == 1 {
        format!("in 1 {}", unit)
    } else {
        format!("in {} {}s", value, unit)
    }
}
