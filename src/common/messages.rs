//! Canonical message types for bridge communication.
//!
//! These are the value types that cross component boundaries: bridge
//! lifecycle events, the platform-agnostic view of a Discord message,
//! and webhook payloads.

use std::sync::Arc;

use crate::common::types::LinkedGuild;
use crate::game::message::GameMessage;

/// Lifecycle and message events emitted on a bridge's broadcast stream.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// The game connection was established (not yet spawned in).
    Connected,
    /// The game connection spawned in and can chat.
    Ready,
    /// The bridge linked to an in-game guild.
    Linked(LinkedGuild),
    /// The game connection dropped; a reconnect will follow unless fatal.
    Disconnected { reason: String },
    /// The connection failed terminally; no further reconnects.
    Errored { reason: String },
    /// One parsed inbound chat line.
    Message(Arc<GameMessage>),
}

/// Author of a relayed Discord message.
#[derive(Debug, Clone, Default)]
pub struct RelayedAuthor {
    pub id: u64,
    pub display_name: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub bot: bool,
}

/// One Discord attachment, reduced to what the relay needs.
#[derive(Debug, Clone)]
pub struct AttachmentInfo {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u64,
}

/// The message a relayed Discord message replies to.
#[derive(Debug, Clone)]
pub struct ReplyRef {
    pub author_id: u64,
    pub author_display: String,
    pub content: String,
}

/// A tracked application-command invocation whose visible result is
/// being relayed; echoed in-game as a synthetic "/command ..." line.
#[derive(Debug, Clone)]
pub struct InteractionEcho {
    pub command: String,
    pub options: Vec<(String, String)>,
}

impl InteractionEcho {
    /// Render the invocation the way a player would have typed it.
    pub fn render(&self) -> String {
        let mut line = format!("/{}", self.command);
        for (name, value) in &self.options {
            line.push(' ');
            line.push_str(name);
            line.push(':');
            line.push_str(value);
        }
        line
    }
}

/// Platform-agnostic view of one inbound Discord message.
#[derive(Debug, Clone)]
pub struct RelayedMessage {
    pub id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub author: RelayedAuthor,
    pub content: String,
    pub edited: bool,
    pub attachments: Vec<AttachmentInfo>,
    pub sticker_names: Vec<String>,
    pub reply: Option<ReplyRef>,
    /// Interaction id when this message is the visible result of a
    /// tracked application command.
    pub interaction_id: Option<u64>,
}

impl RelayedMessage {
    pub fn new(id: u64, channel_id: u64, author: RelayedAuthor, content: impl Into<String>) -> Self {
        Self {
            id,
            channel_id,
            guild_id: None,
            author,
            content: content.into(),
            edited: false,
            attachments: Vec::new(),
            sticker_names: Vec::new(),
            reply: None,
            interaction_id: None,
        }
    }
}

/// Payload for an impersonated webhook send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookPayload {
    pub content: String,
    pub username: String,
    pub avatar_url: Option<String>,
}
