//! The game protocol seam.
//!
//! The bridge never speaks the game wire protocol itself; it consumes a
//! connection through these traits. The production implementation is a
//! chat-gateway sidecar (`connector`); tests provide scripted mocks.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::common::error::ConnectionError;
use crate::common::types::{BotIdentity, ProtocolVersion};

/// Where the server placed an inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPosition {
    /// Regular chat box line.
    Chat,
    /// System slot (command responses, server notices).
    System,
    /// Action bar overlay; never relayed.
    ActionBar,
}

/// Events surfaced by a game connection.
#[derive(Debug, Clone)]
pub enum GameEvent {
    /// The account finished logging in and can send chat.
    Spawned {
        identity: BotIdentity,
        version: ProtocolVersion,
    },
    /// One inbound chat line. `profile_id` carries the uuid embedded in
    /// the line's profile-link payload, when the server attached one.
    Chat {
        content: String,
        position: ChatPosition,
        profile_id: Option<String>,
    },
    /// The connection dropped; reconnectable.
    Disconnected { reason: String },
    /// The server kicked the account. `fatal` means reconnecting is
    /// pointless (bad credentials, ban).
    Kicked { reason: String, fatal: bool },
}

/// One live game connection.
#[async_trait]
pub trait GameConnection: Send + Sync {
    /// Write one raw chat line (including any command prefix).
    async fn write_chat(&self, line: &str) -> Result<(), ConnectionError>;

    /// Subscribe to the connection's event stream.
    fn subscribe(&self) -> broadcast::Receiver<GameEvent>;

    /// Close the connection.
    async fn disconnect(&self);
}

/// Factory for game connections; one per configured account.
#[async_trait]
pub trait GameConnector: Send + Sync {
    async fn connect(&self) -> Result<std::sync::Arc<dyn GameConnection>, ConnectionError>;
}
