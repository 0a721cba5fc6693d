//! Shared types used across the application.

pub mod directory;
pub mod error;
pub mod messages;
pub mod types;

pub use messages::{BridgeEvent, RelayedMessage, WebhookPayload};
pub use types::{BotIdentity, ChatKind, LinkedGuild, MessageKind, ProtocolVersion};
