//! Game-side components: the opaque protocol seam, inbound message
//! parsing, and the outbound send pipeline.

pub mod chat_manager;
pub mod connector;
pub mod dedup;
pub mod message;
pub mod protocol;
pub mod split;

pub use chat_manager::{ChatOptions, CommandOptions, CommandReply, GameChatManager};
pub use message::{GameMessage, GameMessageAuthor};
pub use protocol::{ChatPosition, GameConnection, GameConnector, GameEvent};
