pub mod channel_relay;
pub mod content;
pub mod gateway;
pub mod markdown;
pub mod platform;
pub mod relay;

pub use gateway::GatewayHandler;
pub use platform::{ChatPlatform, GuildResolver, SerenityPlatform};
pub use relay::DiscordRelay;
