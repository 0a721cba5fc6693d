pub mod bridge;
pub mod collector;
pub mod filter;
pub mod manager;
pub mod registry;

pub use bridge::Bridge;
pub use collector::{CollectorOptions, EndReason, MessageCollector};
pub use filter::FilterHolder;
pub use manager::BridgeManager;
pub use registry::{CommandRegistry, GameCommand, HelpCommand, OnlineCommand};
