//! Aggregate over the per-channel relays of one bridge.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, warn};

use crate::bridge::filter::FilterHolder;
use crate::common::directory::PlayerDirectory;
use crate::common::error::RelayError;
use crate::common::types::{ChatKind, MessageKind};
use crate::config::types::{ChannelsConfig, LimitsConfig};
use crate::discord::channel_relay::ChannelRelay;
use crate::discord::content::ContentResolver;
use crate::discord::platform::ChatPlatform;
use crate::game::chat_manager::GameChatManager;
use crate::game::message::GameMessage;

pub struct DiscordRelay {
    children: Vec<Arc<ChannelRelay>>,
}

impl DiscordRelay {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channels: &ChannelsConfig,
        guild_name: String,
        platform: Arc<dyn ChatPlatform>,
        directory: Arc<dyn PlayerDirectory>,
        filters: Arc<FilterHolder>,
        limits: LimitsConfig,
        chat: Arc<GameChatManager>,
    ) -> Self {
        let configured = [
            (ChatKind::Guild, channels.guild),
            (ChatKind::Officer, channels.officer),
            (ChatKind::Party, channels.party),
        ];
        let children = configured
            .into_iter()
            .filter_map(|(kind, channel_id)| {
                let channel_id = channel_id?;
                Some(Arc::new(ChannelRelay::new(
                    kind,
                    channel_id,
                    guild_name.clone(),
                    Arc::clone(&platform),
                    Arc::clone(&directory),
                    Arc::clone(&filters),
                    limits.clone(),
                    Arc::clone(&chat),
                )))
            })
            .collect();
        Self { children }
    }

    /// Initialize every channel's webhook concurrently. Idempotent.
    pub async fn init(&self) -> Result<(), RelayError> {
        let results = join_all(self.children.iter().map(|child| child.init())).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Ready iff at least one channel exists and all are ready.
    pub fn is_ready(&self) -> bool {
        !self.children.is_empty() && self.children.iter().all(|child| child.is_ready())
    }

    /// Cascades to every child; used on guild unlink.
    pub fn set_unready(&self) {
        for child in &self.children {
            child.set_unready();
        }
    }

    pub fn relay_for(&self, kind: ChatKind) -> Option<&Arc<ChannelRelay>> {
        self.children.iter().find(|child| child.kind() == kind)
    }

    pub fn relay_for_channel(&self, channel_id: u64) -> Option<&Arc<ChannelRelay>> {
        self.children
            .iter()
            .find(|child| child.channel_id() == channel_id)
    }

    /// Route one inbound game message to its destination channel.
    /// Whispers and system lines land in the guild channel.
    pub async fn forward_to_discord(
        &self,
        message: &GameMessage,
        resolver: &dyn ContentResolver,
    ) {
        let kind = match message.kind {
            MessageKind::Guild => ChatKind::Guild,
            MessageKind::Officer => ChatKind::Officer,
            MessageKind::Party => ChatKind::Party,
            MessageKind::Whisper | MessageKind::System => ChatKind::Guild,
        };
        let Some(relay) = self.relay_for(kind) else {
            return;
        };
        if let Err(e) = relay.forward_to_discord(message, resolver).await {
            if e.fatal_to_linking() {
                error!(kind = ?kind, "Relay lost its channel: {}", e);
                relay.set_unready();
            } else {
                warn!(kind = ?kind, "Forward to Discord failed: {}", e);
            }
        }
    }
}
