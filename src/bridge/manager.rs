//! Owns the bridge pool and the cross-bridge caches.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bridge::bridge::Bridge;
use crate::common::messages::{InteractionEcho, RelayedMessage};

/// How long abort tokens and tracked interactions stay cached.
const CACHE_TTL: Duration = Duration::from_secs(300);
/// Sweep cadence for the TTL caches.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Fans Discord traffic out to the owning bridge and tracks per-message
/// abort signals plus pending application-command invocations.
pub struct BridgeManager {
    bridges: Vec<Arc<Bridge>>,
    /// Source Discord message id -> abort signal for its forward.
    aborts: DashMap<u64, (CancellationToken, Instant)>,
    /// Interaction id -> invocation to echo in-game.
    interactions: DashMap<u64, (InteractionEcho, Instant)>,
}

impl BridgeManager {
    pub fn new(bridges: Vec<Arc<Bridge>>) -> Arc<Self> {
        let manager = Arc::new(Self {
            bridges,
            aborts: DashMap::new(),
            interactions: DashMap::new(),
        });
        let sweeper = Arc::clone(&manager);
        tokio::spawn(async move { sweeper.sweep_loop().await });
        manager
    }

    pub fn start(&self) {
        for bridge in &self.bridges {
            bridge.start();
        }
    }

    pub async fn stop(&self) {
        for bridge in &self.bridges {
            bridge.stop().await;
        }
    }

    pub fn bridges(&self) -> &[Arc<Bridge>] {
        &self.bridges
    }

    fn bridge_for_channel(&self, channel_id: u64) -> Option<&Arc<Bridge>> {
        self.bridges
            .iter()
            .find(|bridge| bridge.owns_channel(channel_id))
    }

    /// Remember a command invocation so the visible result message can
    /// be echoed in-game as "/command opt:value".
    pub fn track_interaction(&self, interaction_id: u64, echo: InteractionEcho) {
        self.interactions
            .insert(interaction_id, (echo, Instant::now()));
    }

    /// Route one Discord message to the bridge owning its channel.
    pub async fn handle_discord_message(&self, message: RelayedMessage) {
        if message.author.bot {
            // Webhook and bot traffic includes our own relays.
            return;
        }
        let Some(bridge) = self.bridge_for_channel(message.channel_id) else {
            return;
        };

        let cancel = CancellationToken::new();
        self.aborts
            .insert(message.id, (cancel.clone(), Instant::now()));

        let echo = message
            .interaction_id
            .and_then(|id| self.interactions.remove(&id))
            .map(|(_, (echo, _))| echo);

        bridge.handle_discord_message(&message, echo, cancel).await;
    }

    /// Deleting the source message aborts any in-flight forward of it.
    pub fn handle_message_delete(&self, message_id: u64) {
        if let Some((_, (cancel, _))) = self.aborts.remove(&message_id) {
            debug!(message_id, "Source message deleted, aborting forward");
            cancel.cancel();
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let cutoff = Instant::now() - CACHE_TTL;
            self.aborts.retain(|_, (_, at)| *at > cutoff);
            self.interactions.retain(|_, (_, at)| *at > cutoff);
        }
    }
}
