//! Player/guild directory collaborator.
//!
//! The bridge does not own mute or infraction persistence; it consults
//! an external directory through this trait. An in-memory implementation
//! is provided for single-process deployments and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

use crate::common::types::MuteState;

/// A game identity linked to a Discord account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedPlayer {
    pub uuid: String,
    pub ign: String,
}

/// External directory for identity resolution and mute/infraction state.
#[async_trait]
pub trait PlayerDirectory: Send + Sync {
    /// Resolve the game identity linked to a Discord account.
    async fn player_for_discord(&self, discord_id: u64) -> Option<LinkedPlayer>;

    /// Resolve a uuid for an in-game name, possibly via external lookup.
    async fn resolve_uuid(&self, ign: &str) -> Option<String>;

    /// Active in-game mute for a player uuid.
    async fn mute_state(&self, uuid: &str) -> Option<MuteState>;

    /// Active bridge-local auto-mute for a Discord account.
    async fn auto_mute_state(&self, discord_id: u64) -> Option<MuteState>;

    /// Active whole-guild chat mute.
    async fn guild_mute_state(&self, guild_id: &str) -> Option<MuteState>;

    /// Active mute on the bridge bot's own account.
    async fn bot_mute_state(&self) -> Option<MuteState>;

    /// Whether a Discord account has staff privileges (bypasses guild mute).
    async fn is_staff(&self, discord_id: u64) -> bool;

    /// Record one content-policy infraction; returns the running count.
    async fn record_infraction(&self, discord_id: u64) -> u32;

    /// Apply a timed bridge-local mute.
    async fn set_auto_mute(&self, discord_id: u64, until: DateTime<Utc>);
}

/// Non-persistent directory for single-process deployments.
///
/// Mutes and infraction counts live only for the process lifetime;
/// durable storage is explicitly out of scope for the bridge.
pub struct InMemoryDirectory {
    links: DashMap<u64, LinkedPlayer>,
    player_mutes: DashMap<String, MuteState>,
    auto_mutes: DashMap<u64, MuteState>,
    guild_mutes: DashMap<String, MuteState>,
    bot_mute: DashMap<(), MuteState>,
    infractions: DashMap<u64, u32>,
    staff: HashSet<u64>,
}

impl InMemoryDirectory {
    pub fn new(staff: impl IntoIterator<Item = u64>) -> Self {
        Self {
            links: DashMap::new(),
            player_mutes: DashMap::new(),
            auto_mutes: DashMap::new(),
            guild_mutes: DashMap::new(),
            bot_mute: DashMap::new(),
            infractions: DashMap::new(),
            staff: staff.into_iter().collect(),
        }
    }

    pub fn link(&self, discord_id: u64, player: LinkedPlayer) {
        self.links.insert(discord_id, player);
    }

    pub fn mute_player(&self, uuid: &str, until: DateTime<Utc>) {
        self.player_mutes
            .insert(uuid.to_string(), MuteState { until });
    }

    pub fn mute_guild(&self, guild_id: &str, until: DateTime<Utc>) {
        self.guild_mutes
            .insert(guild_id.to_string(), MuteState { until });
    }

    pub fn mute_bot(&self, until: DateTime<Utc>) {
        self.bot_mute.insert((), MuteState { until });
    }

    fn active(state: Option<MuteState>) -> Option<MuteState> {
        state.filter(MuteState::active)
    }
}

#[async_trait]
impl PlayerDirectory for InMemoryDirectory {
    async fn player_for_discord(&self, discord_id: u64) -> Option<LinkedPlayer> {
        self.links.get(&discord_id).map(|entry| entry.value().clone())
    }

    async fn resolve_uuid(&self, ign: &str) -> Option<String> {
        self.links
            .iter()
            .find(|entry| entry.ign.eq_ignore_ascii_case(ign))
            .map(|entry| entry.uuid.clone())
    }

    async fn mute_state(&self, uuid: &str) -> Option<MuteState> {
        Self::active(self.player_mutes.get(uuid).map(|e| *e))
    }

    async fn auto_mute_state(&self, discord_id: u64) -> Option<MuteState> {
        Self::active(self.auto_mutes.get(&discord_id).map(|e| *e))
    }

    async fn guild_mute_state(&self, guild_id: &str) -> Option<MuteState> {
        Self::active(self.guild_mutes.get(guild_id).map(|e| *e))
    }

    async fn bot_mute_state(&self) -> Option<MuteState> {
        Self::active(self.bot_mute.get(&()).map(|e| *e))
    }

    async fn is_staff(&self, discord_id: u64) -> bool {
        self.staff.contains(&discord_id)
    }

    async fn record_infraction(&self, discord_id: u64) -> u32 {
        let mut entry = self.infractions.entry(discord_id).or_insert(0);
        *entry += 1;
        *entry
    }

    async fn set_auto_mute(&self, discord_id: u64, until: DateTime<Utc>) {
        self.auto_mutes.insert(discord_id, MuteState { until });
    }
}

/// Convenience used by the relay when escalating infractions.
pub fn auto_mute_expiry(minutes: i64) -> DateTime<Utc> {
    Utc::now() + Duration::minutes(minutes)
}
