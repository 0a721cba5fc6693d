//! Configuration type definitions.

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub filters: Option<FiltersConfig>,
    #[serde(default)]
    pub patterns: PatternsConfig,
}

/// Discord bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    /// Discord server the bridged channels live in. Used for mention,
    /// emoji and channel name resolution; defaults to the first server
    /// the bot is a member of.
    pub server: Option<u64>,
    /// Channel that receives operational error reports (webhook quota,
    /// missing permissions).
    pub ops_channel: Option<u64>,
    /// Prefix that triggers in-game command parsing.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Discord accounts with staff privileges (guild-mute bypass).
    #[serde(default)]
    pub staff: Vec<u64>,
}

/// One bridged game account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Account label used in logs.
    pub username: String,
    /// Address of the chat gateway sidecar speaking the game protocol.
    pub gateway: String,
    /// In-game guild this account belongs to.
    pub guild_id: Option<String>,
    pub guild_name: Option<String>,
    /// Discord channel ids per chat type.
    pub channels: ChannelsConfig,
}

/// Discord channel ids for each bridged chat type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsConfig {
    pub guild: Option<u64>,
    pub officer: Option<u64>,
    pub party: Option<u64>,
}

/// Tunable limits for the send/relay pipelines.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum chat lines one logical message may split into.
    #[serde(default = "default_max_parts")]
    pub max_parts: usize,
    /// Infractions before an automatic timed mute.
    #[serde(default = "default_auto_mute_threshold")]
    pub auto_mute_threshold: u32,
    /// Duration of an automatic mute, in minutes.
    #[serde(default = "default_auto_mute_minutes")]
    pub auto_mute_minutes: i64,
    /// Overall timeout for command-response collection, in milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Idle window that ends command-response collection, in milliseconds.
    #[serde(default = "default_command_idle_ms")]
    pub command_idle_ms: u64,
    /// Cooldown between feedback DMs for one (user, category), in hours.
    #[serde(default = "default_dm_cooldown_hours")]
    pub dm_cooldown_hours: i64,
    /// Whether allowlisted image attachments are passed through by URL.
    #[serde(default)]
    pub relay_images: bool,
    /// Largest attachment passed through, in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_parts: default_max_parts(),
            auto_mute_threshold: default_auto_mute_threshold(),
            auto_mute_minutes: default_auto_mute_minutes(),
            command_timeout_ms: default_command_timeout_ms(),
            command_idle_ms: default_command_idle_ms(),
            dm_cooldown_hours: default_dm_cooldown_hours(),
            relay_images: false,
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

/// Content filter patterns (hot-reloadable at runtime).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FiltersConfig {
    /// Regex patterns that block a message entirely.
    #[serde(default)]
    pub blocked: Vec<String>,
    /// Regex patterns for attachment URLs allowed through the relay.
    #[serde(default)]
    pub allowed_urls: Vec<String>,
}

/// Server-text heuristics that can change upstream without notice, so
/// they are configurable rather than hard-coded.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternsConfig {
    /// Response that aborts command collection.
    #[serde(default = "default_unknown_command")]
    pub unknown_command: String,
    /// Divider line delimiting paginated command output.
    #[serde(default = "default_pagination_divider")]
    pub pagination_divider: String,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            unknown_command: default_unknown_command(),
            pagination_divider: default_pagination_divider(),
        }
    }
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_max_parts() -> usize {
    5
}

fn default_auto_mute_threshold() -> u32 {
    3
}

fn default_auto_mute_minutes() -> i64 {
    30
}

fn default_command_timeout_ms() -> u64 {
    5000
}

fn default_command_idle_ms() -> u64 {
    500
}

fn default_dm_cooldown_hours() -> i64 {
    24
}

fn default_max_image_bytes() -> u64 {
    8 * 1024 * 1024
}

fn default_unknown_command() -> String {
    r"^Unknown command\b".to_string()
}

fn default_pagination_divider() -> String {
    r"^-{29,}$".to_string()
}
