//! The chat-platform seam and its serenity-backed implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serenity::all::{
    ChannelId, CreateWebhook, ExecuteWebhook, GuildId, MessageId, ReactionType, UserId, WebhookId,
};
use serenity::cache::Cache;
use serenity::http::{Http, HttpError};
use secrecy::ExposeSecret;

use crate::common::error::RelayError;
use crate::common::messages::WebhookPayload;
use crate::discord::content::{ContentResolver, CustomEmoji};

/// Discord allows this many webhooks per channel.
pub const WEBHOOK_QUOTA: usize = 15;

/// A usable incoming webhook.
#[derive(Debug, Clone)]
pub struct WebhookInfo {
    pub id: u64,
    pub token: String,
    pub name: String,
}

/// Everything the relays need from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn channel_webhooks(&self, channel_id: u64) -> Result<Vec<WebhookInfo>, RelayError>;

    async fn create_webhook(&self, channel_id: u64, name: &str)
        -> Result<WebhookInfo, RelayError>;

    /// Send impersonating the payload's username/avatar.
    async fn execute_webhook(
        &self,
        webhook: &WebhookInfo,
        payload: &WebhookPayload,
    ) -> Result<(), RelayError>;

    /// Send under the bot's own identity.
    async fn send_message(&self, channel_id: u64, content: &str) -> Result<(), RelayError>;

    async fn react(&self, channel_id: u64, message_id: u64, emoji: char)
        -> Result<(), RelayError>;

    async fn dm_user(&self, user_id: u64, content: &str) -> Result<(), RelayError>;
}

pub struct SerenityPlatform {
    http: Arc<Http>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn status_of(error: &serenity::Error) -> Option<u16> {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = error {
        Some(response.status_code.as_u16())
    } else {
        None
    }
}

fn classify_channel(error: serenity::Error, channel_id: u64) -> RelayError {
    match status_of(&error) {
        Some(403) => RelayError::MissingPermission("MANAGE_WEBHOOKS".to_string()),
        Some(404) => RelayError::ChannelNotFound(channel_id),
        _ => RelayError::Discord(error),
    }
}

fn classify_webhook(error: serenity::Error) -> RelayError {
    match status_of(&error) {
        Some(404) => RelayError::WebhookDeleted,
        Some(403) => RelayError::MissingPermission("SEND_MESSAGES".to_string()),
        _ => RelayError::Discord(error),
    }
}

#[async_trait]
impl ChatPlatform for SerenityPlatform {
    async fn channel_webhooks(&self, channel_id: u64) -> Result<Vec<WebhookInfo>, RelayError> {
        let webhooks = ChannelId::new(channel_id)
            .webhooks(&*self.http)
            .await
            .map_err(|e| classify_channel(e, channel_id))?;
        Ok(webhooks
            .into_iter()
            .filter_map(|webhook| {
                let token = webhook.token?;
                Some(WebhookInfo {
                    id: webhook.id.get(),
                    token: token.expose_secret().clone(),
                    name: webhook.name.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn create_webhook(
        &self,
        channel_id: u64,
        name: &str,
    ) -> Result<WebhookInfo, RelayError> {
        let webhook = ChannelId::new(channel_id)
            .create_webhook(&*self.http, CreateWebhook::new(name))
            .await
            .map_err(|e| classify_channel(e, channel_id))?;
        let token = webhook
            .token
            .ok_or_else(|| RelayError::Http("created webhook carries no token".to_string()))?;
        Ok(WebhookInfo {
            id: webhook.id.get(),
            token: token.expose_secret().clone(),
            name: webhook.name.unwrap_or_default(),
        })
    }

    async fn execute_webhook(
        &self,
        webhook: &WebhookInfo,
        payload: &WebhookPayload,
    ) -> Result<(), RelayError> {
        let mut builder = ExecuteWebhook::new()
            .content(&payload.content)
            .username(&payload.username);
        if let Some(avatar_url) = &payload.avatar_url {
            builder = builder.avatar_url(avatar_url);
        }
        self.http
            .execute_webhook(
                WebhookId::new(webhook.id),
                None,
                &webhook.token,
                false,
                Vec::new(),
                &builder,
            )
            .await
            .map_err(classify_webhook)?;
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, content: &str) -> Result<(), RelayError> {
        ChannelId::new(channel_id)
            .say(&*self.http, content)
            .await
            .map_err(|e| classify_channel(e, channel_id))?;
        Ok(())
    }

    async fn react(
        &self,
        channel_id: u64,
        message_id: u64,
        emoji: char,
    ) -> Result<(), RelayError> {
        self.http
            .create_reaction(
                ChannelId::new(channel_id),
                MessageId::new(message_id),
                &ReactionType::Unicode(emoji.to_string()),
            )
            .await
            .map_err(|e| classify_channel(e, channel_id))?;
        Ok(())
    }

    async fn dm_user(&self, user_id: u64, content: &str) -> Result<(), RelayError> {
        let channel = UserId::new(user_id)
            .create_dm_channel(&*self.http)
            .await
            .map_err(RelayError::Discord)?;
        channel
            .id
            .say(&*self.http, content)
            .await
            .map_err(RelayError::Discord)?;
        Ok(())
    }
}

/// Name lookups against one guild's cached state plus the registered
/// command index.
pub struct GuildResolver {
    cache: Arc<Cache>,
    guild_id: GuildId,
    commands: RwLock<HashMap<String, u64>>,
}

impl GuildResolver {
    pub fn new(cache: Arc<Cache>, guild_id: u64) -> Self {
        Self {
            cache,
            guild_id: GuildId::new(guild_id),
            commands: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the command-reference index ("name sub" path -> id).
    pub fn set_commands(&self, commands: HashMap<String, u64>) {
        if let Ok(mut current) = self.commands.write() {
            *current = commands;
        }
    }
}

impl ContentResolver for GuildResolver {
    fn user_by_name(&self, name: &str) -> Option<u64> {
        let guild = self.cache.guild(self.guild_id)?;
        guild
            .members
            .values()
            .find(|member| {
                member.user.name.eq_ignore_ascii_case(name)
                    || member
                        .nick
                        .as_deref()
                        .is_some_and(|nick| nick.eq_ignore_ascii_case(name))
            })
            .map(|member| member.user.id.get())
    }

    fn role_by_name(&self, name: &str) -> Option<u64> {
        let guild = self.cache.guild(self.guild_id)?;
        guild
            .roles
            .values()
            .find(|role| role.name.eq_ignore_ascii_case(name))
            .map(|role| role.id.get())
    }

    fn channel_by_name(&self, name: &str) -> Option<u64> {
        let guild = self.cache.guild(self.guild_id)?;
        guild
            .channels
            .values()
            .find(|channel| channel.name.eq_ignore_ascii_case(name))
            .map(|channel| channel.id.get())
    }

    fn emoji_by_name(&self, name: &str) -> Option<CustomEmoji> {
        let guild = self.cache.guild(self.guild_id)?;
        guild
            .emojis
            .values()
            .find(|emoji| emoji.name == name)
            .map(|emoji| CustomEmoji {
                id: emoji.id.get(),
                name: emoji.name.clone(),
                animated: emoji.animated,
            })
    }

    fn emoji_names(&self) -> Vec<String> {
        match self.cache.guild(self.guild_id) {
            Some(guild) => guild.emojis.values().map(|emoji| emoji.name.clone()).collect(),
            None => Vec::new(),
        }
    }

    fn command_id(&self, path: &[&str]) -> Option<u64> {
        self.commands
            .read()
            .ok()
            .and_then(|commands| commands.get(&path.join(" ")).copied())
    }
}
