//! One Discord channel bound to one game chat type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bridge::filter::FilterHolder;
use crate::common::directory::{auto_mute_expiry, PlayerDirectory};
use crate::common::error::{ChatError, RelayError, SendRejection};
use crate::common::messages::{
    AttachmentInfo, InteractionEcho, RelayedMessage, WebhookPayload,
};
use crate::common::types::ChatKind;
use crate::config::types::LimitsConfig;
use crate::discord::content::{parse_content, ContentResolver};
use crate::discord::markdown::escape_for_discord;
use crate::discord::platform::{ChatPlatform, WebhookInfo, WEBHOOK_QUOTA};
use crate::game::chat_manager::{ChatOptions, GameChatManager};
use crate::game::message::GameMessage;

/// Name stamped on webhooks this bridge owns.
pub const WEBHOOK_NAME: &str = "Bridgekeeper";

const REJECTED_REACTION: char = '\u{1F6AB}'; // 🚫
const PLACEHOLDER_NAME: &str = "Player";

pub struct ChannelRelay {
    kind: ChatKind,
    channel_id: u64,
    guild_name: String,
    platform: Arc<dyn ChatPlatform>,
    directory: Arc<dyn PlayerDirectory>,
    filters: Arc<FilterHolder>,
    limits: LimitsConfig,
    chat: Arc<GameChatManager>,
    /// Memoized webhook; the lock doubles as the fetch-or-create fence.
    webhook: Mutex<Option<WebhookInfo>>,
    /// Per-channel outbound FIFO.
    outbound: Mutex<()>,
    ready: AtomicBool,
    /// (discord user, rejection category) -> when we last DM'd them.
    dm_sent: DashMap<(u64, &'static str), chrono::DateTime<Utc>>,
}

impl ChannelRelay {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: ChatKind,
        channel_id: u64,
        guild_name: String,
        platform: Arc<dyn ChatPlatform>,
        directory: Arc<dyn PlayerDirectory>,
        filters: Arc<FilterHolder>,
        limits: LimitsConfig,
        chat: Arc<GameChatManager>,
    ) -> Self {
        Self {
            kind,
            channel_id,
            guild_name,
            platform,
            directory,
            filters,
            limits,
            chat,
            webhook: Mutex::new(None),
            outbound: Mutex::new(()),
            ready: AtomicBool::new(false),
            dm_sent: DashMap::new(),
        }
    }

    pub fn kind(&self) -> ChatKind {
        self.kind
    }

    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_unready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Idempotent: ensures the channel webhook exists and marks the
    /// relay ready.
    pub async fn init(&self) -> Result<(), RelayError> {
        self.ensure_webhook().await?;
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn ensure_webhook(&self) -> Result<WebhookInfo, RelayError> {
        let mut slot = self.webhook.lock().await;
        if let Some(webhook) = slot.as_ref() {
            return Ok(webhook.clone());
        }
        let existing = self.platform.channel_webhooks(self.channel_id).await?;
        let webhook = match existing.iter().find(|w| w.name == WEBHOOK_NAME) {
            Some(webhook) => webhook.clone(),
            None if existing.len() >= WEBHOOK_QUOTA => {
                return Err(RelayError::WebhookQuotaExceeded {
                    channel_id: self.channel_id,
                    limit: WEBHOOK_QUOTA,
                });
            }
            None => {
                self.platform
                    .create_webhook(self.channel_id, WEBHOOK_NAME)
                    .await?
            }
        };
        *slot = Some(webhook.clone());
        Ok(webhook)
    }

    /// Send impersonating a player. An externally deleted webhook is
    /// recreated once and the payload resent; the caller never sees
    /// the deletion.
    pub async fn send_via_webhook(&self, payload: &WebhookPayload) -> Result<(), RelayError> {
        let _fifo = self.outbound.lock().await;
        let webhook = self.ensure_webhook().await?;
        match self.platform.execute_webhook(&webhook, payload).await {
            Err(RelayError::WebhookDeleted) => {
                debug!(channel = self.channel_id, "Webhook gone, recreating");
                *self.webhook.lock().await = None;
                let webhook = self.ensure_webhook().await?;
                self.platform.execute_webhook(&webhook, payload).await
            }
            other => other,
        }
    }

    /// Send under the bot's own identity.
    pub async fn send_via_bot(&self, content: &str) -> Result<(), RelayError> {
        let _fifo = self.outbound.lock().await;
        self.platform.send_message(self.channel_id, content).await
    }

    /// Relay one inbound game message into this channel.
    pub async fn forward_to_discord(
        &self,
        message: &GameMessage,
        resolver: &dyn ContentResolver,
    ) -> Result<(), RelayError> {
        let Some(author) = &message.author else {
            let content = escape_for_discord(&message.cleaned_content);
            return self.send_via_bot(&content).await;
        };

        let avatar = match &author.uuid {
            Some(uuid) => format!("https://mc-heads.net/avatar/{}", uuid),
            None => format!("https://mc-heads.net/avatar/{}", author.ign),
        };
        let content = parse_content(&message.body, resolver);
        let unresolved = content
            .split_whitespace()
            .find(|token| token.len() > 1 && token.starts_with('@') && !token.starts_with("<@"))
            .map(str::to_string);
        let payload = WebhookPayload {
            content,
            username: author.ign.clone(),
            avatar_url: Some(avatar),
        };
        self.send_via_webhook(&payload).await?;

        // A webhook cannot ping a name the bridge could not resolve;
        // tell the sender instead of failing silently.
        if let Some(token) = unresolved {
            let notice = format!("{} did not ping anyone on Discord", token);
            if let Err(e) = self.chat.whisper(&author.ign, &notice).await {
                debug!("Mention warning not delivered: {}", e);
            }
        }
        Ok(())
    }

    /// Relay one Discord message into the game. Every rejection leaves
    /// exactly one reaction and at most one cooldown-limited DM.
    pub async fn forward_to_game(
        &self,
        message: &RelayedMessage,
        echo: Option<InteractionEcho>,
        cancel: CancellationToken,
    ) {
        if let Err(rejection) = self.gate(message).await {
            self.reject(message, rejection).await;
            return;
        }

        let content = self.assemble_content(message);
        if let Some(echo) = echo {
            // Show watchers in-game what command produced the output.
            let options = ChatOptions::new(self.kind).with_cancel(cancel.clone());
            if let Err(e) = self.chat.chat(&echo.render(), options).await {
                debug!("Interaction echo not sent: {}", e);
            }
        }

        let display = self.display_name(message).await;
        let line = format!("{}: {}", display, content);
        let options = ChatOptions::new(self.kind).with_cancel(cancel);
        match self.chat.chat(&line, options).await {
            Ok(()) => {}
            Err(ChatError::Cancelled) => {
                debug!("Source message deleted before send");
            }
            Err(ChatError::Rejected(rejection)) => self.reject(message, rejection).await,
            Err(ChatError::ServerBlocked) => self.escalate_infraction(message).await,
            Err(e) => {
                warn!(kind = self.kind.as_str(), "Forward to game failed: {}", e);
                self.react_once(message).await;
            }
        }
    }

    /// Mute and permission gates, in escalating scope.
    async fn gate(&self, message: &RelayedMessage) -> Result<(), SendRejection> {
        let author = message.author.id;

        if let Some(player) = self.directory.player_for_discord(author).await {
            if let Some(mute) = self.directory.mute_state(&player.uuid).await {
                return Err(SendRejection::PlayerMuted { until: mute.until });
            }
        }
        if let Some(mute) = self.directory.auto_mute_state(author).await {
            return Err(SendRejection::AutoMuted { until: mute.until });
        }
        if let Some(mute) = self.directory.guild_mute_state(&self.guild_name).await {
            if !self.directory.is_staff(author).await {
                return Err(SendRejection::GuildMuted { until: mute.until });
            }
        }
        if let Some(mute) = self.directory.bot_mute_state().await {
            return Err(SendRejection::BotMuted { until: mute.until });
        }
        Ok(())
    }

    fn assemble_content(&self, message: &RelayedMessage) -> String {
        let mut content = message.content.clone();
        if message.edited && !content.is_empty() {
            content.push_str(" (edited)");
        }
        for sticker in &message.sticker_names {
            push_part(&mut content, &format!("[sticker: {}]", sticker));
        }
        for attachment in &message.attachments {
            push_part(&mut content, &self.describe_attachment(attachment));
        }
        if let Some(reply) = &message.reply {
            let token = format!("@{}", reply.author_display);
            if !content.contains(&token) {
                content = format!("{} {}", token, content);
            }
        }
        content
    }

    /// Image URLs pass through when uploads are enabled, the mime and
    /// size check out, and the host is allowlisted; everything else
    /// becomes a bracketed placeholder.
    fn describe_attachment(&self, attachment: &AttachmentInfo) -> String {
        let is_image = attachment
            .content_type
            .as_deref()
            .is_some_and(|mime| mime.starts_with("image/"));
        if is_image
            && self.limits.relay_images
            && attachment.size <= self.limits.max_image_bytes
            && self.filters.url_allowed(&attachment.url)
        {
            attachment.url.clone()
        } else if is_image {
            format!("[image: {}]", attachment.filename)
        } else {
            format!("[attachment: {}]", attachment.filename)
        }
    }

    async fn display_name(&self, message: &RelayedMessage) -> String {
        let name = match self.directory.player_for_discord(message.author.id).await {
            Some(player) => player.ign,
            None => message.author.display_name.clone(),
        };
        if self.filters.is_blocked(&name) {
            PLACEHOLDER_NAME.to_string()
        } else {
            name
        }
    }

    async fn reject(&self, message: &RelayedMessage, rejection: SendRejection) {
        self.react_once(message).await;
        let category = rejection_category(&rejection);
        self.dm_once(message.author.id, category, &rejection.to_string())
            .await;
    }

    /// A server-side content rejection counts toward the auto-mute
    /// threshold.
    async fn escalate_infraction(&self, message: &RelayedMessage) {
        let author = message.author.id;
        let count = self.directory.record_infraction(author).await;
        if count >= self.limits.auto_mute_threshold {
            let until = auto_mute_expiry(self.limits.auto_mute_minutes);
            self.directory.set_auto_mute(author, until).await;
            warn!(user = author, count, "Auto-muted after repeated blocked content");
        }
        self.react_once(message).await;
        self.dm_once(
            author,
            "server-blocked",
            "The server rejected your message for its content.",
        )
        .await;
    }

    async fn react_once(&self, message: &RelayedMessage) {
        if let Err(e) = self
            .platform
            .react(message.channel_id, message.id, REJECTED_REACTION)
            .await
        {
            error!("Failed to react to rejected message: {}", e);
        }
    }

    /// One DM per (user, category) per cooldown window.
    async fn dm_once(&self, user_id: u64, category: &'static str, text: &str) {
        let cooldown = ChronoDuration::hours(self.limits.dm_cooldown_hours);
        let now = Utc::now();
        let key = (user_id, category);
        if let Some(last) = self.dm_sent.get(&key) {
            if now - *last < cooldown {
                return;
            }
        }
        self.dm_sent.insert(key, now);
        if let Err(e) = self.platform.dm_user(user_id, text).await {
            debug!("Rejection DM not delivered: {}", e);
        }
    }
}

fn push_part(content: &mut String, part: &str) {
    if !content.is_empty() {
        content.push(' ');
    }
    content.push_str(part);
}

fn rejection_category(rejection: &SendRejection) -> &'static str {
    match rejection {
        SendRejection::LocalBlocked => "local-blocked",
        SendRejection::MessageCount { .. } => "message-count",
        SendRejection::Empty => "empty",
        SendRejection::PlayerMuted { .. } => "player-muted",
        SendRejection::AutoMuted { .. } => "auto-muted",
        SendRejection::GuildMuted { .. } => "guild-muted",
        SendRejection::BotMuted { .. } => "bot-muted",
    }
}
