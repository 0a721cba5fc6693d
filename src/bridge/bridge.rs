//! One managed pairing of a game account with its Discord channels.

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::filter::FilterHolder;
use crate::bridge::registry::{CommandRegistry, HelpCommand, OnlineCommand};
use crate::common::directory::PlayerDirectory;
use crate::common::error::ChatError;
use crate::common::messages::{BridgeEvent, InteractionEcho, RelayedMessage};
use crate::common::types::{ChatKind, LinkedGuild, MessageKind};
use crate::config::types::{AccountConfig, LimitsConfig, PatternsConfig};
use crate::discord::content::ContentResolver;
use crate::discord::platform::ChatPlatform;
use crate::discord::relay::DiscordRelay;
use crate::game::chat_manager::GameChatManager;
use crate::game::message::GameMessage;
use crate::game::protocol::{ChatPosition, GameConnector};

pub struct Bridge {
    /// Account slot index; stable for the process lifetime.
    pub index: usize,
    account: AccountConfig,
    chat: Arc<GameChatManager>,
    relay: DiscordRelay,
    resolver: Arc<dyn ContentResolver>,
    registry: Arc<CommandRegistry>,
    platform: Arc<dyn ChatPlatform>,
    events: broadcast::Sender<BridgeEvent>,
    linked: RwLock<Option<LinkedGuild>>,
    ops_channel: Option<u64>,
    shutdown: CancellationToken,
}

impl Bridge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        account: AccountConfig,
        connector: Arc<dyn GameConnector>,
        platform: Arc<dyn ChatPlatform>,
        directory: Arc<dyn PlayerDirectory>,
        resolver: Arc<dyn ContentResolver>,
        mut registry: CommandRegistry,
        filters: Arc<FilterHolder>,
        limits: LimitsConfig,
        patterns: &PatternsConfig,
        command_prefix: &str,
        ops_channel: Option<u64>,
    ) -> Result<Arc<Self>, fancy_regex::Error> {
        let (events, _) = broadcast::channel(256);
        let chat = Arc::new(GameChatManager::new(
            Arc::clone(&connector),
            Arc::clone(&filters),
            limits.clone(),
            patterns,
            command_prefix,
            events.clone(),
        )?);
        registry.register(Arc::new(OnlineCommand::new(
            Arc::clone(&chat),
            limits.clone(),
        )?));
        let mut entries = registry.usages();
        entries.push("help".to_string());
        entries.sort();
        registry.register(Arc::new(HelpCommand::new(entries)));

        let guild_name = account
            .guild_name
            .clone()
            .unwrap_or_else(|| account.username.clone());
        let relay = DiscordRelay::new(
            &account.channels,
            guild_name,
            Arc::clone(&platform),
            directory,
            filters,
            limits,
            Arc::clone(&chat),
        );
        Ok(Arc::new(Self {
            index,
            account,
            chat,
            relay,
            resolver,
            registry: Arc::new(registry),
            platform,
            events,
            linked: RwLock::new(None),
            ops_channel,
            shutdown: CancellationToken::new(),
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub fn owns_channel(&self, channel_id: u64) -> bool {
        self.relay.relay_for_channel(channel_id).is_some()
    }

    pub async fn is_linked(&self) -> bool {
        self.linked.read().await.is_some()
    }

    /// Start the game connection and the event loop.
    pub fn start(self: &Arc<Self>) {
        self.chat.connect();
        let bridge = Arc::clone(self);
        tokio::spawn(async move { bridge.event_loop().await });
    }

    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.chat.disconnect().await;
        self.relay.set_unready();
    }

    async fn event_loop(self: Arc<Self>) {
        let mut events = self.events.subscribe();
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = self.shutdown.cancelled() => return,
            };
            match event {
                Ok(BridgeEvent::Ready) => self.link().await,
                Ok(BridgeEvent::Disconnected { .. }) => self.unlink().await,
                Ok(BridgeEvent::Errored { reason }) => {
                    self.report_ops(&format!(
                        "[{}] game connection failed terminally: {}",
                        self.account.username, reason
                    ))
                    .await;
                    return;
                }
                Ok(BridgeEvent::Message(message)) => self.handle_game_message(&message).await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(bridge = self.index, "Dropped {} bridge events under load", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Bring the Discord side up once the game side has spawned.
    async fn link(&self) {
        match self.relay.init().await {
            Ok(()) => {
                let guild = LinkedGuild {
                    id: self.account.guild_id.clone().unwrap_or_default(),
                    name: self
                        .account
                        .guild_name
                        .clone()
                        .unwrap_or_else(|| self.account.username.clone()),
                };
                info!(bridge = self.index, guild = %guild.name, "Bridge linked");
                *self.linked.write().await = Some(guild.clone());
                let _ = self.events.send(BridgeEvent::Linked(guild));
            }
            Err(e) if e.fatal_to_linking() => {
                error!(bridge = self.index, "Linking failed: {}", e);
                self.report_ops(&format!(
                    "[{}] cannot link channels: {}",
                    self.account.username, e
                ))
                .await;
            }
            Err(e) => warn!(bridge = self.index, "Linking deferred: {}", e),
        }
    }

    async fn unlink(&self) {
        if self.linked.write().await.take().is_some() {
            info!(bridge = self.index, "Bridge unlinked");
        }
        self.relay.set_unready();
    }

    async fn handle_game_message(&self, message: &Arc<GameMessage>) {
        if message.spam || message.position == ChatPosition::ActionBar {
            return;
        }
        // The bridge's own lines are either relays of Discord messages
        // (already visible there) or command replies; echoing them back
        // would double-post.
        if let Some(identity) = self.chat.identity().await {
            if message.from_self(&identity) {
                return;
            }
        }

        self.relay
            .forward_to_discord(message, self.resolver.as_ref())
            .await;

        if let Some(parsed) = &message.command {
            let Some(command) = self.registry.lookup(&parsed.name) else {
                debug!(name = %parsed.name, "Unregistered command ignored");
                return;
            };
            if let Some(reply) = command.run(message, &parsed.args).await {
                self.reply(message, &reply).await;
            }
        }
    }

    /// Answer on the surface the message arrived on. Guild and officer
    /// replies also land in their Discord channel; if the game-side
    /// send fails, the author gets a whisper instead.
    pub async fn reply(&self, message: &GameMessage, text: &str) {
        match message.kind {
            MessageKind::Guild | MessageKind::Officer => {
                let kind = match message.kind {
                    MessageKind::Guild => ChatKind::Guild,
                    _ => ChatKind::Officer,
                };
                if let Some(relay) = self.relay.relay_for(kind) {
                    if let Err(e) = relay.send_via_bot(text).await {
                        warn!("Reply not mirrored to Discord: {}", e);
                    }
                }
                let sent = match kind {
                    ChatKind::Guild => self.chat.guild_chat(text).await,
                    _ => self.chat.officer_chat(text).await,
                };
                if let Err(e) = sent {
                    self.whisper_fallback(message, text, e).await;
                }
            }
            MessageKind::Party => {
                if let Err(e) = self.chat.party_chat(text).await {
                    self.whisper_fallback(message, text, e).await;
                }
            }
            MessageKind::Whisper => {
                if let Some(author) = &message.author {
                    if let Err(e) = self.chat.whisper(&author.ign, text).await {
                        debug!("Whisper reply failed: {}", e);
                    }
                }
            }
            MessageKind::System => {
                error!("reply() called on a system message");
            }
        }
    }

    async fn whisper_fallback(&self, message: &GameMessage, text: &str, cause: ChatError) {
        debug!("Broadcast reply failed ({}), falling back to whisper", cause);
        if let Some(author) = &message.author {
            if let Err(e) = self.chat.whisper(&author.ign, text).await {
                debug!("Whisper fallback failed too: {}", e);
            }
        }
    }

    /// Relay one Discord message into the game.
    pub async fn handle_discord_message(
        &self,
        message: &RelayedMessage,
        echo: Option<InteractionEcho>,
        cancel: CancellationToken,
    ) {
        let Some(relay) = self.relay.relay_for_channel(message.channel_id) else {
            return;
        };
        relay.forward_to_game(message, echo, cancel).await;
    }

    async fn report_ops(&self, text: &str) {
        let Some(channel) = self.ops_channel else {
            return;
        };
        if let Err(e) = self.platform.send_message(channel, text).await {
            error!("Ops report not delivered: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::registry::GameCommand;
    use crate::common::directory::InMemoryDirectory;
    use crate::common::messages::RelayedAuthor;
    use crate::config::types::ChannelsConfig;
    use crate::testutil::{MockPlatform, ScriptedConnection, ScriptedConnector};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NullResolver;

    impl ContentResolver for NullResolver {
        fn user_by_name(&self, _: &str) -> Option<u64> {
            None
        }
        fn role_by_name(&self, _: &str) -> Option<u64> {
            None
        }
        fn channel_by_name(&self, _: &str) -> Option<u64> {
            None
        }
        fn emoji_by_name(&self, _: &str) -> Option<crate::discord::content::CustomEmoji> {
            None
        }
        fn emoji_names(&self) -> Vec<String> {
            Vec::new()
        }
        fn command_id(&self, _: &[&str]) -> Option<u64> {
            None
        }
    }

    struct PingCommand;

    #[async_trait]
    impl GameCommand for PingCommand {
        fn name(&self) -> &str {
            "ping"
        }
        async fn run(&self, _message: &GameMessage, _args: &[String]) -> Option<String> {
            Some("pong".to_string())
        }
    }

    fn account() -> AccountConfig {
        AccountConfig {
            username: "Bot".to_string(),
            gateway: "localhost:25560".to_string(),
            guild_id: Some("g-1".to_string()),
            guild_name: Some("The Bridge".to_string()),
            channels: ChannelsConfig {
                guild: Some(100),
                officer: None,
                party: None,
            },
        }
    }

    struct Fixture {
        bridge: Arc<Bridge>,
        platform: Arc<MockPlatform>,
        conn: Arc<ScriptedConnection>,
    }

    async fn fixture() -> Fixture {
        let conn = Arc::new(ScriptedConnection::new().echo_guild_sends());
        let platform = Arc::new(MockPlatform::new());
        let mut registry = CommandRegistry::new();
        registry.register(Arc::new(PingCommand));

        let bridge = Bridge::new(
            0,
            account(),
            Arc::new(ScriptedConnector::new(Arc::clone(&conn))),
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
            Arc::new(InMemoryDirectory::new([])),
            Arc::new(NullResolver),
            registry,
            Arc::new(FilterHolder::new(None)),
            LimitsConfig::default(),
            &PatternsConfig::default(),
            "!",
            Some(777),
        )
        .unwrap();
        bridge.start();
        conn.spawn_bot("BridgeBot", "bot-uuid").await;
        let mut events = bridge.subscribe();
        loop {
            match events.recv().await.unwrap() {
                BridgeEvent::Linked(guild) => {
                    assert_eq!(guild.name, "The Bridge");
                    break;
                }
                _ => continue,
            }
        }
        Fixture {
            bridge,
            platform,
            conn,
        }
    }

    #[tokio::test]
    async fn test_links_after_spawn() {
        let f = fixture().await;
        assert!(f.bridge.is_linked().await);
        assert_eq!(f.platform.created_webhooks(), 1);
        assert!(f.bridge.owns_channel(100));
        assert!(!f.bridge.owns_channel(200));
    }

    #[tokio::test]
    async fn test_inbound_guild_chat_hits_webhook() {
        let f = fixture().await;
        f.conn.push_chat("Guild > Steve: hello from the game").await;

        // The relay send happens on the event loop task.
        for _ in 0..100 {
            if !f.platform.executed().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let executed = f.platform.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].username, "Steve");
        assert_eq!(executed[0].content, "hello from the game");
    }

    #[tokio::test]
    async fn test_own_relayed_lines_not_echoed_back() {
        let f = fixture().await;
        f.conn.push_chat("Guild > BridgeBot: Steve: from discord").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.platform.executed().is_empty());
    }

    #[tokio::test]
    async fn test_game_command_replies_in_kind() {
        let f = fixture().await;
        f.conn.push_chat("Guild > Steve: !ping").await;

        for _ in 0..500 {
            if f.conn.written().iter().any(|line| line == "/gc pong") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(f.conn.written().iter().any(|line| line == "/gc pong"));
        // Mirrored to the Discord channel under the bot identity.
        assert!(f
            .platform
            .bot_sends()
            .iter()
            .any(|(channel, text)| *channel == 100 && text == "pong"));
    }

    #[tokio::test]
    async fn test_online_command_relays_roster() {
        let conn = Arc::new(
            ScriptedConnection::new()
                .echo_guild_sends()
                .respond_to_command(vec![
                    "-----------------------------------".to_string(),
                    "Online Members: Steve, Alex".to_string(),
                    "-----------------------------------".to_string(),
                ]),
        );
        let platform = Arc::new(MockPlatform::new());
        let bridge = Bridge::new(
            0,
            account(),
            Arc::new(ScriptedConnector::new(Arc::clone(&conn))),
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
            Arc::new(InMemoryDirectory::new([])),
            Arc::new(NullResolver),
            CommandRegistry::new(),
            Arc::new(FilterHolder::new(None)),
            LimitsConfig::default(),
            &PatternsConfig::default(),
            "!",
            None,
        )
        .unwrap();
        bridge.start();
        conn.spawn_bot("BridgeBot", "bot-uuid").await;
        let mut events = bridge.subscribe();
        loop {
            if let BridgeEvent::Linked(_) = events.recv().await.unwrap() {
                break;
            }
        }

        conn.push_chat("Guild > Steve: !online").await;

        let reply = "/gc Online Members: Steve, Alex";
        for _ in 0..1000 {
            if conn.written().iter().any(|line| line == reply) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let written = conn.written();
        assert!(written.iter().any(|line| line == "/g online"));
        assert!(written.iter().any(|line| line == reply));
    }

    #[tokio::test]
    async fn test_discord_message_forwarded_to_game() {
        let f = fixture().await;
        let message = RelayedMessage::new(
            1,
            100,
            RelayedAuthor {
                id: 42,
                display_name: "Steve".to_string(),
                username: "steve".to_string(),
                avatar_url: None,
                bot: false,
            },
            "over the bridge",
        );
        f.bridge
            .handle_discord_message(&message, None, CancellationToken::new())
            .await;
        assert_eq!(f.conn.written(), vec!["/gc Steve: over the bridge"]);
    }

    #[tokio::test]
    async fn test_fatal_link_failure_reports_ops() {
        let conn = Arc::new(ScriptedConnection::new());
        let platform = Arc::new(MockPlatform::new());
        for i in 0..crate::discord::platform::WEBHOOK_QUOTA {
            platform.seed_webhook(100, &format!("other-{}", i));
        }
        let bridge = Bridge::new(
            0,
            account(),
            Arc::new(ScriptedConnector::new(Arc::clone(&conn))),
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
            Arc::new(InMemoryDirectory::new([])),
            Arc::new(NullResolver),
            CommandRegistry::new(),
            Arc::new(FilterHolder::new(None)),
            LimitsConfig::default(),
            &PatternsConfig::default(),
            "!",
            Some(777),
        )
        .unwrap();
        bridge.start();
        conn.spawn_bot("BridgeBot", "bot-uuid").await;

        for _ in 0..200 {
            if !platform.bot_sends().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let sends = platform.bot_sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, 777);
        assert!(sends[0].1.contains("cannot link"));
        assert!(!bridge.is_linked().await);
    }
}
