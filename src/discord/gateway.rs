//! Serenity event handler gluing the Discord gateway to the bridges.
//!
//! The bridge pool is built lazily in `ready` because the resolver needs
//! the gateway cache and the bot's guild, neither of which exists before
//! the first connect. Reconnects reuse the pool.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serenity::all::{
    ChannelId, Command, CommandDataOption, CommandDataOptionValue, CommandOptionType, Context,
    EventHandler, GuildId, Interaction, Message, MessageId, MessageUpdateEvent, Ready,
};
use serenity::async_trait;
use tracing::{error, info, warn};

use crate::bridge::bridge::Bridge;
use crate::bridge::filter::FilterHolder;
use crate::bridge::manager::BridgeManager;
use crate::bridge::registry::CommandRegistry;
use crate::common::directory::{InMemoryDirectory, PlayerDirectory};
use crate::common::messages::{
    AttachmentInfo, InteractionEcho, RelayedAuthor, RelayedMessage, ReplyRef,
};
use crate::config::types::Config;
use crate::discord::content::ContentResolver;
use crate::discord::platform::{ChatPlatform, GuildResolver, SerenityPlatform};
use crate::game::connector::GatewayConnector;

pub struct GatewayHandler {
    config: Config,
    manager: OnceLock<Arc<BridgeManager>>,
}

impl GatewayHandler {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            manager: OnceLock::new(),
        }
    }

    /// Set once the first `ready` has built the bridge pool.
    pub fn manager(&self) -> Option<&Arc<BridgeManager>> {
        self.manager.get()
    }

    fn build_manager(&self, ctx: &Context, guild_id: u64) -> Arc<BridgeManager> {
        let platform = Arc::new(SerenityPlatform::new(ctx.http.clone()));
        let resolver = Arc::new(GuildResolver::new(ctx.cache.clone(), guild_id));
        let directory = Arc::new(InMemoryDirectory::new(
            self.config.discord.staff.iter().copied(),
        ));
        let filters = Arc::new(FilterHolder::new(self.config.filters.as_ref()));

        // Fetched once; the index drives /command reference rendering.
        let command_resolver = Arc::clone(&resolver);
        let http = ctx.http.clone();
        tokio::spawn(async move {
            match http.get_global_commands().await {
                Ok(commands) => command_resolver.set_commands(command_index(&commands)),
                Err(e) => warn!("Application commands not indexed: {}", e),
            }
        });

        let mut bridges = Vec::new();
        for (index, account) in self.config.accounts.iter().enumerate() {
            let connector = Arc::new(GatewayConnector::new(account.gateway.clone()));
            match Bridge::new(
                index,
                account.clone(),
                connector,
                Arc::clone(&platform) as Arc<dyn ChatPlatform>,
                Arc::clone(&directory) as Arc<dyn PlayerDirectory>,
                Arc::clone(&resolver) as Arc<dyn ContentResolver>,
                CommandRegistry::new(),
                Arc::clone(&filters),
                self.config.limits.clone(),
                &self.config.patterns,
                &self.config.discord.command_prefix,
                self.config.discord.ops_channel,
            ) {
                Ok(bridge) => bridges.push(bridge),
                Err(e) => error!(account = %account.username, "Bridge not started: {}", e),
            }
        }
        BridgeManager::new(bridges)
    }
}

#[async_trait]
impl EventHandler for GatewayHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Discord connected as {}", ready.user.name);
        if self.manager.get().is_some() {
            info!("Gateway session resumed, bridges already running");
            return;
        }

        let guild_id = self
            .config
            .discord
            .server
            .or_else(|| ready.guilds.first().map(|guild| guild.id.get()));
        let Some(guild_id) = guild_id else {
            error!("Bot is in no Discord server and none is configured");
            return;
        };

        let manager = self.build_manager(&ctx, guild_id);
        manager.start();
        info!(
            bridges = manager.bridges().len(),
            "Bridges started, connecting to game gateways"
        );
        let _ = self.manager.set(manager);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(manager) = self.manager.get() else {
            return;
        };
        if msg.author.id == ctx.cache.current_user().id {
            return;
        }
        manager.handle_discord_message(relayed_from(&msg)).await;
    }

    async fn message_update(
        &self,
        ctx: Context,
        _old: Option<Message>,
        new: Option<Message>,
        _event: MessageUpdateEvent,
    ) {
        let Some(manager) = self.manager.get() else {
            return;
        };
        // Without the full updated message there is nothing to relay.
        let Some(msg) = new else {
            return;
        };
        if msg.author.id == ctx.cache.current_user().id {
            return;
        }
        let mut relayed = relayed_from(&msg);
        relayed.edited = true;
        manager.handle_discord_message(relayed).await;
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        _channel_id: ChannelId,
        deleted_message_id: MessageId,
        _guild_id: Option<GuildId>,
    ) {
        if let Some(manager) = self.manager.get() {
            manager.handle_message_delete(deleted_message_id.get());
        }
    }

    async fn interaction_create(&self, _ctx: Context, interaction: Interaction) {
        let Some(manager) = self.manager.get() else {
            return;
        };
        if let Interaction::Command(command) = interaction {
            let mut path = vec![command.data.name.clone()];
            let mut options = Vec::new();
            flatten_options(&command.data.options, &mut path, &mut options);
            manager.track_interaction(
                command.id.get(),
                InteractionEcho {
                    command: path.join(" "),
                    options,
                },
            );
        }
    }
}

/// Reduce a gateway message to the platform-agnostic relay view.
fn relayed_from(msg: &Message) -> RelayedMessage {
    let display_name = msg
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .or_else(|| msg.author.global_name.clone())
        .unwrap_or_else(|| msg.author.name.clone());
    RelayedMessage {
        id: msg.id.get(),
        channel_id: msg.channel_id.get(),
        guild_id: msg.guild_id.map(|id| id.get()),
        author: RelayedAuthor {
            id: msg.author.id.get(),
            display_name,
            username: msg.author.name.clone(),
            avatar_url: msg.author.avatar_url(),
            bot: msg.author.bot,
        },
        content: msg.content.clone(),
        edited: msg.edited_timestamp.is_some(),
        attachments: msg
            .attachments
            .iter()
            .map(|attachment| AttachmentInfo {
                url: attachment.url.clone(),
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                size: u64::from(attachment.size),
            })
            .collect(),
        sticker_names: msg
            .sticker_items
            .iter()
            .map(|sticker| sticker.name.clone())
            .collect(),
        reply: msg.referenced_message.as_deref().map(|referenced| ReplyRef {
            author_id: referenced.author.id.get(),
            author_display: referenced
                .author
                .global_name
                .clone()
                .unwrap_or_else(|| referenced.author.name.clone()),
            content: referenced.content.clone(),
        }),
        interaction_id: msg.interaction.as_ref().map(|i| i.id.get()),
    }
}

/// Walk subcommand nesting, extending the command path and collecting
/// leaf options as display strings.
fn flatten_options(
    options: &[CommandDataOption],
    path: &mut Vec<String>,
    out: &mut Vec<(String, String)>,
) {
    for option in options {
        match &option.value {
            CommandDataOptionValue::SubCommand(nested)
            | CommandDataOptionValue::SubCommandGroup(nested) => {
                path.push(option.name.clone());
                flatten_options(nested, path, out);
            }
            value => {
                if let Some(rendered) = render_option(value) {
                    out.push((option.name.clone(), rendered));
                }
            }
        }
    }
}

fn render_option(value: &CommandDataOptionValue) -> Option<String> {
    match value {
        CommandDataOptionValue::String(s) => Some(s.clone()),
        CommandDataOptionValue::Integer(i) => Some(i.to_string()),
        CommandDataOptionValue::Number(n) => Some(n.to_string()),
        CommandDataOptionValue::Boolean(b) => Some(b.to_string()),
        CommandDataOptionValue::User(id) => Some(id.to_string()),
        CommandDataOptionValue::Role(id) => Some(id.to_string()),
        CommandDataOptionValue::Channel(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Index "name", "name sub" and "name group sub" paths to command ids.
fn command_index(commands: &[Command]) -> HashMap<String, u64> {
    let mut index = HashMap::new();
    for command in commands {
        let id = command.id.get();
        index.insert(command.name.clone(), id);
        for option in &command.options {
            match option.kind {
                CommandOptionType::SubCommand => {
                    index.insert(format!("{} {}", command.name, option.name), id);
                }
                CommandOptionType::SubCommandGroup => {
                    for sub in &option.options {
                        index.insert(
                            format!("{} {} {}", command.name, option.name, sub.name),
                            id,
                        );
                    }
                }
                _ => {}
            }
        }
    }
    index
}
