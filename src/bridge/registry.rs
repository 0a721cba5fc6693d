//! In-game chat command registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fancy_regex::Regex;
use tracing::debug;

use crate::common::error::CommandError;
use crate::config::types::LimitsConfig;
use crate::game::chat_manager::{CommandOptions, GameChatManager};
use crate::game::message::GameMessage;

/// One chat command invokable from in-game chat.
#[async_trait]
pub trait GameCommand: Send + Sync {
    fn name(&self) -> &str;

    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Short usage line shown by `help`.
    fn usage(&self) -> &str {
        ""
    }

    /// Run the command; the returned text is replied on the same chat
    /// the invocation arrived on.
    async fn run(&self, message: &GameMessage, args: &[String]) -> Option<String>;
}

/// Case-insensitive name and alias lookup.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn GameCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Arc<dyn GameCommand>) {
        for alias in command.aliases() {
            self.commands
                .insert(alias.to_lowercase(), Arc::clone(&command));
        }
        self.commands
            .insert(command.name().to_lowercase(), command);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn GameCommand>> {
        self.commands.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .values()
            .map(|command| command.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// One `help` line per command: its usage, or its bare name when
    /// the command declares none.
    pub fn usages(&self) -> Vec<String> {
        let mut entries: Vec<String> = self
            .commands
            .values()
            .map(|command| {
                if command.usage().is_empty() {
                    command.name().to_string()
                } else {
                    command.usage().to_string()
                }
            })
            .collect();
        entries.sort();
        entries.dedup();
        entries
    }
}

/// Lists registered commands.
pub struct HelpCommand {
    entries: Vec<String>,
}

impl HelpCommand {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl GameCommand for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn aliases(&self) -> &[&str] {
        &["commands"]
    }

    fn usage(&self) -> &str {
        "help"
    }

    async fn run(&self, _message: &GameMessage, _args: &[String]) -> Option<String> {
        Some(format!("Commands: {}", self.entries.join(", ")))
    }
}

/// Runs the game's guild roster command and relays its output.
pub struct OnlineCommand {
    chat: Arc<GameChatManager>,
    limits: LimitsConfig,
    not_in_guild: Regex,
    /// Keeps the member-list lines, drops the banner around them.
    roster_line: Regex,
}

impl OnlineCommand {
    pub fn new(
        chat: Arc<GameChatManager>,
        limits: LimitsConfig,
    ) -> Result<Self, fancy_regex::Error> {
        Ok(Self {
            chat,
            limits,
            not_in_guild: Regex::new(r"^You are not in a guild")?,
            roster_line: Regex::new(r"Members|\x{25CF}")?,
        })
    }
}

#[async_trait]
impl GameCommand for OnlineCommand {
    fn name(&self) -> &str {
        "online"
    }

    fn aliases(&self) -> &[&str] {
        &["o"]
    }

    fn usage(&self) -> &str {
        "online (alias: o)"
    }

    async fn run(&self, _message: &GameMessage, _args: &[String]) -> Option<String> {
        let options = CommandOptions::from_limits(&self.limits)
            .with_response(self.roster_line.clone())
            .with_abort(self.not_in_guild.clone());
        match self.chat.command("/g online", options).await {
            Ok(reply) => Some(reply.text),
            Err(CommandError::Timeout) => Some("No response from the server.".to_string()),
            Err(e) => {
                debug!("Roster lookup failed: {}", e);
                None
            }
        }
    }
}
