//! Parsing one inbound chat line into a structured message.

use fancy_regex::Regex;

use crate::common::types::{BotIdentity, MessageKind};
use crate::game::dedup::strip_invisible;
use crate::game::protocol::ChatPosition;

const CHAT_SHAPE: &str = r"^(?:(?<channel>Guild|Officer|Party) > |(?<direction>From|To) )(?:\[(?<rank>[^\]]+)\] )?(?<ign>\w{1,16})(?: \[(?<guild_rank>[^\]]+)\])?: (?<body>.*)$";

/// Server notices that mean a just-sent line was suppressed or rejected,
/// not real chat.
const SPAM_SHAPE: &str = r"^(?:You cannot say the same message twice!|You are sending commands too fast! Slow down\.|You cannot chat that fast!)";

/// Author of an addressable chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameMessageAuthor {
    pub ign: String,
    /// Network rank tag, e.g. `MVP+`.
    pub rank: Option<String>,
    /// Guild rank tag trailing the name.
    pub guild_rank: Option<String>,
    /// Recovered from the line's embedded profile-link payload; the
    /// server only attaches one on guild/officer/party lines.
    pub uuid: Option<String>,
}

/// A chat command carried inside a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

/// One parsed inbound chat line. Immutable after construction.
#[derive(Debug, Clone)]
pub struct GameMessage {
    pub raw_content: String,
    /// Raw content with invisible characters stripped.
    pub cleaned_content: String,
    pub kind: MessageKind,
    pub author: Option<GameMessageAuthor>,
    /// Text after the chat-shape header; whole line for system messages.
    pub body: String,
    /// Set when an unclassified line matches a known suppression notice.
    pub spam: bool,
    pub command: Option<ParsedCommand>,
    pub position: ChatPosition,
}

impl GameMessage {
    /// Whether the bridge's own account authored this line.
    pub fn from_self(&self, identity: &BotIdentity) -> bool {
        self.author
            .as_ref()
            .is_some_and(|author| author.ign == identity.ign)
    }
}

/// Classifies inbound lines. Built once per bridge.
pub struct MessageParser {
    chat_shape: Regex,
    spam_shape: Regex,
    command_prefix: String,
}

impl MessageParser {
    pub fn new(command_prefix: &str) -> Result<Self, fancy_regex::Error> {
        Ok(Self {
            chat_shape: Regex::new(CHAT_SHAPE)?,
            spam_shape: Regex::new(SPAM_SHAPE)?,
            command_prefix: command_prefix.to_string(),
        })
    }

    /// Parse one inbound line. `identity` is the bridge's own account
    /// once spawned; it re-points outgoing-whisper echoes and gates
    /// command parsing.
    pub fn parse(
        &self,
        content: &str,
        position: ChatPosition,
        profile_id: Option<String>,
        identity: Option<&BotIdentity>,
    ) -> GameMessage {
        let cleaned = strip_invisible(content);

        let captures = self.chat_shape.captures(&cleaned).ok().flatten();
        let Some(captures) = captures else {
            let spam = self.spam_shape.is_match(&cleaned).unwrap_or(false);
            return GameMessage {
                raw_content: content.to_string(),
                cleaned_content: cleaned.clone(),
                kind: MessageKind::System,
                author: None,
                body: cleaned,
                spam,
                command: None,
                position,
            };
        };

        let group = |name: &str| captures.name(name).map(|m| m.as_str().to_string());

        let kind = match (group("channel").as_deref(), group("direction").as_deref()) {
            (Some("Guild"), _) => MessageKind::Guild,
            (Some("Officer"), _) => MessageKind::Officer,
            (Some("Party"), _) => MessageKind::Party,
            _ => MessageKind::Whisper,
        };

        let body = group("body").unwrap_or_default();
        let outgoing_whisper = group("direction").as_deref() == Some("To");

        let author = if outgoing_whisper {
            // "To X: ..." is our own whisper echoed back.
            identity.map(|identity| GameMessageAuthor {
                ign: identity.ign.clone(),
                rank: None,
                guild_rank: None,
                uuid: Some(identity.uuid.clone()),
            })
        } else {
            group("ign").map(|ign| GameMessageAuthor {
                ign,
                rank: group("rank"),
                guild_rank: group("guild_rank"),
                uuid: profile_id,
            })
        };

        let message = GameMessage {
            raw_content: content.to_string(),
            cleaned_content: cleaned.clone(),
            kind,
            author,
            body,
            spam: false,
            command: None,
            position,
        };

        let command = self.extract_command(&message, identity);
        GameMessage { command, ..message }
    }

    /// Pull a command out of a message body. Guild/officer/party lines
    /// need the configured prefix or a leading mention of the bot;
    /// whispers need neither. The bridge's own lines never carry one.
    fn extract_command(
        &self,
        message: &GameMessage,
        identity: Option<&BotIdentity>,
    ) -> Option<ParsedCommand> {
        if message.kind.reply_kind().is_none() {
            return None;
        }
        if let Some(identity) = identity {
            if message.from_self(identity) {
                return None;
            }
        }

        let body = message.body.trim();
        let invocation = if message.kind == MessageKind::Whisper {
            body.strip_prefix(&self.command_prefix).unwrap_or(body)
        } else if let Some(rest) = body.strip_prefix(&self.command_prefix) {
            rest
        } else if let Some(rest) = identity.and_then(|identity| strip_mention(body, &identity.ign)) {
            rest
        } else {
            return None;
        };

        let mut tokens = invocation.split_whitespace();
        let name = tokens.next()?.to_lowercase();
        Some(ParsedCommand {
            name,
            args: tokens.map(str::to_string).collect(),
        })
    }
}

fn strip_mention<'a>(body: &'a str, ign: &str) -> Option<&'a str> {
    let rest = body
        .strip_prefix('@')
        .unwrap_or(body)
        .strip_prefix(ign)
        .or_else(|| {
            body.strip_prefix('@')
                .and_then(|tail| strip_prefix_ignore_case(tail, ign))
        })?;
    Some(rest.trim_start())
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> MessageParser {
        MessageParser::new("!").unwrap()
    }

    fn bot() -> BotIdentity {
        BotIdentity {
            ign: "BridgeBot".to_string(),
            uuid: "bot-uuid".to_string(),
        }
    }

    #[test]
    fn test_guild_line_classified() {
        let message = parser().parse(
            "Guild > [MVP+] Steve [Officer]: hello everyone",
            ChatPosition::Chat,
            Some("steve-uuid".to_string()),
            Some(&bot()),
        );
        assert_eq!(message.kind, MessageKind::Guild);
        let author = message.author.unwrap();
        assert_eq!(author.ign, "Steve");
        assert_eq!(author.rank.as_deref(), Some("MVP+"));
        assert_eq!(author.guild_rank.as_deref(), Some("Officer"));
        assert_eq!(author.uuid.as_deref(), Some("steve-uuid"));
        assert_eq!(message.body, "hello everyone");
        assert!(message.command.is_none());
    }

    #[test]
    fn test_rankless_author() {
        let message = parser().parse(
            "Officer > Alex: ping",
            ChatPosition::Chat,
            None,
            Some(&bot()),
        );
        assert_eq!(message.kind, MessageKind::Officer);
        let author = message.author.unwrap();
        assert_eq!(author.ign, "Alex");
        assert_eq!(author.rank, None);
    }

    #[test]
    fn test_incoming_whisper() {
        let message = parser().parse(
            "From [VIP] Alex: hey bot",
            ChatPosition::Chat,
            None,
            Some(&bot()),
        );
        assert_eq!(message.kind, MessageKind::Whisper);
        assert_eq!(message.author.unwrap().ign, "Alex");
    }

    #[test]
    fn test_outgoing_whisper_repointed_at_bot() {
        let message = parser().parse(
            "To [VIP] Alex: reply text",
            ChatPosition::Chat,
            None,
            Some(&bot()),
        );
        assert_eq!(message.kind, MessageKind::Whisper);
        let author = message.author.unwrap();
        assert_eq!(author.ign, "BridgeBot");
        assert_eq!(author.uuid.as_deref(), Some("bot-uuid"));
    }

    #[test]
    fn test_unmatched_line_is_system() {
        let message = parser().parse(
            "Welcome to the server!",
            ChatPosition::System,
            None,
            None,
        );
        assert_eq!(message.kind, MessageKind::System);
        assert!(message.author.is_none());
        assert!(!message.spam);
    }

    #[test]
    fn test_suppression_notice_flagged_spam() {
        let message = parser().parse(
            "You cannot say the same message twice!",
            ChatPosition::System,
            None,
            None,
        );
        assert_eq!(message.kind, MessageKind::System);
        assert!(message.spam);
    }

    #[test]
    fn test_prefixed_command_parsed() {
        let message = parser().parse(
            "Guild > Steve: !weight Steve lily",
            ChatPosition::Chat,
            None,
            Some(&bot()),
        );
        let command = message.command.unwrap();
        assert_eq!(command.name, "weight");
        assert_eq!(command.args, vec!["Steve", "lily"]);
    }

    #[test]
    fn test_mention_invokes_command() {
        let message = parser().parse(
            "Guild > Steve: @BridgeBot help",
            ChatPosition::Chat,
            None,
            Some(&bot()),
        );
        assert_eq!(message.command.unwrap().name, "help");
    }

    #[test]
    fn test_whisper_needs_no_prefix() {
        let message = parser().parse(
            "From Alex: help",
            ChatPosition::Chat,
            None,
            Some(&bot()),
        );
        assert_eq!(message.command.unwrap().name, "help");
    }

    #[test]
    fn test_own_lines_never_parse_commands() {
        let message = parser().parse(
            "Guild > BridgeBot: !help",
            ChatPosition::Chat,
            None,
            Some(&bot()),
        );
        assert!(message.command.is_none());
    }

    #[test]
    fn test_command_names_lowercased() {
        let message = parser().parse(
            "Guild > Steve: !HELP",
            ChatPosition::Chat,
            None,
            Some(&bot()),
        );
        assert_eq!(message.command.unwrap().name, "help");
    }

    #[test]
    fn test_invisible_chars_stripped_from_cleaned() {
        let message = parser().parse(
            "Guild > Steve: hi\u{2800}\u{3164}",
            ChatPosition::Chat,
            None,
            Some(&bot()),
        );
        assert_eq!(message.cleaned_content, "Guild > Steve: hi");
        assert!(message.raw_content.contains('\u{2800}'));
    }
}
