//! Game-to-Discord content translation.
//!
//! Inbound game text may carry `@name`, `#channel`, `:emoji:` and
//! `/command` tokens plus relative-time phrases. `parse_content`
//! rewrites each into real platform syntax where it resolves, and
//! leaves it literal where it does not.

use chrono::Utc;
use fancy_regex::{Captures, Regex};
use tracing::warn;

use crate::game::dedup::{jaro_winkler, strip_invisible};

/// How similar a typo'd `:emoji:` token must be to a guild emoji name
/// before autocorrecting to it.
const EMOJI_AUTOCORRECT_THRESHOLD: f64 = 0.9;

/// One resolvable guild emoji.
#[derive(Debug, Clone)]
pub struct CustomEmoji {
    pub id: u64,
    pub name: String,
    pub animated: bool,
}

impl CustomEmoji {
    fn tag(&self) -> String {
        if self.animated {
            format!("<a:{}:{}>", self.name, self.id)
        } else {
            format!("<:{}:{}>", self.name, self.id)
        }
    }
}

/// Name lookups against one Discord guild's state.
pub trait ContentResolver: Send + Sync {
    /// A user or member whose name matches, case-insensitively.
    fn user_by_name(&self, name: &str) -> Option<u64>;
    fn role_by_name(&self, name: &str) -> Option<u64>;
    /// Channel lookup by normalized name (lowercased, spaces to dashes).
    fn channel_by_name(&self, name: &str) -> Option<u64>;
    fn emoji_by_name(&self, name: &str) -> Option<CustomEmoji>;
    fn emoji_names(&self) -> Vec<String>;
    /// Registered application command id for a `name sub` path, if the
    /// path exists in that command's subcommand tree.
    fn command_id(&self, path: &[&str]) -> Option<u64>;
}

struct Patterns {
    mention: Regex,
    channel: Regex,
    emoji: Regex,
    relative_time: Regex,
    command: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: std::sync::OnceLock<Option<Patterns>> = std::sync::OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            let compile = |pattern: &str| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Content pattern failed to compile: {}", e);
                    None
                }
            };
            Some(Patterns {
                mention: compile(r"@([A-Za-z0-9_.]{2,32})")?,
                channel: compile(r"#([A-Za-z0-9_-]{2,100})")?,
                emoji: compile(r":([A-Za-z0-9_+-]{2,32}):")?,
                relative_time: compile(r"\bin (\d{1,4}) (second|minute|hour|day)s?\b")?,
                command: compile(r"(?<=^|\s)/([a-z0-9-]+(?: [a-z0-9-]+){0,2})")?,
            })
        })
        .as_ref()
}

/// Translate one game chat body for Discord display.
pub fn parse_content(text: &str, resolver: &dyn ContentResolver) -> String {
    let mut content = strip_invisible(text);
    if content.starts_with('>') {
        // A leading '>' would render the whole message as a quote.
        content.insert(0, '\\');
    }

    let Some(patterns) = patterns() else {
        return content;
    };

    let content = replace(&patterns.mention, &content, |caps| {
        let name = &caps[1];
        if let Some(id) = resolver.user_by_name(name) {
            format!("<@{}>", id)
        } else if let Some(id) = resolver.role_by_name(name) {
            format!("<@&{}>", id)
        } else {
            caps[0].to_string()
        }
    });

    let content = replace(&patterns.channel, &content, |caps| {
        let name = caps[1].to_lowercase();
        match resolver.channel_by_name(&name) {
            Some(id) => format!("<#{}>", id),
            None => caps[0].to_string(),
        }
    });

    let content = replace(&patterns.emoji, &content, |caps| {
        resolve_emoji(&caps[1], resolver).unwrap_or_else(|| caps[0].to_string())
    });

    let content = replace(&patterns.relative_time, &content, |caps| {
        let amount: i64 = match caps[1].parse() {
            Ok(amount) => amount,
            Err(_) => return caps[0].to_string(),
        };
        let seconds = match &caps[2] {
            "second" => amount,
            "minute" => amount * 60,
            "hour" => amount * 3600,
            _ => amount * 86_400,
        };
        format!("<t:{}:R>", Utc::now().timestamp() + seconds)
    });

    replace(&patterns.command, &content, |caps| {
        let path: Vec<&str> = caps[1].split(' ').collect();
        // Longest resolvable path wins; a trailing token may be an
        // argument rather than a subcommand.
        for take in (1..=path.len()).rev() {
            if let Some(id) = resolver.command_id(&path[..take]) {
                return format!("</{}:{}>", path[..take].join(" "), id);
            }
        }
        caps[0].to_string()
    })
}

fn resolve_emoji(name: &str, resolver: &dyn ContentResolver) -> Option<String> {
    if let Some(emoji) = resolver.emoji_by_name(name) {
        return Some(emoji.tag());
    }
    if let Some(emoji) = emojis::get_by_shortcode(name) {
        return Some(emoji.as_str().to_string());
    }
    // Autocorrect near-miss names against the guild's emoji set.
    let lowered = name.to_lowercase();
    let best = resolver
        .emoji_names()
        .into_iter()
        .map(|candidate| {
            let score = jaro_winkler(&candidate.to_lowercase(), &lowered);
            (candidate, score)
        })
        .filter(|(_, score)| *score >= EMOJI_AUTOCORRECT_THRESHOLD)
        .max_by(|(_, a), (_, b)| a.total_cmp(b))?;
    resolver.emoji_by_name(&best.0).map(|emoji| emoji.tag())
}

fn replace(pattern: &Regex, content: &str, f: impl Fn(&Captures) -> String) -> String {
    pattern.replace_all(content, |caps: &Captures| f(caps)).into_owned()
}
