//! Plain-text conversion between Discord markdown and game chat.

use std::borrow::Cow;
use std::sync::OnceLock;

use fancy_regex::Regex;

/// Marker pairs Discord actually renders, longest first. Escaped
/// markers and word-interior underscores never open a pair, matching
/// Discord's own parser, so bare names like `cool_guy` stay intact.
const PAIR_SHAPES: [&str; 10] = [
    r"(?s)```(?:[a-z]*\n)?(.+?)```",
    r"(?<!\\)`(.+?)`",
    r"(?<!\\)\*\*\*(?=\S)(.+?)(?<=\S)\*\*\*",
    r"(?<!\\)\*\*(?=\S)(.+?)(?<=\S)\*\*",
    r"(?<!\\)\*(?=\S)(.+?)(?<=\S)\*",
    r"(?<![\w\\])___(?=\S)(.+?)(?<=\S)___(?!\w)",
    r"(?<![\w\\])__(?=\S)(.+?)(?<=\S)__(?!\w)",
    r"(?<![\w\\])_(?=\S)(.+?)(?<=\S)_(?!\w)",
    r"(?<!\\)~~(?=\S)(.+?)(?<=\S)~~",
    r"(?<!\\)\|\|(.+?)\|\|",
];

fn pair_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        PAIR_SHAPES
            .iter()
            .filter_map(|shape| Regex::new(shape).ok())
            .collect()
    })
}

/// Convert Discord markdown to plain game text.
///
/// Formatting syntax carries no meaning in game chat, so matched
/// marker pairs are stripped; unpaired markers stay literal. Unicode
/// emoji become `:shortcode:` tokens because the game font cannot
/// render them. Custom emoji and mention syntax are resolved upstream
/// by the relay; anything that reaches here unresolved stays literal.
pub fn discord_to_game(content: &str) -> String {
    let stripped = strip_markdown_pairs(content);
    let mut out = String::with_capacity(stripped.len());
    let mut chars = stripped.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            _ => {
                if let Some(emoji) = emojis::get(&c.to_string()) {
                    if let Some(shortcode) = emoji.shortcode() {
                        out.push(':');
                        out.push_str(shortcode);
                        out.push(':');
                        continue;
                    }
                }
                out.push(c);
            }
        }
    }

    strip_quote_markers(&out)
}

fn strip_markdown_pairs(content: &str) -> String {
    let mut text = content.to_string();
    for pattern in pair_patterns() {
        if let Cow::Owned(replaced) = pattern.replace_all(&text, "$1") {
            text = replaced;
        }
    }
    text
}

/// Drop leading `> ` quote markers per line; quoting has no game form.
fn strip_quote_markers(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            line.strip_prefix("> ")
                .or_else(|| line.strip_prefix(">>> "))
                .unwrap_or(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Escape game text so Discord renders it literally.
pub fn escape_for_discord(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for c in content.chars() {
        if matches!(c, '*' | '_' | '~' | '`' | '|' | '\\' | '#' | '-') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
