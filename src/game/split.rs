//! Splitting outbound messages into chat-line-sized parts.

/// Split `content` into parts that each fit within `limit` characters.
///
/// Splits on newlines first, then re-splits any long line at the last
/// whitespace boundary that still fits. A single word longer than the
/// limit is cut mid-word at a character boundary.
pub fn split_message(content: &str, limit: usize) -> Vec<String> {
    let mut parts = Vec::new();
    for line in content.lines() {
        split_line(line, limit, &mut parts);
    }
    parts
}

fn split_line(line: &str, limit: usize, parts: &mut Vec<String>) {
    let mut rest = line.trim_end();
    while rest.chars().count() > limit {
        let cut_bytes = byte_index_of_char(rest, limit);
        let head = &rest[..cut_bytes];
        let cut = match head.rfind(char::is_whitespace) {
            // Break at the last space that fits; the space itself is dropped.
            Some(space) => space,
            None => cut_bytes,
        };
        parts.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
}

/// Byte index of the `n`th character, so slicing never lands inside a
/// multi-byte sequence.
fn byte_index_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}
