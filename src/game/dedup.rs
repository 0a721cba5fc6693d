//! Duplicate-filter evasion.
//!
//! The game server suppresses a chat line when it is too similar to one
//! the account sent recently. We keep our own ring of recent outgoing
//! content per filter bucket and, when a new line would trip the filter,
//! append invisible padding so the bytes differ while the visible text
//! does not.

use std::collections::VecDeque;

use rand::Rng;

/// Similarity at or above which the server's duplicate filter is
/// assumed to trigger.
pub const DUPLICATE_THRESHOLD: f64 = 0.985;

/// Threshold reduction applied per retry, padding more aggressively.
pub const THRESHOLD_STEP: f64 = 0.005;

/// Characters the game client renders as nothing. Braille blank leads
/// because legacy servers strip some of the zero-width set.
const INVISIBLE_CHARS: [char; 3] = ['\u{2800}', '\u{3164}', '\u{FFA0}'];

/// Worst case `pad_invisible` can append: the separator space plus the
/// largest padding run. Senders reserve this much headroom per line so
/// a padded retry never exceeds the protocol line limit.
pub const MAX_PADDING: usize = 1 + MAX_PAD_RUN;

const MAX_PAD_RUN: usize = 8;

/// Fixed-capacity record of recent outgoing content for one filter
/// bucket. Mutated only by the send pipeline.
#[derive(Debug)]
pub struct DuplicateRingBuffer {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for DuplicateRingBuffer {
    fn default() -> Self {
        Self::new(4)
    }
}

impl DuplicateRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record successfully sent content.
    pub fn record(&mut self, content: &str) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(normalize(content));
    }

    /// Whether `content` is similar enough to a recent entry to trip
    /// the server's filter at the given threshold.
    pub fn would_trip(&self, content: &str, threshold: f64) -> bool {
        let normalized = normalize(content);
        self.entries
            .iter()
            .any(|entry| jaro_winkler(entry, &normalized) >= threshold)
    }
}

/// Canonical form used for similarity comparison: invisible characters
/// stripped, whitespace collapsed, lowercased.
pub fn normalize(content: &str) -> String {
    strip_invisible(content)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Remove every invisible padding character.
pub fn strip_invisible(content: &str) -> String {
    content
        .chars()
        .filter(|c| !INVISIBLE_CHARS.contains(c))
        .collect()
}

/// Append a random run of invisible characters. `extra` grows per
/// retry so repeated attempts diverge further from the ring entries.
pub fn pad_invisible(content: &str, extra: usize) -> String {
    let mut rng = rand::thread_rng();
    let count = (rng.gen_range(2..=4) + extra * 2).min(MAX_PAD_RUN);
    let mut padded = String::with_capacity(content.len() + count * 3 + 1);
    padded.push_str(content);
    padded.push(' ');
    for _ in 0..count {
        padded.push(INVISIBLE_CHARS[rng.gen_range(0..INVISIBLE_CHARS.len())]);
    }
    padded
}

/// Jaro-Winkler similarity in [0, 1].
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let jaro = jaro(a, b);
    if jaro <= 0.7 {
        return jaro;
    }
    let prefix = a
        .chars()
        .zip(b.chars())
        .take(4)
        .take_while(|(x, y)| x == y)
        .count();
    jaro + prefix as f64 * 0.1 * (1.0 - jaro)
}

fn jaro(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let window = (a.len().max(b.len()) / 2).saturating_sub(1);
    let mut b_taken = vec![false; b.len()];
    let mut matched_a = Vec::new();

    for (i, &ca) in a.iter().enumerate() {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(b.len());
        for j in lo..hi {
            if !b_taken[j] && b[j] == ca {
                b_taken[j] = true;
                matched_a.push((i, j));
                break;
            }
        }
    }

    let matches = matched_a.len();
    if matches == 0 {
        return 0.0;
    }

    let mut js: Vec<usize> = matched_a.iter().map(|&(_, j)| j).collect();
    let ordered = js.clone();
    js.sort_unstable();
    let transpositions = ordered.iter().zip(js.iter()).filter(|(x, y)| x != y).count() / 2;

    let m = matches as f64;
    (m / a.len() as f64 + m / b.len() as f64 + (m - transpositions as f64) / m) / 3.0
}
