//! Compiled content filters, replaceable at runtime.

use std::sync::{Arc, RwLock};

use fancy_regex::Regex;
use tracing::warn;

use crate::config::types::FiltersConfig;

#[derive(Default)]
struct CompiledFilters {
    blocked: Vec<Regex>,
    allowed_urls: Vec<Regex>,
}

fn compile(patterns: &[String], purpose: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Skipping invalid {} pattern '{}': {}", purpose, pattern, e);
                None
            }
        })
        .collect()
}

impl CompiledFilters {
    fn from_config(config: &FiltersConfig) -> Self {
        Self {
            blocked: compile(&config.blocked, "blocked-content"),
            allowed_urls: compile(&config.allowed_urls, "allowed-url"),
        }
    }
}

/// Holds the active filter set behind an atomically replaceable handle,
/// so a config reload swaps patterns without touching senders mid-send.
pub struct FilterHolder {
    current: RwLock<Arc<CompiledFilters>>,
}

impl FilterHolder {
    pub fn new(config: Option<&FiltersConfig>) -> Self {
        let compiled = config
            .map(CompiledFilters::from_config)
            .unwrap_or_default();
        Self {
            current: RwLock::new(Arc::new(compiled)),
        }
    }

    /// Swap in a freshly compiled filter set.
    pub fn replace(&self, config: &FiltersConfig) {
        let compiled = Arc::new(CompiledFilters::from_config(config));
        if let Ok(mut current) = self.current.write() {
            *current = compiled;
        }
    }

    fn snapshot(&self) -> Arc<CompiledFilters> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    /// Whether `text` matches any blocked-content pattern.
    pub fn is_blocked(&self, text: &str) -> bool {
        self.snapshot()
            .blocked
            .iter()
            .any(|pattern| pattern.is_match(text).unwrap_or(false))
    }

    /// Whether a URL is on the relay allowlist. With no allowlist
    /// configured, nothing is allowed.
    pub fn url_allowed(&self, url: &str) -> bool {
        self.snapshot()
            .allowed_urls
            .iter()
            .any(|pattern| pattern.is_match(url).unwrap_or(false))
    }
}
