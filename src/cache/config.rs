//! Cache configuration.
//!
//! Controls staleness windows, debounce intervals and the retry hook via
//! `portal.toml`.

use std::time::Duration;

use serde::Deserialize;

use super::keys::QueryKey;

// Default values for cache configuration
const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 350;
const DEFAULT_LOCATION_DEBOUNCE_MS: u64 = 300;
const DEFAULT_CHARACTERS_STALE_MS: u64 = 30_000;
const DEFAULT_EPISODES_STALE_MS: u64 = 30_000;
const DEFAULT_LOCATION_SEARCH_STALE_MS: u64 = 60_000;
const DEFAULT_LOCATION_STALE_MS: u64 = 60_000;
const DEFAULT_RESIDENTS_STALE_MS: u64 = 30_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 0;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Cache configuration from `portal.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Quiet window (ms) for character and episode text filters.
    pub search_debounce_ms: u64,
    /// Quiet window (ms) for the location search input.
    pub location_debounce_ms: u64,
    /// Freshness window (ms) for character pages.
    pub characters_stale_ms: u64,
    /// Freshness window (ms) for episode pages.
    pub episodes_stale_ms: u64,
    /// Freshness window (ms) for location search results.
    pub location_search_stale_ms: u64,
    /// Freshness window (ms) for a single location.
    pub location_stale_ms: u64,
    /// Freshness window (ms) for resolved residents.
    pub residents_stale_ms: u64,
    /// Extra attempts after a failed fetch; zero disables retrying.
    pub retry_attempts: u32,
    /// Delay (ms) between retry attempts.
    pub retry_delay_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_debounce_ms: DEFAULT_SEARCH_DEBOUNCE_MS,
            location_debounce_ms: DEFAULT_LOCATION_DEBOUNCE_MS,
            characters_stale_ms: DEFAULT_CHARACTERS_STALE_MS,
            episodes_stale_ms: DEFAULT_EPISODES_STALE_MS,
            location_search_stale_ms: DEFAULT_LOCATION_SEARCH_STALE_MS,
            location_stale_ms: DEFAULT_LOCATION_STALE_MS,
            residents_stale_ms: DEFAULT_RESIDENTS_STALE_MS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            search_debounce_ms: settings.search_debounce.as_millis() as u64,
            location_debounce_ms: settings.location_debounce.as_millis() as u64,
            characters_stale_ms: settings.characters_stale.as_millis() as u64,
            episodes_stale_ms: settings.episodes_stale.as_millis() as u64,
            location_search_stale_ms: settings.location_search_stale.as_millis() as u64,
            location_stale_ms: settings.location_stale.as_millis() as u64,
            residents_stale_ms: settings.residents_stale.as_millis() as u64,
            retry_attempts: settings.retry_attempts,
            retry_delay_ms: settings.retry_delay.as_millis() as u64,
        }
    }
}

impl CacheConfig {
    /// Freshness window for the family of `key`.
    pub fn stale_after(&self, key: &QueryKey) -> Duration {
        let millis = match key {
            QueryKey::Characters { .. } => self.characters_stale_ms,
            QueryKey::Episodes { .. } => self.episodes_stale_ms,
            QueryKey::LocationSearch { .. } => self.location_search_stale_ms,
            QueryKey::Location { .. } => self.location_stale_ms,
            QueryKey::Residents { .. } => self.residents_stale_ms,
        };
        Duration::from_millis(millis)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn location_debounce(&self) -> Duration {
        Duration::from_millis(self.location_debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Returns true if failed fetches are retried.
    pub fn retries_enabled(&self) -> bool {
        self.retry_attempts > 0
    }
}
