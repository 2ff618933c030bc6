//! Render cache configuration.
//!
//! Populated from the `[cache]` section of `chartd.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

// Default values for cache configuration
const DEFAULT_TTL_MS: u64 = 60 * 60 * 1000;
const DEFAULT_MAX_ENTRIES: usize = 1000;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve repeated specs from memory.
    pub enabled: bool,
    /// Age after which an entry no longer counts as a hit.
    pub ttl: Duration,
    /// Upper bound on resident entries.
    pub max_entries: usize,
    /// Cadence of the background expiry sweep; `None` relies on store-time sweeps only.
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_millis(DEFAULT_TTL_MS),
            max_entries: DEFAULT_MAX_ENTRIES,
            sweep_interval: Some(Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS)),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: settings.ttl,
            max_entries: settings.max_entries.get(),
            sweep_interval: settings.sweep_interval,
        }
    }
}

impl CacheConfig {
    /// Returns the entry bound as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
