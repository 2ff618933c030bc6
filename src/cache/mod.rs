//! Render cache.
//!
//! Keeps recently rendered charts in memory, keyed by request fingerprint, so
//! identical specs are not sent to the render engine twice within the TTL.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_ms = 3600000
//! max_entries = 1000
//! sweep_interval_ms = 60000
//! ```

mod clock;
mod config;
mod lock;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use store::RenderCache;
pub use sweeper::spawn_sweeper;

pub(crate) use store::{
    METRIC_CACHE_ENTRIES, METRIC_CACHE_EVICT, METRIC_CACHE_EXPIRED, METRIC_CACHE_HIT,
    METRIC_CACHE_MISS,
};
