use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::store::RenderCache;

/// Periodically drop expired entries so idle caches do not hold stale charts.
/// The caller aborts the returned handle on shutdown.
pub fn spawn_sweeper(cache: Arc<RenderCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(
                    op = "cache::sweep",
                    purged,
                    remaining = cache.len(),
                    "Expired render cache entries swept"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::render::{Fingerprint, RenderOptions, RenderRequest, RenderResult};
    use crate::cache::{CacheConfig, ManualClock};

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_expired_entries() {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(RenderCache::with_clock(
            &CacheConfig {
                ttl: Duration::from_secs(10),
                ..Default::default()
            },
            clock.clone(),
        ));
        let request =
            RenderRequest::new(serde_json::json!({"type": "line"}), RenderOptions::default())
                .expect("valid request");
        cache.store(
            Fingerprint::of(&request),
            RenderResult::new(b"x".to_vec(), "image/png"),
        );

        let handle = spawn_sweeper(cache.clone(), Duration::from_secs(1));
        clock.advance(Duration::from_secs(11));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(cache.is_empty());
        handle.abort();
    }
}
