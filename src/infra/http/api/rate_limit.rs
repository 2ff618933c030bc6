use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Buckets kept before stale windows are swept on the next request.
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

/// Fixed-window request counter keyed by client.
#[derive(Debug, Clone)]
pub struct ApiRateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<DashMap<String, Window>>,
}

impl ApiRateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        if self.buckets.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }

        let window = self.window;
        let mut entry = self.buckets.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });
        if now.duration_since(entry.started_at) >= window {
            *entry = Window {
                started_at: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            let resets_in = window.saturating_sub(now.duration_since(entry.started_at));
            return RateDecision::Limited {
                retry_after_secs: resets_in.as_secs().max(1),
            };
        }

        entry.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }

    fn prune(&self, now: Instant) {
        let window = self.window;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.started_at) < window);
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }
}
