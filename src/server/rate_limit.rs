//! Per-client token-bucket rate limiting.
//!
//! Each route class carries a quota; buckets are keyed by
//! `(class, client IP)` and refill continuously. A request costs one
//! token; an empty bucket answers 429. Stale buckets are evicted
//! periodically so dynamic client populations cannot grow the map
//! without bound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Quota for one class of routes, expressed per minute. `burst` is
/// the bucket capacity.
#[derive(Debug, Clone, Copy)]
pub struct Quota {
    pub name: &'static str,
    pub per_minute: f64,
    pub burst: f64,
}

impl Quota {
    pub const fn per_minute(name: &'static str, per_minute: u32) -> Self {
        Self {
            name,
            per_minute: per_minute as f64,
            burst: per_minute as f64,
        }
    }
}

/// 10/min: launches and node registration.
pub const LAUNCH: Quota = Quota::per_minute("launch", 10);
/// 20/min: container lifecycle operations.
pub const LIFECYCLE: Quota = Quota::per_minute("lifecycle", 20);
/// 30/min: reads and data-plane forwards.
pub const READ: Quota = Quota::per_minute("read", 30);

/// Buckets idle longer than this are dropped by [`RateLimiter::evict_stale`].
const IDLE_EXPIRY: Duration = Duration::from_secs(300);

/// How often the eviction task runs.
const GC_INTERVAL: Duration = Duration::from_secs(60);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(quota: &Quota, now: Instant) -> Self {
        Self {
            tokens: quota.burst,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, quota: &Quota, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * quota.per_minute / 60.0).min(quota.burst);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the request is admitted.
    pub fn check(&self, quota: &Quota, client: &str) -> bool {
        self.check_at(quota, client, Instant::now())
    }

    fn check_at(&self, quota: &Quota, client: &str, now: Instant) -> bool {
        let key = format!("{}:{}", quota.name, client);
        let mut bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(quota, now));
        bucket.try_acquire(quota, now)
    }

    /// Spawn the background task that periodically evicts stale
    /// buckets. Call once after constructing the limiter.
    pub fn start_gc(self: &Arc<Self>) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GC_INTERVAL);
            loop {
                ticker.tick().await;
                limiter.evict_stale();
            }
        });
    }

    /// Drop buckets that have not been touched within the idle expiry.
    pub fn evict_stale(&self) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < IDLE_EXPIRY);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_admitted_then_limited() {
        let limiter = RateLimiter::new();
        let quota = Quota::per_minute("test", 10);
        let now = Instant::now();

        for i in 0..10 {
            assert!(
                limiter.check_at(&quota, "1.2.3.4", now),
                "request {} should pass",
                i
            );
        }
        assert!(!limiter.check_at(&quota, "1.2.3.4", now));
    }

    #[test]
    fn test_refill_restores_tokens() {
        let limiter = RateLimiter::new();
        let quota = Quota::per_minute("test", 60);
        let start = Instant::now();

        for _ in 0..60 {
            assert!(limiter.check_at(&quota, "1.2.3.4", start));
        }
        assert!(!limiter.check_at(&quota, "1.2.3.4", start));

        // 60/min refills one token per second.
        assert!(limiter.check_at(&quota, "1.2.3.4", start + Duration::from_secs(2)));
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = RateLimiter::new();
        let quota = Quota::per_minute("test", 1);
        let now = Instant::now();

        assert!(limiter.check_at(&quota, "1.2.3.4", now));
        assert!(!limiter.check_at(&quota, "1.2.3.4", now));
        assert!(limiter.check_at(&quota, "5.6.7.8", now));
    }

    #[test]
    fn test_classes_are_independent() {
        let limiter = RateLimiter::new();
        let read = Quota::per_minute("read", 1);
        let launch = Quota::per_minute("launch", 1);
        let now = Instant::now();

        assert!(limiter.check_at(&read, "1.2.3.4", now));
        assert!(!limiter.check_at(&read, "1.2.3.4", now));
        assert!(limiter.check_at(&launch, "1.2.3.4", now));
    }

    #[test]
    fn test_evict_stale_removes_idle_buckets() {
        let limiter = RateLimiter::new();
        let quota = Quota::per_minute("test", 10);
        // Skip on hosts whose monotonic clock is younger than the
        // idle expiry.
        let Some(old) = Instant::now().checked_sub(Duration::from_secs(600)) else {
            return;
        };

        limiter.check_at(&quota, "1.2.3.4", old);
        assert_eq!(limiter.len(), 1);

        limiter.evict_stale();
        assert_eq!(limiter.len(), 0);
    }
}
