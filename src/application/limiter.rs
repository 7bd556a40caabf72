//! Sliding-window rate limiter over a shared sorted set per client.

use crate::config::RateLimitConfig;
use crate::ports::cache::{CacheBackend, CacheError, CacheOp};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "clipaudio:ratelimit:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { count: usize, remaining: usize },
    Limited { count: usize },
    /// The backing store failed; the request is let through.
    FailOpen,
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, RateDecision::Limited { .. })
    }
}

pub struct SlidingWindowLimiter {
    cache: Arc<dyn CacheBackend>,
    config: RateLimitConfig,
}

impl SlidingWindowLimiter {
    pub fn new(cache: Arc<dyn CacheBackend>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    pub async fn check(&self, identity: &str) -> RateDecision {
        self.check_at(identity, Utc::now().timestamp_micros()).await
    }

    /// Records one request for `identity` at `now_micros` and decides on it.
    ///
    /// Trim, insert, count and expiry go to the cache as one atomic batch so
    /// concurrent callers, including other instances, never both observe a
    /// stale count.
    pub async fn check_at(&self, identity: &str, now_micros: i64) -> RateDecision {
        let key = format!("{}{}", KEY_PREFIX, identity);
        let member = format!("{}-{}", now_micros, Uuid::new_v4());
        let now_ms = now_micros as f64 / 1000.0;
        let window_ms = self.config.window.as_millis() as f64;

        let ops = vec![
            CacheOp::SortedSetTrimByScore {
                key: key.clone(),
                max_score: now_ms - window_ms,
            },
            CacheOp::SortedSetAdd {
                key: key.clone(),
                member: member.clone(),
                score: now_ms,
            },
            CacheOp::SortedSetCount { key: key.clone() },
            CacheOp::Expire {
                key: key.clone(),
                ttl: self.config.window,
            },
        ];

        let count = match self.cache.atomic(ops).await {
            Ok(replies) => match replies.get(2).and_then(|r| r.as_int()) {
                Some(count) => count.max(0) as usize,
                None => return self.fail_open(identity, &CacheError::Command("missing count reply".into())),
            },
            Err(e) => return self.fail_open(identity, &e),
        };

        let limit = self.config.max_requests as usize;
        if count > limit {
            if let Err(e) = self.cache.sorted_set_remove(&key, &member).await {
                warn!(client = %identity, error = %e, "failed to release rejected rate-limit slot");
            }
            debug!(client = %identity, count, limit, "rate limit exceeded");
            return RateDecision::Limited { count };
        }
        RateDecision::Allowed {
            count,
            remaining: limit - count,
        }
    }

    fn fail_open(&self, identity: &str, err: &CacheError) -> RateDecision {
        warn!(
            client = %identity,
            backend = self.cache.kind(),
            error = %err,
            "rate limiter backend unavailable, admitting request"
        );
        RateDecision::FailOpen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::memory_cache::MemoryCache;
    use crate::ports::cache::CacheReply;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::time::Duration;

    const SECOND: i64 = 1_000_000;

    fn limiter(cache: Arc<dyn CacheBackend>, max_requests: u32, window_secs: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(
            cache,
            RateLimitConfig {
                max_requests,
                window: Duration::from_secs(window_secs),
            },
        )
    }

    #[tokio::test]
    async fn admits_up_to_ceiling_then_rejects() {
        let limiter = limiter(Arc::new(MemoryCache::new()), 3, 60);
        let now = 1_700_000_000 * SECOND;
        for i in 1..=3 {
            assert_eq!(
                limiter.check_at("1.2.3.4", now + i).await,
                RateDecision::Allowed {
                    count: i as usize,
                    remaining: 3 - i as usize
                }
            );
        }
        assert_eq!(
            limiter.check_at("1.2.3.4", now + 4).await,
            RateDecision::Limited { count: 4 }
        );
        // Another identity has its own bucket.
        assert!(limiter.check_at("5.6.7.8", now + 5).await.is_allowed());
    }

    #[tokio::test]
    async fn rejected_attempts_do_not_consume_capacity() {
        let limiter = limiter(Arc::new(MemoryCache::new()), 2, 60);
        let start = 1_700_000_000 * SECOND;
        assert!(limiter.check_at("c", start).await.is_allowed());
        assert!(limiter.check_at("c", start + SECOND).await.is_allowed());
        for i in 2..10 {
            assert!(!limiter.check_at("c", start + i * SECOND).await.is_allowed());
        }
        // The first admission ages out exactly at the window edge.
        assert!(limiter.check_at("c", start + 60 * SECOND).await.is_allowed());
        assert!(!limiter.check_at("c", start + 60 * SECOND + 1).await.is_allowed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_burst_admits_exactly_the_ceiling() {
        let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
        let limiter = Arc::new(limiter(cache, 15, 60));
        let now = 1_700_000_000 * SECOND;
        let handles: Vec<_> = (0..60)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check_at("burst", now).await })
            })
            .collect();
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_allowed() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_trailing_window_exceeds_ceiling() {
        let ceiling = 15;
        let window = 60 * SECOND;
        let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
        let limiter = Arc::new(limiter(cache, ceiling, 60));
        let mut rng = StdRng::seed_from_u64(0x5eed);

        let mut now = 1_700_000_000 * SECOND;
        let mut admitted_at = Vec::new();
        for _ in 0..200 {
            now += rng.gen_range(0..8 * SECOND);
            let wave = rng.gen_range(1..25);
            let handles: Vec<_> = (0..wave)
                .map(|_| {
                    let limiter = limiter.clone();
                    tokio::spawn(async move { limiter.check_at("client", now).await })
                })
                .collect();
            for handle in handles {
                if handle.await.unwrap().is_allowed() {
                    admitted_at.push(now);
                }
            }
        }

        assert!(!admitted_at.is_empty());
        for &end in &admitted_at {
            let in_window = admitted_at
                .iter()
                .filter(|&&t| t > end - window && t <= end)
                .count();
            assert!(in_window <= ceiling as usize, "{} admitted in window ending {}", in_window, end);
        }
    }

    #[tokio::test]
    async fn one_off_clients_do_not_accumulate() {
        let cache = Arc::new(MemoryCache::new());
        let limiter = limiter(cache.clone(), 5, 1);
        for i in 0..500 {
            assert!(limiter.check(&format!("10.0.{}.{}", i / 256, i % 256)).await.is_allowed());
        }
        assert_eq!(cache.len(), 500);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        for i in 0..20 {
            limiter.check(&format!("late-{}", i)).await;
        }
        assert!(cache.len() <= 20, "{} keys still resident", cache.len());
    }

    struct BrokenCache;

    #[async_trait]
    impl CacheBackend for BrokenCache {
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn exists(&self, _: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn list_append(&self, _: &str, _: &str) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn list_range(&self, _: &str, _: isize, _: isize) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn list_trim(&self, _: &str, _: isize, _: isize) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn sorted_set_add(&self, _: &str, _: &str, _: f64) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn sorted_set_remove(&self, _: &str, _: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn sorted_set_trim_by_score(&self, _: &str, _: f64) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn sorted_set_count(&self, _: &str) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn atomic(&self, _: Vec<CacheOp>) -> Result<Vec<CacheReply>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn health_check(&self) -> bool {
            false
        }
        fn kind(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn backend_outage_fails_open() {
        let limiter = limiter(Arc::new(BrokenCache), 1, 60);
        for _ in 0..5 {
            assert_eq!(limiter.check("anyone").await, RateDecision::FailOpen);
        }
    }
}
