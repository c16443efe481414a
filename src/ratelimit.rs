//! Rate Limiter (C3): per-domain token bucket with adaptive backoff on
//! observed 429/5xx, plus a global cap on concurrent requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use url::Url;

/// Per-board rate limit parameters.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitParams {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Floor recovery time: minimum time a bucket must behave before its
    /// effective delay is allowed to halve back toward `base_delay`.
    pub recovery_floor: Duration,
}

impl Default for RateLimitParams {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            recovery_floor: Duration::from_secs(300),
        }
    }
}

struct Bucket {
    params: RateLimitParams,
    effective_delay: Duration,
    next_available: Instant,
    last_recovery: Instant,
}

impl Bucket {
    fn new(params: RateLimitParams) -> Self {
        let now = Instant::now();
        Self {
            effective_delay: params.base_delay,
            params,
            next_available: now,
            last_recovery: now,
        }
    }
}

/// Extracts the registrable domain (host) a URL's token bucket is keyed by.
pub fn domain_of(url: &str) -> anyhow::Result<String> {
    let parsed = Url::parse(url)?;
    parsed
        .host_str()
        .map(|h| h.to_string())
        .ok_or_else(|| anyhow::anyhow!("url has no host: {url}"))
}

/// Per-domain token bucket plus a global concurrency cap. Acquisitions for
/// the same domain are serialized by that domain's bucket lock;
/// acquisitions for different domains proceed independently, limited only
/// by the global semaphore.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    global: Arc<Semaphore>,
}

/// Held across a fetch; dropping it releases the global concurrency slot.
pub struct Permit {
    _global: tokio::sync::OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(max_concurrent_requests: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            global: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        }
    }

    /// Blocks until a token is available for `domain`, then returns a
    /// permit that also reserves a slot from the global concurrency cap.
    pub async fn acquire(&self, domain: &str, params: RateLimitParams) -> Permit {
        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed");

        let wait = {
            let mut buckets = self.buckets.lock().await;
            let bucket = buckets
                .entry(domain.to_string())
                .or_insert_with(|| Bucket::new(params));
            let now = Instant::now();
            let wait = bucket.next_available.saturating_duration_since(now);
            bucket.next_available = now.max(bucket.next_available) + bucket.effective_delay;
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        Permit { _global: global }
    }

    /// Records the outcome of a request against `domain`'s bucket:
    /// doubles (capped at `max_delay`) on 429/5xx, otherwise decays toward
    /// `base_delay` once `recovery_floor` has elapsed since the last decay.
    pub async fn record_outcome(&self, domain: &str, params: RateLimitParams, status: u16) {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(domain.to_string())
            .or_insert_with(|| Bucket::new(params));

        if status == 429 || (500..600).contains(&status) {
            let backed_off = bucket.effective_delay.mul_f64(bucket.params.backoff_multiplier);
            bucket.effective_delay = backed_off.min(bucket.params.max_delay);
            bucket.last_recovery = Instant::now();
        } else if bucket.effective_delay > bucket.params.base_delay {
            let now = Instant::now();
            if now.saturating_duration_since(bucket.last_recovery) >= bucket.params.recovery_floor
            {
                let halved = bucket.effective_delay / 2;
                bucket.effective_delay = halved.max(bucket.params.base_delay);
                bucket.last_recovery = now;
            }
        }
    }

    /// Current effective delay for a domain; exposed for diagnostics/tests.
    pub async fn effective_delay(&self, domain: &str) -> Option<Duration> {
        self.buckets.lock().await.get(domain).map(|b| b.effective_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_of_extracts_host() {
        assert_eq!(
            domain_of("https://boards.example.com/jobs?page=2").unwrap(),
            "boards.example.com"
        );
    }

    #[tokio::test]
    async fn backoff_doubles_on_429_and_caps_at_max_delay() {
        let limiter = RateLimiter::new(10);
        let params = RateLimitParams {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(30),
            backoff_multiplier: 2.0,
            recovery_floor: Duration::from_secs(300),
        };
        limiter.record_outcome("a.test", params, 429).await;
        assert_eq!(
            limiter.effective_delay("a.test").await,
            Some(Duration::from_millis(20))
        );
        limiter.record_outcome("a.test", params, 503).await;
        assert_eq!(
            limiter.effective_delay("a.test").await,
            Some(Duration::from_millis(30))
        );
        limiter.record_outcome("a.test", params, 500).await;
        assert_eq!(
            limiter.effective_delay("a.test").await,
            Some(Duration::from_millis(30)),
            "must not exceed max_delay"
        );
    }

    #[tokio::test]
    async fn different_domains_are_independent() {
        let limiter = RateLimiter::new(10);
        let params = RateLimitParams::default();
        limiter.record_outcome("a.test", params, 429).await;
        assert!(limiter.effective_delay("b.test").await.is_none());
    }
}
