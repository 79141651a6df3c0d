use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

pub type ArcRateLimiter = Arc<RateLimit>;

/// Token bucket shared by every worker of one download session.
pub struct RateLimit {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    burst: u32,
    rate: u64,
}

impl RateLimit {
    /// `rate` is bytes per second; 0 means unlimited and yields `None`.
    pub fn new(rate: u64) -> Option<ArcRateLimiter> {
        let burst = NonZeroU32::new(rate.min(u32::MAX as u64) as u32)?;
        Some(Arc::new(Self {
            limiter: RateLimiter::direct(Quota::per_second(burst)),
            burst: burst.get(),
            rate,
        }))
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Blocks until `n` bytes worth of tokens are available. Requests larger
    /// than the bucket are split so they can never overflow it.
    pub async fn acquire(&self, mut n: u64) {
        while n > 0 {
            let take = n.min(self.burst as u64) as u32;
            match NonZeroU32::new(take) {
                // take <= burst, so until_n_ready cannot report
                // insufficient capacity
                Some(take) => {
                    let _ = self.limiter.until_n_ready(take).await;
                }
                None => break,
            }
            n -= take as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn zero_rate_means_unlimited() {
        assert!(RateLimit::new(0).is_none());
        assert_eq!(RateLimit::new(4096).unwrap().rate(), 4096);
    }

    #[tokio::test]
    async fn acquire_paces_to_the_configured_rate() {
        let limit = RateLimit::new(2000).unwrap();
        let started = Instant::now();
        // the first bucket is free, the remaining 4000 bytes cost ~2s
        for _ in 0..6 {
            limit.acquire(1000).await;
        }
        assert!(started.elapsed().as_millis() >= 1800);
    }

    #[tokio::test]
    async fn oversized_request_is_split_not_rejected() {
        let limit = RateLimit::new(1000).unwrap();
        let started = Instant::now();
        limit.acquire(2500).await;
        assert!(started.elapsed().as_millis() >= 1400);
    }
}
