//! Per-endpoint external-request pacer.
//!
//! §5 calls out a known bug class: multiple callers read `last_call_time`,
//! each computes a small sleep, and all wake up near-simultaneously because
//! nothing serializes the *read* with the *sleep*. `governor`'s GCRA-based
//! limiter sidesteps that by construction — `until_ready()` reserves a slot
//! atomically against the limiter's internal cell before ever awaiting, so a
//! second caller's wait always accounts for the first caller's reservation.
//! This module exists to give every leader-monitor/CLOB call site a single,
//! named, per-endpoint instance of that limiter rather than each rolling its
//! own pacing.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovernorLimiter};

type Limiter = GovernorLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Registry of named rate limiters, one per external endpoint.
pub struct RateLimiterRegistry {
    limiters: DashMap<String, Arc<Limiter>>,
    default_interval: Duration,
}

impl RateLimiterRegistry {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            limiters: DashMap::new(),
            default_interval,
        }
    }

    /// Configure (or reconfigure) the interval for a named endpoint.
    pub fn configure(&self, endpoint: &str, interval: Duration) {
        self.limiters.insert(endpoint.to_string(), Arc::new(build_limiter(interval)));
    }

    fn limiter_for(&self, endpoint: &str) -> Arc<Limiter> {
        if let Some(existing) = self.limiters.get(endpoint) {
            return existing.clone();
        }
        let built = Arc::new(build_limiter(self.default_interval));
        self.limiters.insert(endpoint.to_string(), built.clone());
        built
    }

    /// Block the caller until a slot for `endpoint` is available. All
    /// concurrent callers share one limiter instance per endpoint, so the
    /// pacing is honored across the whole process, not just within one
    /// leader-polling task.
    pub async fn acquire(&self, endpoint: &str) {
        let limiter = self.limiter_for(endpoint);
        limiter.until_ready().await;
    }
}

fn build_limiter(interval: Duration) -> Limiter {
    let interval = interval.max(Duration::from_millis(1));
    let quota = Quota::with_period(interval)
        .expect("rate limiter interval must be non-zero")
        .allow_burst(NonZeroU32::new(1).expect("1 is non-zero"));
    GovernorLimiter::direct(quota)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn consecutive_requests_are_spaced_by_interval() {
        let registry = Arc::new(RateLimiterRegistry::new(Duration::from_millis(50)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.acquire("clob").await;
                start.elapsed()
            }));
        }

        let mut elapsed: Vec<Duration> = Vec::new();
        for h in handles {
            elapsed.push(h.await.unwrap());
        }
        elapsed.sort();

        for pair in elapsed.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(45));
        }
    }

    #[tokio::test]
    async fn endpoints_are_independent() {
        let registry = RateLimiterRegistry::new(Duration::from_millis(200));
        let start = Instant::now();
        registry.acquire("clob").await;
        registry.acquire("polygon_rpc").await;
        // Different endpoints must not share a pacing budget.
        assert!(start.elapsed() < Duration::from_millis(150));
    }
}
