//! Sliding-window rate limits.
//!
//! Counters live in the shared cache under
//! `rl:{policy}:{identity}:{window}`. The classic two-bucket estimate is
//! used: the previous fixed window's count is weighted by its remaining
//! overlap with the sliding window, so bursts right after a window boundary
//! do not double the budget. Admin routes never pass through here.

use std::time::Duration;

use crate::cache::SharedCache;

/// One route-class policy.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub name: &'static str,
    pub limit: u32,
    pub window: Duration,
}

pub const LOGIN: Policy = Policy {
    name: "login",
    limit: 10,
    window: Duration::from_secs(60),
};

pub const ENROLLMENT: Policy = Policy {
    name: "enrollment",
    limit: 5,
    window: Duration::from_secs(60),
};

pub const VOTE: Policy = Policy {
    name: "vote",
    limit: 6,
    window: Duration::from_secs(60),
};

pub const DEFAULT: Policy = Policy {
    name: "default",
    limit: 60,
    window: Duration::from_secs(60),
};

/// Denied result: how long the caller should wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter {
    pub seconds: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    cache: SharedCache,
}

impl RateLimiter {
    pub fn new(cache: SharedCache) -> Self {
        Self { cache }
    }

    /// Count this hit and decide. `Err` carries the retry-after hint.
    pub fn check(&self, policy: &Policy, identity: &str) -> Result<(), RetryAfter> {
        self.check_at(policy, identity, now_millis())
    }

    fn check_at(&self, policy: &Policy, identity: &str, now_ms: u64) -> Result<(), RetryAfter> {
        let window_ms = policy.window.as_millis() as u64;
        let window_index = now_ms / window_ms;
        let elapsed_in_window = now_ms % window_ms;

        let current_key = format!("rl:{}:{identity}:{window_index}", policy.name);
        let previous_key = format!("rl:{}:{identity}:{}", policy.name, window_index.wrapping_sub(1));

        // Keys expire two windows out, so stale buckets clean themselves up.
        let ttl = Some(policy.window * 2);
        let current = self.cache.incr_by(&current_key, 1, ttl);
        let previous = self.cache.get_int(&previous_key).unwrap_or(0);

        let previous_weight = 1.0 - (elapsed_in_window as f64 / window_ms as f64);
        let estimate = current as f64 + previous as f64 * previous_weight;

        if estimate > policy.limit as f64 {
            let seconds = ((window_ms - elapsed_in_window) / 1000).max(1);
            return Err(RetryAfter { seconds });
        }
        Ok(())
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}
