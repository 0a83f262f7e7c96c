//! RateLimiter: per `(protocol, client, universe)` fixed 1-second window.

use dashmap::DashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct RateLimitKey {
    pub proto: &'static str,
    pub client: String,
    pub universe: u32,
}

pub struct RateLimiter {
    limit: u32,
    buckets: DashMap<RateLimitKey, (u64, u32)>,
}

impl RateLimiter {
    pub fn new(limit_per_second: u32) -> Self {
        Self {
            limit: limit_per_second,
            buckets: DashMap::new(),
        }
    }

    /// Returns `true` if the request is allowed (and counts against the
    /// budget), `false` if the bucket for this window is exhausted.
    pub fn allow(&self, key: RateLimitKey) -> bool {
        let window = now_unix();
        let mut entry = self.buckets.entry(key).or_insert((window, 0));
        if entry.0 != window {
            entry.0 = window;
            entry.1 = 0;
        }
        if entry.1 >= self.limit {
            return false;
        }
        entry.1 += 1;
        true
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_budget_then_denies() {
        let rl = RateLimiter::new(3);
        let key = RateLimitKey {
            proto: "rest",
            client: "c1".into(),
            universe: 0,
        };
        assert!(rl.allow(key.clone()));
        assert!(rl.allow(key.clone()));
        assert!(rl.allow(key.clone()));
        assert!(!rl.allow(key.clone()));
    }

    #[test]
    fn distinct_keys_have_independent_budgets() {
        let rl = RateLimiter::new(1);
        let k1 = RateLimitKey {
            proto: "rest",
            client: "c1".into(),
            universe: 0,
        };
        let k2 = RateLimitKey {
            proto: "rest",
            client: "c2".into(),
            universe: 0,
        };
        assert!(rl.allow(k1));
        assert!(rl.allow(k2));
    }
}
