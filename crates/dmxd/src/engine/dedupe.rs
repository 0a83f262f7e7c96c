//! Deduper: TTL+capacity LRU of command ids, persisted best-effort.

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

const CROCKFORD: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Maps an arbitrary id string to a 26-character ULID-shaped token. Strings
/// that already look like a ULID (26 chars, Crockford base32 alphabet) pass
/// through unchanged; anything else is hashed with the timestamp component
/// fixed to zero, so equal source strings always collide in the cache.
pub fn normalize_id(raw: &str) -> String {
    if raw.len() == 26 && raw.bytes().all(|b| CROCKFORD.contains(&b.to_ascii_uppercase())) {
        return raw.to_ascii_uppercase();
    }

    // FNV-1a 64-bit, twice with different seeds, gives 128 bits of
    // deterministic hash material for the 16 randomness characters.
    let h1 = fnv1a64(raw.as_bytes(), 0xcbf29ce484222325);
    let h2 = fnv1a64(raw.as_bytes(), 0x9e3779b97f4a7c15);

    let mut out = String::with_capacity(26);
    out.push_str("0000000000"); // 10-char zero timestamp
    let bits: u128 = ((h1 as u128) << 64) | (h2 as u128);
    for i in (0..16).rev() {
        let idx = ((bits >> (i * 5)) & 0x1f) as usize;
        out.push(CROCKFORD[idx] as char);
    }
    out
}

fn fnv1a64(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = seed;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeOutcome {
    Accept,
    Drop,
}

pub struct Deduper {
    capacity: usize,
    ttl_secs: u64,
    persist_path: Option<PathBuf>,
    inner: Mutex<LruCache<String, u64>>,
}

impl Deduper {
    pub fn new(capacity: usize, ttl_secs: u64, persist_path: Option<PathBuf>) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        let mut cache = LruCache::new(cap);
        if let Some(path) = &persist_path {
            if let Ok(bytes) = std::fs::read(path) {
                if let Ok(entries) = serde_json::from_slice::<HashMap<String, u64>>(&bytes) {
                    let now = now_unix();
                    for (id, insert_ts) in entries {
                        if now.saturating_sub(insert_ts) < ttl_secs {
                            cache.put(id, insert_ts);
                        }
                    }
                }
            }
        }
        Self {
            capacity,
            ttl_secs,
            persist_path,
            inner: Mutex::new(cache),
        }
    }

    /// Returns `Accept` if `id` is empty/missing (always accepted) or not
    /// seen within the TTL window; `Drop` otherwise. Accepting refreshes
    /// nothing: a dropped id's timestamp is never bumped, matching the
    /// "does not refresh" rule.
    pub async fn accept(&self, id: Option<&str>) -> DedupeOutcome {
        let Some(raw) = id.filter(|s| !s.is_empty()) else {
            return DedupeOutcome::Accept;
        };
        let key = normalize_id(raw);
        let now = now_unix();

        let mut cache = self.inner.lock().await;
        if let Some(&insert_ts) = cache.peek(&key) {
            if now.saturating_sub(insert_ts) < self.ttl_secs {
                return DedupeOutcome::Drop;
            }
        }
        cache.put(key, now);
        self.sweep_expired(&mut cache, now);
        drop(cache);
        self.persist().await;
        DedupeOutcome::Accept
    }

    fn sweep_expired(&self, cache: &mut LruCache<String, u64>, now: u64) {
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, &ts)| now.saturating_sub(ts) >= self.ttl_secs)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            cache.pop(&k);
        }
        while cache.len() > self.capacity {
            cache.pop_lru();
        }
    }

    async fn persist(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let cache = self.inner.lock().await;
        let entries: HashMap<String, u64> = cache.iter().map(|(id, &insert_ts)| (id.clone(), insert_ts)).collect();
        drop(cache);
        match serde_json::to_vec(&entries) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    tracing::warn!("dedupe persistence write failed: {e}");
                }
            }
            Err(e) => tracing::warn!("dedupe persistence serialize failed: {e}"),
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
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

    #[tokio::test]
    async fn empty_id_always_accepts() {
        let d = Deduper::new(10, 60, None);
        assert_eq!(d.accept(None).await, DedupeOutcome::Accept);
        assert_eq!(d.accept(Some("")).await, DedupeOutcome::Accept);
        assert_eq!(d.accept(Some("")).await, DedupeOutcome::Accept);
    }

    #[tokio::test]
    async fn duplicate_within_ttl_is_dropped() {
        let d = Deduper::new(10, 60, None);
        assert_eq!(d.accept(Some("X")).await, DedupeOutcome::Accept);
        assert_eq!(d.accept(Some("X")).await, DedupeOutcome::Drop);
    }

    #[tokio::test]
    async fn equal_non_ulid_strings_collide() {
        assert_eq!(normalize_id("hello"), normalize_id("hello"));
        assert_ne!(normalize_id("hello"), normalize_id("world"));
        assert_eq!(normalize_id("hello").len(), 26);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let d = Deduper::new(2, 60, None);
        d.accept(Some("a")).await;
        d.accept(Some("b")).await;
        d.accept(Some("c")).await;
        assert_eq!(d.len().await, 2);
    }
}
