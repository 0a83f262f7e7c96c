//! sACN source table: per-`(universe, cid)` tracking, sequence ordering,
//! and priority+HTP compositing.

use super::packet::SacnPacket;
use crate::model::UniverseId;
use dashmap::DashMap;
use std::time::{SystemTime, UNIX_EPOCH};

struct SourceRecord {
    priority: u8,
    last_seq: u8,
    last_seen_ms: u64,
    frame: Vec<u8>, // length P-1 as received; padded to 512 at composite time
}

pub struct SourceTable {
    sources: DashMap<(UniverseId, [u8; 16]), SourceRecord>,
}

impl Default for SourceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceTable {
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
        }
    }

    /// Apply the wraparound-safe sequence policy; returns `true` if the
    /// packet updated (or created) the source record, `false` if it was
    /// dropped as out-of-order.
    pub fn update(&self, packet: &SacnPacket) -> bool {
        let key = (packet.universe, packet.cid);
        let now = now_ms();

        if let Some(mut existing) = self.sources.get_mut(&key) {
            let diff = packet.sequence.wrapping_sub(existing.last_seq);
            if diff > 128 {
                return false;
            }
            existing.last_seq = packet.sequence;
            existing.last_seen_ms = now;
            existing.priority = packet.priority;
            existing.frame = packet.dmx.clone();
            true
        } else {
            self.sources.insert(
                key,
                SourceRecord {
                    priority: packet.priority,
                    last_seq: packet.sequence,
                    last_seen_ms: now,
                    frame: packet.dmx.clone(),
                },
            );
            true
        }
    }

    /// Purge stale sources, then composite the highest-priority tier for
    /// `universe` via per-channel HTP. If no sources remain after purging,
    /// the composite is the zero frame at priority 0.
    pub fn composite(&self, universe: UniverseId, timeout_ms: u64) -> (Vec<u8>, u8) {
        let now = now_ms();
        self.sources
            .retain(|k, v| k.0 != universe || now.saturating_sub(v.last_seen_ms) <= timeout_ms);

        let records: Vec<_> = self
            .sources
            .iter()
            .filter(|e| e.key().0 == universe)
            .map(|e| (e.priority, e.frame.clone()))
            .collect();

        if records.is_empty() {
            return (vec![0u8; 512], 0);
        }

        let max_priority = records.iter().map(|(p, _)| *p).max().unwrap();
        let mut composite = vec![0u8; 512];
        for (_, frame) in records.iter().filter(|(p, _)| *p == max_priority) {
            for (i, &v) in frame.iter().enumerate().take(512) {
                if v > composite[i] {
                    composite[i] = v;
                }
            }
        }
        (composite, max_priority)
    }

    pub fn source_count(&self, universe: UniverseId) -> usize {
        self.sources.iter().filter(|e| e.key().0 == universe).count()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// CSV of universe numbers and inclusive `a-b` ranges; an empty string
/// accepts every universe.
pub struct UniverseFilter {
    ranges: Vec<(UniverseId, UniverseId)>,
    accept_all: bool,
}

impl UniverseFilter {
    pub fn parse(csv: &str) -> Self {
        let csv = csv.trim();
        if csv.is_empty() {
            return Self {
                ranges: Vec::new(),
                accept_all: true,
            };
        }
        let mut ranges = Vec::new();
        for part in csv.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some((lo, hi)) = part.split_once('-') {
                if let (Ok(lo), Ok(hi)) = (lo.trim().parse(), hi.trim().parse()) {
                    ranges.push((lo, hi));
                }
            } else if let Ok(v) = part.parse() {
                ranges.push((v, v));
            }
        }
        Self {
            ranges,
            accept_all: false,
        }
    }

    pub fn allows(&self, universe: UniverseId) -> bool {
        self.accept_all || self.ranges.iter().any(|&(lo, hi)| universe >= lo && universe <= hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_accepts_all() {
        let f = UniverseFilter::parse("");
        assert!(f.allows(0));
        assert!(f.allows(9999));
    }

    #[test]
    fn parses_csv_with_ranges() {
        let f = UniverseFilter::parse("1, 3-5, 10");
        assert!(f.allows(1));
        assert!(!f.allows(2));
        assert!(f.allows(3));
        assert!(f.allows(5));
        assert!(f.allows(10));
        assert!(!f.allows(11));
    }
}
