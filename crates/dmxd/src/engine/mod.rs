//! The command-ingest engine: canonicalization, deduplication, rate
//! limiting, and the single-writer-per-universe DMX state engine.

pub mod canonicalize;
pub mod dedupe;
pub mod dmx;
pub mod ratelimit;

pub use canonicalize::{canonicalize_items, validate, MAX_PATCH_ITEMS};
pub use dedupe::{DedupeOutcome, Deduper};
pub use dmx::DMXEngine;
pub use ratelimit::{RateLimitKey, RateLimiter};
