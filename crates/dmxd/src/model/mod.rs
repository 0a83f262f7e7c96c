//! Wire data model shared by every ingress front-channel and by the engine.

mod ack;
mod command;

pub use ack::Ack;
pub use command::{ChannelItem, Command, Easing, FixtureAttrValue};

/// A DMX universe id, `[0, 63_636]` on the wire; stored as `u32` for
/// hashmap-key ergonomics.
pub type UniverseId = u32;

/// A dense 512-slot DMX frame, `slot[0]` corresponding to wire channel 1.
pub type Frame = [u8; 512];

pub const FRAME_LEN: usize = 512;

pub fn zero_frame() -> Frame {
    [0u8; FRAME_LEN]
}

/// An ordered list of changed `(channel, value)` pairs, 1-indexed channel
/// numbers matching the wire convention.
pub type Delta = Vec<(u16, u8)>;

/// One notification per committed output delta, regardless of which
/// collaborator produced it (a direct patch, a fade tick, or an sACN
/// composite) — the supervisor fans every `EngineCommit` out to the WSHub
/// and the matching `OutputScheduler` the same way.
#[derive(Debug, Clone)]
pub struct EngineCommit {
    pub universe: UniverseId,
    pub delta: Delta,
    pub rev: u64,
    pub ts: i64,
}
