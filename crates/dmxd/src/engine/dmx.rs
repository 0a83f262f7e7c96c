//! DMXEngine: the single-writer-per-universe state engine.
//!
//! Each universe owns three contiguous 512-byte frames (`local`, `sacn`,
//! `output`); `output[i] == max(local[i], sacn[i])` after every committed
//! transition (I2). Different universes commit independently and in
//! parallel; `rev`/`ts` are global scalars serialized by a dedicated lock so
//! external consumers observe one total order of state transitions.

use crate::model::{ChannelItem, Delta, Frame, UniverseId, FRAME_LEN};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

struct UniverseState {
    local: Frame,
    sacn: Frame,
    output: Frame,
}

impl UniverseState {
    fn new() -> Self {
        Self {
            local: [0u8; FRAME_LEN],
            sacn: [0u8; FRAME_LEN],
            output: [0u8; FRAME_LEN],
        }
    }
}

struct RevisionClock {
    rev: u64,
    ts: i64,
}

pub struct DMXEngine {
    universes: DashMap<UniverseId, Arc<Mutex<UniverseState>>>,
    clock: Mutex<RevisionClock>,
}

impl Default for DMXEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DMXEngine {
    pub fn new() -> Self {
        Self {
            universes: DashMap::new(),
            clock: Mutex::new(RevisionClock { rev: 0, ts: 0 }),
        }
    }

    fn universe_handle(&self, u: UniverseId) -> Arc<Mutex<UniverseState>> {
        self.universes
            .entry(u)
            .or_insert_with(|| Arc::new(Mutex::new(UniverseState::new())))
            .clone()
    }

    /// Mutate `local[u]` with last-writer-wins semantics (the caller is
    /// expected to have already canonicalized `items`), then recompute
    /// output. Returns the output delta and the committed `(rev, ts)`; an
    /// empty delta means no byte of `local` actually changed, and `(rev,
    /// ts)` reflect the *current* committed values rather than a new one.
    pub async fn apply_local_patch(&self, u: UniverseId, items: &[ChannelItem]) -> (Delta, u64, i64) {
        let handle = self.universe_handle(u);
        let mut state = handle.lock().await;
        let mut changed = false;
        for item in items {
            let idx = (item.ch - 1) as usize;
            if state.local[idx] != item.val {
                state.local[idx] = item.val;
                changed = true;
            }
        }
        if !changed {
            drop(state);
            let clock = self.clock.lock().await;
            return (Vec::new(), clock.rev, clock.ts);
        }
        self.recompute_locked(&mut state).await
    }

    /// Replace `sacn[u]` byte-for-byte (short frames are right-padded with
    /// zero), then recompute output.
    pub async fn apply_sacn_composite(&self, u: UniverseId, frame: &[u8]) -> (Delta, u64, i64) {
        let handle = self.universe_handle(u);
        let mut state = handle.lock().await;
        let len = frame.len().min(FRAME_LEN);
        state.sacn[..len].copy_from_slice(&frame[..len]);
        for b in state.sacn[len..].iter_mut() {
            *b = 0;
        }
        self.recompute_locked(&mut state).await
    }

    /// Recompute `output[u] = max(local[u], sacn[u])`, bump the global
    /// revision exactly once if anything changed, and return the delta.
    pub async fn recompute_output(&self, u: UniverseId) -> (Delta, u64, i64) {
        let handle = self.universe_handle(u);
        let mut state = handle.lock().await;
        self.recompute_locked(&mut state).await
    }

    async fn recompute_locked(&self, state: &mut UniverseState) -> (Delta, u64, i64) {
        let mut delta: Delta = Vec::new();
        for i in 0..FRAME_LEN {
            let v = state.local[i].max(state.sacn[i]);
            if v != state.output[i] {
                state.output[i] = v;
                delta.push(((i + 1) as u16, v));
            }
        }
        if delta.is_empty() {
            let clock = self.clock.lock().await;
            return (delta, clock.rev, clock.ts);
        }
        let mut clock = self.clock.lock().await;
        clock.rev += 1;
        clock.ts = now_ms();
        (delta, clock.rev, clock.ts)
    }

    /// Dense copy of `output` for every known universe.
    pub async fn snapshot(&self) -> std::collections::BTreeMap<UniverseId, Frame> {
        let mut out = std::collections::BTreeMap::new();
        for entry in self.universes.iter() {
            let state = entry.value().lock().await;
            out.insert(*entry.key(), state.output);
        }
        out
    }

    pub async fn snapshot_universe(&self, u: UniverseId) -> Option<Frame> {
        let handle = self.universes.get(&u)?.clone();
        let state = handle.lock().await;
        Some(state.output)
    }

    /// Dense copy of `sacn[u]` for diagnostics.
    pub async fn sacn_frame(&self, u: UniverseId) -> Frame {
        let handle = self.universe_handle(u);
        let state = handle.lock().await;
        state.sacn
    }

    pub async fn current_rev_ts(&self) -> (u64, i64) {
        let clock = self.clock.lock().await;
        (clock.rev, clock.ts)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelItem;

    #[tokio::test]
    async fn patch_then_snapshot_round_trips() {
        let engine = DMXEngine::new();
        let items = vec![
            ChannelItem { ch: 1, val: 10 },
            ChannelItem { ch: 2, val: 20 },
            ChannelItem { ch: 3, val: 30 },
        ];
        let (delta, rev, _ts) = engine.apply_local_patch(0, &items).await;
        assert_eq!(delta.len(), 3);
        assert_eq!(rev, 1);
        let snap = engine.snapshot_universe(0).await.unwrap();
        assert_eq!(snap[0], 10);
        assert_eq!(snap[1], 20);
        assert_eq!(snap[2], 30);
    }

    #[tokio::test]
    async fn output_is_max_of_local_and_sacn() {
        let engine = DMXEngine::new();
        engine
            .apply_local_patch(0, &[ChannelItem { ch: 1, val: 6 }])
            .await;
        let mut sacn_frame = [0u8; 512];
        sacn_frame[0] = 10;
        engine.apply_sacn_composite(0, &sacn_frame).await;
        let snap = engine.snapshot_universe(0).await.unwrap();
        assert_eq!(snap[0], 10);

        engine
            .apply_local_patch(0, &[ChannelItem { ch: 1, val: 20 }])
            .await;
        let snap = engine.snapshot_universe(0).await.unwrap();
        assert_eq!(snap[0], 20);
    }

    #[tokio::test]
    async fn no_op_patch_does_not_bump_revision() {
        let engine = DMXEngine::new();
        engine
            .apply_local_patch(0, &[ChannelItem { ch: 1, val: 5 }])
            .await;
        let (_, rev1, _) = engine.apply_local_patch(0, &[ChannelItem { ch: 1, val: 5 }]).await;
        assert_eq!(rev1, 1);
    }

    #[tokio::test]
    async fn short_sacn_frame_is_zero_padded() {
        let engine = DMXEngine::new();
        engine.apply_sacn_composite(0, &[5, 6, 7]).await;
        let frame = engine.sacn_frame(0).await;
        assert_eq!(frame[0], 5);
        assert_eq!(frame[3], 0);
        assert_eq!(frame[511], 0);
    }

    #[tokio::test]
    async fn revision_is_global_monotonic_across_universes() {
        let engine = DMXEngine::new();
        let (_, rev_a, _) = engine.apply_local_patch(0, &[ChannelItem { ch: 1, val: 1 }]).await;
        let (_, rev_b, _) = engine.apply_local_patch(1, &[ChannelItem { ch: 1, val: 1 }]).await;
        assert!(rev_b > rev_a);
    }
}
