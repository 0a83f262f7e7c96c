//! WSHub: fan-out of committed output deltas to WebSocket subscribers.
//!
//! Broadcast is a `tokio::sync::broadcast` channel: `send_payload` never
//! blocks on a slow reader, so one stalled subscriber cannot delay another.
//! Each connection's own task (see `api::ws`) applies the bounded
//! `send_timeout` against its own socket write and disconnects on timeout or
//! error — the fan-out failure mode is disconnection, never head-of-line
//! blocking.

use crate::model::{Delta, UniverseId};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsServerMessage {
    #[serde(rename = "state.update")]
    StateUpdate {
        rev: u64,
        ts: i64,
        universe: UniverseId,
        delta: Delta,
        full: bool,
    },
}

const BROADCAST_CAPACITY: usize = 1024;

pub struct WsHub {
    tx: broadcast::Sender<WsServerMessage>,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsServerMessage> {
        self.tx.subscribe()
    }

    /// Best-effort fan-out; returns the number of live subscribers at send
    /// time (0 if none, which is not an error).
    pub fn send_payload(&self, msg: WsServerMessage) -> usize {
        self.tx.send(msg).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_broadcast_deltas() {
        let hub = WsHub::new();
        let mut rx = hub.subscribe();
        hub.send_payload(WsServerMessage::StateUpdate {
            rev: 1,
            ts: 0,
            universe: 0,
            delta: vec![(1, 10)],
            full: false,
        });
        let msg = rx.recv().await.unwrap();
        match msg {
            WsServerMessage::StateUpdate { rev, .. } => assert_eq!(rev, 1),
        }
    }

    #[tokio::test]
    async fn send_with_no_subscribers_does_not_error() {
        let hub = WsHub::new();
        let n = hub.send_payload(WsServerMessage::StateUpdate {
            rev: 1,
            ts: 0,
            universe: 0,
            delta: vec![],
            full: false,
        });
        assert_eq!(n, 0);
    }
}
