//! SACNReceiver: E1.31 datagram parsing, per-source tracking, sequence
//! ordering, and priority/HTP compositing.

mod packet;
mod source;

pub use packet::{parse_packet, SacnPacket};
pub use source::{SourceTable, UniverseFilter};

use crate::engine::DMXEngine;
use crate::metrics::MetricsRegistry;
use crate::model::EngineCommit;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct SacnReceiver {
    engine: Arc<DMXEngine>,
    metrics: Arc<MetricsRegistry>,
    sources: SourceTable,
    filter: UniverseFilter,
    source_timeout_ms: u64,
    commit_tx: Option<mpsc::UnboundedSender<EngineCommit>>,
}

impl SacnReceiver {
    pub fn new(
        engine: Arc<DMXEngine>,
        metrics: Arc<MetricsRegistry>,
        allowed_universes_csv: &str,
        source_timeout_ms: u64,
    ) -> Self {
        Self {
            engine,
            metrics,
            sources: SourceTable::new(),
            filter: UniverseFilter::parse(allowed_universes_csv),
            source_timeout_ms,
            commit_tx: None,
        }
    }

    /// Attach a commit notifier so every composited sACN delta is fanned
    /// out to the WSHub and output schedulers the same way a direct patch
    /// or fade tick is.
    pub fn with_commit_sender(mut self, commit_tx: mpsc::UnboundedSender<EngineCommit>) -> Self {
        self.commit_tx = Some(commit_tx);
        self
    }

    /// Bind the UDP socket and run the receive loop until `cancel` fires.
    pub async fn run(&self, bind_addr: &str, cancel: CancellationToken) -> std::io::Result<()> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                recv = socket.recv(&mut buf) => {
                    let n = match recv {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::warn!("sacn recv error: {e}");
                            continue;
                        }
                    };
                    self.handle_datagram(&buf[..n]).await;
                }
            }
        }
    }

    pub async fn handle_datagram(&self, datagram: &[u8]) {
        let packet = match parse_packet(datagram) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!("dropping malformed sacn packet: {e}");
                return;
            }
        };

        if !self.filter.allows(packet.universe) {
            return;
        }

        let u_label = packet.universe.to_string();
        let accepted = self.sources.update(&packet);
        if !accepted {
            self.metrics.sacn_ooo_total.inc(&[&u_label]);
            return;
        }
        self.metrics.sacn_packets_total.inc(&[&u_label]);

        let (composite, winning_priority) =
            self.sources.composite(packet.universe, self.source_timeout_ms);

        self.metrics
            .sacn_sources
            .set(&[&u_label], self.sources.source_count(packet.universe) as f64);
        self.metrics
            .sacn_priority_current
            .set(&[&u_label], winning_priority as f64);

        let (delta, rev, ts) = self.engine.apply_sacn_composite(packet.universe, &composite).await;
        if delta.is_empty() {
            return;
        }
        if let Some(tx) = &self.commit_tx {
            let _ = tx.send(EngineCommit {
                universe: packet.universe,
                delta,
                rev,
                ts,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_test_packet(universe: u16, cid: [u8; 16], seq: u8, priority: u8, slot0: u8) -> Vec<u8> {
        let mut pkt = vec![0u8; 126 + 512];
        pkt[0..2].copy_from_slice(&0x0010u16.to_be_bytes());
        pkt[2..4].copy_from_slice(&0x0000u16.to_be_bytes());
        pkt[4..16].copy_from_slice(b"ASC-E1.17\0\0\0");
        pkt[18..22].copy_from_slice(&4u32.to_be_bytes());
        pkt[22..38].copy_from_slice(&cid);
        pkt[40..44].copy_from_slice(&2u32.to_be_bytes());
        pkt[108] = priority;
        pkt[111] = seq;
        pkt[113..115].copy_from_slice(&universe.to_be_bytes());
        pkt[117] = 0x02;
        pkt[123..125].copy_from_slice(&513u16.to_be_bytes());
        pkt[125] = 0x00;
        pkt[126] = slot0;
        pkt
    }

    #[tokio::test]
    async fn priority_and_htp_composite() {
        let engine = Arc::new(DMXEngine::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let recv = SacnReceiver::new(engine.clone(), metrics, "", 5_000);

        recv.handle_datagram(&build_test_packet(0, [1u8; 16], 0, 100, 10)).await;
        recv.handle_datagram(&build_test_packet(0, [2u8; 16], 0, 100, 20)).await;
        let snap = engine.snapshot_universe(0).await.unwrap();
        assert_eq!(snap[0], 20);

        recv.handle_datagram(&build_test_packet(0, [3u8; 16], 0, 120, 7)).await;
        let snap = engine.snapshot_universe(0).await.unwrap();
        assert_eq!(snap[0], 7);
    }

    #[tokio::test]
    async fn out_of_order_sequence_is_dropped() {
        let engine = Arc::new(DMXEngine::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let recv = SacnReceiver::new(engine.clone(), metrics, "", 5_000);

        recv.handle_datagram(&build_test_packet(0, [1u8; 16], 10, 100, 50)).await;
        // seq jumps backward far enough to be treated as out-of-order.
        recv.handle_datagram(&build_test_packet(0, [1u8; 16], 5, 100, 99)).await;
        let snap = engine.snapshot_universe(0).await.unwrap();
        assert_eq!(snap[0], 50);
    }

    #[tokio::test]
    async fn universe_filter_rejects_non_allowed() {
        let engine = Arc::new(DMXEngine::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let recv = SacnReceiver::new(engine.clone(), metrics, "1,3-5", 5_000);

        recv.handle_datagram(&build_test_packet(0, [1u8; 16], 0, 100, 5)).await;
        assert!(engine.snapshot_universe(0).await.is_none());

        recv.handle_datagram(&build_test_packet(3, [1u8; 16], 0, 100, 9)).await;
        let snap = engine.snapshot_universe(3).await.unwrap();
        assert_eq!(snap[0], 9);
    }
}
