//! OutputScheduler: per-universe FPS-clamped, identical-frame-suppressing
//! drivers to the OLA HTTP bridge and the Enttec USB-serial back-end.
//!
//! The transport write always happens outside the writer lock, after the
//! frame has been snapshotted, so a slow downstream endpoint never stalls a
//! command commit.

pub mod enttec;
pub mod ola;

use crate::error::OutputError;
use crate::metrics::MetricsRegistry;
use crate::model::{ChannelItem, Frame, UniverseId, FRAME_LEN};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[async_trait]
pub trait OutputBackend: Send + Sync {
    async fn send(&self, universe: UniverseId, frame: &Frame) -> Result<(), OutputError>;
}

/// A no-op backend used when `output_mode = null`; satisfies the scheduler
/// interface without ever touching a transport.
pub struct NullBackend;

#[async_trait]
impl OutputBackend for NullBackend {
    async fn send(&self, _universe: UniverseId, _frame: &Frame) -> Result<(), OutputError> {
        Ok(())
    }
}

struct SchedulerState {
    frame: Frame,
    last_sent: Option<Frame>,
    next_send_time: Instant,
    queue_suppressed: u64,
    ema_fps: f64,
}

pub struct OutputScheduler {
    universe: UniverseId,
    rate_interval: Duration,
    backend: Arc<dyn OutputBackend>,
    metrics: Arc<MetricsRegistry>,
    state: Mutex<SchedulerState>,
}

impl OutputScheduler {
    pub fn new(universe: UniverseId, fps: f64, backend: Arc<dyn OutputBackend>, metrics: Arc<MetricsRegistry>) -> Self {
        let fps = if fps <= 0.0 { 40.0 } else { fps };
        Self {
            universe,
            rate_interval: Duration::from_secs_f64(1.0 / fps),
            backend,
            metrics,
            state: Mutex::new(SchedulerState {
                frame: [0u8; FRAME_LEN],
                last_sent: None,
                next_send_time: Instant::now(),
                queue_suppressed: 0,
                ema_fps: 0.0,
            }),
        }
    }

    /// Mutate the held frame from a committed delta; returns whether any
    /// byte actually changed.
    pub async fn apply_patch(&self, items: &[ChannelItem]) -> bool {
        let mut state = self.state.lock().await;
        let mut changed = false;
        for item in items {
            let idx = (item.ch - 1) as usize;
            if state.frame[idx] != item.val {
                state.frame[idx] = item.val;
                changed = true;
            }
        }
        changed
    }

    /// Apply a dense frame (used after a full resync, e.g. on sACN
    /// composite), returning whether any byte changed.
    pub async fn apply_frame(&self, frame: &Frame) -> bool {
        let mut state = self.state.lock().await;
        if state.frame == *frame {
            return false;
        }
        state.frame = *frame;
        true
    }

    /// Best-effort final send, bypassing the rate guard and identical-frame
    /// suppression. Used only during graceful shutdown to push one last
    /// frame per universe before the transport is torn down.
    pub async fn flush(&self) {
        let snapshot = {
            let state = self.state.lock().await;
            state.frame
        };
        let _ = self.backend.send(self.universe, &snapshot).await;
    }

    pub async fn maybe_send(&self) {
        let u_label = self.universe.to_string();
        let now = Instant::now();

        let snapshot = {
            let mut state = self.state.lock().await;
            if now < state.next_send_time {
                state.queue_suppressed += 1;
                self.metrics.ola_frames_skipped_total.inc(&[&u_label, "rate"]);
                self.metrics.ola_queue_depth.set(&[&u_label], state.queue_suppressed as f64);
                return;
            }
            if state.last_sent == Some(state.frame) {
                self.metrics.ola_frames_skipped_total.inc(&[&u_label, "identical"]);
                return;
            }
            state.next_send_time = now + self.rate_interval;
            state.frame
        };

        let send_start = Instant::now();
        match self.backend.send(self.universe, &snapshot).await {
            Ok(()) => {}
            Err(OutputError::Timeout) => {
                self.metrics.ola_http_errors_total.inc(&[&u_label]);
                self.metrics.ola_http_errors_total_by_code.inc(&[&u_label, "timeout"]);
            }
            Err(OutputError::HttpStatus(code)) => {
                self.metrics.ola_http_errors_total.inc(&[&u_label]);
                self.metrics
                    .ola_http_errors_total_by_code
                    .inc(&[&u_label, &code.to_string()]);
            }
            Err(_) => {
                self.metrics.ola_http_errors_total.inc(&[&u_label]);
                self.metrics.ola_http_errors_total_by_code.inc(&[&u_label, "error"]);
            }
        }
        let elapsed = send_start.elapsed().as_secs_f64().max(1e-6);

        let mut state = self.state.lock().await;
        state.last_sent = Some(snapshot);
        state.ema_fps = 0.8 * state.ema_fps + 0.2 * (1.0 / elapsed);
        self.metrics.ola_last_fps.set(&[&u_label], state.ema_fps);
        self.metrics.ola_frames_total.inc(&[&u_label]);
        state.queue_suppressed = 0;
        self.metrics.ola_queue_depth.set(&[&u_label], 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OutputBackend for CountingBackend {
        async fn send(&self, _universe: UniverseId, _frame: &Frame) -> Result<(), OutputError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn identical_frames_are_suppressed() {
        let backend = Arc::new(CountingBackend { calls: AtomicUsize::new(0) });
        let metrics = Arc::new(MetricsRegistry::new());
        let sched = OutputScheduler::new(0, 1000.0, backend.clone(), metrics);

        sched.apply_patch(&[ChannelItem { ch: 1, val: 10 }]).await;
        sched.maybe_send().await;
        sched.maybe_send().await; // same frame, should be suppressed as identical
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_guard_skips_sends_within_interval() {
        let backend = Arc::new(CountingBackend { calls: AtomicUsize::new(0) });
        let metrics = Arc::new(MetricsRegistry::new());
        let sched = OutputScheduler::new(0, 1.0, backend.clone(), metrics); // 1 fps => 1s interval

        sched.apply_patch(&[ChannelItem { ch: 1, val: 10 }]).await;
        sched.maybe_send().await;
        sched.apply_patch(&[ChannelItem { ch: 1, val: 20 }]).await;
        sched.maybe_send().await; // within interval, rate-limited
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flush_sends_even_within_the_rate_window() {
        let backend = Arc::new(CountingBackend { calls: AtomicUsize::new(0) });
        let metrics = Arc::new(MetricsRegistry::new());
        let sched = OutputScheduler::new(0, 1.0, backend.clone(), metrics); // 1 fps => 1s interval

        sched.apply_patch(&[ChannelItem { ch: 1, val: 10 }]).await;
        sched.maybe_send().await;
        sched.apply_patch(&[ChannelItem { ch: 1, val: 20 }]).await;
        sched.maybe_send().await; // suppressed by the rate guard
        sched.flush().await; // bypasses the rate guard for a final shutdown send
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
