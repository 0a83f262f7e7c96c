//! FadeEngine: a periodic interpolator with LTP (latest-takes-precedence)
//! cancellation against direct patches.

use crate::engine::DMXEngine;
use crate::metrics::MetricsRegistry;
use crate::model::{ChannelItem, Easing, EngineCommit, UniverseId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// `f(t)` for each easing curve, `t` and the result both in `[0, 1]`.
pub fn ease(easing: Easing, t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    match easing {
        Easing::Linear => t,
        Easing::SCurve => t * t * (3.0 - 2.0 * t),
        Easing::Expo => {
            if t == 0.0 {
                0.0
            } else {
                2f64.powf(10.0 * (t - 1.0)).min(1.0)
            }
        }
    }
}

/// `round(sv + (tv - sv) * f(t))` clamped to `[0, 255]`, IEEE-754 double,
/// round-half-to-even (the platform default for `f64::round_ties_even`).
fn interpolate(sv: u8, tv: u8, f: f64) -> u8 {
    let value = sv as f64 + (tv as f64 - sv as f64) * f;
    value.round_ties_even().clamp(0.0, 255.0) as u8
}

struct FadeJob {
    start_values: HashMap<u16, u8>,
    targets: HashMap<u16, u8>,
    start_ms: i64,
    duration_ms: u64,
    easing: Easing,
    queued_at: HashMap<u16, Instant>,
    evaluated: std::collections::HashSet<u16>,
}

struct UniverseJobs {
    jobs: Vec<FadeJob>,
}

pub struct FadeEngine {
    engine: Arc<DMXEngine>,
    metrics: Arc<MetricsRegistry>,
    tick_hz: u32,
    jobs: Mutex<HashMap<UniverseId, UniverseJobs>>,
}

impl FadeEngine {
    pub fn new(engine: Arc<DMXEngine>, metrics: Arc<MetricsRegistry>, tick_hz: u32) -> Self {
        Self {
            engine,
            metrics,
            tick_hz: tick_hz.max(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule a new fade job; `items` carry target values, start values
    /// are captured from the engine's current committed output.
    pub async fn add_fade(&self, u: UniverseId, items: &[ChannelItem], duration_ms: u64, easing: Easing) {
        let current = self.engine.snapshot_universe(u).await.unwrap_or([0u8; 512]);
        let now_ms = now_ms();
        let now_instant = Instant::now();

        let mut start_values = HashMap::new();
        let mut targets = HashMap::new();
        let mut queued_at = HashMap::new();
        for item in items {
            let idx = (item.ch - 1) as usize;
            start_values.insert(item.ch, current[idx]);
            targets.insert(item.ch, item.val);
            queued_at.insert(item.ch, now_instant);
        }

        let n = targets.len() as f64;
        let mut jobs = self.jobs.lock().await;
        jobs.entry(u)
            .or_insert_with(|| UniverseJobs { jobs: Vec::new() })
            .jobs
            .push(FadeJob {
                start_values,
                targets,
                start_ms: now_ms,
                duration_ms,
                easing,
                queued_at,
                evaluated: std::collections::HashSet::new(),
            });

        let u_label = u.to_string();
        self.metrics.fades_started_total.inc_by(&[&u_label], n as u64);
        self.refresh_gauges(&mut jobs, u);
    }

    /// LTP cancellation: remove `chans` from every in-flight job on `u`;
    /// jobs left with no targets are dropped.
    pub async fn cancel_channels(&self, u: UniverseId, chans: &[u16], reason: &str) {
        let mut jobs = self.jobs.lock().await;
        let Some(uj) = jobs.get_mut(&u) else { return };
        let u_label = u.to_string();
        let mut cancelled = 0u64;
        for job in uj.jobs.iter_mut() {
            for ch in chans {
                if job.targets.remove(ch).is_some() {
                    job.start_values.remove(ch);
                    job.queued_at.remove(ch);
                    job.evaluated.remove(ch);
                    cancelled += 1;
                }
            }
        }
        uj.jobs.retain(|job| !job.targets.is_empty());
        if cancelled > 0 {
            self.metrics
                .fades_cancelled_total
                .inc_by(&[&u_label, reason], cancelled);
        }
        self.refresh_gauges(&mut jobs, u);
    }

    fn refresh_gauges(&self, jobs: &mut HashMap<UniverseId, UniverseJobs>, u: UniverseId) {
        let u_label = u.to_string();
        let (active_channels, active_jobs) = jobs
            .get(&u)
            .map(|uj| {
                let chans: std::collections::HashSet<u16> =
                    uj.jobs.iter().flat_map(|j| j.targets.keys().copied()).collect();
                (chans.len(), uj.jobs.len())
            })
            .unwrap_or((0, 0));
        self.metrics.fade_active.set(&[&u_label], active_channels as f64);
        self.metrics.fade_jobs_active.set(&[&u_label], active_jobs as f64);
    }

    /// Run the ticker loop until `cancel` is triggered. Each tick walks
    /// every universe with active jobs, applies the aggregated per-channel
    /// deltas through `DMXEngine::apply_local_patch`, and emits a
    /// `EngineCommit` for every universe whose committed delta is non-empty.
    pub async fn run(&self, commit_tx: mpsc::UnboundedSender<EngineCommit>, cancel: CancellationToken) {
        let period = std::time::Duration::from_secs_f64(1.0 / self.tick_hz as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let tick_start = Instant::now();
                    self.tick(&commit_tx).await;
                    let elapsed_ms = tick_start.elapsed().as_secs_f64() * 1000.0;
                    self.metrics.fade_tick_ms.observe(&[], elapsed_ms);
                }
            }
        }
    }

    async fn tick(&self, commit_tx: &mpsc::UnboundedSender<EngineCommit>) {
        let now_ms = now_ms();
        let universes: Vec<UniverseId> = {
            let jobs = self.jobs.lock().await;
            jobs.keys().copied().collect()
        };

        for u in universes {
            let u_label = u.to_string();
            self.metrics.fade_ticks_total.inc(&[&u_label]);

            let mut aggregated: HashMap<u16, u8> = HashMap::new();
            let mut done_channels: Vec<u16> = Vec::new();
            let mut queue_delays: Vec<(u16, f64)> = Vec::new();

            {
                let mut jobs = self.jobs.lock().await;
                let Some(uj) = jobs.get_mut(&u) else { continue };
                for job in uj.jobs.iter_mut() {
                    let t = if job.duration_ms == 0 {
                        1.0
                    } else {
                        (now_ms - job.start_ms) as f64 / job.duration_ms as f64
                    };
                    let f = ease(job.easing, t);
                    for (&ch, &tv) in job.targets.iter() {
                        let sv = *job.start_values.get(&ch).unwrap_or(&tv);
                        let v = interpolate(sv, tv, f);
                        aggregated.insert(ch, v); // later job in iteration order wins on collision
                        if !job.evaluated.contains(&ch) {
                            if let Some(queued) = job.queued_at.get(&ch) {
                                queue_delays.push((ch, queued.elapsed().as_secs_f64() * 1000.0));
                            }
                            job.evaluated.insert(ch);
                        }
                    }
                    if now_ms >= job.start_ms + job.duration_ms as i64 {
                        done_channels.extend(job.targets.keys().copied());
                    }
                }
                uj.jobs.retain(|job| now_ms < job.start_ms + job.duration_ms as i64);
            }

            for (_, delay_ms) in &queue_delays {
                self.metrics.fade_queue_delay_ms.observe(&[&u_label], *delay_ms);
            }

            if !done_channels.is_empty() {
                self.metrics
                    .fades_cancelled_total
                    .inc_by(&[&u_label, "done"], done_channels.len() as u64);
            }

            {
                let mut jobs = self.jobs.lock().await;
                self.refresh_gauges(&mut jobs, u);
            }

            if aggregated.is_empty() {
                continue;
            }
            let items: Vec<ChannelItem> = aggregated
                .into_iter()
                .map(|(ch, val)| ChannelItem { ch, val })
                .collect();
            let (delta, rev, ts) = self.engine.apply_local_patch(u, &items).await;
            if !delta.is_empty() {
                let _ = commit_tx.send(EngineCommit {
                    universe: u,
                    delta,
                    rev,
                    ts,
                });
            }
        }
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

    #[test]
    fn linear_easing_is_identity() {
        assert_eq!(ease(Easing::Linear, 0.0), 0.0);
        assert_eq!(ease(Easing::Linear, 0.5), 0.5);
        assert_eq!(ease(Easing::Linear, 1.0), 1.0);
    }

    #[test]
    fn s_curve_hits_boundaries_exactly() {
        assert_eq!(ease(Easing::SCurve, 0.0), 0.0);
        assert_eq!(ease(Easing::SCurve, 1.0), 1.0);
    }

    #[test]
    fn expo_hits_boundaries_exactly() {
        assert_eq!(ease(Easing::Expo, 0.0), 0.0);
        assert_eq!(ease(Easing::Expo, 1.0), 1.0);
    }

    #[test]
    fn interpolate_is_monotone_for_linear_increasing_fade() {
        let mut prev = interpolate(10, 200, 0.0);
        for i in 1..=10 {
            let f = i as f64 / 10.0;
            let v = interpolate(10, 200, f);
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn interpolate_exact_at_endpoints() {
        assert_eq!(interpolate(10, 200, 0.0), 10);
        assert_eq!(interpolate(10, 200, 1.0), 200);
    }

    #[tokio::test]
    async fn add_then_cancel_channels_drops_empty_jobs() {
        let engine = Arc::new(DMXEngine::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let fade = FadeEngine::new(engine, metrics, 44);
        fade.add_fade(0, &[ChannelItem { ch: 1, val: 200 }], 1000, Easing::Linear)
            .await;
        {
            let jobs = fade.jobs.lock().await;
            assert_eq!(jobs.get(&0).unwrap().jobs.len(), 1);
        }
        fade.cancel_channels(0, &[1], "ltp").await;
        {
            let jobs = fade.jobs.lock().await;
            assert!(jobs.get(&0).map(|uj| uj.jobs.is_empty()).unwrap_or(true));
        }
    }

    proptest::proptest! {
        #[test]
        fn linear_interpolation_is_monotone_between_endpoints(sv in proptest::prelude::any::<u8>(), tv in proptest::prelude::any::<u8>()) {
            let mut prev = interpolate(sv, tv, 0.0);
            for i in 0..=20 {
                let f = i as f64 / 20.0;
                let v = interpolate(sv, tv, f);
                if tv >= sv {
                    proptest::prop_assert!(v >= prev);
                } else {
                    proptest::prop_assert!(v <= prev);
                }
                prev = v;
            }
        }

        #[test]
        fn interpolation_hits_exact_endpoints_for_any_values(sv in proptest::prelude::any::<u8>(), tv in proptest::prelude::any::<u8>()) {
            proptest::prop_assert_eq!(interpolate(sv, tv, 0.0), sv);
            proptest::prop_assert_eq!(interpolate(sv, tv, 1.0), tv);
        }

        #[test]
        fn every_easing_is_exact_at_boundaries(t_is_one in proptest::prelude::any::<bool>()) {
            let t = if t_is_one { 1.0 } else { 0.0 };
            for easing in [Easing::Linear, Easing::SCurve, Easing::Expo] {
                let f = ease(easing, t);
                proptest::prop_assert_eq!(f, t);
            }
        }
    }
}
