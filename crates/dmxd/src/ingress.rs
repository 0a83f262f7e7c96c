//! IngressRouter: the shared command pipeline bound by REST, WS, and MQTT
//! front-channels alike — canonicalize → rate-limit → dedupe → route to the
//! fade path or the immediate path → broadcast + scheduled output.

use crate::engine::{canonicalize_items, validate, DMXEngine, DedupeOutcome, Deduper, RateLimitKey, RateLimiter};
use crate::error::{ErrorKind, FieldError};
use crate::fade::FadeEngine;
use crate::metrics::MetricsRegistry;
use crate::model::{Ack, ChannelItem, Command, FixtureAttrValue, UniverseId};
use crate::output::{NullBackend, OutputBackend, OutputScheduler};
use crate::ws::{WsHub, WsServerMessage};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Resolves a `fixture.set` command to a `(universe, items)` patch. The
/// actual fixture-profile/patch loading is an external collaborator (a
/// pure function over profile + attrs); this crate only needs a seam to
/// call into it.
pub trait FixtureResolver: Send + Sync {
    fn resolve(&self, fixture_id: &str, attrs: &HashMap<String, FixtureAttrValue>) -> Option<(UniverseId, Vec<ChannelItem>)>;
}

/// No fixture profiles are known; every `fixture.set` is rejected as
/// `NOT_FOUND`. Supervisors that wire in a real profile store replace this.
pub struct NullFixtureResolver;

impl FixtureResolver for NullFixtureResolver {
    fn resolve(&self, _fixture_id: &str, _attrs: &HashMap<String, FixtureAttrValue>) -> Option<(UniverseId, Vec<ChannelItem>)> {
        None
    }
}

pub struct IngressRouter {
    pub engine: Arc<DMXEngine>,
    pub fade: Arc<FadeEngine>,
    pub dedupe: Arc<Deduper>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsRegistry>,
    pub ws_hub: Arc<WsHub>,
    pub outputs: Arc<DashMap<UniverseId, Arc<OutputScheduler>>>,
    pub fixtures: Arc<dyn FixtureResolver>,
    pub ws_send_timeout_ms: u64,
    /// Bearer token required on `/ws` connections; `None` means the
    /// endpoint is open (the distilled spec allows no auth beyond this).
    pub ws_bearer_token: Option<String>,
    pub output_backend: Arc<dyn OutputBackend>,
    pub output_fps: f64,
    /// Tracks whether the configured downstream bus (MQTT broker) is
    /// connected. `true` when no bus is configured at all — readiness
    /// then depends only on the engine, which is always initialized by
    /// construction.
    pub bus_connected: Arc<std::sync::atomic::AtomicBool>,
}

impl IngressRouter {
    /// Run the full pipeline for one command. `proto` is one of
    /// `"rest"`/`"ws"`/`"mqtt"`; `client` identifies the caller for rate
    /// limiting (a remote IP, a WS connection id, or the MQTT client id).
    pub async fn submit(&self, cmd: Command, proto: &'static str, client: &str) -> Ack {
        let ts = now_ms();
        let id = cmd.id().unwrap_or("").to_string();
        let cmd_type = wire_type(&cmd);

        if let Err((reason, errors)) = validate(&cmd) {
            self.metrics.cmds_total.inc(&[proto, cmd_type, "false"]);
            return Ack::rejected(id, reason, errors, ts);
        }

        let universe = cmd.universe();
        if let Some(u) = universe {
            let key = RateLimitKey {
                proto,
                client: client.to_string(),
                universe: u,
            };
            if !self.limiter.allow(key) {
                self.metrics.cmds_total.inc(&[proto, cmd_type, "false"]);
                return Ack::rejected(id, ErrorKind::RateLimited, Vec::new(), ts);
            }
        }

        match self.dedupe.accept(cmd.id()).await {
            DedupeOutcome::Drop => {
                self.metrics.dedup_hits_total.inc(&[]);
                // Dedupe is not exposed as an ack reason; callers see a
                // silent accepted=true (the original commit already applied).
                return Ack::accepted(id, ts);
            }
            DedupeOutcome::Accept => {}
        }

        let result = self.route(cmd).await;
        let accepted = result.is_ok().to_string();
        self.metrics.cmds_total.inc(&[proto, cmd_type, &accepted]);

        match result {
            Ok(()) => Ack::accepted(id, ts),
            Err((reason, errors)) => Ack::rejected(id, reason, errors, ts),
        }
    }

    async fn route(&self, cmd: Command) -> Result<(), (ErrorKind, Vec<FieldError>)> {
        match cmd {
            Command::Fade {
                universe,
                duration_ms,
                easing,
                items,
                ..
            } => {
                let items = canonicalize_items(&items)?;
                self.fade.add_fade(universe, &items, duration_ms, easing).await;
                Ok(())
            }
            Command::Set {
                universe,
                channel,
                value,
                ..
            } => {
                let items = vec![ChannelItem { ch: channel, val: value }];
                self.fade.cancel_channels(universe, &[channel], "ltp").await;
                self.commit_local_patch(universe, &items).await;
                Ok(())
            }
            Command::Patch { universe, items, .. } => {
                let items = canonicalize_items(&items)?;
                let chans: Vec<u16> = items.iter().map(|i| i.ch).collect();
                self.fade.cancel_channels(universe, &chans, "ltp").await;
                self.commit_local_patch(universe, &items).await;
                Ok(())
            }
            Command::FixtureSet { fixture_id, attrs, .. } => {
                let Some((universe, items)) = self.fixtures.resolve(&fixture_id, &attrs) else {
                    return Err((ErrorKind::NotFound, Vec::new()));
                };
                let items = canonicalize_items(&items)?;
                let chans: Vec<u16> = items.iter().map(|i| i.ch).collect();
                self.fade.cancel_channels(universe, &chans, "ltp").await;
                self.commit_local_patch(universe, &items).await;
                Ok(())
            }
        }
    }

    async fn commit_local_patch(&self, universe: UniverseId, items: &[ChannelItem]) {
        let (delta, rev, ts) = self.engine.apply_local_patch(universe, items).await;
        if delta.is_empty() {
            return;
        }
        self.fan_out(universe, delta, rev, ts).await;
    }

    /// Broadcast a committed delta and schedule the corresponding output
    /// back-end send. Shared by the direct-patch path and the fade ticker.
    pub async fn fan_out(&self, universe: UniverseId, delta: crate::model::Delta, rev: u64, ts: i64) {
        self.ws_hub.send_payload(WsServerMessage::StateUpdate {
            rev,
            ts,
            universe,
            delta: delta.clone(),
            full: false,
        });
        let scheduler = self
            .outputs
            .entry(universe)
            .or_insert_with(|| {
                Arc::new(OutputScheduler::new(
                    universe,
                    self.output_fps,
                    self.output_backend.clone(),
                    self.metrics.clone(),
                ))
            })
            .clone();
        scheduler.apply_patch(&delta).await;
        scheduler.maybe_send().await;
    }
}

fn wire_type(cmd: &Command) -> &'static str {
    match cmd {
        Command::Set { .. } => "dmx.set",
        Command::Patch { .. } => "dmx.patch",
        Command::Fade { .. } => "dmx.fade",
        Command::FixtureSet { .. } => "fixture.set",
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
