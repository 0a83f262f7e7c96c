//! CoreSupervisor: ordered startup of every collaborator and reverse-order
//! graceful shutdown with a bounded grace period.

use crate::api::build_router;
use crate::config::{DaemonConfig, OutputMode};
use crate::engine::{DMXEngine, Deduper, RateLimiter};
use crate::fade::FadeEngine;
use crate::ingress::{IngressRouter, NullFixtureResolver};
use crate::metrics::MetricsRegistry;
use crate::model::EngineCommit;
use crate::mqtt::MqttBridge;
use crate::output::enttec::EnttecBackend;
use crate::output::ola::OlaBackend;
use crate::output::{NullBackend, OutputBackend};
use crate::sacn::SacnReceiver;
use crate::ws::WsHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct CoreSupervisor {
    config: DaemonConfig,
    router: Arc<IngressRouter>,
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl CoreSupervisor {
    pub fn new(config: DaemonConfig) -> Self {
        let engine = Arc::new(DMXEngine::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let fade = Arc::new(FadeEngine::new(engine.clone(), metrics.clone(), config.fade_tick_hz));
        let dedupe_path = config.dedupe_persist_path.as_ref().map(std::path::PathBuf::from);
        let dedupe = Arc::new(Deduper::new(config.dedupe_capacity, config.dedupe_ttl_secs, dedupe_path));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_second));
        let ws_hub = Arc::new(WsHub::new());

        let (output_backend, output_fps): (Arc<dyn OutputBackend>, f64) = match config.output_mode {
            OutputMode::Null => (Arc::new(NullBackend), config.ola_fps),
            OutputMode::Ola => (Arc::new(OlaBackend::new(config.ola_base_url.clone())), config.ola_fps),
            OutputMode::Enttec => (
                Arc::new(EnttecBackend::new(
                    config.enttec_port.clone(),
                    config.enttec_baud,
                    config.enttec_reconnect_attempts,
                )),
                config.enttec_fps,
            ),
        };

        let bus_connected = Arc::new(std::sync::atomic::AtomicBool::new(config.mqtt_broker_url.is_none()));

        let router = Arc::new(IngressRouter {
            engine,
            fade,
            dedupe,
            limiter,
            metrics,
            ws_hub,
            outputs: Arc::new(dashmap::DashMap::new()),
            fixtures: Arc::new(NullFixtureResolver),
            ws_send_timeout_ms: config.ws_send_timeout_ms,
            ws_bearer_token: config.ws_bearer_token.clone(),
            output_backend,
            output_fps,
            bus_connected,
        });

        Self {
            config,
            router,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Bring every collaborator up in dependency order and serve until the
    /// process is asked to shut down (`shutdown_signal`).
    pub async fn run(mut self, shutdown_signal: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
        if self.config.fades_enabled {
            self.spawn_fade_loop();
        }
        if self.config.sacn_enabled {
            self.spawn_sacn_listener()?;
        }
        if self.config.mqtt_broker_url.is_some() {
            self.spawn_mqtt_bridge();
        }

        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "dmxd listening");
        let app = build_router(self.router.clone());

        let server_cancel = self.cancel.clone();
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_cancel.cancelled().await;
        });

        tokio::select! {
            result = serve => {
                if let Err(e) = result {
                    tracing::error!("http server exited with error: {e}");
                }
            }
            _ = shutdown_signal => {
                tracing::info!("shutdown requested");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn spawn_fade_loop(&mut self) {
        let fade = self.router.fade.clone();
        let router = self.router.clone();
        let cancel = self.cancel.clone();
        let (commit_tx, mut commit_rx) = mpsc::unbounded_channel::<EngineCommit>();

        self.tasks.push(tokio::spawn(async move {
            fade.run(commit_tx, cancel).await;
        }));

        let fan_out_cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = fan_out_cancel.cancelled() => return,
                    commit = commit_rx.recv() => {
                        let Some(commit) = commit else { return };
                        router.fan_out(commit.universe, commit.delta, commit.rev, commit.ts).await;
                    }
                }
            }
        }));
    }

    fn spawn_sacn_listener(&mut self) -> anyhow::Result<()> {
        let (commit_tx, mut commit_rx) = mpsc::unbounded_channel::<EngineCommit>();
        let receiver = Arc::new(
            SacnReceiver::new(
                self.router.engine.clone(),
                self.router.metrics.clone(),
                &self.config.sacn_allowed_universes,
                self.config.sacn_source_timeout_ms,
            )
            .with_commit_sender(commit_tx),
        );
        let bind_addr = self.config.sacn_bind_addr.clone();
        let cancel = self.cancel.clone();

        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = receiver.run(&bind_addr, cancel).await {
                tracing::error!("sacn receiver exited: {e}");
            }
        }));

        let router = self.router.clone();
        let fan_out_cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = fan_out_cancel.cancelled() => return,
                    commit = commit_rx.recv() => {
                        let Some(commit) = commit else { return };
                        router.fan_out(commit.universe, commit.delta, commit.rev, commit.ts).await;
                    }
                }
            }
        }));
        Ok(())
    }

    fn spawn_mqtt_bridge(&mut self) {
        let bridge = MqttBridge::new(
            self.config.mqtt_broker_url.clone().unwrap_or_default(),
            self.config.mqtt_command_topic.clone(),
            self.config.mqtt_state_topic_prefix.clone(),
            self.config.mqtt_status_topic.clone(),
            self.router.clone(),
            self.router.bus_connected.clone(),
        );
        let cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            bridge.run(cancel).await;
        }));
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        let grace = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for task in self.tasks {
                let _ = task.await;
            }
        });
        if grace.await.is_err() {
            tracing::warn!("shutdown grace period elapsed with tasks still running");
        }

        tracing::info!("flushing a final output frame per universe");
        for entry in self.router.outputs.iter() {
            entry.value().flush().await;
        }
    }
}
