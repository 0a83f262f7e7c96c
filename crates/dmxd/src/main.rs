//! dmxd: real-time DMX512/E1.31 lighting-control daemon.
//!
//! Ingests mutation commands from REST, WebSocket, MQTT, and sACN/E1.31,
//! merges them into a canonical per-universe 512-channel frame, and
//! re-emits the result to WebSocket subscribers, an OLA HTTP bridge, and a
//! USB-serial Enttec driver.
//!
//! Default bind: 127.0.0.1:8080
//! WebSocket: /ws
//! REST API: see `/docs` (Swagger UI)

mod api;
mod config;
mod engine;
mod error;
mod fade;
mod ingress;
mod metrics;
mod model;
mod mqtt;
mod output;
mod sacn;
mod supervisor;
mod ws;

use anyhow::Result;
use config::DaemonConfig;
use supervisor::CoreSupervisor;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dmxd=debug")))
        .init();

    info!("starting dmxd");
    info!(version = env!("CARGO_PKG_VERSION"), "dmxd version");

    let config = DaemonConfig::from_env();
    info!(
        bind = %config.bind_addr,
        output_mode = ?config.output_mode,
        sacn_enabled = config.sacn_enabled,
        fades_enabled = config.fades_enabled,
        "configuration loaded"
    );

    let supervisor = CoreSupervisor::new(config);
    supervisor.run(shutdown_signal()).await
}

/// Resolves once SIGINT (or, on unix, SIGTERM) is received, triggering the
/// supervisor's reverse-order graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
