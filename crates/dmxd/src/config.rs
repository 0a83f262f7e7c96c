//! Daemon configuration
//!
//! A single typed struct built once from the environment at startup and
//! passed down to every collaborator by construction. No hidden mutable
//! global config singleton.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Which output back-end the scheduler drives, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Null,
    Ola,
    Enttec,
}

impl std::str::FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "null" | "" => Ok(OutputMode::Null),
            "ola" => Ok(OutputMode::Ola),
            "enttec" => Ok(OutputMode::Enttec),
            other => Err(format!("unknown output mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    pub bind_addr: String,

    pub output_mode: OutputMode,

    pub ola_base_url: String,
    pub ola_fps: f64,

    pub enttec_port: Option<String>,
    pub enttec_baud: u32,
    pub enttec_fps: f64,
    pub enttec_reconnect_attempts: u32,

    pub sacn_enabled: bool,
    pub sacn_bind_addr: String,
    /// CSV of universe numbers and `a-b` ranges; empty accepts all.
    pub sacn_allowed_universes: String,
    pub sacn_source_timeout_ms: u64,

    pub fades_enabled: bool,
    pub fade_tick_hz: u32,

    pub rate_limit_per_second: u32,

    pub dedupe_ttl_secs: u64,
    pub dedupe_capacity: usize,
    pub dedupe_persist_path: Option<String>,

    pub ws_send_timeout_ms: u64,
    pub ws_bearer_token: Option<String>,

    pub mqtt_broker_url: Option<String>,
    pub mqtt_command_topic: String,
    pub mqtt_state_topic_prefix: String,
    pub mqtt_status_topic: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            output_mode: OutputMode::Null,
            ola_base_url: "http://127.0.0.1:9090".to_string(),
            ola_fps: 40.0,
            enttec_port: None,
            enttec_baud: 57_600,
            enttec_fps: 40.0,
            enttec_reconnect_attempts: 5,
            sacn_enabled: false,
            sacn_bind_addr: "0.0.0.0:5568".to_string(),
            sacn_allowed_universes: String::new(),
            sacn_source_timeout_ms: 5_000,
            fades_enabled: true,
            fade_tick_hz: 44,
            rate_limit_per_second: 60,
            dedupe_ttl_secs: 30,
            dedupe_capacity: 10_000,
            dedupe_persist_path: None,
            ws_send_timeout_ms: 200,
            ws_bearer_token: None,
            mqtt_broker_url: None,
            mqtt_command_topic: "dmx/cmd".to_string(),
            mqtt_state_topic_prefix: "dmx/state".to_string(),
            mqtt_status_topic: "dmx/status".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            bind_addr: env_or("DMXD_BIND", d.bind_addr),
            output_mode: env_parsed_or("DMXD_OUTPUT_MODE", d.output_mode),
            ola_base_url: env_or("DMXD_OLA_BASE_URL", d.ola_base_url),
            ola_fps: env_parsed_or("DMXD_OLA_FPS", d.ola_fps),
            enttec_port: std::env::var("DMXD_ENTTEC_PORT").ok(),
            enttec_baud: env_parsed_or("DMXD_ENTTEC_BAUD", d.enttec_baud),
            enttec_fps: env_parsed_or("DMXD_ENTTEC_FPS", d.enttec_fps),
            enttec_reconnect_attempts: env_parsed_or(
                "DMXD_ENTTEC_RECONNECT_ATTEMPTS",
                d.enttec_reconnect_attempts,
            ),
            sacn_enabled: env_parsed_or("DMXD_SACN_ENABLED", d.sacn_enabled),
            sacn_bind_addr: env_or("DMXD_SACN_BIND", d.sacn_bind_addr),
            sacn_allowed_universes: env_or(
                "DMXD_SACN_ALLOWED_UNIVERSES",
                d.sacn_allowed_universes,
            ),
            sacn_source_timeout_ms: env_parsed_or(
                "DMXD_SACN_SOURCE_TIMEOUT_MS",
                d.sacn_source_timeout_ms,
            ),
            fades_enabled: env_parsed_or("DMXD_FADES_ENABLED", d.fades_enabled),
            fade_tick_hz: env_parsed_or("DMXD_FADE_TICK_HZ", d.fade_tick_hz),
            rate_limit_per_second: env_parsed_or(
                "DMXD_RATE_LIMIT_PER_SECOND",
                d.rate_limit_per_second,
            ),
            dedupe_ttl_secs: env_parsed_or("DMXD_DEDUPE_TTL_SECS", d.dedupe_ttl_secs),
            dedupe_capacity: env_parsed_or("DMXD_DEDUPE_CAPACITY", d.dedupe_capacity),
            dedupe_persist_path: std::env::var("DMXD_DEDUPE_PERSIST_PATH").ok(),
            ws_send_timeout_ms: env_parsed_or("DMXD_WS_SEND_TIMEOUT_MS", d.ws_send_timeout_ms),
            ws_bearer_token: std::env::var("DMXD_WS_BEARER_TOKEN").ok(),
            mqtt_broker_url: std::env::var("DMXD_MQTT_BROKER_URL").ok(),
            mqtt_command_topic: env_or("DMXD_MQTT_COMMAND_TOPIC", d.mqtt_command_topic),
            mqtt_state_topic_prefix: env_or(
                "DMXD_MQTT_STATE_TOPIC_PREFIX",
                d.mqtt_state_topic_prefix,
            ),
            mqtt_status_topic: env_or("DMXD_MQTT_STATUS_TOPIC", d.mqtt_status_topic),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
