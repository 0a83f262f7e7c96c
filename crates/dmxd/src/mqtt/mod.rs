//! MqttBridge: an optional fourth ingress front-channel plus a retained
//! state publisher. Entirely inert when no broker URL is configured.

use crate::ingress::IngressRouter;
use crate::model::Command;
use crate::ws::WsServerMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);
const CLIENT_ID: &str = "dmxd";

pub struct MqttBridge {
    broker_url: String,
    command_topic: String,
    state_topic_prefix: String,
    status_topic: String,
    router: Arc<IngressRouter>,
    /// Shared with `IngressRouter::bus_connected`; flipped on `ConnAck` and
    /// on every disconnect so `/readyz` reflects live broker connectivity.
    connected: Arc<AtomicBool>,
}

impl MqttBridge {
    pub fn new(
        broker_url: impl Into<String>,
        command_topic: impl Into<String>,
        state_topic_prefix: impl Into<String>,
        status_topic: impl Into<String>,
        router: Arc<IngressRouter>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            broker_url: broker_url.into(),
            command_topic: command_topic.into(),
            state_topic_prefix: state_topic_prefix.into(),
            status_topic: status_topic.into(),
            router,
            connected,
        }
    }

    fn mqtt_options(&self) -> Option<MqttOptions> {
        let (host, port) = parse_broker_url(&self.broker_url)?;
        let mut opts = MqttOptions::new(CLIENT_ID, host, port);
        opts.set_keep_alive(Duration::from_secs(15));
        opts.set_last_will(rumqttc::LastWill::new(
            self.status_topic.clone(),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));
        Some(opts)
    }

    /// Connect, subscribe, and run the event loop until `cancel` fires,
    /// reconnecting with a fixed backoff on every disconnect.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let Some(opts) = self.mqtt_options() else {
                tracing::warn!("mqtt bridge: unparsable broker url {:?}, not starting", self.broker_url);
                return;
            };

            self.connected.store(false, Ordering::Relaxed);
            let (client, mut eventloop) = AsyncClient::new(opts, 64);
            if let Err(e) = client.subscribe(&self.command_topic, QoS::AtLeastOnce).await {
                tracing::warn!("mqtt subscribe failed: {e}");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => continue,
                }
            }

            let mut state_rx = self.router.ws_hub.subscribe();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    poll = eventloop.poll() => {
                        match poll {
                            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                                self.connected.store(true, Ordering::Relaxed);
                                let _ = client
                                    .publish(&self.status_topic, QoS::AtLeastOnce, true, "online")
                                    .await;
                            }
                            Ok(Event::Incoming(Packet::Publish(p))) => {
                                self.handle_inbound(&p.payload).await;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                self.connected.store(false, Ordering::Relaxed);
                                tracing::warn!("mqtt connection error: {e}, reconnecting in {RECONNECT_BACKOFF:?}");
                                break;
                            }
                        }
                    }
                    update = state_rx.recv() => {
                        if let Ok(WsServerMessage::StateUpdate { universe, .. }) = update {
                            self.publish_universe_state(&client, universe).await;
                        }
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        }
    }

    async fn handle_inbound(&self, payload: &[u8]) {
        let cmd: Command = match serde_json::from_slice(payload) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("dropping malformed mqtt command payload: {e}");
                return;
            }
        };
        // Fire-and-forget: MQTT has no ack channel back to the publisher.
        self.router.submit(cmd, "mqtt", CLIENT_ID).await;
    }

    /// Publish a retained snapshot of one universe's committed output
    /// frame under `state_topic_prefix/<universe>`, triggered by the same
    /// delta that drives the WS fan-out.
    async fn publish_universe_state(&self, client: &AsyncClient, universe: crate::model::UniverseId) {
        let Some(frame) = self.router.engine.snapshot_universe(universe).await else {
            return;
        };
        let topic = format!("{}/{}", self.state_topic_prefix, universe);
        let body = frame.iter().map(u8::to_string).collect::<Vec<_>>().join(",");
        let _ = client.publish(topic, QoS::AtMostOnce, true, body).await;
    }
}

fn parse_broker_url(url: &str) -> Option<(String, u16)> {
    let without_scheme = url.split("://").last().unwrap_or(url);
    let (host, port) = without_scheme.split_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port_with_scheme() {
        assert_eq!(
            parse_broker_url("mqtt://broker.local:1883"),
            Some(("broker.local".to_string(), 1883))
        );
    }

    #[test]
    fn parses_host_and_port_without_scheme() {
        assert_eq!(parse_broker_url("localhost:1883"), Some(("localhost".to_string(), 1883)));
    }

    #[test]
    fn rejects_missing_port() {
        assert_eq!(parse_broker_url("localhost"), None);
    }
}
