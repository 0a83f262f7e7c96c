//! `/ws`: bidirectional JSON-over-text WebSocket. Inbound frames are
//! commands run through the same ingress pipeline as REST; outbound frames
//! are a full snapshot at connect followed by broadcast state deltas.
//!
//! Each connection owns its receive half of the `WsHub` broadcast channel.
//! A bounded `send_timeout` against this connection's own socket write is
//! the only thing that can disconnect it — a slow peer never blocks
//! another subscriber, since `broadcast::Sender::send` itself never blocks.

use crate::ingress::IngressRouter;
use crate::model::{Ack, Command};
use crate::ws::WsServerMessage;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    token: Option<String>,
}

/// The distilled spec allows no authentication beyond a configurable
/// bearer token on the WS endpoint. Accepted either as `Authorization:
/// Bearer <token>` or `?token=<token>` (for browser clients that cannot
/// set headers on a WebSocket handshake).
fn bearer_ok(configured: &str, headers: &HeaderMap, query: &WsAuthQuery) -> bool {
    if let Some(header) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = header.strip_prefix("Bearer ") {
            if token == configured {
                return true;
            }
        }
    }
    query.token.as_deref() == Some(configured)
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(router): State<Arc<IngressRouter>>,
    headers: HeaderMap,
    Query(query): Query<WsAuthQuery>,
) -> Response {
    if let Some(configured) = &router.ws_bearer_token {
        if !bearer_ok(configured, &headers, &query) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, router))
}

async fn handle_socket(mut socket: WebSocket, router: Arc<IngressRouter>) {
    let send_timeout = Duration::from_millis(router.ws_send_timeout_ms);
    let mut state_rx = router.ws_hub.subscribe();

    if !send_snapshot(&mut socket, &router, send_timeout).await {
        return;
    }

    loop {
        tokio::select! {
            update = state_rx.recv() => {
                match update {
                    Ok(msg) => {
                        if !send_json(&mut socket, &msg, send_timeout).await {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(_)) => {
                        // Fell behind the broadcast ring; resync with a fresh snapshot
                        // rather than replaying a gap of individual deltas.
                        if !send_snapshot(&mut socket, &router, send_timeout).await {
                            return;
                        }
                    }
                    Err(RecvError::Closed) => return,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound_text(&mut socket, &router, &text, send_timeout).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return,
                }
            }
        }
    }
}

async fn handle_inbound_text(socket: &mut WebSocket, router: &Arc<IngressRouter>, text: &str, send_timeout: Duration) {
    let cmd: Command = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            let ack = json!({"accepted": false, "reason": "VALIDATION_FAILED", "detail": e.to_string()});
            let _ = send_json(socket, &ack, send_timeout).await;
            return;
        }
    };
    let ack: Ack = router.submit(cmd, "ws", "ws-client").await;
    let _ = send_json(socket, &ack, send_timeout).await;
}

async fn send_snapshot(socket: &mut WebSocket, router: &Arc<IngressRouter>, send_timeout: Duration) -> bool {
    let (rev, ts) = router.engine.current_rev_ts().await;
    let snapshot = router.engine.snapshot().await;
    for (universe, frame) in snapshot {
        let msg = WsServerMessage::StateUpdate {
            rev,
            ts,
            universe,
            delta: frame.iter().enumerate().map(|(i, &v)| ((i + 1) as u16, v)).collect(),
            full: true,
        };
        if !send_json(socket, &msg, send_timeout).await {
            return false;
        }
    }
    true
}

async fn send_json(socket: &mut WebSocket, value: &impl serde::Serialize, send_timeout: Duration) -> bool {
    let Ok(text) = serde_json::to_string(value) else {
        return true;
    };
    matches!(
        tokio::time::timeout(send_timeout, socket.send(Message::Text(text))).await,
        Ok(Ok(()))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_matches_configured_token() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        let query = WsAuthQuery { token: None };
        assert!(bearer_ok("secret", &headers, &query));
    }

    #[test]
    fn query_token_matches_configured_token() {
        let headers = HeaderMap::new();
        let query = WsAuthQuery {
            token: Some("secret".to_string()),
        };
        assert!(bearer_ok("secret", &headers, &query));
    }

    #[test]
    fn wrong_token_is_rejected() {
        let headers = HeaderMap::new();
        let query = WsAuthQuery {
            token: Some("wrong".to_string()),
        };
        assert!(!bearer_ok("secret", &headers, &query));
    }
}
