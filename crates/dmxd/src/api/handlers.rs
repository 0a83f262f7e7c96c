//! REST handlers for the ingress, state, and diagnostic surface.

use crate::error::ApiError;
use crate::ingress::IngressRouter;
use crate::model::{Ack, Command, UniverseId};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// RFC 7807 `application/problem+json` body for rejected/failed requests.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: &'static str,
    pub status: u16,
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, title) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation-failed", "Validation failed"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not-found", "Not found"),
            ApiError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", "Service unavailable"),
        };
        let body = ProblemDetails {
            kind,
            title,
            status: status.as_u16(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[utoipa::path(
    post,
    path = "/command",
    request_body = Command,
    responses((status = 200, description = "Command processed", body = Ack)),
)]
pub async fn post_command(
    State(router): State<Arc<IngressRouter>>,
    headers: HeaderMap,
    Json(cmd): Json<Command>,
) -> Json<Ack> {
    let client = client_identity(&headers);
    let ack = router.submit(cmd, "rest", &client).await;
    Json(ack)
}

fn client_identity(headers: &HeaderMap) -> String {
    headers
        .get(header::FORWARDED)
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct StateQuery {
    #[serde(default)]
    pub sparse: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StateResponse {
    pub rev: u64,
    pub ts: i64,
    /// Dense `universe -> [512 ints]`; present when `sparse` is unset/false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub universes: Option<BTreeMap<UniverseId, Vec<u8>>>,
    /// Sparse `universe -> {channel: value}` of non-zero slots; present
    /// when `?sparse=1` was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub universes_sparse: Option<BTreeMap<UniverseId, BTreeMap<u16, u8>>>,
    pub sparse: bool,
}

/// Weak ETag over the global revision; any committed delta anywhere bumps
/// `rev`, so this is exact rather than a hash over the full snapshot.
fn weak_etag(rev: u64) -> String {
    format!("W/\"rev-{rev}\"")
}

#[utoipa::path(
    get,
    path = "/state",
    params(StateQuery),
    responses((status = 200, description = "Full committed output state", body = StateResponse), (status = 304, description = "Unchanged since If-None-Match")),
)]
pub async fn get_state(
    State(router): State<Arc<IngressRouter>>,
    Query(q): Query<StateQuery>,
    headers: HeaderMap,
) -> Response {
    let (rev, ts) = router.engine.current_rev_ts().await;
    let etag = weak_etag(rev);

    if let Some(inm) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if inm == etag {
            return StatusCode::NOT_MODIFIED.into_response();
        }
    }

    let snapshot = router.engine.snapshot().await;
    let body = if q.sparse {
        let universes_sparse = snapshot
            .into_iter()
            .map(|(u, frame)| {
                let sparse: BTreeMap<u16, u8> = frame
                    .iter()
                    .enumerate()
                    .filter(|(_, &v)| v != 0)
                    .map(|(i, &v)| ((i + 1) as u16, v))
                    .collect();
                (u, sparse)
            })
            .collect();
        StateResponse {
            rev,
            ts,
            universes: None,
            universes_sparse: Some(universes_sparse),
            sparse: true,
        }
    } else {
        let universes = snapshot.into_iter().map(|(u, frame)| (u, frame.to_vec())).collect();
        StateResponse {
            rev,
            ts,
            universes: Some(universes),
            universes_sparse: None,
            sparse: false,
        }
    };

    let mut resp = Json(body).into_response();
    resp.headers_mut()
        .insert(header::ETAG, etag.parse().expect("weak etag is valid header value ascii"));
    resp
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct FrameQuery {
    #[serde(default)]
    pub sacn: bool,
}

#[utoipa::path(
    get,
    path = "/universes/{universe}/frame",
    params(("universe" = u32, Path), FrameQuery),
    responses((status = 200, description = "Single universe frame", body = Vec<u8>), (status = 404, description = "Unknown universe")),
)]
pub async fn get_universe_frame(
    State(router): State<Arc<IngressRouter>>,
    Path(universe): Path<UniverseId>,
    Query(q): Query<FrameQuery>,
) -> Result<Json<Vec<u8>>, ApiError> {
    if q.sacn {
        return Ok(Json(router.engine.sacn_frame(universe).await.to_vec()));
    }
    router
        .engine
        .snapshot_universe(universe)
        .await
        .map(|frame| Json(frame.to_vec()))
        .ok_or(ApiError::NotFound)
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SacnSourceInfo {
    pub universe: UniverseId,
    pub source_count: usize,
}

#[utoipa::path(
    get,
    path = "/sacn/sources",
    responses((status = 200, description = "Live sACN source counts per universe", body = [SacnSourceInfo])),
)]
pub async fn get_sacn_sources(State(router): State<Arc<IngressRouter>>) -> Json<Vec<SacnSourceInfo>> {
    let snapshot = router.engine.snapshot().await;
    let infos = snapshot
        .keys()
        .map(|&universe| {
            let count = router.metrics.sacn_sources.get(&[&universe.to_string()]) as usize;
            SacnSourceInfo {
                universe,
                source_count: count,
            }
        })
        .collect();
    Json(infos)
}

pub async fn get_metrics(State(router): State<Arc<IngressRouter>>) -> impl IntoResponse {
    let body = router.metrics.render();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub async fn get_healthz() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

/// 200 iff the engine is initialized (always true once the router exists)
/// and the downstream bus (the MQTT broker, when configured) is connected;
/// 503 otherwise. With no bus configured, `bus_connected` is `true` from
/// construction and this degrades to a liveness check.
pub async fn get_readyz(State(router): State<Arc<IngressRouter>>) -> impl IntoResponse {
    let _ = router.engine.current_rev_ts().await;
    if router.bus_connected.load(std::sync::atomic::Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
