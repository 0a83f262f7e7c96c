//! Router assembly: REST + WS endpoints, CORS, request-id stamping, and the
//! Swagger UI mount over a hand-declared `utoipa::OpenApi`.

use crate::api::handlers::{self, HealthStatus, ProblemDetails, SacnSourceInfo, StateResponse};
use crate::api::middleware::request_id_middleware;
use crate::api::ws::ws_upgrade;
use crate::ingress::IngressRouter;
use crate::model::{Ack, ChannelItem, Command, Easing, FixtureAttrValue};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::post_command,
        handlers::get_state,
        handlers::get_universe_frame,
        handlers::get_sacn_sources,
    ),
    components(schemas(
        Command,
        ChannelItem,
        Easing,
        FixtureAttrValue,
        Ack,
        StateResponse,
        SacnSourceInfo,
        ProblemDetails,
        HealthStatus,
        crate::error::ErrorKind,
        crate::error::FieldError,
    )),
    tags((name = "dmxd", description = "Real-time DMX512/sACN lighting control"))
)]
pub struct ApiDoc;

pub fn build_router(router: Arc<IngressRouter>) -> Router {
    Router::new()
        .route("/command", post(handlers::post_command))
        .route("/state", get(handlers::get_state))
        .route("/universes/:universe/frame", get(handlers::get_universe_frame))
        .route("/sacn/sources", get(handlers::get_sacn_sources))
        .route("/metrics", get(handlers::get_metrics))
        .route("/healthz", get(handlers::get_healthz))
        .route("/readyz", get(handlers::get_readyz))
        .route("/ws", get(ws_upgrade))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(router)
}
