//! IngressRouter's REST/WS front door: axum handlers, OpenAPI schema, and
//! request middleware.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod ws;

pub use routes::build_router;
