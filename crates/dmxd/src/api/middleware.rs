//! Cross-cutting request middleware: request-id stamping.

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Ensure every request carries an `X-Request-Id`, generating one when the
/// caller didn't supply it, and echoing it back on the response.
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response {
    let incoming = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let request_id = incoming.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        let span = tracing::info_span!("request", request_id = %request_id);
        let mut resp = next.run(req).instrument(span).await;
        resp.headers_mut().insert(REQUEST_ID_HEADER, value);
        resp
    } else {
        next.run(req).await
    }
}
