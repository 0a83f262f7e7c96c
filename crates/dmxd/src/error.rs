//! Error taxonomy
//!
//! Ingress-pipeline rejections are values (`ErrorKind` inside an `Ack`), never
//! exceptions. `DmxError` is the module-boundary error type used by
//! collaborators that can legitimately fail (config load, sACN parsing,
//! output transports); it carries enough context to log and to bucket into a
//! metric without becoming visible to ingress callers.

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// The taxonomy of reasons a command can be rejected or a collaborator can
/// fail. Serializes in `SCREAMING_SNAKE_CASE` to match the wire taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationFailed,
    PatchTooLarge,
    RateLimited,
    DedupDropped,
    NotFound,
    TransportError,
    ParseError,
    Unavailable,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        write!(f, "{s}")
    }
}

/// A single field-level validation error, matching the `{path, msg}` shape
/// the distilled spec's ack carries.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldError {
    pub path: String,
    pub msg: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            msg: msg.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum SacnParseError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("bad preamble")]
    BadPreamble,
    #[error("bad packet identifier")]
    BadIdentifier,
    #[error("unsupported root vector {0:#010x}")]
    BadRootVector(u32),
    #[error("unsupported framing vector {0:#010x}")]
    BadFramingVector(u32),
    #[error("unsupported DMP vector {0:#04x}")]
    BadDmpVector(u8),
    #[error("unsupported start code {0:#04x}")]
    BadStartCode(u8),
    #[error("property value count out of range: {0}")]
    BadPropertyCount(u16),
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("transport timed out")]
    Timeout,
    #[error("transport returned status {0}")]
    HttpStatus(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serial port not open")]
    NotOpen,
}

/// API-facing error used by axum handlers, rendered as an RFC 7807
/// problem+json body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("service unavailable")]
    Unavailable,
}
