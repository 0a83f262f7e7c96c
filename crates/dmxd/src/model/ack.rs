use crate::error::{ErrorKind, FieldError};
use serde::Serialize;
use utoipa::ToSchema;

/// The response to a single ingress command.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Ack {
    pub ack: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    pub ts: i64,
}

impl Ack {
    pub fn accepted(id: impl Into<String>, ts: i64) -> Self {
        Self {
            ack: id.into(),
            accepted: true,
            reason: None,
            errors: Vec::new(),
            ts,
        }
    }

    pub fn rejected(id: impl Into<String>, reason: ErrorKind, errors: Vec<FieldError>, ts: i64) -> Self {
        Self {
            ack: id.into(),
            accepted: false,
            reason: Some(reason),
            errors,
            ts,
        }
    }
}
