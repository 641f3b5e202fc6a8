//! HTTP error handling and automated response generation
use std::collections::HashMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::db::errors::DatabaseError;

/// Represents an HTTP status code, optionally with a custom message and a
/// field-keyed error map for validation failures tied to known form fields.
pub struct HttpError {
    /// The numeric HTTP status code to respond with.
    status: StatusCode,
    /// The message to include in the response.
    message: Option<String>,
    /// Per-field messages. Present only for field-level validation errors,
    /// so the client can render them inline rather than as a banner.
    fields: Option<HashMap<&'static str, String>>,
}

impl From<StatusCode> for HttpError {
    fn from(err: StatusCode) -> Self {
        Self {
            status: err,
            message: None,
            fields: None,
        }
    }
}

impl HttpError {
    /// Construct a new HTTP error with a given status code and message.
    pub const fn new(status: StatusCode, message: Option<String>) -> Self {
        Self {
            status,
            message,
            fields: None,
        }
    }
    /// Construct a field-level validation error.
    pub fn field(status: StatusCode, field: &'static str, message: String) -> Self {
        Self {
            status,
            message: Some(String::from("Validation failed")),
            fields: Some(HashMap::from([(field, message)])),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let message = self
            .message
            .unwrap_or_else(|| self.status.canonical_reason().unwrap_or("").to_owned());
        let mut body = json!({"message": message});
        if let Some(fields) = self.fields {
            body["errors"] = json!(fields);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for HttpError {
    fn from(err: DatabaseError) -> Self {
        tracing::error!(error = %err, "error raised from database in handler");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, Some(err.to_string()))
    }
}
