use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use service::StoreError;
use thiserror::Error;

/// Error envelope `{"status":"error","message":..}`.
///
/// Clients of these endpoints only look at the body, so every error is sent
/// with HTTP 200.
#[derive(Debug)]
pub struct ApiError {
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn unknown_dataset(name: &str) -> Self {
        Self { kind: "unknown_dataset", message: format!("Unknown dataset: {name}") }
    }

    pub fn kind(&self) -> &'static str { self.kind }

    pub fn message(&self) -> &str { &self.message }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let message = match &e {
            StoreError::Backend(_) | StoreError::SchemaMismatch { .. } => format!("Server Error: {e}"),
            _ => e.to_string(),
        };
        Self { kind: e.kind(), message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(json!({"status": "error", "message": self.message}))).into_response()
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("backend unavailable: {0}")]
    Backend(#[from] StoreError),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_failures_read_as_server_errors() {
        let e = ApiError::from(StoreError::Backend("timeout".into()));
        assert_eq!(e.message(), "Server Error: backend error: timeout");
        assert_eq!(e.kind(), "backend");

        let e = ApiError::from(StoreError::not_found("1001"));
        assert_eq!(e.message(), "Employee with ID 1001 not found");

        let e = ApiError::from(StoreError::Internal("bad json".into()));
        assert_eq!(e.message(), "Server Error: bad json");
    }

    #[test]
    fn errors_are_sent_with_200() {
        let res = ApiError::unknown_dataset("payroll").into_response();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
