//! Unified error handling for the browser endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use emberdoc_core::error::DocumentStoreError;

/// Browser error type.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error(transparent)]
    Store(#[from] DocumentStoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl BrowserError {
    fn status(&self) -> StatusCode {
        match self {
            BrowserError::Store(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            BrowserError::Store(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            BrowserError::Store(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            BrowserError::Store(_) | BrowserError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BrowserError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for BrowserError {
    fn into_response(self) -> Response {
        let status = self.status();

        let error = match status {
            StatusCode::SERVICE_UNAVAILABLE => "Service unavailable",
            StatusCode::NOT_FOUND => "Not found",
            StatusCode::BAD_REQUEST => "Bad request",
            _ => {
                tracing::error!(error = %self, "Browser request failed");
                "Internal server error"
            }
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            details: Some(self.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, BrowserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (DocumentStoreError::DatabaseNotEnabled, StatusCode::SERVICE_UNAVAILABLE),
            (DocumentStoreError::WatcherDisabled, StatusCode::SERVICE_UNAVAILABLE),
            (DocumentStoreError::UnknownCollection("x".into()), StatusCode::NOT_FOUND),
            (
                DocumentStoreError::MalformedFilter { position: 3, message: "bad".into() },
                StatusCode::BAD_REQUEST,
            ),
            (
                DocumentStoreError::DocumentAlreadyExists("1".into(), "User".into()),
                StatusCode::BAD_REQUEST,
            ),
            (DocumentStoreError::Backend("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(BrowserError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn bad_requests_are_400() {
        let response = BrowserError::BadRequest("no files".into()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
