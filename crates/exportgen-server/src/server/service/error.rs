//! JSON error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Errors a handler can return before the response body starts.
///
/// Once a download is streaming, failures can no longer change the status
/// code; they reset the connection instead (see
/// [`stream_export`](crate::server::streaming::coordinator::stream_export)).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Export(#[from] exportgen::Error),
}

impl ApiError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::ShuttingDown => "shutting_down",
            Self::Export(exportgen::Error::InvalidRequest { .. }) => "invalid_request",
            Self::Export(exportgen::Error::Cancelled) => "cancelled",
            Self::Export(_) => "export_failed",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Export(exportgen::Error::InvalidRequest { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::ShuttingDown | Self::Export(exportgen::Error::Cancelled) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = core::result::Result<T, ApiError>;
