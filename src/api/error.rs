//! HTTP mapping of service errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::error::Error;

/// Service error returned from a handler
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    /// HTTP status of the wrapped error
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            // The API server already judged the request; keep its conflict answer
            Error::Kube(kube::Error::Api(response)) if response.code == 409 => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!(error = %self.0, status = status.as_u16(), "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
