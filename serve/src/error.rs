//! Maps gate errors to HTTP responses: `{"error": <kind>, "message": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hitl::GateError;
use serde_json::json;
use tracing::error;

/// A [`GateError`] as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GateError);

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GateError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GateError::Configuration(_) | GateError::UnrecognizedAction(_) => StatusCode::BAD_REQUEST,
            GateError::Conflict(_) => StatusCode::CONFLICT,
            GateError::NotFound(_) => StatusCode::NOT_FOUND,
            GateError::Timeout(_) => StatusCode::GONE,
            GateError::Workflow(_) | GateError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, kind = self.0.kind(), "request failed");
        }
        let body = json!({ "error": self.0.kind(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_statuses() {
        let cases = [
            (GateError::Validation("x".into()), 422),
            (GateError::Configuration("x".into()), 400),
            (GateError::UnrecognizedAction("x".into()), 400),
            (GateError::Conflict("x".into()), 409),
            (GateError::NotFound("x".into()), 404),
            (GateError::Timeout("x".into()), 410),
            (GateError::Workflow("x".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError(err).status().as_u16(), code);
        }
    }
}
