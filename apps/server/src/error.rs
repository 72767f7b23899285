use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chitter_shared::error::ChitterError;
use serde_json::json;

/// Errors an edge handler can return: either a `ChatService` failure, or a
/// list of validation failures caught before any service call was made.
#[derive(Debug)]
pub enum ServerError {
    Service(ChitterError),
    Validation(Vec<String>),
}

impl ServerError {
    /// A single validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        ServerError::Validation(vec![message.into()])
    }
}

impl From<ChitterError> for ServerError {
    fn from(err: ChitterError) -> Self {
        ServerError::Service(err)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::Service(ChitterError::UnknownServerError) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "Unknown server error",
                })),
            )
                .into_response(),
            ServerError::Service(err) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": err.tag(),
                })),
            )
                .into_response(),
            ServerError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": "Invalid parameters",
                    "validationErrors": errors,
                })),
            )
                .into_response(),
        }
    }
}
