use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

/// GET /health/live — returns 200 unconditionally. Used by load balancers
/// to check if the process is alive.
pub async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /health/ready — `ChatService` has no ping operation (the spec gives
/// the storage backend no observable health surface of its own), so
/// readiness mirrors liveness. A backend that can't serve requests fails
/// its calls directly rather than through a separate health probe.
pub async fn readiness() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_build_without_panicking() {
        let _ = routes();
    }
}
