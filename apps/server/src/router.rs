use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the application router: health checks plus the flat
/// `/api/<operationName>` surface, one nested router per resource module.
pub fn build_router(state: AppState) -> axum::Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    let max_upload_bytes = state.config.max_upload_bytes as usize;

    handlers::health::routes()
        .merge(handlers::rooms::routes())
        .merge(handlers::invites::routes())
        .merge(handlers::transfers::routes())
        .merge(handlers::users::routes())
        .merge(handlers::channels::routes())
        .merge(handlers::messages::routes())
        .merge(handlers::attachments::routes())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn request_id_middleware(
    request: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::Span::current().record("request_id", request_id.as_str());
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert("x-request-id", HeaderValue::from_str(&request_id).unwrap());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn builds_without_panicking() {
        let state = AppState {
            service: Arc::new(chitter_store_mem::ChitterMem::new(None)),
            config: Arc::new(crate::config::ServerConfig::default()),
            upload_dir: std::path::PathBuf::from("/tmp"),
        };
        let _ = build_router(state);
    }
}
