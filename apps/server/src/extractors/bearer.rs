use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::state::AppState;

/// The raw bearer token from the `Authorization` header, or an empty string
/// if the header is absent or malformed.
///
/// Unlike the teacher's `AuthUser` extractor, this never rejects the
/// request and never resolves the token to a user — every `ChatService`
/// operation takes the raw token and does that resolution itself, so a
/// missing/invalid token surfaces as the service's own `InvalidUserToken`/
/// `InvalidAdminToken` error rather than an edge-layer 401.
pub struct BearerToken(pub String);

impl FromRequestParts<AppState> for BearerToken {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .unwrap_or("")
            .to_string();
        Ok(BearerToken(token))
    }
}
