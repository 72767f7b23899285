use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::envelope;
use crate::error::ServerError;
use crate::extractors::BearerToken;
use crate::state::AppState;
use crate::validation::validate_display_name;

async fn create_invite_code(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<Value>, ServerError> {
    let invite_code = state.service.create_invite_code(&token).await?;
    Ok(envelope::ok(serde_json::json!({ "inviteCode": invite_code })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserFromInviteCodeBody {
    pub invite_code: String,
    pub display_name: String,
}

async fn create_user_from_invite_code(
    State(state): State<AppState>,
    Json(body): Json<CreateUserFromInviteCodeBody>,
) -> Result<Json<Value>, ServerError> {
    let display_name = validate_display_name(&body.display_name)?;
    let user = state
        .service
        .create_user_from_invite_code(&body.invite_code, display_name)
        .await?;
    Ok(envelope::ok(user))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/createInviteCode", post(create_invite_code))
        .route(
            "/api/createUserFromInviteCode",
            post(create_user_from_invite_code),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_build_without_panicking() {
        let _ = routes();
    }
}
