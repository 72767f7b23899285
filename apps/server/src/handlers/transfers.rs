use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::envelope;
use crate::error::ServerError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferBundleBody {
    pub user_tokens: Vec<String>,
}

/// Not gated by a bearer token — possession of the user tokens themselves
/// is the credential, per the spec's own description of this endpoint.
async fn create_transfer_bundle(
    State(state): State<AppState>,
    Json(body): Json<CreateTransferBundleBody>,
) -> Result<Json<Value>, ServerError> {
    let transfer_code = state.service.create_transfer_bundle(body.user_tokens).await?;
    Ok(envelope::ok(
        serde_json::json!({ "transferCode": transfer_code }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTransferBundleFromCodeBody {
    pub transfer_code: String,
}

/// A POST despite the "get" name: consuming the code is a mutation of the
/// credential registry's internal state, one-shot on success.
async fn get_transfer_bundle_from_code(
    State(state): State<AppState>,
    Json(body): Json<GetTransferBundleFromCodeBody>,
) -> Result<Json<Value>, ServerError> {
    let users = state
        .service
        .get_transfer_bundle_from_code(&body.transfer_code)
        .await?;
    Ok(envelope::ok(users))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/createTransferBundle", post(create_transfer_bundle))
        .route(
            "/api/getTransferBundleFromCode",
            post(get_transfer_bundle_from_code),
        )
}
