use std::str::FromStr;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chitter_shared::ids::{AttachmentId, RoomId};
use serde::Deserialize;
use serde_json::Value;

use crate::envelope;
use crate::error::ServerError;
use crate::extractors::BearerToken;
use crate::state::AppState;
use crate::validation::validate_display_name;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomAndAdminBody {
    pub room_name: String,
    pub admin_name: String,
    #[serde(default)]
    pub admin_invite_only: bool,
}

async fn create_room_and_admin(
    State(state): State<AppState>,
    Json(body): Json<CreateRoomAndAdminBody>,
) -> Result<Json<Value>, ServerError> {
    let room_name = validate_display_name(&body.room_name)?;
    let admin_name = validate_display_name(&body.admin_name)?;
    let new_room = state
        .service
        .create_room_and_admin(room_name, admin_name, body.admin_invite_only)
        .await?;
    Ok(envelope::ok(serde_json::json!({
        "room": new_room.room,
        "admin": new_room.admin,
        "generalChannel": new_room.general_channel,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoomBody {
    pub display_name: String,
    #[serde(default)]
    pub admin_invite_only: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logo_id: Option<String>,
}

async fn update_room(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<UpdateRoomBody>,
) -> Result<Json<Value>, ServerError> {
    let display_name = validate_display_name(&body.display_name)?;
    let logo_id = match body.logo_id {
        Some(raw) => Some(
            AttachmentId::from_str(&raw)
                .map_err(|_| ServerError::validation("logoId must be a valid attachment id"))?,
        ),
        None => None,
    };
    state
        .service
        .update_room(
            &token,
            display_name,
            body.admin_invite_only,
            body.description,
            logo_id,
        )
        .await?;
    Ok(envelope::ok_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRoomQuery {
    pub room_id: String,
}

async fn get_room(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Query(query): Query<GetRoomQuery>,
) -> Result<Json<Value>, ServerError> {
    let room_id = RoomId::from_str(&query.room_id)
        .map_err(|_| ServerError::validation("roomId must be a valid room id"))?;
    let room = state.service.get_room(&token, room_id).await?;
    Ok(envelope::ok(room))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/createRoomAndAdmin", post(create_room_and_admin))
        .route("/api/updateRoom", post(update_room))
        .route("/api/getRoom", get(get_room))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_build_without_panicking() {
        let _ = routes();
    }
}
