use std::str::FromStr;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chitter_shared::ids::{AttachmentId, ChannelId, UserId};
use chitter_shared::model::Role;
use serde::Deserialize;
use serde_json::Value;

use crate::envelope;
use crate::error::ServerError;
use crate::extractors::BearerToken;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveUserBody {
    pub user_id: UserId,
}

async fn remove_user(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<RemoveUserBody>,
) -> Result<Json<Value>, ServerError> {
    state.service.remove_user(&token, body.user_id).await?;
    Ok(envelope::ok_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserBody {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<AttachmentId>,
}

async fn update_user(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<UpdateUserBody>,
) -> Result<Json<Value>, ServerError> {
    let display_name = match body.display_name {
        Some(name) => Some(crate::validation::validate_display_name(&name)?),
        None => None,
    };
    state
        .service
        .update_user(&token, display_name, body.description, body.avatar)
        .await?;
    Ok(envelope::ok_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetUserRoleBody {
    pub user_id: UserId,
    pub role: Role,
}

async fn set_user_role(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<SetUserRoleBody>,
) -> Result<Json<Value>, ServerError> {
    state
        .service
        .set_user_role(&token, body.user_id, body.role)
        .await?;
    Ok(envelope::ok_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUsersQuery {
    #[serde(default)]
    pub channel_id: Option<String>,
}

async fn get_users(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Query(query): Query<GetUsersQuery>,
) -> Result<Json<Value>, ServerError> {
    let channel_id = match query.channel_id {
        Some(raw) => Some(
            ChannelId::from_str(&raw)
                .map_err(|_| ServerError::validation("channelId must be a valid channel id"))?,
        ),
        None => None,
    };
    let users = state.service.get_users(&token, channel_id).await?;
    Ok(envelope::ok(users))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUserQuery {
    pub user_id: String,
}

async fn get_user(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Query(query): Query<GetUserQuery>,
) -> Result<Json<Value>, ServerError> {
    let user_id = UserId::from_str(&query.user_id)
        .map_err(|_| ServerError::validation("userId must be a valid user id"))?;
    let user = state.service.get_user(&token, user_id).await?;
    Ok(envelope::ok(user))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/removeUser", post(remove_user))
        .route("/api/updateUser", post(update_user))
        .route("/api/setUserRole", post(set_user_role))
        .route("/api/getUsers", get(get_users))
        .route("/api/getUser", get(get_user))
}
