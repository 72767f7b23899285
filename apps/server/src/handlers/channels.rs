use std::str::FromStr;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chitter_shared::ids::{ChannelId, UserId};
use serde::Deserialize;
use serde_json::Value;

use crate::envelope;
use crate::error::ServerError;
use crate::extractors::BearerToken;
use crate::state::AppState;
use crate::validation::validate_display_name;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelBody {
    pub display_name: String,
    #[serde(default)]
    pub is_private: bool,
}

async fn create_channel(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<CreateChannelBody>,
) -> Result<Json<Value>, ServerError> {
    let display_name = validate_display_name(&body.display_name)?;
    let channel_id = state
        .service
        .create_channel(&token, display_name, body.is_private)
        .await?;
    Ok(envelope::ok(serde_json::json!({ "channelId": channel_id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveChannelBody {
    pub channel_id: ChannelId,
}

async fn remove_channel(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<RemoveChannelBody>,
) -> Result<Json<Value>, ServerError> {
    state.service.remove_channel(&token, body.channel_id).await?;
    Ok(envelope::ok_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChannelBody {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

async fn update_channel(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<UpdateChannelBody>,
) -> Result<Json<Value>, ServerError> {
    let display_name = match body.display_name {
        Some(name) => Some(validate_display_name(&name)?),
        None => None,
    };
    state
        .service
        .update_channel(&token, body.channel_id, display_name, body.description)
        .await?;
    Ok(envelope::ok_empty())
}

async fn get_channels(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
) -> Result<Json<Value>, ServerError> {
    let channels = state.service.get_channels(&token).await?;
    Ok(envelope::ok(channels))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetChannelQuery {
    pub channel_id: String,
}

async fn get_channel(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Query(query): Query<GetChannelQuery>,
) -> Result<Json<Value>, ServerError> {
    let channel_id = ChannelId::from_str(&query.channel_id)
        .map_err(|_| ServerError::validation("channelId must be a valid channel id"))?;
    let channel = state.service.get_channel(&token, channel_id).await?;
    Ok(envelope::ok(channel))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMembershipBody {
    pub user_id: UserId,
    pub channel_id: ChannelId,
}

async fn add_user_to_channel(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<ChannelMembershipBody>,
) -> Result<Json<Value>, ServerError> {
    state
        .service
        .add_user_to_channel(&token, body.user_id, body.channel_id)
        .await?;
    Ok(envelope::ok_empty())
}

async fn remove_user_from_channel(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<ChannelMembershipBody>,
) -> Result<Json<Value>, ServerError> {
    state
        .service
        .remove_user_from_channel(&token, body.user_id, body.channel_id)
        .await?;
    Ok(envelope::ok_empty())
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/createChannel", post(create_channel))
        .route("/api/removeChannel", post(remove_channel))
        .route("/api/updateChannel", post(update_channel))
        .route("/api/getChannels", get(get_channels))
        .route("/api/getChannel", get(get_channel))
        .route("/api/addUserToChannel", post(add_user_to_channel))
        .route("/api/removeUserFromChannel", post(remove_user_from_channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_build_without_panicking() {
        let _ = routes();
    }
}
