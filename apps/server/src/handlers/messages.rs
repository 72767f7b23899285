use std::str::FromStr;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chitter_shared::ids::{ChannelId, MessageId, UserId};
use serde::Deserialize;
use serde_json::Value;

use crate::envelope;
use crate::error::ServerError;
use crate::extractors::BearerToken;
use crate::state::AppState;
use crate::validation::validate_message_limit;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageBody {
    pub content: Value,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub direct_message_user_id: Option<UserId>,
}

async fn create_message(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<CreateMessageBody>,
) -> Result<Json<Value>, ServerError> {
    let message_id = state
        .service
        .create_message(
            &token,
            body.content,
            body.channel_id,
            body.direct_message_user_id,
        )
        .await?;
    Ok(envelope::ok(serde_json::json!({ "messageId": message_id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMessageBody {
    pub message_id: MessageId,
}

async fn remove_message(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<RemoveMessageBody>,
) -> Result<Json<Value>, ServerError> {
    state.service.remove_message(&token, body.message_id).await?;
    Ok(envelope::ok_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageBody {
    pub message_id: MessageId,
    pub content: Value,
}

async fn edit_message(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<EditMessageBody>,
) -> Result<Json<Value>, ServerError> {
    state
        .service
        .edit_message(&token, body.message_id, body.content)
        .await?;
    Ok(envelope::ok_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessagesQuery {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub direct_message_user_id: Option<String>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default = "default_message_limit")]
    pub limit: u32,
}

fn default_message_limit() -> u32 {
    25
}

async fn get_messages(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Query(query): Query<GetMessagesQuery>,
) -> Result<Json<Value>, ServerError> {
    let limit = validate_message_limit(query.limit)?;
    let channel_id = match query.channel_id {
        Some(raw) => Some(
            ChannelId::from_str(&raw)
                .map_err(|_| ServerError::validation("channelId must be a valid channel id"))?,
        ),
        None => None,
    };
    let direct_message_user_id = match query.direct_message_user_id {
        Some(raw) => Some(UserId::from_str(&raw).map_err(|_| {
            ServerError::validation("directMessageUserId must be a valid user id")
        })?),
        None => None,
    };
    let cursor = match query.cursor {
        Some(raw) => Some(
            MessageId::from_str(&raw)
                .map_err(|_| ServerError::validation("cursor must be a valid message id"))?,
        ),
        None => None,
    };
    let messages = state
        .service
        .get_messages(&token, channel_id, direct_message_user_id, cursor, limit)
        .await?;
    Ok(envelope::ok(messages))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/createMessage", post(create_message))
        .route("/api/removeMessage", post(remove_message))
        .route("/api/editMessage", post(edit_message))
        .route("/api/getMessages", get(get_messages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_build_without_panicking() {
        let _ = routes();
    }
}
