//! Row shapes returned by `sqlx::query_as`, and the conversions into the
//! storage-agnostic domain types in `chitter_shared::model`. Kept apart from
//! `role` and `content`, which are not directly `sqlx`-decodable: `role` is
//! stored as the `CHECK`-constrained text `'admin'`/`'participant'`, and
//! `content` is stored as the sanitizer's canonical shape (facets, embed,
//! attachment ids) and only resolved into full `Attachment` records at read
//! time, the same create/resolve split `chitter_shared::model` already makes
//! between `SanitizedContent` and `Content`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use chitter_shared::error::ChitterError;
use chitter_shared::ids::{AttachmentId, ChannelId, MessageId, RoomId, UserId};
use chitter_shared::model::{
    Attachment, AttachmentType, Channel, Embed, Facet, Role, Room, SanitizedContent,
};

pub fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::Participant => "participant",
    }
}

pub fn role_from_str(s: &str) -> Result<Role, ChitterError> {
    match s {
        "admin" => Ok(Role::Admin),
        "participant" => Ok(Role::Participant),
        _ => Err(ChitterError::UnknownServerError),
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct RoomRow {
    pub id: RoomId,
    pub created_at: DateTime<Utc>,
    pub display_name: String,
    pub description: Option<String>,
    pub logo_id: Option<AttachmentId>,
    pub admin_invite_only: bool,
}

impl From<RoomRow> for Room {
    fn from(row: RoomRow) -> Self {
        Room {
            id: row.id,
            created_at: row.created_at,
            display_name: row.display_name,
            description: row.description,
            logo_attachment_id: row.logo_id,
            admin_invite_only: row.admin_invite_only,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: UserId,
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
    pub token: String,
    pub display_name: String,
    pub description: Option<String>,
    pub avatar_id: Option<AttachmentId>,
    pub role: String,
}

impl UserRow {
    pub fn into_user(self) -> Result<chitter_shared::model::User, ChitterError> {
        Ok(chitter_shared::model::User {
            id: self.id,
            room_id: self.room_id,
            created_at: self.created_at,
            token: self.token,
            display_name: self.display_name,
            description: self.description,
            avatar_attachment_id: self.avatar_id,
            role: role_from_str(&self.role)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ChannelRow {
    pub id: ChannelId,
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
    pub display_name: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: UserId,
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            id: row.id,
            room_id: row.room_id,
            created_at: row.created_at,
            display_name: row.display_name,
            description: row.description,
            is_private: row.is_private,
            created_by: row.created_by,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct AttachmentRow {
    pub id: AttachmentId,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub user_id: UserId,
    pub file_name: String,
    pub path: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl AttachmentRow {
    pub fn into_attachment(self) -> Result<Attachment, ChitterError> {
        let kind = match self.kind.as_str() {
            "image" => AttachmentType::Image,
            "video" => AttachmentType::Video,
            "file" => AttachmentType::File,
            _ => return Err(ChitterError::UnknownServerError),
        };
        Ok(Attachment {
            id: self.id,
            kind,
            user_id: self.user_id,
            file_name: self.file_name,
            path: self.path,
            width: self.width.map(|w| w as u32),
            height: self.height.map(|h| h as u32),
            created_at: self.created_at,
        })
    }
}

/// The JSONB shape stored in `messages.content`: the sanitizer's canonical
/// output, unresolved. Resolved into a full `Content` (with attachment
/// records) only when a message is handed back to a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredContent {
    pub text: String,
    pub facets: Vec<Facet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_ids: Vec<AttachmentId>,
}

impl From<SanitizedContent> for StoredContent {
    fn from(c: SanitizedContent) -> Self {
        StoredContent {
            text: c.text,
            facets: c.facets,
            embed: c.embed,
            attachment_ids: c.attachment_ids,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct MessageRow {
    pub id: MessageId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub content: Json<StoredContent>,
    pub channel_id: Option<ChannelId>,
    pub direct_message_user_id: Option<UserId>,
    pub edited: bool,
}
