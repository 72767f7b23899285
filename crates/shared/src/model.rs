//! Domain entities. Plain data, serde-friendly, storage-agnostic — neither
//! backend leaks its row shape through these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AttachmentId, ChannelId, MessageId, RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Admin,
    Participant,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub created_at: DateTime<Utc>,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_attachment_id: Option<AttachmentId>,
    pub admin_invite_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
    pub token: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_attachment_id: Option<AttachmentId>,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_private: bool,
    pub created_by: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacetType {
    Mention,
    Link,
    Code,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facet {
    #[serde(rename = "type")]
    pub kind: FacetType,
    pub start: u32,
    pub end: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Embed {
    Message { message_id: String, room_id: String },
    External {
        uri: String,
        title: String,
        description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thumb: Option<String>,
    },
}

/// The sanitizer's pure output: canonical, but attachment ids are not yet
/// resolved to attachment records. Produced by `sanitize::sanitize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedContent {
    pub text: String,
    pub facets: Vec<Facet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_ids: Vec<AttachmentId>,
}

/// Content as stored on a `Message`: the sanitizer's output with
/// `attachmentIds` resolved into full attachment records. Produced on every
/// create/edit by the `ChatService`, never trusted from storage unvalidated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub text: String,
    pub facets: Vec<Facet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub content: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_message_user_id: Option<UserId>,
    pub edited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    Image,
    Video,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: AttachmentId,
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    pub user_id: UserId,
    pub file_name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_is_admin() {
        assert!(Role::Admin.is_admin());
        assert!(!Role::Participant.is_admin());
    }

    #[test]
    fn content_without_embed_skips_field_on_serialize() {
        let content = Content {
            text: "hi".into(),
            facets: vec![],
            embed: None,
            attachments: vec![],
        };
        let json = serde_json::to_value(&content).unwrap();
        assert!(json.get("embed").is_none());
        assert!(json.get("attachments").is_none());
    }

    #[test]
    fn embed_message_roundtrips() {
        let embed = Embed::Message {
            message_id: "m1".into(),
            room_id: "r1".into(),
        };
        let json = serde_json::to_string(&embed).unwrap();
        let back: Embed = serde_json::from_str(&json).unwrap();
        match back {
            Embed::Message { message_id, room_id } => {
                assert_eq!(message_id, "m1");
                assert_eq!(room_id, "r1");
            }
            _ => panic!("wrong variant"),
        }
    }
}
