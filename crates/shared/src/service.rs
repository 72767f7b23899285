//! The one contract both storage backends implement. Every method takes a
//! token first (or nothing, for the two credential-only entry points that
//! authenticate by possession of a code/token set instead) and returns
//! either its success payload or a `ChitterError`. No method panics on bad
//! input — a malformed argument is a `ChitterError`, not a `Result::Err`
//! that unwinds.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ChitterError;
use crate::ids::{AttachmentId, ChannelId, MessageId, RoomId, UserId};
use crate::model::{Attachment, AttachmentType, Channel, Message, Role, Room, User};

/// Payload of a successful `createRoomAndAdmin`: the three entities that
/// must have committed together.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub room: Room,
    pub admin: User,
    pub general_channel: Channel,
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn create_room_and_admin(
        &self,
        room_name: String,
        admin_name: String,
        admin_invite_only: bool,
    ) -> Result<NewRoom, ChitterError>;

    async fn update_room(
        &self,
        admin_token: &str,
        display_name: String,
        admin_invite_only: bool,
        description: Option<String>,
        logo_id: Option<AttachmentId>,
    ) -> Result<(), ChitterError>;

    async fn get_room(&self, user_token: &str, room_id: RoomId) -> Result<Room, ChitterError>;

    async fn create_invite_code(&self, user_token: &str) -> Result<String, ChitterError>;

    async fn create_user_from_invite_code(
        &self,
        invite_code: &str,
        display_name: String,
    ) -> Result<User, ChitterError>;

    async fn remove_user(&self, admin_token: &str, user_id: UserId) -> Result<(), ChitterError>;

    async fn update_user(
        &self,
        user_token: &str,
        display_name: Option<String>,
        description: Option<String>,
        avatar: Option<AttachmentId>,
    ) -> Result<(), ChitterError>;

    async fn set_user_role(
        &self,
        admin_token: &str,
        user_id: UserId,
        role: Role,
    ) -> Result<(), ChitterError>;

    async fn create_transfer_bundle(&self, user_tokens: Vec<String>) -> Result<String, ChitterError>;

    async fn get_transfer_bundle_from_code(
        &self,
        transfer_code: &str,
    ) -> Result<Vec<User>, ChitterError>;

    async fn create_message(
        &self,
        user_token: &str,
        content: Value,
        channel_id: Option<ChannelId>,
        direct_message_user_id: Option<UserId>,
    ) -> Result<MessageId, ChitterError>;

    async fn remove_message(&self, user_token: &str, message_id: MessageId) -> Result<(), ChitterError>;

    async fn edit_message(
        &self,
        user_token: &str,
        message_id: MessageId,
        content: Value,
    ) -> Result<(), ChitterError>;

    async fn get_messages(
        &self,
        user_token: &str,
        channel_id: Option<ChannelId>,
        direct_message_user_id: Option<UserId>,
        cursor: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, ChitterError>;

    async fn create_channel(
        &self,
        admin_token: &str,
        display_name: String,
        is_private: bool,
    ) -> Result<ChannelId, ChitterError>;

    async fn remove_channel(&self, admin_token: &str, channel_id: ChannelId) -> Result<(), ChitterError>;

    async fn update_channel(
        &self,
        admin_token: &str,
        channel_id: ChannelId,
        display_name: Option<String>,
        description: Option<String>,
    ) -> Result<(), ChitterError>;

    async fn get_channels(&self, user_token: &str) -> Result<Vec<Channel>, ChitterError>;

    async fn get_channel(&self, user_token: &str, channel_id: ChannelId) -> Result<Channel, ChitterError>;

    async fn add_user_to_channel(
        &self,
        admin_token: &str,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), ChitterError>;

    async fn remove_user_from_channel(
        &self,
        admin_token: &str,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), ChitterError>;

    /// `channel_id` present narrows to that channel's membership; absent
    /// returns every user in the caller's room.
    async fn get_users(
        &self,
        user_token: &str,
        channel_id: Option<ChannelId>,
    ) -> Result<Vec<User>, ChitterError>;

    async fn get_user(&self, user_token: &str, user_id: UserId) -> Result<User, ChitterError>;

    async fn upload_attachment(
        &self,
        token: &str,
        kind: AttachmentType,
        file_name: String,
        path: String,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Attachment, ChitterError>;

    async fn remove_attachment(&self, token: &str, attachment_id: AttachmentId) -> Result<(), ChitterError>;
}
