//! `PostgresChitterDatabase`: the `ChatService` contract over a
//! `sqlx::PgPool`. Every multi-row mutation runs inside `BEGIN … COMMIT`;
//! any error path rolls back -- either explicitly or by dropping the
//! `Transaction` without committing, exactly as `sqlx::Transaction` requires.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;

use chitter_shared::credentials::CredentialRegistry;
use chitter_shared::error::ChitterError;
use chitter_shared::ids::{AttachmentId, ChannelId, MessageId, RoomId, UserId};
use chitter_shared::model::{Attachment, AttachmentType, Channel, Content, Message, Role, Room, User};
use chitter_shared::sanitize::sanitize;
use chitter_shared::service::{ChatService, NewRoom};

use crate::rows::{role_to_str, AttachmentRow, ChannelRow, MessageRow, RoomRow, StoredContent, UserRow};

fn db_err(tag: ChitterError, e: sqlx::Error) -> ChitterError {
    tracing::error!(error = %e, tag = %tag, "database error");
    tag
}

fn gen_token() -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub struct PostgresChitterDatabase {
    pool: PgPool,
    credentials: CredentialRegistry,
}

impl PostgresChitterDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            credentials: CredentialRegistry::new(),
        }
    }

    /// Spawn the credential-sweep background task. Returns the handle; the
    /// caller owns its lifetime (abort, or let it run until process exit).
    pub fn spawn_background_tasks(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.credentials.sweep();
            }
        })
    }

    async fn resolve_user_row(&self, token: &str) -> Result<UserRow, ChitterError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, room_id, created_at, token, display_name, description, avatar_id, role \
             FROM users WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::InvalidUserToken, e))?
        .ok_or(ChitterError::InvalidUserToken)
    }

    async fn resolve_any_row(&self, token: &str) -> Result<UserRow, ChitterError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, room_id, created_at, token, display_name, description, avatar_id, role \
             FROM users WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::InvalidToken, e))?
        .ok_or(ChitterError::InvalidToken)
    }

    async fn resolve_admin_row(&self, token: &str) -> Result<UserRow, ChitterError> {
        let row = self
            .resolve_user_row(token)
            .await
            .map_err(|_| ChitterError::InvalidAdminTokenOrNonAdminUser)?;
        if row.role != "admin" {
            return Err(ChitterError::InvalidAdminTokenOrNonAdminUser);
        }
        Ok(row)
    }

    async fn room_exists(&self, room_id: RoomId) -> Result<bool, ChitterError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM rooms WHERE id = $1)")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::RoomNotFound, e))
    }

    async fn display_name_taken(&self, room_id: RoomId, display_name: &str, excluding: Option<UserId>) -> Result<bool, ChitterError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE room_id = $1 AND display_name = $2 AND id IS DISTINCT FROM $3)",
        )
        .bind(room_id)
        .bind(display_name)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotCreateUserFromInviteCode, e))
    }

    async fn channel_row(&self, channel_id: ChannelId) -> Result<Option<ChannelRow>, ChitterError> {
        sqlx::query_as::<_, ChannelRow>(
            "SELECT id, room_id, created_at, display_name, description, is_private, created_by \
             FROM channels WHERE id = $1",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::ChannelNotFound, e))
    }

    async fn is_private_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool, ChitterError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM private_channel_members WHERE channel_id = $1 AND user_id = $2)",
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::ChannelNotFoundInUsersRoom, e))
    }

    /// Check channel scope: exists, belongs to the caller's room, and if
    /// private the caller is a member.
    async fn check_channel_scope(&self, channel_id: ChannelId, room_id: RoomId, user_id: UserId) -> Result<ChannelRow, ChitterError> {
        let channel = self
            .channel_row(channel_id)
            .await?
            .ok_or(ChitterError::ChannelNotFoundInUsersRoom)?;
        if channel.room_id != room_id {
            return Err(ChitterError::ChannelNotFoundInUsersRoom);
        }
        if channel.is_private && !self.is_private_member(channel_id, user_id).await? {
            return Err(ChitterError::UserIsNotMemberOfPrivateChannel);
        }
        Ok(channel)
    }

    async fn attachment_row(&self, id: AttachmentId) -> Result<Option<AttachmentRow>, ChitterError> {
        sqlx::query_as::<_, AttachmentRow>(
            "SELECT id, type, user_id, file_name, path, width, height, created_at \
             FROM attachments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::AttachmentNotFound, e))
    }

    /// Resolve sanitized attachment ids into full records, rejecting any id
    /// the caller does not own.
    async fn resolve_attachments(&self, ids: &[AttachmentId], owner: UserId) -> Result<Vec<Attachment>, ChitterError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row = self
                .attachment_row(*id)
                .await?
                .filter(|a| a.user_id == owner)
                .ok_or(ChitterError::InvalidAttachmentIDs)?;
            out.push(row.into_attachment()?);
        }
        Ok(out)
    }

    async fn message_to_domain(&self, row: MessageRow) -> Result<Message, ChitterError> {
        let Json(stored) = row.content;
        let attachments = self.resolve_attachments_unchecked(&stored.attachment_ids).await?;
        Ok(Message {
            id: row.id,
            user_id: row.user_id,
            created_at: row.created_at,
            content: Content {
                text: stored.text,
                facets: stored.facets,
                embed: stored.embed,
                attachments,
            },
            channel_id: row.channel_id,
            direct_message_user_id: row.direct_message_user_id,
            edited: row.edited,
        })
    }

    /// Re-resolve attachments already persisted on a message; ownership was
    /// validated once, at write time.
    async fn resolve_attachments_unchecked(&self, ids: &[AttachmentId]) -> Result<Vec<Attachment>, ChitterError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.attachment_row(*id).await? {
                out.push(row.into_attachment()?);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ChatService for PostgresChitterDatabase {
    async fn create_room_and_admin(
        &self,
        room_name: String,
        admin_name: String,
        admin_invite_only: bool,
    ) -> Result<NewRoom, ChitterError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err(ChitterError::CouldNotCreateRoomAndAdmin, e))?;

        let room_id = RoomId::new();
        let admin_id = UserId::new();
        let channel_id = ChannelId::new();
        let token = gen_token();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO rooms (id, created_at, display_name, admin_invite_only) VALUES ($1, $2, $3, $4)",
        )
        .bind(room_id)
        .bind(now)
        .bind(&room_name)
        .bind(admin_invite_only)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotCreateRoomAndAdmin, e))?;

        sqlx::query(
            "INSERT INTO users (id, room_id, created_at, token, display_name, role) \
             VALUES ($1, $2, $3, $4, $5, 'admin')",
        )
        .bind(admin_id)
        .bind(room_id)
        .bind(now)
        .bind(&token)
        .bind(&admin_name)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotCreateRoomAndAdmin, e))?;

        sqlx::query(
            "INSERT INTO channels (id, room_id, created_at, display_name, is_private, created_by) \
             VALUES ($1, $2, $3, 'General', false, $4)",
        )
        .bind(channel_id)
        .bind(room_id)
        .bind(now)
        .bind(admin_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotCreateRoomAndAdmin, e))?;

        tx.commit()
            .await
            .map_err(|e| db_err(ChitterError::CouldNotCreateRoomAndAdmin, e))?;

        Ok(NewRoom {
            room: Room {
                id: room_id,
                created_at: now,
                display_name: room_name,
                description: None,
                logo_attachment_id: None,
                admin_invite_only,
            },
            admin: User {
                id: admin_id,
                room_id,
                created_at: now,
                token,
                display_name: admin_name,
                description: None,
                avatar_attachment_id: None,
                role: Role::Admin,
            },
            general_channel: Channel {
                id: channel_id,
                room_id,
                created_at: now,
                display_name: "General".into(),
                description: None,
                is_private: false,
                created_by: admin_id,
            },
        })
    }

    async fn update_room(
        &self,
        admin_token: &str,
        display_name: String,
        admin_invite_only: bool,
        description: Option<String>,
        logo_id: Option<AttachmentId>,
    ) -> Result<(), ChitterError> {
        let admin = self.resolve_admin_row(admin_token).await?;

        if let Some(logo_id) = logo_id {
            let valid = self
                .attachment_row(logo_id)
                .await?
                .is_some_and(|a| a.kind == "image");
            if !valid {
                return Err(ChitterError::InvalidOrNonImageLogoAttachment);
            }
        }

        sqlx::query(
            "UPDATE rooms SET display_name = $1, admin_invite_only = $2, description = $3, logo_id = $4 WHERE id = $5",
        )
        .bind(display_name)
        .bind(admin_invite_only)
        .bind(description)
        .bind(logo_id)
        .bind(admin.room_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotUpdateRoom, e))?;
        Ok(())
    }

    async fn get_room(&self, user_token: &str, room_id: RoomId) -> Result<Room, ChitterError> {
        let user = self.resolve_user_row(user_token).await?;
        if user.room_id != room_id {
            return Err(ChitterError::RoomNotFound);
        }
        let row = sqlx::query_as::<_, RoomRow>(
            "SELECT id, created_at, display_name, description, logo_id, admin_invite_only FROM rooms WHERE id = $1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::RoomNotFound, e))?
        .ok_or(ChitterError::RoomNotFound)?;
        Ok(row.into())
    }

    async fn create_invite_code(&self, user_token: &str) -> Result<String, ChitterError> {
        let user = self.resolve_user_row(user_token).await?;
        let admin_invite_only = sqlx::query_scalar::<_, bool>("SELECT admin_invite_only FROM rooms WHERE id = $1")
            .bind(user.room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotCreateInviteCode, e))?;

        if admin_invite_only && user.role != "admin" {
            return Err(ChitterError::UserIsNotAdminAndRoomIsAdminInviteOnly);
        }
        Ok(self.credentials.mint_invite_code(user.room_id, admin_invite_only))
    }

    async fn create_user_from_invite_code(&self, invite_code: &str, display_name: String) -> Result<User, ChitterError> {
        // Peek before consuming: a duplicate-name failure must not burn the
        // caller's one-shot code.
        let claim = self
            .credentials
            .peek_invite_code(invite_code)
            .ok_or(ChitterError::InvalidInviteCode)?;

        if !self.room_exists(claim.room_id).await? {
            return Err(ChitterError::RoomNotFound);
        }
        if self.display_name_taken(claim.room_id, &display_name, None).await? {
            return Err(ChitterError::DisplayNameAlreadyExistsInTheRoom);
        }

        let claim = self
            .credentials
            .consume_invite_code(invite_code)
            .ok_or(ChitterError::InvalidInviteCode)?;

        let user_id = UserId::new();
        let token = gen_token();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO users (id, room_id, created_at, token, display_name, role) \
             VALUES ($1, $2, $3, $4, $5, 'participant')",
        )
        .bind(user_id)
        .bind(claim.room_id)
        .bind(now)
        .bind(&token)
        .bind(&display_name)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotCreateUserFromInviteCode, e))?;

        Ok(User {
            id: user_id,
            room_id: claim.room_id,
            created_at: now,
            token,
            display_name,
            description: None,
            avatar_attachment_id: None,
            role: Role::Participant,
        })
    }

    async fn remove_user(&self, admin_token: &str, user_id: UserId) -> Result<(), ChitterError> {
        let admin = self.resolve_admin_row(admin_token).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveUser, e))?;

        let target_room: Option<RoomId> = sqlx::query_scalar("SELECT room_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveUser, e))?;
        let target_room = target_room.ok_or(ChitterError::UserNotFoundInAdminsRoom)?;
        if target_room != admin.room_id {
            return Err(ChitterError::UserNotFoundInAdminsRoom);
        }

        sqlx::query("DELETE FROM private_channel_members WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveUser, e))?;

        let new_token = gen_token();
        sqlx::query("UPDATE users SET token = $1 WHERE id = $2")
            .bind(new_token)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveUser, e))?;

        tx.commit().await.map_err(|e| db_err(ChitterError::CouldNotRemoveUser, e))?;
        Ok(())
    }

    async fn update_user(
        &self,
        user_token: &str,
        display_name: Option<String>,
        description: Option<String>,
        avatar: Option<AttachmentId>,
    ) -> Result<(), ChitterError> {
        let user = self.resolve_user_row(user_token).await?;

        if let Some(ref name) = display_name {
            if self.display_name_taken(user.room_id, name, Some(user.id)).await? {
                return Err(ChitterError::DisplayNameAlreadyExistsInTheRoom);
            }
        }
        if let Some(avatar_id) = avatar {
            let valid = self
                .attachment_row(avatar_id)
                .await?
                .is_some_and(|a| a.kind == "image" && a.user_id == user.id);
            if !valid {
                return Err(ChitterError::InvalidOrNonImageAvatarAttachment);
            }
        }

        sqlx::query(
            "UPDATE users SET \
                display_name = COALESCE($1, display_name), \
                description = COALESCE($2, description), \
                avatar_id = COALESCE($3, avatar_id) \
             WHERE id = $4",
        )
        .bind(display_name)
        .bind(description)
        .bind(avatar)
        .bind(user.id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotUpdateUser, e))?;
        Ok(())
    }

    async fn set_user_role(&self, admin_token: &str, user_id: UserId, role: Role) -> Result<(), ChitterError> {
        let admin = self.resolve_admin_row(admin_token).await?;
        let result = sqlx::query("UPDATE users SET role = $1 WHERE id = $2 AND room_id = $3")
            .bind(role_to_str(role))
            .bind(user_id)
            .bind(admin.room_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotChangeUserRole, e))?;
        if result.rows_affected() == 0 {
            return Err(ChitterError::UserNotFoundInAdminsRoom);
        }
        Ok(())
    }

    async fn create_transfer_bundle(&self, user_tokens: Vec<String>) -> Result<String, ChitterError> {
        let mut user_ids = Vec::new();
        for token in &user_tokens {
            if let Ok(row) = self.resolve_any_row(token).await {
                user_ids.push(row.id);
            }
        }
        if user_ids.is_empty() {
            return Err(ChitterError::NoValidTokens);
        }
        Ok(self.credentials.mint_transfer_code(user_ids))
    }

    async fn get_transfer_bundle_from_code(&self, transfer_code: &str) -> Result<Vec<User>, ChitterError> {
        let claim = self
            .credentials
            .consume_transfer_code(transfer_code)
            .ok_or(ChitterError::InvalidOrExpiredTransferCode)?;

        let mut users = Vec::with_capacity(claim.user_ids.len());
        for user_id in claim.user_ids {
            let row = sqlx::query_as::<_, UserRow>(
                "SELECT id, room_id, created_at, token, display_name, description, avatar_id, role \
                 FROM users WHERE id = $1",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotFetchUserDataFromTransferCode, e))?;
            if let Some(row) = row {
                users.push(row.into_user()?);
            }
        }
        Ok(users)
    }

    async fn create_message(
        &self,
        user_token: &str,
        content: Value,
        channel_id: Option<ChannelId>,
        direct_message_user_id: Option<UserId>,
    ) -> Result<MessageId, ChitterError> {
        match (channel_id, direct_message_user_id) {
            (Some(_), Some(_)) => return Err(ChitterError::MessageCannotTargetBothAChannelAndADirectUser),
            (None, None) => return Err(ChitterError::EitherChannelIdOrDirectMessageUserIdMustBeProvided),
            _ => {}
        }

        let user = self.resolve_user_row(user_token).await?;

        if let Some(cid) = channel_id {
            self.check_channel_scope(cid, user.room_id, user.id).await?;
        }
        if let Some(target) = direct_message_user_id {
            let target_room: Option<RoomId> = sqlx::query_scalar("SELECT room_id FROM users WHERE id = $1")
                .bind(target)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_err(ChitterError::CouldNotCreateMessage, e))?;
            if target_room != Some(user.room_id) {
                return Err(ChitterError::UserNotFound);
            }
        }

        let sanitized = sanitize(&content)?;
        let attachments = self.resolve_attachments(&sanitized.attachment_ids, user.id).await?;
        let stored = StoredContent {
            text: sanitized.text,
            facets: sanitized.facets,
            embed: sanitized.embed,
            attachment_ids: attachments.iter().map(|a| a.id).collect(),
        };

        let id: MessageId = sqlx::query_scalar(
            "INSERT INTO messages (user_id, created_at, content, channel_id, direct_message_user_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(user.id)
        .bind(Utc::now())
        .bind(Json(stored))
        .bind(channel_id)
        .bind(direct_message_user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotCreateMessage, e))?;

        Ok(id)
    }

    async fn remove_message(&self, user_token: &str, message_id: MessageId) -> Result<(), ChitterError> {
        let user = self.resolve_user_row(user_token).await?;
        let author_room = self.message_author_room(message_id).await?;
        let (author_id, room_id) = author_room.ok_or(ChitterError::MessageNotFound)?;

        if !self.is_author_or_room_admin(&user, author_id, room_id) {
            return Err(ChitterError::UserNotAuthorizedToDeleteThisMessage);
        }

        sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveMessage, e))?;
        Ok(())
    }

    async fn edit_message(&self, user_token: &str, message_id: MessageId, content: Value) -> Result<(), ChitterError> {
        let user = self.resolve_user_row(user_token).await?;
        let author_room = self.message_author_room(message_id).await?;
        let (author_id, room_id) = author_room.ok_or(ChitterError::MessageNotFound)?;

        if !self.is_author_or_room_admin(&user, author_id, room_id) {
            return Err(ChitterError::UserNotAuthorizedToEditThisMessage);
        }

        let sanitized = sanitize(&content)?;
        let attachments = self.resolve_attachments(&sanitized.attachment_ids, user.id).await?;
        let stored = StoredContent {
            text: sanitized.text,
            facets: sanitized.facets,
            embed: sanitized.embed,
            attachment_ids: attachments.iter().map(|a| a.id).collect(),
        };

        sqlx::query("UPDATE messages SET content = $1, edited = true WHERE id = $2")
            .bind(Json(stored))
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotEditMessage, e))?;
        Ok(())
    }

    async fn get_messages(
        &self,
        user_token: &str,
        channel_id: Option<ChannelId>,
        direct_message_user_id: Option<UserId>,
        cursor: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, ChitterError> {
        match (channel_id, direct_message_user_id) {
            (Some(_), Some(_)) => return Err(ChitterError::MessageCannotTargetBothAChannelAndADirectUser),
            (None, None) => return Err(ChitterError::EitherChannelIdOrDirectMessageUserIdMustBeProvided),
            _ => {}
        }

        let user = self.resolve_user_row(user_token).await?;

        let rows = if let Some(cid) = channel_id {
            self.check_channel_scope(cid, user.room_id, user.id).await?;
            sqlx::query_as::<_, MessageRow>(
                "SELECT id, user_id, created_at, content, channel_id, direct_message_user_id, edited \
                 FROM messages WHERE channel_id = $1 AND ($2::BIGINT IS NULL OR id < $2) \
                 ORDER BY id DESC LIMIT $3",
            )
            .bind(cid)
            .bind(cursor)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotGetMessages, e))?
        } else {
            let target = direct_message_user_id.expect("validated above");
            let target_room: Option<RoomId> = sqlx::query_scalar("SELECT room_id FROM users WHERE id = $1")
                .bind(target)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_err(ChitterError::CouldNotGetMessages, e))?;
            if target_room != Some(user.room_id) {
                return Err(ChitterError::UserNotFound);
            }
            sqlx::query_as::<_, MessageRow>(
                "SELECT id, user_id, created_at, content, channel_id, direct_message_user_id, edited \
                 FROM messages \
                 WHERE direct_message_user_id IS NOT NULL \
                   AND ((user_id = $1 AND direct_message_user_id = $2) OR (user_id = $2 AND direct_message_user_id = $1)) \
                   AND ($3::BIGINT IS NULL OR id < $3) \
                 ORDER BY id DESC LIMIT $4",
            )
            .bind(user.id)
            .bind(target)
            .bind(cursor)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotGetMessages, e))?
        };

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(self.message_to_domain(row).await?);
        }
        Ok(messages)
    }

    async fn create_channel(&self, admin_token: &str, display_name: String, is_private: bool) -> Result<ChannelId, ChitterError> {
        let admin = self.resolve_admin_row(admin_token).await?;

        let channel_id = ChannelId::new();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err(ChitterError::CouldNotCreateChannel, e))?;

        sqlx::query(
            "INSERT INTO channels (id, room_id, created_at, display_name, is_private, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(channel_id)
        .bind(admin.room_id)
        .bind(Utc::now())
        .bind(display_name)
        .bind(is_private)
        .bind(admin.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotCreateChannel, e))?;

        if is_private {
            sqlx::query("INSERT INTO private_channel_members (channel_id, user_id) VALUES ($1, $2)")
                .bind(channel_id)
                .bind(admin.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_err(ChitterError::CouldNotCreateChannel, e))?;
        }

        tx.commit().await.map_err(|e| db_err(ChitterError::CouldNotCreateChannel, e))?;
        Ok(channel_id)
    }

    async fn remove_channel(&self, admin_token: &str, channel_id: ChannelId) -> Result<(), ChitterError> {
        let admin = self.resolve_admin_row(admin_token).await?;
        let channel = self
            .channel_row(channel_id)
            .await?
            .filter(|c| c.room_id == admin.room_id)
            .ok_or(ChitterError::ChannelNotFoundInUsersRoom)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveChannel, e))?;

        // Cascade: a channel's messages go with it, in the same transaction.
        sqlx::query("DELETE FROM messages WHERE channel_id = $1")
            .bind(channel.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveChannel, e))?;
        sqlx::query("DELETE FROM private_channel_members WHERE channel_id = $1")
            .bind(channel.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveChannel, e))?;
        sqlx::query("DELETE FROM channels WHERE id = $1")
            .bind(channel.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveChannel, e))?;

        tx.commit().await.map_err(|e| db_err(ChitterError::CouldNotRemoveChannel, e))?;
        Ok(())
    }

    async fn update_channel(
        &self,
        admin_token: &str,
        channel_id: ChannelId,
        display_name: Option<String>,
        description: Option<String>,
    ) -> Result<(), ChitterError> {
        let admin = self.resolve_admin_row(admin_token).await?;
        let result = sqlx::query(
            "UPDATE channels SET display_name = COALESCE($1, display_name), description = COALESCE($2, description) \
             WHERE id = $3 AND room_id = $4",
        )
        .bind(display_name)
        .bind(description)
        .bind(channel_id)
        .bind(admin.room_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotUpdateChannel, e))?;
        if result.rows_affected() == 0 {
            return Err(ChitterError::ChannelNotFoundInUsersRoom);
        }
        Ok(())
    }

    async fn get_channels(&self, user_token: &str) -> Result<Vec<Channel>, ChitterError> {
        let user = self.resolve_user_row(user_token).await?;
        let rows = sqlx::query_as::<_, ChannelRow>(
            "SELECT c.id, c.room_id, c.created_at, c.display_name, c.description, c.is_private, c.created_by \
             FROM channels c \
             WHERE c.room_id = $1 \
               AND (c.is_private = false OR EXISTS ( \
                 SELECT 1 FROM private_channel_members m WHERE m.channel_id = c.id AND m.user_id = $2 \
               ))",
        )
        .bind(user.room_id)
        .bind(user.id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotRetrieveChannels, e))?;
        Ok(rows.into_iter().map(Channel::from).collect())
    }

    async fn get_channel(&self, user_token: &str, channel_id: ChannelId) -> Result<Channel, ChitterError> {
        let user = self.resolve_user_row(user_token).await?;
        let channel = self.check_channel_scope(channel_id, user.room_id, user.id).await?;
        Ok(channel.into())
    }

    async fn add_user_to_channel(&self, admin_token: &str, user_id: UserId, channel_id: ChannelId) -> Result<(), ChitterError> {
        let admin = self.resolve_admin_row(admin_token).await?;
        let channel = self
            .channel_row(channel_id)
            .await?
            .filter(|c| c.room_id == admin.room_id && c.is_private)
            .ok_or(ChitterError::ChannelNotFoundOrNotPrivate)?;

        let target_room: Option<RoomId> = sqlx::query_scalar("SELECT room_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotAddUserToChannel, e))?;
        if target_room != Some(admin.room_id) {
            return Err(ChitterError::UserNotFoundInAdminsRoom);
        }

        sqlx::query(
            "INSERT INTO private_channel_members (channel_id, user_id) VALUES ($1, $2) \
             ON CONFLICT (channel_id, user_id) DO NOTHING",
        )
        .bind(channel.id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotAddUserToChannel, e))?;
        Ok(())
    }

    async fn remove_user_from_channel(&self, admin_token: &str, user_id: UserId, channel_id: ChannelId) -> Result<(), ChitterError> {
        let admin = self.resolve_admin_row(admin_token).await?;
        let channel = self
            .channel_row(channel_id)
            .await?
            .filter(|c| c.room_id == admin.room_id && c.is_private)
            .ok_or(ChitterError::ChannelNotFoundOrNotPrivate)?;

        let target_room: Option<RoomId> = sqlx::query_scalar("SELECT room_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveUserFromChannel, e))?;
        if target_room != Some(admin.room_id) {
            return Err(ChitterError::UserNotFoundInAdminsRoom);
        }

        sqlx::query("DELETE FROM private_channel_members WHERE channel_id = $1 AND user_id = $2")
            .bind(channel.id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveUserFromChannel, e))?;
        Ok(())
    }

    async fn get_users(&self, user_token: &str, channel_id: Option<ChannelId>) -> Result<Vec<User>, ChitterError> {
        let user = self.resolve_user_row(user_token).await?;

        let rows = if let Some(cid) = channel_id {
            let channel = self.check_channel_scope(cid, user.room_id, user.id).await?;
            if channel.is_private {
                sqlx::query_as::<_, UserRow>(
                    "SELECT u.id, u.room_id, u.created_at, u.token, u.display_name, u.description, u.avatar_id, u.role \
                     FROM users u \
                     INNER JOIN private_channel_members m ON m.user_id = u.id \
                     WHERE m.channel_id = $1",
                )
                .bind(cid)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_err(ChitterError::CouldNotGetUsers, e))?
            } else {
                sqlx::query_as::<_, UserRow>(
                    "SELECT id, room_id, created_at, token, display_name, description, avatar_id, role \
                     FROM users WHERE room_id = $1",
                )
                .bind(user.room_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_err(ChitterError::CouldNotGetUsers, e))?
            }
        } else {
            sqlx::query_as::<_, UserRow>(
                "SELECT id, room_id, created_at, token, display_name, description, avatar_id, role \
                 FROM users WHERE room_id = $1",
            )
            .bind(user.room_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotGetUsers, e))?
        };

        rows.into_iter().map(UserRow::into_user).collect()
    }

    async fn get_user(&self, user_token: &str, user_id: UserId) -> Result<User, ChitterError> {
        let caller = self.resolve_user_row(user_token).await?;
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, room_id, created_at, token, display_name, description, avatar_id, role \
             FROM users WHERE id = $1 AND room_id = $2",
        )
        .bind(user_id)
        .bind(caller.room_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotRetrieveUserDetails, e))?
        .ok_or(ChitterError::UserNotFound)?;
        row.into_user()
    }

    async fn upload_attachment(
        &self,
        token: &str,
        kind: AttachmentType,
        file_name: String,
        path: String,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Attachment, ChitterError> {
        let user = self.resolve_any_row(token).await?;
        let attachment_id = AttachmentId::new();
        let now = Utc::now();
        let kind_str = match kind {
            AttachmentType::Image => "image",
            AttachmentType::Video => "video",
            AttachmentType::File => "file",
        };

        sqlx::query(
            "INSERT INTO attachments (id, type, user_id, file_name, path, width, height, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(attachment_id)
        .bind(kind_str)
        .bind(user.id)
        .bind(&file_name)
        .bind(&path)
        .bind(width.map(|w| w as i32))
        .bind(height.map(|h| h as i32))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::CouldNotUploadAttachment, e))?;

        Ok(Attachment {
            id: attachment_id,
            kind,
            user_id: user.id,
            file_name,
            path,
            width,
            height,
            created_at: now,
        })
    }

    async fn remove_attachment(&self, token: &str, attachment_id: AttachmentId) -> Result<(), ChitterError> {
        let user = self.resolve_any_row(token).await?;
        let result = sqlx::query("DELETE FROM attachments WHERE id = $1 AND user_id = $2")
            .bind(attachment_id)
            .bind(user.id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err(ChitterError::CouldNotRemoveAttachment, e))?;
        if result.rows_affected() == 0 {
            return Err(ChitterError::AttachmentNotFound);
        }
        Ok(())
    }
}

impl PostgresChitterDatabase {
    async fn message_author_room(&self, message_id: MessageId) -> Result<Option<(UserId, RoomId)>, ChitterError> {
        let row: Option<(UserId, RoomId)> = sqlx::query_as(
            "SELECT m.user_id, u.room_id FROM messages m INNER JOIN users u ON u.id = m.user_id WHERE m.id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err(ChitterError::MessageNotFound, e))?;
        Ok(row)
    }

    fn is_author_or_room_admin(&self, caller: &UserRow, author_id: UserId, author_room: RoomId) -> bool {
        caller.id == author_id || (caller.role == "admin" && caller.room_id == author_room)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn db(pool: PgPool) -> PostgresChitterDatabase {
        PostgresChitterDatabase::new(pool)
    }

    #[sqlx::test]
    async fn create_room_and_admin_registers_admin_token(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let room = store.get_room(&created.admin.token, created.room.id).await.unwrap();
        assert_eq!(room.display_name, "room");
    }

    #[sqlx::test]
    async fn invite_flow_creates_participant_and_code_is_one_shot(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = store.create_invite_code(&created.admin.token).await.unwrap();
        let bob = store.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        assert_eq!(bob.role, Role::Participant);
        let err = store
            .create_user_from_invite_code(&code, "carol".into())
            .await
            .unwrap_err();
        assert_eq!(err, ChitterError::InvalidInviteCode);
    }

    #[sqlx::test]
    async fn duplicate_display_name_does_not_consume_the_invite_code(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = store.create_invite_code(&created.admin.token).await.unwrap();
        store
            .create_user_from_invite_code(&code, "alice".into())
            .await
            .unwrap_err();
        let bob = store.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        assert_eq!(bob.display_name, "bob");
    }

    #[sqlx::test]
    async fn admin_can_remove_other_users_message(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = created.general_channel.id;
        let code = store.create_invite_code(&created.admin.token).await.unwrap();
        let bob = store.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        let id = store
            .create_message(&bob.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap();
        store.remove_message(&created.admin.token, id).await.unwrap();
        let messages = store
            .get_messages(&created.admin.token, Some(channel_id), None, None, 10)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[sqlx::test]
    async fn non_author_cannot_remove_message(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = created.general_channel.id;
        let code = store.create_invite_code(&created.admin.token).await.unwrap();
        let bob = store.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        let id = store
            .create_message(&created.admin.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap();
        let err = store.remove_message(&bob.token, id).await.unwrap_err();
        assert_eq!(err, ChitterError::UserNotAuthorizedToDeleteThisMessage);
    }

    #[sqlx::test]
    async fn cannot_reference_attachment_owned_by_someone_else(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = created.general_channel.id;
        let code = store.create_invite_code(&created.admin.token).await.unwrap();
        let bob = store.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        let attachment = store
            .upload_attachment(
                &created.admin.token,
                AttachmentType::Image,
                "a.png".into(),
                "uploads/a.png".into(),
                Some(1),
                Some(1),
            )
            .await
            .unwrap();
        let err = store
            .create_message(
                &bob.token,
                json!({"text": "look", "attachmentIds": [attachment.id.0.to_string()]}),
                Some(channel_id),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err, ChitterError::InvalidAttachmentIDs);
    }

    #[sqlx::test]
    async fn removing_channel_cascades_its_messages(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = store
            .create_channel(&created.admin.token, "temp".into(), false)
            .await
            .unwrap();
        store
            .create_message(&created.admin.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap();
        store.remove_channel(&created.admin.token, channel_id).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE channel_id = $1")
            .bind(channel_id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test]
    async fn private_channel_hides_messages_from_non_members(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = store
            .create_channel(&created.admin.token, "secret".into(), true)
            .await
            .unwrap();
        let code = store.create_invite_code(&created.admin.token).await.unwrap();
        let bob = store.create_user_from_invite_code(&code, "bob".into()).await.unwrap();

        let err = store
            .create_message(&bob.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap_err();
        assert_eq!(err, ChitterError::UserIsNotMemberOfPrivateChannel);

        store
            .add_user_to_channel(&created.admin.token, bob.id, channel_id)
            .await
            .unwrap();
        store
            .create_message(&bob.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap();
    }

    #[sqlx::test]
    async fn get_messages_cursor_paginates_strictly_before(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = created.general_channel.id;
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(
                store
                    .create_message(&created.admin.token, json!({"text": format!("m{i}")}), Some(channel_id), None)
                    .await
                    .unwrap(),
            );
        }
        let page = store
            .get_messages(&created.admin.token, Some(channel_id), None, Some(ids[2]), 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|m| m.id < ids[2]));
    }

    #[sqlx::test]
    async fn direct_messages_are_visible_to_both_parties(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = store.create_invite_code(&created.admin.token).await.unwrap();
        let bob = store.create_user_from_invite_code(&code, "bob".into()).await.unwrap();

        store
            .create_message(&created.admin.token, json!({"text": "hi bob"}), None, Some(bob.id))
            .await
            .unwrap();

        let from_admin_view = store
            .get_messages(&created.admin.token, None, Some(bob.id), None, 10)
            .await
            .unwrap();
        let from_bob_view = store
            .get_messages(&bob.token, None, Some(created.admin.id), None, 10)
            .await
            .unwrap();
        assert_eq!(from_admin_view.len(), 1);
        assert_eq!(from_bob_view.len(), 1);
    }

    #[sqlx::test]
    async fn transfer_bundle_round_trips_users(pool: PgPool) {
        let store = db(pool);
        let created = store
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = store
            .create_transfer_bundle(vec![created.admin.token.clone()])
            .await
            .unwrap();
        let users = store.get_transfer_bundle_from_code(&code).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, created.admin.id);
    }
}
