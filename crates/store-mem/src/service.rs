//! `ChitterMem`: the in-memory `ChatService` implementation. One `RoomState`
//! per room under a global map, a global token->identity index for O(1)
//! authentication, and a reverse user->room index so credentials that name a
//! user (transfer codes) can be resolved without scanning every room.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use rand::RngCore;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chitter_shared::credentials::CredentialRegistry;
use chitter_shared::error::ChitterError;
use chitter_shared::ids::{AttachmentId, ChannelId, MessageId, RoomId, UserId};
use chitter_shared::model::{
    Attachment, AttachmentType, Channel, Content, Message, Role, Room, User,
};
use chitter_shared::sanitize::sanitize;
use chitter_shared::service::{ChatService, NewRoom};

use crate::room_state::{dm_key, RoomState};
use crate::snapshot::{from_snapshot_value, to_snapshot_value, SnapshotStore};

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const TOKEN_BYTES: usize = 32;

fn generate_token() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; TOKEN_BYTES];
    rng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn lock_room(guard: &Mutex<RoomState>) -> MutexGuard<'_, RoomState> {
    guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn validate_target(channel_id: Option<ChannelId>, dm_user_id: Option<UserId>) -> Result<(), ChitterError> {
    match (channel_id, dm_user_id) {
        (Some(_), Some(_)) => Err(ChitterError::MessageCannotTargetBothAChannelAndADirectUser),
        (None, None) => Err(ChitterError::EitherChannelIdOrDirectMessageUserIdMustBeProvided),
        _ => Ok(()),
    }
}

fn check_channel_scope(state: &RoomState, channel_id: ChannelId, user_id: UserId) -> Result<&Channel, ChitterError> {
    let channel = state
        .channels
        .get(&channel_id)
        .ok_or(ChitterError::ChannelNotFoundInUsersRoom)?;
    if channel.is_private && !state.is_private_member(channel_id, user_id) {
        return Err(ChitterError::UserIsNotMemberOfPrivateChannel);
    }
    Ok(channel)
}

fn resolve_attachments(
    state: &RoomState,
    ids: &[AttachmentId],
    owner: UserId,
) -> Result<Vec<Attachment>, ChitterError> {
    ids.iter()
        .map(|id| {
            state
                .attachments
                .get(id)
                .filter(|a| a.user_id == owner)
                .cloned()
                .ok_or(ChitterError::InvalidAttachmentIDs)
        })
        .collect()
}

/// Author or any admin sharing the message's room may remove/edit it.
fn is_author_or_room_admin(state: &RoomState, author_id: UserId, caller_id: UserId) -> bool {
    author_id == caller_id || state.users.get(&caller_id).is_some_and(|u| u.role.is_admin())
}

fn display_name_taken(state: &RoomState, display_name: &str, excluding: Option<UserId>) -> bool {
    state
        .users
        .values()
        .any(|u| u.display_name == display_name && Some(u.id) != excluding)
}

/// Process-wide in-memory backend. Cheap to clone (wrap in `Arc`) — every
/// field is itself a concurrent collection or shared registry.
pub struct ChitterMem {
    rooms: DashMap<RoomId, Mutex<RoomState>>,
    tokens: DashMap<String, (RoomId, UserId)>,
    user_rooms: DashMap<UserId, RoomId>,
    credentials: CredentialRegistry,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
}

impl ChitterMem {
    pub fn new(snapshot_store: Option<Arc<dyn SnapshotStore>>) -> Self {
        Self {
            rooms: DashMap::new(),
            tokens: DashMap::new(),
            user_rooms: DashMap::new(),
            credentials: CredentialRegistry::new(),
            snapshot_store,
        }
    }

    /// Rebuild every room (and the token/user indices) from the configured
    /// snapshot store. A store with nothing saved yet is not an error.
    pub async fn load(&self) -> std::io::Result<()> {
        let Some(store) = &self.snapshot_store else {
            return Ok(());
        };
        let saved = store.load().await?;
        for value in saved {
            let state = from_snapshot_value(value).map_err(std::io::Error::from)?;
            let room_id = state.room().id;
            for user in state.users.values() {
                self.tokens.insert(user.token.clone(), (room_id, user.id));
                self.user_rooms.insert(user.id, room_id);
            }
            self.rooms.insert(room_id, Mutex::new(state));
        }
        info!(rooms = self.rooms.len(), "loaded snapshot");
        Ok(())
    }

    /// Serialize every room and hand the batch to the snapshot store.
    pub async fn save(&self) -> std::io::Result<()> {
        let Some(store) = &self.snapshot_store else {
            return Ok(());
        };
        let rooms: Vec<Value> = self
            .rooms
            .iter()
            .map(|entry| to_snapshot_value(&lock_room(entry.value())))
            .collect();
        store.save(rooms).await?;
        debug!(rooms = rooms.len(), "saved snapshot");
        Ok(())
    }

    /// Spawn the periodic snapshot-save and credential-sweep loops. Callers
    /// own the returned handles; dropping them does not stop the tasks, only
    /// `JoinHandle::abort` or process exit does.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.snapshot_store.is_some() {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = this.save().await {
                        warn!(error = %e, "periodic snapshot save failed");
                    }
                }
            }));
        }

        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.credentials.sweep();
            }
        }));

        handles
    }

    /// Flush a final snapshot. Call on graceful shutdown.
    pub async fn close(&self) -> std::io::Result<()> {
        self.save().await
    }

    fn resolve_user(&self, token: &str) -> Result<(RoomId, UserId), ChitterError> {
        self.tokens
            .get(token)
            .map(|entry| *entry.value())
            .ok_or(ChitterError::InvalidUserToken)
    }

    fn resolve_any(&self, token: &str) -> Result<(RoomId, UserId), ChitterError> {
        self.tokens
            .get(token)
            .map(|entry| *entry.value())
            .ok_or(ChitterError::InvalidToken)
    }

    fn resolve_admin(&self, token: &str) -> Result<(RoomId, UserId), ChitterError> {
        let (room_id, user_id) = self
            .tokens
            .get(token)
            .map(|entry| *entry.value())
            .ok_or(ChitterError::InvalidAdminTokenOrNonAdminUser)?;
        let room = self
            .rooms
            .get(&room_id)
            .ok_or(ChitterError::InvalidAdminTokenOrNonAdminUser)?;
        let state = lock_room(room.value());
        let is_admin = state
            .users
            .get(&user_id)
            .is_some_and(|u| u.role.is_admin());
        drop(state);
        if !is_admin {
            return Err(ChitterError::InvalidAdminTokenOrNonAdminUser);
        }
        Ok((room_id, user_id))
    }

    fn register_user(&self, room_id: RoomId, user: &User) {
        self.tokens.insert(user.token.clone(), (room_id, user.id));
        self.user_rooms.insert(user.id, room_id);
    }
}

#[async_trait]
impl ChatService for ChitterMem {
    async fn create_room_and_admin(
        &self,
        room_name: String,
        admin_name: String,
        admin_invite_only: bool,
    ) -> Result<NewRoom, ChitterError> {
        let now = Utc::now();
        let room = Room {
            id: RoomId::new(),
            created_at: now,
            display_name: room_name,
            description: None,
            logo_attachment_id: None,
            admin_invite_only,
        };
        let admin = User {
            id: UserId::new(),
            room_id: room.id,
            created_at: now,
            token: generate_token(),
            display_name: admin_name,
            description: None,
            avatar_attachment_id: None,
            role: Role::Admin,
        };
        let general_channel = Channel {
            id: ChannelId::new(),
            room_id: room.id,
            created_at: now,
            display_name: "General".to_string(),
            description: None,
            is_private: false,
            created_by: admin.id,
        };

        let mut state = RoomState::new(room.clone());
        state.users.insert(admin.id, admin.clone());
        state.channels.insert(general_channel.id, general_channel.clone());
        self.rooms.insert(room.id, Mutex::new(state));
        self.register_user(room.id, &admin);

        Ok(NewRoom { room, admin, general_channel })
    }

    async fn update_room(
        &self,
        admin_token: &str,
        display_name: String,
        admin_invite_only: bool,
        description: Option<String>,
        logo_id: Option<AttachmentId>,
    ) -> Result<(), ChitterError> {
        let (room_id, _) = self.resolve_admin(admin_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());

        if let Some(logo_id) = logo_id {
            let valid = state
                .attachments
                .get(&logo_id)
                .is_some_and(|a| a.kind == AttachmentType::Image);
            if !valid {
                return Err(ChitterError::InvalidOrNonImageLogoAttachment);
            }
        }

        let room_record = state.room.as_mut().expect("room always present");
        room_record.display_name = display_name;
        room_record.admin_invite_only = admin_invite_only;
        room_record.description = description;
        room_record.logo_attachment_id = logo_id;
        Ok(())
    }

    async fn get_room(&self, user_token: &str, room_id: RoomId) -> Result<Room, ChitterError> {
        let (token_room, _) = self.resolve_user(user_token)?;
        if token_room != room_id {
            return Err(ChitterError::RoomNotFound);
        }
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        Ok(lock_room(room.value()).room().clone())
    }

    async fn create_invite_code(&self, user_token: &str) -> Result<String, ChitterError> {
        let (room_id, user_id) = self.resolve_user(user_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let state = lock_room(room.value());
        let admin_invite_only = state.room().admin_invite_only;
        let is_admin = state.users.get(&user_id).is_some_and(|u| u.role.is_admin());
        drop(state);

        if admin_invite_only && !is_admin {
            return Err(ChitterError::UserIsNotAdminAndRoomIsAdminInviteOnly);
        }
        Ok(self.credentials.mint_invite_code(room_id, admin_invite_only))
    }

    async fn create_user_from_invite_code(
        &self,
        invite_code: &str,
        display_name: String,
    ) -> Result<User, ChitterError> {
        // Peek first: a name collision must not burn the caller's one-shot
        // code. Only consume once the name check has passed.
        let claim = self
            .credentials
            .peek_invite_code(invite_code)
            .ok_or(ChitterError::InvalidInviteCode)?;
        let room = self.rooms.get(&claim.room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());

        if display_name_taken(&state, &display_name, None) {
            return Err(ChitterError::DisplayNameAlreadyExistsInTheRoom);
        }

        let claim = self
            .credentials
            .consume_invite_code(invite_code)
            .ok_or(ChitterError::InvalidInviteCode)?;

        let user = User {
            id: UserId::new(),
            room_id: claim.room_id,
            created_at: Utc::now(),
            token: generate_token(),
            display_name,
            description: None,
            avatar_attachment_id: None,
            role: Role::Participant,
        };
        state.users.insert(user.id, user.clone());
        drop(state);
        self.register_user(claim.room_id, &user);
        Ok(user)
    }

    async fn remove_user(&self, admin_token: &str, user_id: UserId) -> Result<(), ChitterError> {
        let (room_id, _) = self.resolve_admin(admin_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());
        let removed = state
            .users
            .remove(&user_id)
            .ok_or(ChitterError::UserNotFoundInAdminsRoom)?;
        for members in state.private_members.values_mut() {
            members.remove(&user_id);
        }
        drop(state);
        self.tokens.remove(&removed.token);
        self.user_rooms.remove(&user_id);
        Ok(())
    }

    async fn update_user(
        &self,
        user_token: &str,
        display_name: Option<String>,
        description: Option<String>,
        avatar: Option<AttachmentId>,
    ) -> Result<(), ChitterError> {
        let (room_id, user_id) = self.resolve_user(user_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());

        if let Some(ref name) = display_name {
            if display_name_taken(&state, name, Some(user_id)) {
                return Err(ChitterError::DisplayNameAlreadyExistsInTheRoom);
            }
        }
        if let Some(avatar_id) = avatar {
            let valid = state
                .attachments
                .get(&avatar_id)
                .is_some_and(|a| a.kind == AttachmentType::Image);
            if !valid {
                return Err(ChitterError::InvalidOrNonImageAvatarAttachment);
            }
        }

        let user = state.users.get_mut(&user_id).ok_or(ChitterError::UserNotFound)?;
        if let Some(name) = display_name {
            user.display_name = name;
        }
        if let Some(description) = description {
            user.description = Some(description);
        }
        if let Some(avatar_id) = avatar {
            user.avatar_attachment_id = Some(avatar_id);
        }
        Ok(())
    }

    async fn set_user_role(&self, admin_token: &str, user_id: UserId, role: Role) -> Result<(), ChitterError> {
        let (room_id, _) = self.resolve_admin(admin_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(ChitterError::UserNotFoundInAdminsRoom)?;
        user.role = role;
        Ok(())
    }

    async fn create_transfer_bundle(&self, user_tokens: Vec<String>) -> Result<String, ChitterError> {
        let user_ids: Vec<UserId> = user_tokens
            .iter()
            .filter_map(|token| self.tokens.get(token).map(|e| e.value().1))
            .collect();
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
            let Some(room_id) = self.user_rooms.get(&user_id).map(|e| *e.value()) else {
                continue;
            };
            let Some(room) = self.rooms.get(&room_id) else { continue };
            if let Some(user) = lock_room(room.value()).users.get(&user_id) {
                users.push(user.clone());
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
        validate_target(channel_id, direct_message_user_id)?;
        let (room_id, user_id) = self.resolve_user(user_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());

        if let Some(cid) = channel_id {
            check_channel_scope(&state, cid, user_id)?;
        }
        if let Some(target) = direct_message_user_id {
            if !state.users.contains_key(&target) {
                return Err(ChitterError::UserNotFound);
            }
        }

        let sanitized = sanitize(&content)?;
        let attachments = resolve_attachments(&state, &sanitized.attachment_ids, user_id)?;
        let id = state.next_id();
        state.insert_message(Message {
            id,
            user_id,
            created_at: Utc::now(),
            content: Content {
                text: sanitized.text,
                facets: sanitized.facets,
                embed: sanitized.embed,
                attachments,
            },
            channel_id,
            direct_message_user_id,
            edited: false,
        });
        Ok(id)
    }

    async fn remove_message(&self, user_token: &str, message_id: MessageId) -> Result<(), ChitterError> {
        let (room_id, user_id) = self.resolve_user(user_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());
        let message = state.messages.get(&message_id).ok_or(ChitterError::MessageNotFound)?;
        if !is_author_or_room_admin(&state, message.user_id, user_id) {
            return Err(ChitterError::UserNotAuthorizedToDeleteThisMessage);
        }
        state.remove_message(message_id);
        Ok(())
    }

    async fn edit_message(
        &self,
        user_token: &str,
        message_id: MessageId,
        content: Value,
    ) -> Result<(), ChitterError> {
        let (room_id, user_id) = self.resolve_user(user_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());
        let author = state
            .messages
            .get(&message_id)
            .ok_or(ChitterError::MessageNotFound)?
            .user_id;
        if !is_author_or_room_admin(&state, author, user_id) {
            return Err(ChitterError::UserNotAuthorizedToEditThisMessage);
        }

        let sanitized = sanitize(&content)?;
        let attachments = resolve_attachments(&state, &sanitized.attachment_ids, user_id)?;
        let message = state.messages.get_mut(&message_id).expect("checked above");
        message.content = Content {
            text: sanitized.text,
            facets: sanitized.facets,
            embed: sanitized.embed,
            attachments,
        };
        message.edited = true;
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
        validate_target(channel_id, direct_message_user_id)?;
        let (room_id, user_id) = self.resolve_user(user_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let state = lock_room(room.value());

        let mut ids = if let Some(cid) = channel_id {
            check_channel_scope(&state, cid, user_id)?;
            state.channel_messages.get(&cid).cloned().unwrap_or_default()
        } else {
            let target = direct_message_user_id.expect("validated above");
            if !state.users.contains_key(&target) {
                return Err(ChitterError::UserNotFound);
            }
            state
                .dm_messages
                .get(&dm_key(user_id, target))
                .cloned()
                .unwrap_or_default()
        };

        ids.sort_by(|a, b| b.cmp(a));
        if let Some(cursor) = cursor {
            ids.retain(|id| *id < cursor);
        }
        ids.truncate(limit as usize);

        Ok(ids.into_iter().filter_map(|id| state.messages.get(&id).cloned()).collect())
    }

    async fn create_channel(
        &self,
        admin_token: &str,
        display_name: String,
        is_private: bool,
    ) -> Result<ChannelId, ChitterError> {
        let (room_id, admin_id) = self.resolve_admin(admin_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());

        let channel = Channel {
            id: ChannelId::new(),
            room_id,
            created_at: Utc::now(),
            display_name,
            description: None,
            is_private,
            created_by: admin_id,
        };
        let id = channel.id;
        if is_private {
            state.private_members.insert(id, [admin_id].into_iter().collect());
        }
        state.channels.insert(id, channel);
        Ok(id)
    }

    async fn remove_channel(&self, admin_token: &str, channel_id: ChannelId) -> Result<(), ChitterError> {
        let (room_id, _) = self.resolve_admin(admin_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());
        if !state.channels.contains_key(&channel_id) {
            return Err(ChitterError::ChannelNotFoundInUsersRoom);
        }
        state.remove_channel_cascade(channel_id);
        Ok(())
    }

    async fn update_channel(
        &self,
        admin_token: &str,
        channel_id: ChannelId,
        display_name: Option<String>,
        description: Option<String>,
    ) -> Result<(), ChitterError> {
        let (room_id, _) = self.resolve_admin(admin_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());
        let channel = state
            .channels
            .get_mut(&channel_id)
            .ok_or(ChitterError::ChannelNotFoundInUsersRoom)?;
        if let Some(name) = display_name {
            channel.display_name = name;
        }
        if let Some(description) = description {
            channel.description = Some(description);
        }
        Ok(())
    }

    async fn get_channels(&self, user_token: &str) -> Result<Vec<Channel>, ChitterError> {
        let (room_id, user_id) = self.resolve_user(user_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let state = lock_room(room.value());
        Ok(state
            .channels
            .values()
            .filter(|c| !c.is_private || state.is_private_member(c.id, user_id))
            .cloned()
            .collect())
    }

    async fn get_channel(&self, user_token: &str, channel_id: ChannelId) -> Result<Channel, ChitterError> {
        let (room_id, user_id) = self.resolve_user(user_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let state = lock_room(room.value());
        check_channel_scope(&state, channel_id, user_id).cloned()
    }

    async fn add_user_to_channel(
        &self,
        admin_token: &str,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), ChitterError> {
        let (room_id, _) = self.resolve_admin(admin_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());
        let is_private = state
            .channels
            .get(&channel_id)
            .map(|c| c.is_private)
            .ok_or(ChitterError::ChannelNotFoundOrNotPrivate)?;
        if !is_private {
            return Err(ChitterError::ChannelNotFoundOrNotPrivate);
        }
        if !state.users.contains_key(&user_id) {
            return Err(ChitterError::UserNotFoundInAdminsRoom);
        }
        state.private_members.entry(channel_id).or_default().insert(user_id);
        Ok(())
    }

    async fn remove_user_from_channel(
        &self,
        admin_token: &str,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), ChitterError> {
        let (room_id, _) = self.resolve_admin(admin_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());
        let is_private = state
            .channels
            .get(&channel_id)
            .map(|c| c.is_private)
            .ok_or(ChitterError::ChannelNotFoundOrNotPrivate)?;
        if !is_private {
            return Err(ChitterError::ChannelNotFoundOrNotPrivate);
        }
        if !state.users.contains_key(&user_id) {
            return Err(ChitterError::UserNotFoundInAdminsRoom);
        }
        if let Some(members) = state.private_members.get_mut(&channel_id) {
            members.remove(&user_id);
        }
        Ok(())
    }

    async fn get_users(&self, user_token: &str, channel_id: Option<ChannelId>) -> Result<Vec<User>, ChitterError> {
        let (room_id, user_id) = self.resolve_user(user_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let state = lock_room(room.value());

        let Some(channel_id) = channel_id else {
            return Ok(state.users.values().cloned().collect());
        };
        let channel = check_channel_scope(&state, channel_id, user_id)?;
        if !channel.is_private {
            return Ok(state.users.values().cloned().collect());
        }
        let members = state.private_members.get(&channel_id).cloned().unwrap_or_default();
        Ok(members.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }

    async fn get_user(&self, user_token: &str, user_id: UserId) -> Result<User, ChitterError> {
        let (room_id, _) = self.resolve_user(user_token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let state = lock_room(room.value());
        state.users.get(&user_id).cloned().ok_or(ChitterError::UserNotFound)
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
        let (room_id, user_id) = self.resolve_any(token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());

        let attachment = Attachment {
            id: AttachmentId::new(),
            kind,
            user_id,
            file_name,
            path,
            width,
            height,
            created_at: Utc::now(),
        };
        state.attachments.insert(attachment.id, attachment.clone());
        Ok(attachment)
    }

    async fn remove_attachment(&self, token: &str, attachment_id: AttachmentId) -> Result<(), ChitterError> {
        let (room_id, user_id) = self.resolve_any(token)?;
        let room = self.rooms.get(&room_id).ok_or(ChitterError::RoomNotFound)?;
        let mut state = lock_room(room.value());
        let owner = state
            .attachments
            .get(&attachment_id)
            .ok_or(ChitterError::AttachmentNotFound)?
            .user_id;
        if owner != user_id {
            return Err(ChitterError::AttachmentNotFound);
        }
        state.attachments.remove(&attachment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> ChitterMem {
        ChitterMem::new(None)
    }

    #[tokio::test]
    async fn create_room_and_admin_registers_admin_token() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let room = mem.get_room(&created.admin.token, created.room.id).await.unwrap();
        assert_eq!(room.display_name, "room");
    }

    #[tokio::test]
    async fn invite_flow_creates_participant() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let user = mem
            .create_user_from_invite_code(&code, "bob".into())
            .await
            .unwrap();
        assert_eq!(user.role, Role::Participant);
        let err = mem
            .create_user_from_invite_code(&code, "carol".into())
            .await
            .unwrap_err();
        assert_eq!(err, ChitterError::InvalidInviteCode);
    }

    #[tokio::test]
    async fn admin_invite_only_room_blocks_participant_invites() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), true)
            .await
            .unwrap();
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let bob = mem
            .create_user_from_invite_code(&code, "bob".into())
            .await
            .unwrap();
        let err = mem.create_invite_code(&bob.token).await.unwrap_err();
        assert_eq!(err, ChitterError::UserIsNotAdminAndRoomIsAdminInviteOnly);
    }

    #[tokio::test]
    async fn duplicate_display_name_in_room_is_rejected() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let err = mem
            .create_user_from_invite_code(&code, "alice".into())
            .await
            .unwrap_err();
        assert_eq!(err, ChitterError::DisplayNameAlreadyExistsInTheRoom);
    }

    #[tokio::test]
    async fn duplicate_display_name_does_not_consume_the_invite_code() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        mem.create_user_from_invite_code(&code, "alice".into())
            .await
            .unwrap_err();
        let user = mem.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        assert_eq!(user.display_name, "bob");
    }

    #[tokio::test]
    async fn message_roundtrip_in_channel() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = created.general_channel.id;
        let id = mem
            .create_message(&created.admin.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap();
        let messages = mem
            .get_messages(&created.admin.token, Some(channel_id), None, None, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
    }

    #[tokio::test]
    async fn non_author_cannot_remove_message() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = created.general_channel.id;
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let bob = mem.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        let id = mem
            .create_message(&created.admin.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap();
        let err = mem.remove_message(&bob.token, id).await.unwrap_err();
        assert_eq!(err, ChitterError::UserNotAuthorizedToDeleteThisMessage);
    }

    #[tokio::test]
    async fn admin_can_remove_other_users_message() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = created.general_channel.id;
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let bob = mem.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        let id = mem
            .create_message(&bob.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap();
        mem.remove_message(&created.admin.token, id).await.unwrap();
        let err = mem
            .get_messages(&created.admin.token, Some(channel_id), None, None, 10)
            .await
            .unwrap();
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn admin_can_edit_other_users_message() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = created.general_channel.id;
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let bob = mem.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        let id = mem
            .create_message(&bob.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap();
        mem.edit_message(&created.admin.token, id, json!({"text": "edited by admin"}))
            .await
            .unwrap();
        let messages = mem
            .get_messages(&created.admin.token, Some(channel_id), None, None, 10)
            .await
            .unwrap();
        let message = messages.into_iter().find(|m| m.id == id).unwrap();
        assert_eq!(message.content.text, "edited by admin");
        assert!(message.edited);
    }

    #[tokio::test]
    async fn cannot_reference_attachment_owned_by_someone_else() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = created.general_channel.id;
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let bob = mem.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        let attachment = mem
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
        let err = mem
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

    #[tokio::test]
    async fn private_channel_hides_messages_from_non_members() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = mem
            .create_channel(&created.admin.token, "secret".into(), true)
            .await
            .unwrap();
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let bob = mem.create_user_from_invite_code(&code, "bob".into()).await.unwrap();

        let err = mem
            .create_message(&bob.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap_err();
        assert_eq!(err, ChitterError::UserIsNotMemberOfPrivateChannel);

        mem.add_user_to_channel(&created.admin.token, bob.id, channel_id)
            .await
            .unwrap();
        mem.create_message(&bob.token, json!({"text": "hi"}), Some(channel_id), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn direct_messages_are_visible_to_both_parties() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let bob = mem.create_user_from_invite_code(&code, "bob".into()).await.unwrap();

        mem.create_message(&created.admin.token, json!({"text": "hi bob"}), None, Some(bob.id))
            .await
            .unwrap();

        let from_admin_view = mem
            .get_messages(&created.admin.token, None, Some(bob.id), None, 10)
            .await
            .unwrap();
        let from_bob_view = mem
            .get_messages(&bob.token, None, Some(created.admin.id), None, 10)
            .await
            .unwrap();
        assert_eq!(from_admin_view.len(), 1);
        assert_eq!(from_bob_view.len(), 1);
    }

    #[tokio::test]
    async fn get_messages_cursor_paginates_strictly_before() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let channel_id = created.general_channel.id;
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(
                mem.create_message(&created.admin.token, json!({"text": format!("m{i}")}), Some(channel_id), None)
                    .await
                    .unwrap(),
            );
        }
        let page = mem
            .get_messages(&created.admin.token, Some(channel_id), None, Some(ids[2]), 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|m| m.id < ids[2]));
    }

    #[tokio::test]
    async fn transfer_bundle_round_trips_users() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = mem
            .create_transfer_bundle(vec![created.admin.token.clone()])
            .await
            .unwrap();
        let users = mem.get_transfer_bundle_from_code(&code).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, created.admin.id);
    }

    #[tokio::test]
    async fn transfer_bundle_rejects_all_invalid_tokens() {
        let mem = backend();
        let err = mem.create_transfer_bundle(vec!["bogus".into()]).await.unwrap_err();
        assert_eq!(err, ChitterError::NoValidTokens);
    }

    #[tokio::test]
    async fn removing_user_revokes_their_token() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let bob = mem.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        mem.remove_user(&created.admin.token, bob.id).await.unwrap();
        let err = mem.get_user(&bob.token, bob.id).await.unwrap_err();
        assert_eq!(err, ChitterError::InvalidUserToken);
    }

    #[tokio::test]
    async fn non_admin_cannot_call_admin_operations() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let code = mem.create_invite_code(&created.admin.token).await.unwrap();
        let bob = mem.create_user_from_invite_code(&code, "bob".into()).await.unwrap();
        let err = mem
            .create_channel(&bob.token, "general2".into(), false)
            .await
            .unwrap_err();
        assert_eq!(err, ChitterError::InvalidAdminTokenOrNonAdminUser);
    }

    #[tokio::test]
    async fn upload_and_reference_attachment_in_message() {
        let mem = backend();
        let created = mem
            .create_room_and_admin("room".into(), "alice".into(), false)
            .await
            .unwrap();
        let attachment = mem
            .upload_attachment(
                &created.admin.token,
                AttachmentType::Image,
                "a.png".into(),
                "uploads/a.png".into(),
                Some(10),
                Some(10),
            )
            .await
            .unwrap();

        let channel_id = created.general_channel.id;
        let id = mem
            .create_message(
                &created.admin.token,
                json!({"text": "look", "attachmentIds": [attachment.id.0.to_string()]}),
                Some(channel_id),
                None,
            )
            .await
            .unwrap();
        let messages = mem
            .get_messages(&created.admin.token, Some(channel_id), None, None, 10)
            .await
            .unwrap();
        let message = messages.into_iter().find(|m| m.id == id).unwrap();
        assert_eq!(message.content.attachments.len(), 1);
    }
}
