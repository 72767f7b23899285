//! Per-room authoritative state: indexed collections plus the derived
//! channel→messages and dm-pair→messages indices that make `getMessages`
//! and `getChannels` cheap without rescanning every message on every call.

use std::collections::{HashMap, HashSet};

use chitter_shared::ids::{AttachmentId, ChannelId, MessageId, RoomId, UserId};
use chitter_shared::model::{Attachment, Channel, Message, Room, User};

/// Unordered pair of user ids identifying one direct-message conversation.
pub fn dm_key(a: UserId, b: UserId) -> (UserId, UserId) {
    if a.0 <= b.0 {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Default)]
pub struct RoomState {
    pub room: Option<Room>,
    pub users: HashMap<UserId, User>,
    pub channels: HashMap<ChannelId, Channel>,
    /// Membership set of each *private* channel. Public channels have no
    /// entry here — absence means "everyone in the room can read it".
    pub private_members: HashMap<ChannelId, HashSet<UserId>>,
    pub messages: HashMap<MessageId, Message>,
    pub channel_messages: HashMap<ChannelId, Vec<MessageId>>,
    pub dm_messages: HashMap<(UserId, UserId), Vec<MessageId>>,
    pub attachments: HashMap<AttachmentId, Attachment>,
    pub next_message_id: i64,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room: Some(room),
            ..Default::default()
        }
    }

    pub fn room(&self) -> &Room {
        self.room.as_ref().expect("RoomState always holds a room after construction")
    }

    /// Insert a message and keep the derived indices current.
    pub fn insert_message(&mut self, message: Message) {
        if let Some(channel_id) = message.channel_id {
            self.channel_messages.entry(channel_id).or_default().push(message.id);
        }
        if let Some(target) = message.direct_message_user_id {
            let key = dm_key(message.user_id, target);
            self.dm_messages.entry(key).or_default().push(message.id);
        }
        self.messages.insert(message.id, message);
    }

    /// Remove a message and its entry from whichever derived index held it.
    pub fn remove_message(&mut self, id: MessageId) -> Option<Message> {
        let message = self.messages.remove(&id)?;
        if let Some(channel_id) = message.channel_id {
            if let Some(ids) = self.channel_messages.get_mut(&channel_id) {
                ids.retain(|existing| *existing != id);
            }
        }
        if let Some(target) = message.direct_message_user_id {
            let key = dm_key(message.user_id, target);
            if let Some(ids) = self.dm_messages.get_mut(&key) {
                ids.retain(|existing| *existing != id);
            }
        }
        Some(message)
    }

    /// Drop a channel and every message it owns (cascade delete).
    pub fn remove_channel_cascade(&mut self, channel_id: ChannelId) {
        self.channels.remove(&channel_id);
        self.private_members.remove(&channel_id);
        if let Some(ids) = self.channel_messages.remove(&channel_id) {
            for id in ids {
                self.messages.remove(&id);
            }
        }
    }

    pub fn next_id(&mut self) -> MessageId {
        self.next_message_id += 1;
        MessageId(self.next_message_id)
    }

    pub fn is_private_member(&self, channel_id: ChannelId, user_id: UserId) -> bool {
        self.private_members
            .get(&channel_id)
            .is_some_and(|members| members.contains(&user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chitter_shared::model::{Content, Role};
    use chrono::Utc;

    fn user(room_id: RoomId) -> User {
        User {
            id: UserId::new(),
            room_id,
            created_at: Utc::now(),
            token: "t".into(),
            display_name: "u".into(),
            description: None,
            avatar_attachment_id: None,
            role: Role::Participant,
        }
    }

    fn message(id: i64, author: UserId, channel_id: Option<ChannelId>, dm: Option<UserId>) -> Message {
        Message {
            id: MessageId(id),
            user_id: author,
            created_at: Utc::now(),
            content: Content {
                text: "hi".into(),
                facets: vec![],
                embed: None,
                attachments: vec![],
            },
            channel_id,
            direct_message_user_id: dm,
            edited: false,
        }
    }

    #[test]
    fn dm_key_is_order_independent() {
        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(dm_key(a, b), dm_key(b, a));
    }

    #[test]
    fn insert_and_remove_channel_message_updates_index() {
        let room_id = RoomId::new();
        let mut state = RoomState::new(Room {
            id: room_id,
            created_at: Utc::now(),
            display_name: "r".into(),
            description: None,
            logo_attachment_id: None,
            admin_invite_only: false,
        });
        let channel_id = ChannelId::new();
        let author = user(room_id).id;
        state.insert_message(message(1, author, Some(channel_id), None));
        assert_eq!(state.channel_messages[&channel_id], vec![MessageId(1)]);
        state.remove_message(MessageId(1));
        assert!(state.channel_messages[&channel_id].is_empty());
        assert!(!state.messages.contains_key(&MessageId(1)));
    }

    #[test]
    fn remove_channel_cascade_drops_its_messages() {
        let room_id = RoomId::new();
        let mut state = RoomState::new(Room {
            id: room_id,
            created_at: Utc::now(),
            display_name: "r".into(),
            description: None,
            logo_attachment_id: None,
            admin_invite_only: false,
        });
        let channel_id = ChannelId::new();
        let author = user(room_id).id;
        state.insert_message(message(1, author, Some(channel_id), None));
        state.insert_message(message(2, author, Some(channel_id), None));
        state.remove_channel_cascade(channel_id);
        assert!(state.messages.is_empty());
        assert!(!state.channel_messages.contains_key(&channel_id));
    }

    #[test]
    fn dm_message_indexed_under_unordered_pair() {
        let room_id = RoomId::new();
        let mut state = RoomState::new(Room {
            id: room_id,
            created_at: Utc::now(),
            display_name: "r".into(),
            description: None,
            logo_attachment_id: None,
            admin_invite_only: false,
        });
        let a = UserId::new();
        let b = UserId::new();
        state.insert_message(message(1, a, None, Some(b)));
        assert_eq!(state.dm_messages[&dm_key(a, b)], vec![MessageId(1)]);
        assert_eq!(state.dm_messages[&dm_key(b, a)], vec![MessageId(1)]);
    }

    #[test]
    fn next_id_is_monotonic() {
        let mut state = RoomState::new(Room {
            id: RoomId::new(),
            created_at: Utc::now(),
            display_name: "r".into(),
            description: None,
            logo_attachment_id: None,
            admin_invite_only: false,
        });
        let first = state.next_id();
        let second = state.next_id();
        assert!(second.0 > first.0);
    }
}
