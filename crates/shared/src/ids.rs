//! Typed entity identifiers.
//!
//! Every entity except `Message` is addressed by an opaque 128-bit id, never
//! comparable across entity kinds. `Message` is the one exception: ids must
//! be totally ordered and strictly increasing within a backend, so
//! `MessageId` wraps an `i64` instead of a `Uuid`.

macro_rules! define_uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
        #[cfg_attr(feature = "sqlx", sqlx(transparent))]
        pub struct $name(pub uuid::Uuid);

        #[allow(clippy::new_without_default)]
        impl $name {
            /// Generate a fresh opaque 128-bit identifier.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(uuid::Uuid::parse_str(s)?))
            }
        }
    };
}

define_uuid_id!(RoomId);
define_uuid_id!(UserId);
define_uuid_id!(ChannelId);
define_uuid_id!(AttachmentId);

/// Monotonically increasing message identifier, unique and totally ordered
/// within a single backend instance. Never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn room_id_roundtrip_serde() {
        let id = RoomId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: RoomId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn room_id_new_produces_unique_ids() {
        assert_ne!(RoomId::new(), RoomId::new());
    }

    #[test]
    fn user_id_from_str_invalid() {
        assert!(UserId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn channel_id_roundtrip_serde() {
        let id = ChannelId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: ChannelId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn attachment_id_roundtrip_serde() {
        let id = AttachmentId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: AttachmentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn message_id_orders_by_value() {
        assert!(MessageId(1) < MessageId(2));
        assert!(MessageId(2) > MessageId(1));
    }

    #[test]
    fn message_id_display_and_parse_roundtrip() {
        let id = MessageId(42);
        let s = id.to_string();
        assert_eq!(s, "42");
        assert_eq!(MessageId::from_str(&s).unwrap(), id);
    }

    #[test]
    fn message_id_serializes_as_number() {
        let id = MessageId(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
    }
}
