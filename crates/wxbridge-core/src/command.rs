//! Typed payloads for outbound commands and queries.
//!
//! Each variant fixes its message type and serializes to the exact payload
//! shape the hook process expects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CodecError, MessageType};

/// Plain text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPayload {
    /// Recipient contact or group id.
    pub to_wxid: String,
    /// Message text.
    pub content: String,
}

/// Group message mentioning members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAtPayload {
    /// Group id.
    pub to_wxid: String,
    /// Message text.
    pub content: String,
    /// Ids of the members to mention.
    pub at_list: Vec<String>,
}

/// Contact card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPayload {
    /// Recipient contact or group id.
    pub to_wxid: String,
    /// Id of the contact whose card is shared.
    pub card_wxid: String,
}

/// Link card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPayload {
    /// Recipient contact or group id.
    pub to_wxid: String,
    /// Card title.
    pub title: String,
    /// Card description.
    pub desc: String,
    /// Target of the link.
    pub url: String,
    /// Thumbnail shown on the card.
    pub image_url: String,
}

/// Image, file, video or gif referenced by a local path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Recipient contact or group id.
    pub to_wxid: String,
    /// Local path readable by the hook process.
    #[serde(rename = "file")]
    pub file_path: String,
}

/// Fire-and-forget command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text.
    Text(TextPayload),
    /// Group text with mentions.
    RoomAt(RoomAtPayload),
    /// Contact card.
    Card(CardPayload),
    /// Link card.
    Link(LinkPayload),
    /// Image file.
    Image(MediaPayload),
    /// Arbitrary file.
    File(MediaPayload),
    /// Video file.
    Video(MediaPayload),
    /// Animated gif.
    Gif(MediaPayload),
}

impl Command {
    /// Message type this command is sent with.
    #[must_use]
    pub const fn msg_type(&self) -> MessageType {
        match self {
            Self::Text(_) => MessageType::SendText,
            Self::RoomAt(_) => MessageType::SendRoomAt,
            Self::Card(_) => MessageType::SendCard,
            Self::Link(_) => MessageType::SendLink,
            Self::Image(_) => MessageType::SendImage,
            Self::File(_) => MessageType::SendFile,
            Self::Video(_) => MessageType::SendVideo,
            Self::Gif(_) => MessageType::SendGif,
        }
    }

    /// Wire payload.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn payload(&self) -> Result<Value, CodecError> {
        let value = match self {
            Self::Text(p) => serde_json::to_value(p)?,
            Self::RoomAt(p) => serde_json::to_value(p)?,
            Self::Card(p) => serde_json::to_value(p)?,
            Self::Link(p) => serde_json::to_value(p)?,
            Self::Image(p) | Self::File(p) | Self::Video(p) | Self::Gif(p) => {
                serde_json::to_value(p)?
            }
        };
        Ok(value)
    }
}

/// Request/response query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Own account information.
    SelfInfo,
    /// Contact list.
    Contacts,
    /// Details of one contact.
    ContactDetail {
        /// Contact id.
        wxid: String,
    },
    /// Group list.
    Rooms,
    /// Members of one group.
    RoomMembers {
        /// Group id.
        room_wxid: String,
    },
}

impl Query {
    /// Message type this query is sent with.
    #[must_use]
    pub const fn msg_type(&self) -> MessageType {
        match self {
            Self::SelfInfo => MessageType::GetSelfInfo,
            Self::Contacts => MessageType::GetContacts,
            Self::ContactDetail { .. } => MessageType::GetContactDetail,
            Self::Rooms => MessageType::GetRooms,
            Self::RoomMembers { .. } => MessageType::GetRoomMembers,
        }
    }

    /// Wire payload. Parameterless queries send `{}`.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::SelfInfo | Self::Contacts | Self::Rooms => Value::Object(serde_json::Map::new()),
            Self::ContactDetail { wxid } => serde_json::json!({ "wxid": wxid }),
            Self::RoomMembers { room_wxid } => serde_json::json!({ "room_wxid": room_wxid }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_media_payload_uses_file_key() {
        let cmd = Command::Video(MediaPayload {
            to_wxid: "r1".into(),
            file_path: "/tmp/a.mp4".into(),
        });
        assert_eq!(cmd.msg_type(), MessageType::SendVideo);
        assert_eq!(
            cmd.payload().unwrap(),
            json!({"to_wxid": "r1", "file": "/tmp/a.mp4"})
        );
    }

    #[test]
    fn test_room_at_payload_shape() {
        let cmd = Command::RoomAt(RoomAtPayload {
            to_wxid: "room@chatroom".into(),
            content: "hi".into(),
            at_list: vec!["u1".into(), "u2".into()],
        });
        assert_eq!(
            cmd.payload().unwrap(),
            json!({"to_wxid": "room@chatroom", "content": "hi", "at_list": ["u1", "u2"]})
        );
    }

    #[test]
    fn test_query_payloads() {
        assert_eq!(Query::Contacts.payload(), json!({}));
        assert_eq!(
            Query::RoomMembers { room_wxid: "r1".into() }.payload(),
            json!({"room_wxid": "r1"})
        );
        assert_eq!(
            Query::ContactDetail { wxid: "u1".into() }.msg_type(),
            MessageType::GetContactDetail
        );
    }
}
