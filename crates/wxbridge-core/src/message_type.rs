//! Message-type codes understood by the hook process.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer code of a message on the wire.
pub type TypeCode = u32;

/// Message type carried in every envelope.
///
/// Known codes map to named variants; anything else is preserved as
/// [`MessageType::Other`] so unsolicited pushes of unfamiliar kinds still
/// reach subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "TypeCode", into = "TypeCode")]
pub enum MessageType {
    /// Hook process finished injecting and is ready.
    Ready,
    /// Account logged in (inbound only).
    Login,
    /// Account logged out (inbound only).
    Logout,
    /// Query own account information.
    GetSelfInfo,
    /// Query the contact list.
    GetContacts,
    /// Query the group list.
    GetRooms,
    /// Query members of one group.
    GetRoomMembers,
    /// Query details of one contact.
    GetContactDetail,
    /// Send a text message.
    SendText,
    /// Send a group message mentioning members.
    SendRoomAt,
    /// Send a contact card.
    SendCard,
    /// Send a link card.
    SendLink,
    /// Send an image file.
    SendImage,
    /// Send a file.
    SendFile,
    /// Send a video file.
    SendVideo,
    /// Send an animated gif.
    SendGif,
    /// Incoming text message push.
    RecvText,
    /// Any code without a named variant.
    Other(TypeCode),
}

impl MessageType {
    const TABLE: [(Self, TypeCode); 17] = [
        (Self::Ready, 11024),
        (Self::Login, 11025),
        (Self::Logout, 11026),
        (Self::GetSelfInfo, 11028),
        (Self::GetContacts, 11030),
        (Self::GetRooms, 11031),
        (Self::GetRoomMembers, 11032),
        (Self::GetContactDetail, 11034),
        (Self::SendText, 11036),
        (Self::SendRoomAt, 11037),
        (Self::SendCard, 11038),
        (Self::SendLink, 11039),
        (Self::SendImage, 11040),
        (Self::SendFile, 11041),
        (Self::SendVideo, 11042),
        (Self::SendGif, 11043),
        (Self::RecvText, 11046),
    ];

    /// Wire code of this type.
    #[must_use]
    pub fn code(self) -> TypeCode {
        if let Self::Other(code) = self {
            return code;
        }
        Self::TABLE
            .iter()
            .find(|(ty, _)| *ty == self)
            .map_or(0, |(_, code)| *code)
    }

    /// Map a wire code to its type, falling back to [`MessageType::Other`].
    #[must_use]
    pub fn from_code(code: TypeCode) -> Self {
        Self::TABLE
            .iter()
            .find(|(_, c)| *c == code)
            .map_or(Self::Other(code), |(ty, _)| *ty)
    }

    /// Whether this type drives the session's login state machine.
    #[must_use]
    pub const fn is_lifecycle(self) -> bool {
        matches!(self, Self::Login | Self::Logout)
    }
}

impl From<TypeCode> for MessageType {
    fn from(code: TypeCode) -> Self {
        Self::from_code(code)
    }
}

impl From<MessageType> for TypeCode {
    fn from(ty: MessageType) -> Self {
        ty.code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "Other({code})"),
            named => write!(f, "{named:?}({})", named.code()),
        }
    }
}
