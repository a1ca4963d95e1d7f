//! Message protocol definitions
//!
//! Binary protocol: a frame payload carries one or more messages, each an
//! `i32` kind followed by kind-specific fields.
//!
//! | id | kind                 | client → server      | server → client                         |
//! |----|----------------------|----------------------|-----------------------------------------|
//! | 0  | Handshake            | version              | version                                 |
//! | 1  | Authenticate         | username, password   | result code `u16`                       |
//! | 3  | ChatMessage          | text                 | from, colors, status/personal/sender, text |
//! | 4  | JoinRoomAttempt      |                      | result code `u16`                       |
//! | 5  | LeaveRoom            |                      | (empty)                                 |
//! | 6  | RoomListUpdate       |                      | count, names                            |
//! | 7  | RoomMemberListUpdate |                      | count, (color, name) pairs              |
//! | 8  | ServerMessage        |                      | text with `<n>` color markers           |
//! | 9  | FriendAdded          |                      | name, online                            |
//! | 10 | FriendRemoved        |                      | name                                    |
//! | 11 | FriendStatus         |                      | name, online                            |
//! | 12 | FriendsList          |                      | count, (name, online) pairs             |

use crate::codec::FrameBuffer;
use crate::error::{BoundsError, ProtocolError};
use crate::types::BUFFER_LENGTH;

/// Stable message kind ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageKind {
    Handshake = 0,
    Authenticate = 1,
    ChatMessage = 3,
    JoinRoomAttempt = 4,
    LeaveRoom = 5,
    RoomListUpdate = 6,
    RoomMemberListUpdate = 7,
    ServerMessage = 8,
    FriendAdded = 9,
    FriendRemoved = 10,
    FriendStatus = 11,
    FriendsList = 12,
}

impl MessageKind {
    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Handshake => "Handshake",
            MessageKind::Authenticate => "Authenticate",
            MessageKind::ChatMessage => "ChatMessage",
            MessageKind::JoinRoomAttempt => "JoinRoomAttempt",
            MessageKind::LeaveRoom => "LeaveRoom",
            MessageKind::RoomListUpdate => "RoomListUpdate",
            MessageKind::RoomMemberListUpdate => "RoomMemberListUpdate",
            MessageKind::ServerMessage => "ServerMessage",
            MessageKind::FriendAdded => "FriendAdded",
            MessageKind::FriendRemoved => "FriendRemoved",
            MessageKind::FriendStatus => "FriendStatus",
            MessageKind::FriendsList => "FriendsList",
        }
    }
}

impl TryFrom<i32> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageKind::Handshake,
            1 => MessageKind::Authenticate,
            3 => MessageKind::ChatMessage,
            4 => MessageKind::JoinRoomAttempt,
            5 => MessageKind::LeaveRoom,
            6 => MessageKind::RoomListUpdate,
            7 => MessageKind::RoomMemberListUpdate,
            8 => MessageKind::ServerMessage,
            9 => MessageKind::FriendAdded,
            10 => MessageKind::FriendRemoved,
            11 => MessageKind::FriendStatus,
            12 => MessageKind::FriendsList,
            other => return Err(ProtocolError::UnknownKind(other)),
        })
    }
}

/// Authentication result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AuthResult {
    InvalidPassword = 0,
    NameInUse = 1,
    Success = 2,
    Failure = 3,
    InvalidUsername = 4,
}

impl AuthResult {
    /// Unknown codes are treated as a generic failure
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => AuthResult::InvalidPassword,
            1 => AuthResult::NameInUse,
            2 => AuthResult::Success,
            4 => AuthResult::InvalidUsername,
            _ => AuthResult::Failure,
        }
    }
}

/// Join-room result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum JoinRoomResult {
    Success = 0,
    Failure = 1,
}

impl JoinRoomResult {
    pub fn from_code(code: u16) -> Self {
        if code == 0 {
            JoinRoomResult::Success
        } else {
            JoinRoomResult::Failure
        }
    }
}

/// One message being written into a buffer
///
/// The kind is written as the first field on `begin`; the rest go through
/// the `write_*` calls in order.
#[derive(Debug)]
pub struct Message<'a> {
    buf: &'a mut FrameBuffer,
}

impl<'a> Message<'a> {
    /// Start a new message at the current write position
    pub fn begin(buf: &'a mut FrameBuffer, kind: MessageKind) -> Result<Self, BoundsError> {
        buf.put_i32(kind.id())?;
        Ok(Self { buf })
    }

    /// Continue a message whose kind is already in `buf`
    pub(crate) fn resume(buf: &'a mut FrameBuffer) -> Self {
        Self { buf }
    }

    pub fn write_i32(&mut self, value: i32) -> Result<&mut Self, BoundsError> {
        self.buf.put_i32(value)?;
        Ok(self)
    }

    pub fn write_u16(&mut self, value: u16) -> Result<&mut Self, BoundsError> {
        self.buf.put_u16(value)?;
        Ok(self)
    }

    pub fn write_bool(&mut self, value: bool) -> Result<&mut Self, BoundsError> {
        self.buf.put_bool(value)?;
        Ok(self)
    }

    pub fn write_str(&mut self, value: &str) -> Result<&mut Self, BoundsError> {
        self.buf.put_str(value)?;
        Ok(self)
    }

    /// Write a `u16` element count, rejecting lists that cannot be encoded
    pub fn write_count(&mut self, count: usize) -> Result<&mut Self, BoundsError> {
        let count = u16::try_from(count).map_err(|_| BoundsError {
            position: self.buf.len(),
            delta: count as isize,
            size: usize::from(u16::MAX),
        })?;
        self.write_u16(count)
    }
}

/// Messages that can be written into an outbound buffer
pub trait Encode {
    fn kind(&self) -> MessageKind;

    /// Write every field after the kind
    fn encode_fields(&self, msg: &mut Message<'_>) -> Result<(), BoundsError>;

    /// Write the whole message, rolling back on failure
    fn encode(&self, buf: &mut FrameBuffer) -> Result<(), BoundsError> {
        let start = buf.len();
        let result = Message::begin(buf, self.kind()).and_then(|mut msg| self.encode_fields(&mut msg));
        if result.is_err() {
            buf.truncate(start)?;
        }
        result
    }
}

/// Messages that can be read from an inbound buffer
pub trait Decode: Sized {
    /// Read the kind and fields of exactly one message
    fn decode(buf: &mut FrameBuffer) -> Result<Self, ProtocolError>;
}

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Version exchange, must come first
    Handshake { version: String },
    /// Log in or register
    Authenticate { username: String, password: String },
    /// A chat line or `/command`
    Chat { text: String },
}

impl Encode for ClientMessage {
    fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::Handshake { .. } => MessageKind::Handshake,
            ClientMessage::Authenticate { .. } => MessageKind::Authenticate,
            ClientMessage::Chat { .. } => MessageKind::ChatMessage,
        }
    }

    fn encode_fields(&self, msg: &mut Message<'_>) -> Result<(), BoundsError> {
        match self {
            ClientMessage::Handshake { version } => {
                msg.write_str(version)?;
            }
            ClientMessage::Authenticate { username, password } => {
                msg.write_str(username)?.write_str(password)?;
            }
            ClientMessage::Chat { text } => {
                msg.write_str(text)?;
            }
        }
        Ok(())
    }
}

impl Decode for ClientMessage {
    fn decode(buf: &mut FrameBuffer) -> Result<Self, ProtocolError> {
        let kind = MessageKind::try_from(buf.get_i32()?)?;
        match kind {
            MessageKind::Handshake => Ok(ClientMessage::Handshake {
                version: buf.get_str()?,
            }),
            MessageKind::Authenticate => Ok(ClientMessage::Authenticate {
                username: buf.get_str()?,
                password: buf.get_str()?,
            }),
            MessageKind::ChatMessage => Ok(ClientMessage::Chat {
                text: buf.get_str()?,
            }),
            other => Err(ProtocolError::UnexpectedMessage(other.name())),
        }
    }
}

/// A relayed chat line as delivered to one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub from: String,
    pub name_color: u16,
    pub chat_color: u16,
    /// Presence or join/leave notice rather than spoken text
    pub is_status: bool,
    /// Private message
    pub is_personal: bool,
    /// The recipient is the one who sent it
    pub is_sender: bool,
    pub text: String,
}

/// Encoded size of a `ChatLine` minus its name and text bytes: kind, two
/// string prefixes, two colors and three flags
const CHAT_LINE_OVERHEAD: usize = 4 + 2 + 2 + 2 + 3 + 2;

impl ChatLine {
    /// Longest text that still fits a whole line from `from` into an empty
    /// outbound buffer
    pub fn text_capacity(from: &str) -> usize {
        (BUFFER_LENGTH - 1).saturating_sub(CHAT_LINE_OVERHEAD + from.len())
    }
}

/// One row of a room member list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntry {
    pub name_color: u16,
    pub name: String,
}

/// One row of a friends list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendEntry {
    pub name: String,
    pub online: bool,
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Handshake { version: String },
    AuthResult(AuthResult),
    Chat(ChatLine),
    JoinRoomAttempt(JoinRoomResult),
    LeaveRoom,
    RoomList { rooms: Vec<String> },
    MemberList { members: Vec<MemberEntry> },
    /// Informational line with inline `<n>` color markers
    ServerText { text: String },
    FriendAdded { name: String, online: bool },
    FriendRemoved { name: String },
    FriendStatus { name: String, online: bool },
    FriendsList { friends: Vec<FriendEntry> },
}

impl ServerMessage {
    /// Replies to request/response kinds go out without waiting for the
    /// coalescing flush
    pub fn flushes_immediately(&self) -> bool {
        matches!(
            self,
            ServerMessage::Handshake { .. }
                | ServerMessage::AuthResult(_)
                | ServerMessage::JoinRoomAttempt(_)
        )
    }
}

impl Encode for ServerMessage {
    fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::Handshake { .. } => MessageKind::Handshake,
            ServerMessage::AuthResult(_) => MessageKind::Authenticate,
            ServerMessage::Chat(_) => MessageKind::ChatMessage,
            ServerMessage::JoinRoomAttempt(_) => MessageKind::JoinRoomAttempt,
            ServerMessage::LeaveRoom => MessageKind::LeaveRoom,
            ServerMessage::RoomList { .. } => MessageKind::RoomListUpdate,
            ServerMessage::MemberList { .. } => MessageKind::RoomMemberListUpdate,
            ServerMessage::ServerText { .. } => MessageKind::ServerMessage,
            ServerMessage::FriendAdded { .. } => MessageKind::FriendAdded,
            ServerMessage::FriendRemoved { .. } => MessageKind::FriendRemoved,
            ServerMessage::FriendStatus { .. } => MessageKind::FriendStatus,
            ServerMessage::FriendsList { .. } => MessageKind::FriendsList,
        }
    }

    fn encode_fields(&self, msg: &mut Message<'_>) -> Result<(), BoundsError> {
        match self {
            ServerMessage::Handshake { version } => {
                msg.write_str(version)?;
            }
            ServerMessage::AuthResult(code) => {
                msg.write_u16(*code as u16)?;
            }
            ServerMessage::Chat(line) => {
                msg.write_str(&line.from)?
                    .write_u16(line.name_color)?
                    .write_u16(line.chat_color)?
                    .write_bool(line.is_status)?
                    .write_bool(line.is_personal)?
                    .write_bool(line.is_sender)?
                    .write_str(&line.text)?;
            }
            ServerMessage::JoinRoomAttempt(code) => {
                msg.write_u16(*code as u16)?;
            }
            ServerMessage::LeaveRoom => {}
            ServerMessage::RoomList { rooms } => {
                msg.write_count(rooms.len())?;
                for room in rooms {
                    msg.write_str(room)?;
                }
            }
            ServerMessage::MemberList { members } => {
                msg.write_count(members.len())?;
                for member in members {
                    msg.write_u16(member.name_color)?.write_str(&member.name)?;
                }
            }
            ServerMessage::ServerText { text } => {
                msg.write_str(text)?;
            }
            ServerMessage::FriendAdded { name, online }
            | ServerMessage::FriendStatus { name, online } => {
                msg.write_str(name)?.write_bool(*online)?;
            }
            ServerMessage::FriendRemoved { name } => {
                msg.write_str(name)?;
            }
            ServerMessage::FriendsList { friends } => {
                msg.write_count(friends.len())?;
                for friend in friends {
                    msg.write_str(&friend.name)?.write_bool(friend.online)?;
                }
            }
        }
        Ok(())
    }
}

impl Decode for ServerMessage {
    fn decode(buf: &mut FrameBuffer) -> Result<Self, ProtocolError> {
        let kind = MessageKind::try_from(buf.get_i32()?)?;
        let msg = match kind {
            MessageKind::Handshake => ServerMessage::Handshake {
                version: buf.get_str()?,
            },
            MessageKind::Authenticate => ServerMessage::AuthResult(AuthResult::from_code(buf.get_u16()?)),
            MessageKind::ChatMessage => ServerMessage::Chat(ChatLine {
                from: buf.get_str()?,
                name_color: buf.get_u16()?,
                chat_color: buf.get_u16()?,
                is_status: buf.get_bool()?,
                is_personal: buf.get_bool()?,
                is_sender: buf.get_bool()?,
                text: buf.get_str()?,
            }),
            MessageKind::JoinRoomAttempt => {
                ServerMessage::JoinRoomAttempt(JoinRoomResult::from_code(buf.get_u16()?))
            }
            MessageKind::LeaveRoom => ServerMessage::LeaveRoom,
            MessageKind::RoomListUpdate => {
                let count = buf.get_u16()?;
                let mut rooms = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    rooms.push(buf.get_str()?);
                }
                ServerMessage::RoomList { rooms }
            }
            MessageKind::RoomMemberListUpdate => {
                let count = buf.get_u16()?;
                let mut members = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let name_color = buf.get_u16()?;
                    let name = buf.get_str()?;
                    members.push(MemberEntry { name_color, name });
                }
                ServerMessage::MemberList { members }
            }
            MessageKind::ServerMessage => ServerMessage::ServerText {
                text: buf.get_str()?,
            },
            MessageKind::FriendAdded => ServerMessage::FriendAdded {
                name: buf.get_str()?,
                online: buf.get_bool()?,
            },
            MessageKind::FriendRemoved => ServerMessage::FriendRemoved {
                name: buf.get_str()?,
            },
            MessageKind::FriendStatus => ServerMessage::FriendStatus {
                name: buf.get_str()?,
                online: buf.get_bool()?,
            },
            MessageKind::FriendsList => {
                let count = buf.get_u16()?;
                let mut friends = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let name = buf.get_str()?;
                    let online = buf.get_bool()?;
                    friends.push(FriendEntry { name, online });
                }
                ServerMessage::FriendsList { friends }
            }
        };
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_ids() {
        assert_eq!(MessageKind::ChatMessage.id(), 3);
        assert_eq!(MessageKind::try_from(12).unwrap(), MessageKind::FriendsList);
        assert!(matches!(
            MessageKind::try_from(2),
            Err(ProtocolError::UnknownKind(2))
        ));
    }

    #[test]
    fn test_handshake_wire_bytes() {
        let mut buf = FrameBuffer::new(BUFFER_LENGTH);
        ClientMessage::Handshake {
            version: "v".to_string(),
        }
        .encode(&mut buf)
        .unwrap();
        assert_eq!(buf.as_written(), &[0, 0, 0, 0, 0, 1, b'v']);
    }

    #[test]
    fn test_batched_messages_decode_in_order() {
        let mut buf = FrameBuffer::new(BUFFER_LENGTH);
        let sent = vec![
            ServerMessage::AuthResult(AuthResult::Success),
            ServerMessage::ServerText {
                text: "<15>Welcome".to_string(),
            },
            ServerMessage::LeaveRoom,
            ServerMessage::MemberList {
                members: vec![MemberEntry {
                    name_color: 10,
                    name: "bob".to_string(),
                }],
            },
            ServerMessage::FriendsList { friends: vec![] },
        ];
        for msg in &sent {
            msg.encode(&mut buf).unwrap();
        }

        let mut received = Vec::new();
        while buf.has_remaining() {
            received.push(ServerMessage::decode(&mut buf).unwrap());
        }
        assert_eq!(received, sent);
    }

    #[test]
    fn test_chat_line_fields() {
        let line = ChatLine {
            from: "alice".to_string(),
            name_color: 15,
            chat_color: 11,
            is_status: false,
            is_personal: true,
            is_sender: true,
            text: "hi".to_string(),
        };
        let mut buf = FrameBuffer::new(BUFFER_LENGTH);
        ServerMessage::Chat(line.clone()).encode(&mut buf).unwrap();
        assert_eq!(
            ServerMessage::decode(&mut buf).unwrap(),
            ServerMessage::Chat(line)
        );
    }

    #[test]
    fn test_chat_line_capacity_fills_buffer_exactly() {
        let from = "a".repeat(crate::types::MAX_USERNAME_LEN);
        let line = |len: usize| {
            ServerMessage::Chat(ChatLine {
                from: from.clone(),
                name_color: 15,
                chat_color: 11,
                is_status: false,
                is_personal: true,
                is_sender: false,
                text: "x".repeat(len),
            })
        };
        let capacity = ChatLine::text_capacity(&from);

        let mut buf = FrameBuffer::new(BUFFER_LENGTH);
        line(capacity).encode(&mut buf).unwrap();
        assert_eq!(buf.len(), BUFFER_LENGTH - 1);

        let mut buf = FrameBuffer::new(BUFFER_LENGTH);
        assert!(line(capacity + 1).encode(&mut buf).is_err());
    }

    #[test]
    fn test_server_kind_from_client_is_rejected() {
        let mut buf = FrameBuffer::new(BUFFER_LENGTH);
        ServerMessage::LeaveRoom.encode(&mut buf).unwrap();
        assert!(matches!(
            ClientMessage::decode(&mut buf),
            Err(ProtocolError::UnexpectedMessage("LeaveRoom"))
        ));
    }

    #[test]
    fn test_failed_encode_rolls_back() {
        let mut buf = FrameBuffer::new(16);
        ServerMessage::LeaveRoom.encode(&mut buf).unwrap();
        let too_big = ServerMessage::ServerText {
            text: "x".repeat(32),
        };
        assert!(too_big.encode(&mut buf).is_err());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_unknown_auth_code_is_failure() {
        assert_eq!(AuthResult::from_code(99), AuthResult::Failure);
        assert_eq!(AuthResult::from_code(1), AuthResult::NameInUse);
    }

    #[test]
    fn test_flush_policy() {
        assert!(ServerMessage::AuthResult(AuthResult::Success).flushes_immediately());
        assert!(!ServerMessage::LeaveRoom.flushes_immediately());
    }
}
