//! Client side of the protocol
//!
//! `ChatClient` speaks the same framing as the server, but every message it
//! commits is flushed immediately. `ClientSession` mirrors what the client
//! needs to know about itself: verification, login, room membership and a
//! local copy of the friends list.

use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::connection::{Connection, FrameReader};
use crate::error::{ProtocolError, SessionError};
use crate::message::{
    AuthResult, ChatLine, ClientMessage, FriendEntry, JoinRoomResult, MessageKind, ServerMessage,
};
use crate::types::{color, colored};

/// What the client knows about its own session
#[derive(Debug, Clone)]
pub struct ClientSession {
    version: String,
    verified: bool,
    authenticated: bool,
    in_room: bool,
    friends: Vec<FriendEntry>,
}

impl ClientSession {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            verified: false,
            authenticated: false,
            in_room: false,
            friends: Vec::new(),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn in_room(&self) -> bool {
        self.in_room
    }

    pub fn friends(&self) -> &[FriendEntry] {
        &self.friends
    }

    pub fn is_friend(&self, name: &str) -> bool {
        self.friends.iter().any(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Update local state from a server message
    pub fn apply(&mut self, msg: &ServerMessage) -> Result<(), ProtocolError> {
        match msg {
            ServerMessage::Handshake { version } => {
                if self.verified {
                    return Err(ProtocolError::UnexpectedMessage(MessageKind::Handshake.name()));
                }
                if *version != self.version {
                    return Err(ProtocolError::VersionMismatch(version.clone()));
                }
                self.verified = true;
            }
            ServerMessage::AuthResult(result) => {
                self.authenticated = *result == AuthResult::Success;
            }
            ServerMessage::JoinRoomAttempt(JoinRoomResult::Success) => self.in_room = true,
            ServerMessage::LeaveRoom => self.in_room = false,
            ServerMessage::FriendAdded { name, online } => {
                self.friends.retain(|f| !f.name.eq_ignore_ascii_case(name));
                self.friends.push(FriendEntry {
                    name: name.clone(),
                    online: *online,
                });
            }
            ServerMessage::FriendRemoved { name } => {
                self.friends.retain(|f| !f.name.eq_ignore_ascii_case(name));
            }
            ServerMessage::FriendStatus { name, online } => {
                if let Some(friend) = self
                    .friends
                    .iter_mut()
                    .find(|f| f.name.eq_ignore_ascii_case(name))
                {
                    friend.online = *online;
                }
            }
            ServerMessage::FriendsList { friends } => {
                self.friends = friends.iter().filter(|f| !f.name.is_empty()).cloned().collect();
            }
            _ => {}
        }
        Ok(())
    }

    /// A display line with `<n>` color markers, if the message has one
    pub fn render(&self, msg: &ServerMessage) -> Option<String> {
        match msg {
            ServerMessage::ServerText { text } => Some(text.clone()),
            ServerMessage::Chat(line) => Some(self.render_chat(line)),
            ServerMessage::AuthResult(result) => auth_message(*result).map(|m| colored(color::ERROR, m)),
            ServerMessage::JoinRoomAttempt(JoinRoomResult::Failure) => {
                Some(colored(color::ERROR, "Could not join room."))
            }
            ServerMessage::RoomList { rooms } if !self.in_room => Some(colored(
                color::DEFAULT,
                &format!("Rooms: {}", rooms.join(", ")),
            )),
            ServerMessage::MemberList { members } => {
                let names: Vec<String> = members.iter().map(|m| colored(m.name_color, &m.name)).collect();
                Some(format!("{}{}", colored(color::DEFAULT, "In room: "), names.join(", ")))
            }
            ServerMessage::FriendAdded { name, .. } => {
                Some(colored(color::FRIEND, &format!("{} is now your friend.", name)))
            }
            ServerMessage::FriendRemoved { name } => {
                Some(colored(color::FRIEND_OFFLINE, &format!("{} is no longer your friend.", name)))
            }
            _ => None,
        }
    }

    fn render_chat(&self, line: &ChatLine) -> String {
        let mut out = String::new();
        if line.is_personal {
            out.push_str(&colored(
                color::FRIEND,
                if line.is_sender { "[TO] " } else { "[FROM] " },
            ));
        }
        let name_color = if self.is_friend(&line.from) {
            color::FRIEND
        } else {
            line.name_color
        };
        out.push_str(&colored(name_color, &line.from));
        out.push_str(&colored(color::DEFAULT, if line.is_status { " " } else { ": " }));
        out.push_str(&colored(line.chat_color, &line.text));
        out
    }
}

fn auth_message(result: AuthResult) -> Option<&'static str> {
    match result {
        AuthResult::Success => None,
        AuthResult::InvalidPassword => Some("You've entered an invalid password."),
        AuthResult::NameInUse => Some("That username is already in use."),
        AuthResult::InvalidUsername => {
            Some("Please enter a valid username using letters (a-z) and numbers only (0-9).")
        }
        AuthResult::Failure => Some("The server could not process your authentication."),
    }
}

/// Remove `<n>` color markers, leaving plain text
///
/// A `<` not followed by digits and `>` is kept as-is.
pub fn strip_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && after.as_bytes().get(digits) == Some(&b'>') {
            rest = &after[digits + 1..];
        } else {
            out.push('<');
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

/// Cloneable sending half of a `ChatClient`
#[derive(Debug, Clone)]
pub struct ClientSender {
    connection: Arc<Connection<OwnedWriteHalf>>,
}

impl ClientSender {
    /// Send and flush a message
    pub async fn send(&self, msg: &ClientMessage) -> Result<(), SessionError> {
        self.connection.send(msg, true).await
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<(), SessionError> {
        self.send(&ClientMessage::Authenticate {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
    }

    /// Send a chat line or `/command`
    pub async fn send_line(&self, text: &str) -> Result<(), SessionError> {
        self.send(&ClientMessage::Chat {
            text: text.to_string(),
        })
        .await
    }

    pub async fn close(&self) {
        self.connection.shutdown().await;
    }
}

/// A connection to a chat server
#[derive(Debug)]
pub struct ChatClient {
    sender: ClientSender,
    frames: FrameReader<OwnedReadHalf>,
    session: ClientSession,
}

impl ChatClient {
    /// Connect and send the handshake
    pub async fn connect(addr: &str, version: &str) -> Result<Self, SessionError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let client = Self {
            sender: ClientSender {
                connection: Arc::new(Connection::new(writer)),
            },
            frames: FrameReader::new(reader),
            session: ClientSession::new(version),
        };
        client
            .sender
            .send(&ClientMessage::Handshake {
                version: version.to_string(),
            })
            .await?;
        debug!("Handshake sent to {}", addr);
        Ok(client)
    }

    pub fn sender(&self) -> ClientSender {
        self.sender.clone()
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<(), SessionError> {
        self.sender.authenticate(username, password).await
    }

    pub async fn send_line(&self, text: &str) -> Result<(), SessionError> {
        self.sender.send_line(text).await
    }

    /// Next server message, already applied to the session
    pub async fn next_event(&mut self) -> Result<ServerMessage, SessionError> {
        let msg = self.frames.next_message::<ServerMessage>().await?;
        self.session.apply(&msg)?;
        Ok(msg)
    }

    /// Skip events until one matches
    pub async fn next_matching(
        &mut self,
        mut pred: impl FnMut(&ServerMessage) -> bool,
    ) -> Result<ServerMessage, SessionError> {
        loop {
            let msg = self.next_event().await?;
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }

    /// Authenticate and wait for the result code
    pub async fn login(&mut self, username: &str, password: &str) -> Result<AuthResult, SessionError> {
        self.authenticate(username, password).await?;
        match self
            .next_matching(|m| matches!(m, ServerMessage::AuthResult(_)))
            .await?
        {
            ServerMessage::AuthResult(result) => Ok(result),
            _ => Err(ProtocolError::UnexpectedMessage(MessageKind::Authenticate.name()).into()),
        }
    }

    pub async fn close(&self) {
        self.sender.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MemberEntry;
    use crate::types::VERSION_CODE;

    fn verified() -> ClientSession {
        let mut session = ClientSession::new(VERSION_CODE);
        session
            .apply(&ServerMessage::Handshake {
                version: VERSION_CODE.into(),
            })
            .unwrap();
        session
    }

    #[test]
    fn test_handshake_mismatch() {
        let mut session = ClientSession::new(VERSION_CODE);
        let err = session
            .apply(&ServerMessage::Handshake {
                version: "Other 1.0".into(),
            })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::VersionMismatch(v) if v == "Other 1.0"));
        assert!(!session.is_verified());
    }

    #[test]
    fn test_repeated_handshake() {
        let mut session = verified();
        assert!(session
            .apply(&ServerMessage::Handshake {
                version: VERSION_CODE.into()
            })
            .is_err());
    }

    #[test]
    fn test_room_and_auth_state() {
        let mut session = verified();
        session.apply(&ServerMessage::AuthResult(AuthResult::Success)).unwrap();
        assert!(session.is_authenticated());
        session
            .apply(&ServerMessage::JoinRoomAttempt(JoinRoomResult::Success))
            .unwrap();
        assert!(session.in_room());
        session.apply(&ServerMessage::LeaveRoom).unwrap();
        assert!(!session.in_room());
    }

    #[test]
    fn test_friends_mirror() {
        let mut session = verified();
        session
            .apply(&ServerMessage::FriendsList {
                friends: vec![FriendEntry {
                    name: "Bob".into(),
                    online: false,
                }],
            })
            .unwrap();
        session
            .apply(&ServerMessage::FriendStatus {
                name: "bob".into(),
                online: true,
            })
            .unwrap();
        assert!(session.friends()[0].online);

        session
            .apply(&ServerMessage::FriendAdded {
                name: "Carol".into(),
                online: false,
            })
            .unwrap();
        session
            .apply(&ServerMessage::FriendRemoved { name: "bob".into() })
            .unwrap();
        assert_eq!(session.friends().len(), 1);
        assert!(session.is_friend("CAROL"));
    }

    #[test]
    fn test_strip_markers() {
        assert_eq!(strip_markers("<15>Welcome to <11>Drocsid!"), "Welcome to Drocsid!");
        assert_eq!(strip_markers("a < b <c> <12"), "a < b <c> <12");
        assert_eq!(strip_markers("<0>0 <1>1 "), "0 1 ");
        assert_eq!(strip_markers(""), "");
    }

    #[test]
    fn test_render_private_line() {
        let session = verified();
        let line = ChatLine {
            from: "Bob".into(),
            name_color: 3,
            chat_color: 11,
            is_status: false,
            is_personal: true,
            is_sender: true,
            text: "hi".into(),
        };
        let rendered = session.render(&ServerMessage::Chat(line)).unwrap();
        assert_eq!(rendered, "<10>[TO] <3>Bob<15>: <11>hi");
        assert_eq!(strip_markers(&rendered), "[TO] Bob: hi");
    }

    #[test]
    fn test_render_status_line_for_friend() {
        let mut session = verified();
        session
            .apply(&ServerMessage::FriendAdded {
                name: "Bob".into(),
                online: true,
            })
            .unwrap();
        let line = ChatLine {
            from: "Bob".into(),
            name_color: 3,
            chat_color: 11,
            is_status: true,
            is_personal: false,
            is_sender: false,
            text: "has just logged on.".into(),
        };
        assert_eq!(
            strip_markers(&session.render(&ServerMessage::Chat(line)).unwrap()),
            "Bob has just logged on."
        );
    }

    #[test]
    fn test_render_misc() {
        let session = verified();
        assert_eq!(session.render(&ServerMessage::AuthResult(AuthResult::Success)), None);
        assert_eq!(
            session.render(&ServerMessage::AuthResult(AuthResult::NameInUse)),
            Some("<12>That username is already in use.".to_string())
        );
        let members = ServerMessage::MemberList {
            members: vec![MemberEntry {
                name_color: 15,
                name: "Alice".into(),
            }],
        };
        assert_eq!(
            strip_markers(&session.render(&members).unwrap()),
            "In room: Alice"
        );
        assert_eq!(session.render(&ServerMessage::LeaveRoom), None);
    }
}
