//! User struct definition
//!
//! Represents a connected user: session state, profile, room back-reference,
//! friends, and the channel to their connection's writer task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::connection::ConnectionStatus;
use crate::error::SendError;
use crate::friends::FriendList;
use crate::message::ServerMessage;
use crate::store::{clamp_friends, UserRecord, RECORD_VERSION};
use crate::types::{color, colored, RoomId, UserId};

/// Queue depth used by `UserHandle::detached`
const DETACHED_QUEUE: usize = 256;

/// Session protocol state, each requiring the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Socket accepted, no handshake yet
    Connected,
    /// Handshake version matched
    Verified,
    /// Logged in; lobby or room
    Authenticated,
}

/// The server actor's link to one connection
#[derive(Debug, Clone)]
pub struct UserHandle {
    sender: mpsc::Sender<ServerMessage>,
    status: Arc<ConnectionStatus>,
}

impl UserHandle {
    pub fn new(sender: mpsc::Sender<ServerMessage>, status: Arc<ConnectionStatus>) -> Self {
        Self { sender, status }
    }

    /// A handle with no socket behind it; messages land in the returned receiver
    pub fn detached() -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(DETACHED_QUEUE);
        (Self::new(tx, Arc::new(ConnectionStatus::new())), rx)
    }

    /// Queue a message without waiting
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open() && !self.sender.is_closed()
    }

    pub fn close(&self) {
        self.status.close();
    }
}

/// Connected user information
#[derive(Debug)]
pub struct User {
    /// Unique identifier for this connection
    pub id: UserId,
    /// Remote address, for logging
    pub peer: String,
    display_name: String,
    display_name_lowercase: String,
    password: String,
    pub name_color: u16,
    pub chat_color: u16,
    state: SessionState,
    /// Room the user is currently in
    pub room: Option<RoomId>,
    pub friends: FriendList,
    /// Last private-message counterpart
    pub reply_to: Option<String>,
    handle: UserHandle,
}

impl User {
    /// Create a user for a freshly accepted connection
    pub fn new(id: UserId, peer: String, handle: UserHandle) -> Self {
        Self {
            id,
            peer,
            display_name: String::new(),
            display_name_lowercase: String::new(),
            password: String::new(),
            name_color: color::DEFAULT,
            chat_color: color::DEFAULT_CHAT,
            state: SessionState::Connected,
            room: None,
            friends: FriendList::new(),
            reply_to: None,
            handle,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn display_name_lowercase(&self) -> &str {
        &self.display_name_lowercase
    }

    /// Set the display name, keeping the lowercase form in sync
    pub fn set_display_name(&mut self, name: &str) {
        self.display_name = name.to_string();
        self.display_name_lowercase = name.to_lowercase();
    }

    /// Name for log lines: display name once known, else the peer address
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.peer
        } else {
            &self.display_name
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_verified(&self) -> bool {
        self.state >= SessionState::Verified
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn mark_verified(&mut self) {
        if self.state == SessionState::Connected {
            self.state = SessionState::Verified;
        }
    }

    /// Only valid once a display name is set
    pub fn mark_authenticated(&mut self) {
        debug_assert!(!self.display_name.is_empty());
        self.state = SessionState::Authenticated;
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Close the connection; the handler task performs the teardown
    pub fn close(&self) {
        self.handle.close();
    }

    /// Queue a message to this user
    ///
    /// A full or closed queue counts as a transport failure: the connection
    /// is closed and the normal disconnect path follows.
    pub fn send(&self, msg: ServerMessage) {
        if !self.handle.is_open() {
            return;
        }
        if let Err(e) = self.handle.send(msg) {
            warn!("Dropping {}: {}", self.label(), e);
            self.handle.close();
        }
    }

    /// Send a server line prefixed with a color marker
    pub fn send_text(&self, text: &str, text_color: u16) {
        self.send(ServerMessage::ServerText {
            text: colored(text_color, text),
        });
    }

    /// Snapshot of the persistent profile
    pub fn record(&self) -> UserRecord {
        UserRecord {
            version: RECORD_VERSION,
            display_name: self.display_name.clone(),
            name_color: self.name_color,
            chat_color: self.chat_color,
            password: self.password.clone(),
            friends: clamp_friends(self.friends.names()),
        }
    }

    /// Adopt a loaded profile; friends are resolved by the caller
    pub fn apply_record(&mut self, record: &UserRecord, friends: FriendList) {
        self.set_display_name(&record.display_name);
        self.name_color = record.name_color;
        self.chat_color = record.chat_color;
        self.password = record.password.clone();
        self.friends = friends;
    }
}
