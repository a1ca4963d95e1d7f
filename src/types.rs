//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `UserId`: UUID-based key for a live connection/user
//! - `RoomId`: UUID-based key for a live room
//!
//! Ids are lookup keys only. Holding one never keeps the user or room alive;
//! a stale id simply fails to resolve through the registry.

use uuid::Uuid;

/// Protocol version exchanged during the handshake
pub const VERSION_CODE: &str = "Drocsid 0.3";

/// Maximum number of simultaneously connected users
pub const MAX_USERS: usize = 100;
/// Maximum number of live rooms
pub const MAX_ROOMS: usize = 10;
/// Maximum number of members in one room
pub const MAX_ROOM_USERS: usize = 10;
/// Maximum number of friends per user
pub const MAX_FRIENDS: usize = 10;
/// Maximum room name length in bytes
pub const MAX_ROOM_NAME_LEN: usize = 10;
/// Maximum username length in bytes
pub const MAX_USERNAME_LEN: usize = 32;

/// Capacity of the inbound and outbound application buffers
pub const BUFFER_LENGTH: usize = 4096;
/// Capacity of the length-prefix (peek) buffer
pub const PEEK_LENGTH: usize = 4;

/// Console color codes understood by clients in `<n>` markers
pub mod color {
    pub const ERROR: u16 = 12;
    pub const FRIEND: u16 = 10;
    pub const FRIEND_OFFLINE: u16 = 8;
    pub const DEFAULT: u16 = 15;
    pub const DEFAULT_CHAT: u16 = 11;
}

/// Unique user identifier (newtype pattern)
///
/// Wraps a UUID v4. Assigned when the socket is accepted, before the user
/// has a display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Create a new random user ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique room identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId(pub Uuid);

impl RoomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check a username against `^[A-Za-z0-9]*$` and `MAX_USERNAME_LEN`
///
/// Emptiness is checked separately by callers.
pub fn is_valid_username(name: &str) -> bool {
    name.len() <= MAX_USERNAME_LEN && name.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Wrap text in a leading color marker, e.g. `<12>text`
pub fn colored(color: u16, text: &str) -> String {
    format!("<{}>{}", color, text)
}
