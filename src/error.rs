//! Error types for the chat server
//!
//! Fatal errors (`FramingError`, `ProtocolError`, auth ordering violations)
//! all funnel into `SessionError`, which terminates the connection.
//! `ValidationError` is recoverable: it is reported to the requesting user
//! as server-message lines and the session continues.

use thiserror::Error;

use crate::types::MAX_FRIENDS;

/// A cursor would have left `[0, size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cursor out of bounds: position {position} moved by {delta} (size {size})")]
pub struct BoundsError {
    pub position: usize,
    pub delta: isize,
    pub size: usize,
}

/// Framing errors (fatal)
#[derive(Debug, Error)]
pub enum FramingError {
    /// Declared payload length was zero
    #[error("Invalid payload size {0}")]
    EmptyFrame(usize),

    /// Declared payload length does not fit the inbound buffer
    #[error("Frame of {len} bytes exceeds buffer capacity {capacity}")]
    FrameTooLarge { len: usize, capacity: usize },

    /// A single message does not fit the outbound buffer even when empty
    #[error("Message of kind {kind} does not fit an empty outbound buffer")]
    MessageTooLarge { kind: i32 },

    /// More bytes were written to the socket than were declared
    #[error("Sent {sent} bytes but only {declared} were declared")]
    Oversend { sent: usize, declared: usize },

    #[error(transparent)]
    Bounds(#[from] BoundsError),
}

/// Protocol errors (fatal)
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message kind {0}")]
    UnknownKind(i32),

    #[error("Peer had invalid version code: {0}")]
    VersionMismatch(String),

    /// `commit` was handed a message other than the one under construction
    #[error("Committed message was not the one under construction")]
    CommitMismatch,

    /// A field could not be decoded within the declared payload
    #[error("Truncated message: {0}")]
    Truncated(#[from] BoundsError),

    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unexpected {0} message")]
    UnexpectedMessage(&'static str),
}

/// Any error that terminates a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A message arrived before the state it requires was reached
    #[error("Auth error: {0}")]
    Auth(&'static str),

    /// Socket failure or peer hang-up
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The connection was closed locally
    #[error("Connection closed")]
    Closed,
}

/// Recoverable user input errors
///
/// `Display` is the first line shown to the user; `lines` adds any usage hints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid command arguments.")]
    MissingArguments {
        usage: &'static str,
        hint: Option<&'static str>,
    },

    #[error("Please specify a proper room name.")]
    InvalidRoomName,

    #[error("You're not in a room.")]
    NotInRoom,

    #[error("Invalid username specified.")]
    InvalidUsername,

    #[error("No one exists with the name {0}.")]
    NoSuchUser(String),

    #[error("You cannot add yourself.")]
    SelfFriend,

    #[error("You've already added {0}.")]
    AlreadyFriend(String),

    #[error("You cannot add more than {} friends.", MAX_FRIENDS)]
    FriendsFull,

    #[error("You don't have a friend with the name {0}.")]
    NotFriend(String),

    #[error("Could not find {0}.")]
    UserNotFound(String),

    #[error("Surely you're not that lonely.")]
    SelfMessage,

    #[error("You have nobody to reply to.")]
    NobodyToReply,

    #[error("{0} is no longer online.")]
    NoLongerOnline(String),

    #[error("Please type a proper integer for your desired color.")]
    InvalidColor,

    #[error("Invalid command.")]
    InvalidCommand,

    #[error("Room is full.")]
    RoomFull,

    #[error("Your message is too long.")]
    MessageTooLong,
}

impl ValidationError {
    /// All lines to report, in order
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![self.to_string()];
        match self {
            ValidationError::MissingArguments { usage, hint } => {
                lines.push(format!("Try as {}", usage));
                if let Some(hint) = hint {
                    lines.push((*hint).to_string());
                }
            }
            ValidationError::InvalidCommand => {
                lines.push("Type /help to see a list of proper commands.".to_string());
            }
            _ => {}
        }
        lines
    }
}

/// Message send errors
///
/// Occurs when a user's outbound queue cannot take another message.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer is not draining its messages
    #[error("Outbound queue full")]
    QueueFull,
}

/// User record persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported record version {0}")]
    UnsupportedVersion(u32),
}

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Every user slot is taken
    #[error("Server is full")]
    ServerFull,

    #[error("Invalid configuration: {0}")]
    Config(String),
}
