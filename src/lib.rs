//! Drocsid Chat Server Library
//!
//! A multi-room TCP chat server speaking a length-prefixed binary protocol,
//! using the Actor pattern for shared state.
//!
//! # Features
//! - Big-endian framing with batched messages per frame
//! - Version handshake and username/password login
//! - Named rooms of up to 10 members, created on first join
//! - Friends lists with live presence notifications
//! - Private messages with reply tracking
//! - Persisted name/chat colors and friends
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning users, rooms and friend links
//! - Each connection has a `handler` task with a read loop, a writer and a
//!   coalescing flush loop
//! - Registry state is only touched by the actor; each connection's outbound
//!   buffer sits behind its own write lock
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use drocsid::{serve, JsonFileStore, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let store = Arc::new(JsonFileStore::open(&config.data_dir)?);
//!     let listener = TcpListener::bind(config.bind_addr).await?;
//!     serve(listener, config, store).await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod friends;
pub mod handler;
pub mod message;
pub mod registry;
pub mod room;
pub mod server;
pub mod session;
pub mod store;
pub mod types;
pub mod user;

// Re-export main types for convenience
pub use client::{strip_markers, ChatClient, ClientSender, ClientSession};
pub use config::{ClientConfig, ConnectionSettings, ServerConfig};
pub use error::{AppError, ProtocolError, SessionError, ValidationError};
pub use handler::{handle_connection, serve};
pub use message::{AuthResult, ChatLine, ClientMessage, JoinRoomResult, ServerMessage};
pub use server::{ChatServer, ServerCommand};
pub use store::{JsonFileStore, MemoryStore, UserRecord, UserStore};
pub use types::{RoomId, UserId, VERSION_CODE};
