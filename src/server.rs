//! ChatServer Actor implementation
//!
//! The central actor that owns the registry: users, rooms and friend
//! cross-references. Every mutation arrives as a `ServerCommand` over an mpsc
//! channel and is applied in order, so no registry state is ever touched
//! concurrently. The actor never writes to sockets; it queues typed messages
//! on each user's outbound channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::message::{ChatLine, ClientMessage, JoinRoomResult, MemberEntry, ServerMessage};
use crate::registry::Registry;
use crate::room::{LeaveOutcome, Room};
use crate::store::UserStore;
use crate::types::{color, RoomId, UserId};
use crate::user::{User, UserHandle};

/// Commands sent from connection handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New socket accepted; `reply` is `false` when the server is full
    Connect {
        user_id: UserId,
        peer: String,
        handle: UserHandle,
        reply: oneshot::Sender<bool>,
    },
    /// Connection closed, for any reason
    Disconnect { user_id: UserId },
    /// A decoded client message
    Message {
        user_id: UserId,
        message: ClientMessage,
    },
}

/// The main ChatServer actor
pub struct ChatServer {
    pub(crate) registry: Registry,
    pub(crate) store: Arc<dyn UserStore>,
    /// Version string expected in client handshakes
    pub(crate) version: String,
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    pub fn new(
        receiver: mpsc::Receiver<ServerCommand>,
        store: Arc<dyn UserStore>,
        version: impl Into<String>,
    ) -> Self {
        Self::with_registry(receiver, store, version, Registry::new())
    }

    /// Use a registry with non-default capacities
    pub fn with_registry(
        receiver: mpsc::Receiver<ServerCommand>,
        store: Arc<dyn UserStore>,
        version: impl Into<String>,
        registry: Registry,
    ) -> Self {
        Self {
            registry,
            store,
            version: version.into(),
            receiver,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    pub(crate) fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect {
                user_id,
                peer,
                handle,
                reply,
            } => {
                self.handle_connect(user_id, peer, handle, reply);
            }
            ServerCommand::Disconnect { user_id } => {
                self.disconnect_user(user_id);
            }
            ServerCommand::Message { user_id, message } => {
                if let Err(e) = self.dispatch(user_id, message) {
                    if let Some(user) = self.registry.user(user_id) {
                        warn!("Closing {}: {}", user.label(), e);
                        user.close();
                    }
                }
            }
        }
    }

    fn handle_connect(
        &mut self,
        user_id: UserId,
        peer: String,
        handle: UserHandle,
        reply: oneshot::Sender<bool>,
    ) {
        let accepted = match self.registry.add_user(User::new(user_id, peer.clone(), handle)) {
            Ok(()) => {
                info!("{} connected.", peer);
                true
            }
            Err(user) => {
                warn!("Server full, refusing {}", peer);
                user.close();
                false
            }
        };
        debug!(
            "Total users: {}, Total rooms: {}",
            self.registry.user_count(),
            self.registry.room_count()
        );
        let _ = reply.send(accepted);
    }

    /// Tear a user down: save, leave their room, tell their watchers, forget them
    pub(crate) fn disconnect_user(&mut self, user_id: UserId) {
        let Some(user) = self.registry.user(user_id) else {
            return;
        };
        user.close();

        if user.is_authenticated() {
            self.store.save(&user.record());
            self.leave_room(user_id);
            self.broadcast_presence(user_id, false);
        }

        if let Some(user) = self.registry.remove_user(user_id) {
            info!("{} disconnected.", user.label());
        }
        debug!(
            "Total users: {}, Total rooms: {}",
            self.registry.user_count(),
            self.registry.room_count()
        );
    }

    pub(crate) fn send_to(&self, user_id: UserId, msg: ServerMessage) {
        if let Some(user) = self.registry.user(user_id) {
            user.send(msg);
        }
    }

    /// Server text lines in one color
    pub(crate) fn send_lines<S: AsRef<str>>(&self, user_id: UserId, lines: &[S], text_color: u16) {
        if let Some(user) = self.registry.user(user_id) {
            for line in lines {
                user.send_text(line.as_ref(), text_color);
            }
        }
    }

    fn room_list(&self) -> ServerMessage {
        ServerMessage::RoomList {
            rooms: self.registry.room_names(),
        }
    }

    pub(crate) fn send_room_list(&self, user_id: UserId) {
        self.send_to(user_id, self.room_list());
    }

    /// Room names to every logged-in user
    pub(crate) fn broadcast_room_list(&self) {
        let msg = self.room_list();
        for user in self.registry.users().filter(|u| u.is_authenticated()) {
            user.send(msg.clone());
        }
    }

    /// Member rows as `recipient` sees them: their friends are friend-colored
    fn member_list_for(&self, room: &Room, recipient: &User) -> Vec<MemberEntry> {
        room.members()
            .filter_map(|id| self.registry.user(id))
            .map(|member| MemberEntry {
                name_color: if recipient.friends.contains(member.display_name()) {
                    color::FRIEND
                } else {
                    member.name_color
                },
                name: member.display_name().to_string(),
            })
            .collect()
    }

    pub(crate) fn send_member_list(&self, room_id: RoomId, user_id: UserId) {
        let (Some(room), Some(user)) = (self.registry.room(room_id), self.registry.user(user_id)) else {
            return;
        };
        user.send(ServerMessage::MemberList {
            members: self.member_list_for(room, user),
        });
    }

    pub(crate) fn broadcast_member_list(&self, room_id: RoomId) {
        let Some(room) = self.registry.room(room_id) else {
            return;
        };
        for member in room.members().filter_map(|id| self.registry.user(id)) {
            member.send(ServerMessage::MemberList {
                members: self.member_list_for(room, member),
            });
        }
    }

    /// Tell everyone who has `subject` as a friend that they came or went
    pub(crate) fn broadcast_presence(&mut self, subject_id: UserId, online: bool) {
        let Some(subject) = self.registry.user(subject_id) else {
            return;
        };
        let line = chat_line(
            subject,
            if online {
                "has just logged on."
            } else {
                "has just logged off."
            },
            true,
        );
        let active = online.then_some(subject_id);
        let watchers: Vec<UserId> = self
            .registry
            .users()
            .filter(|u| u.id != subject_id && u.friends.contains(&line.from))
            .map(|u| u.id)
            .collect();

        for watcher_id in watchers {
            let Some(watcher) = self.registry.user_mut(watcher_id) else {
                continue;
            };
            let Some(friend) = watcher.friends.get_mut(&line.from) else {
                continue;
            };
            friend.active_user = active;
            let name = friend.display_name().to_string();
            watcher.send(ServerMessage::FriendStatus { name, online });
            watcher.send(ServerMessage::Chat(line.clone()));
        }
    }

    /// Put a user into an existing room and announce them
    pub(crate) fn enter_room(&mut self, user_id: UserId, room_id: RoomId) -> bool {
        let joined = match self.registry.room_mut(room_id) {
            Some(room) => room.join(user_id).is_ok(),
            None => false,
        };
        if !joined {
            self.send_to(user_id, ServerMessage::JoinRoomAttempt(JoinRoomResult::Failure));
            return false;
        }
        self.send_to(user_id, ServerMessage::JoinRoomAttempt(JoinRoomResult::Success));

        let Some(user) = self.registry.user_mut(user_id) else {
            return false;
        };
        user.room = Some(room_id);
        let line = chat_line(user, "has joined the room.", true);
        if let Some(room) = self.registry.room(room_id) {
            info!("{} joined room {}", line.from, room.name);
            self.send_room_line(room, &line, user_id);
        }

        self.broadcast_member_list(room_id);
        self.broadcast_room_list();
        true
    }

    /// Take a user out of their room, destroying it if needed
    ///
    /// Returns `false` if the user was not in a room.
    pub(crate) fn leave_room(&mut self, user_id: UserId) -> bool {
        let Some(user) = self.registry.user_mut(user_id) else {
            return false;
        };
        let Some(room_id) = user.room.take() else {
            return false;
        };
        user.send(ServerMessage::LeaveRoom);
        let line = chat_line(user, "has left the room.", true);

        let Some(room) = self.registry.room_mut(room_id) else {
            return true;
        };
        let outcome = room.leave(user_id);
        info!("{} left room {}", line.from, room.name);

        if let Some(room) = self.registry.room(room_id) {
            self.send_room_line(room, &line, user_id);
        }

        match outcome {
            LeaveOutcome::Destroy => self.destroy_room(room_id),
            LeaveOutcome::Remains => {
                self.broadcast_member_list(room_id);
                self.broadcast_room_list();
            }
        }
        true
    }

    /// Remove a room, forcing any remaining members out
    pub(crate) fn destroy_room(&mut self, room_id: RoomId) {
        let Some(mut room) = self.registry.remove_room(room_id) else {
            return;
        };
        for member_id in room.ensure_empty() {
            if let Some(member) = self.registry.user_mut(member_id) {
                member.room = None;
                member.send(ServerMessage::LeaveRoom);
            }
        }
        info!("Room {} destroyed.", room.name);
        self.broadcast_room_list();
    }

    /// Relay spoken text to everyone in the sender's room
    pub(crate) fn relay(&self, user_id: UserId, text: &str) -> bool {
        let Some(user) = self.registry.user(user_id) else {
            return false;
        };
        let Some(room) = user.room.and_then(|id| self.registry.room(id)) else {
            return false;
        };
        info!("<{}> {}: {}", room.name, user.display_name(), text);
        self.send_room_line(room, &chat_line(user, text, false), user_id);
        true
    }

    fn send_room_line(&self, room: &Room, line: &ChatLine, sender: UserId) {
        for member_id in room.members() {
            if let Some(member) = self.registry.user(member_id) {
                member.send(ServerMessage::Chat(ChatLine {
                    is_sender: member_id == sender,
                    ..line.clone()
                }));
            }
        }
    }
}

/// A chat line spoken by `from`
pub(crate) fn chat_line(from: &User, text: &str, is_status: bool) -> ChatLine {
    ChatLine {
        from: from.display_name().to_string(),
        name_color: from.name_color,
        chat_color: from.chat_color,
        is_status,
        is_personal: false,
        is_sender: false,
        text: text.to_string(),
    }
}
