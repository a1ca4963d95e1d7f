//! Per-user session state machine and chat commands
//!
//! `Connected → Verified → Authenticated`, each step requiring the one before.
//! Ordering violations are fatal (`SessionError`) and close the connection.
//! Bad command input is a `ValidationError`, reported back as red server
//! lines while the session carries on.

use tracing::{info, warn};

use crate::error::{ProtocolError, SessionError, ValidationError};
use crate::friends::FriendList;
use crate::message::{AuthResult, ChatLine, ClientMessage, JoinRoomResult, MessageKind, ServerMessage};
use crate::server::{chat_line, ChatServer};
use crate::store::{clamp_friends, LoadOutcome, UserRecord};
use crate::types::{color, is_valid_username, UserId, MAX_ROOM_NAME_LEN};

const WELCOME_LINES: [&str; 3] = [
    "Welcome to <11>Drocsid!",
    "Type /joinroom [name] to join/create a room.",
    "Type /help for more commands.",
];

const HELP_LINES: [&str; 10] = [
    "/joinroom [room name]",
    "/leaveroom",
    "/addfriend [username]",
    "/removefriend [username]",
    "/friendslist",
    "/pm [username] [message]",
    "/reply [message]",
    "/settextcolor [color number]",
    "/setnamecolor [color number]",
    "/colors",
];

const COLORS_HINT: &str = "Type /colors for a list of available colors.";

/// Which of a user's two colors a command changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorTarget {
    Name,
    Chat,
}

fn required<'a>(
    args: Option<&'a str>,
    usage: &'static str,
    hint: Option<&'static str>,
) -> Result<&'a str, ValidationError> {
    args.ok_or(ValidationError::MissingArguments { usage, hint })
}

fn parse_color(arg: &str) -> Result<u16, ValidationError> {
    arg.trim().parse().map_err(|_| ValidationError::InvalidColor)
}

/// The `/colors` palette line: `<0>0 <1>1 ... <254>254 `
fn palette() -> String {
    (0..255).map(|i| format!("<{0}>{0} ", i)).collect()
}

impl ChatServer {
    /// Route one client message through the session state machine
    pub(crate) fn dispatch(&mut self, user_id: UserId, message: ClientMessage) -> Result<(), SessionError> {
        match message {
            ClientMessage::Handshake { version } => self.handle_handshake(user_id, &version),
            ClientMessage::Authenticate { username, password } => {
                self.handle_authenticate(user_id, &username, &password)
            }
            ClientMessage::Chat { text } => self.handle_chat_line(user_id, &text),
        }
    }

    fn handle_handshake(&mut self, user_id: UserId, version: &str) -> Result<(), SessionError> {
        let Some(user) = self.registry.user_mut(user_id) else {
            return Ok(());
        };
        if user.is_verified() {
            return Err(ProtocolError::UnexpectedMessage(MessageKind::Handshake.name()).into());
        }
        if version != self.version {
            return Err(ProtocolError::VersionMismatch(version.to_string()).into());
        }
        user.mark_verified();
        user.send(ServerMessage::Handshake {
            version: self.version.clone(),
        });
        Ok(())
    }

    fn handle_authenticate(&mut self, user_id: UserId, username: &str, password: &str) -> Result<(), SessionError> {
        let Some(user) = self.registry.user(user_id) else {
            return Ok(());
        };
        if !user.is_verified() {
            return Err(SessionError::Auth("Unverified user trying to authenticate."));
        }
        if user.is_authenticated() {
            return Err(SessionError::Auth("Authenticated user trying to authenticate again."));
        }
        let peer = user.peer.clone();

        let (result, record) = self.check_credentials(&peer, username, password);
        self.send_to(user_id, ServerMessage::AuthResult(result));
        let Some(record) = record else {
            return Ok(());
        };

        let mut friends = FriendList::new();
        for name in clamp_friends(record.friends.clone()) {
            let active = self.registry.find_online(&name).map(|u| u.id);
            if let Err(e) = friends.add(&name, active) {
                warn!("Skipping friend {} of {}: {}", name, record.display_name, e);
            }
        }
        let Some(user) = self.registry.user_mut(user_id) else {
            return Ok(());
        };
        user.apply_record(&record, friends);
        user.mark_authenticated();
        for line in WELCOME_LINES {
            user.send_text(line, color::DEFAULT);
        }

        self.broadcast_presence(user_id, true);
        if let Some(user) = self.registry.user(user_id) {
            user.send(ServerMessage::FriendsList {
                friends: user.friends.entries(&self.registry),
            });
        }
        self.send_room_list(user_id);
        Ok(())
    }

    /// Validate a login attempt, creating the record for a first login
    fn check_credentials(&self, peer: &str, username: &str, password: &str) -> (AuthResult, Option<UserRecord>) {
        if username.is_empty() || !is_valid_username(username) {
            info!("{} tried to use invalid username: {}", peer, username);
            return (AuthResult::InvalidUsername, None);
        }
        if self.registry.find_online(username).is_some() {
            info!("{} tried to use username already in use: {}", peer, username);
            return (AuthResult::NameInUse, None);
        }
        match self.store.load(username) {
            LoadOutcome::Success(record) if record.password == password => {
                info!("{} has logged in from {}.", record.display_name, peer);
                (AuthResult::Success, Some(record))
            }
            LoadOutcome::Success(record) => {
                info!("{} has used an invalid password for user: {}.", peer, record.display_name);
                (AuthResult::InvalidPassword, None)
            }
            LoadOutcome::NewUser => {
                let record = UserRecord::new(username, password);
                self.store.save(&record);
                info!("{} has created a new username: {}", peer, username);
                (AuthResult::Success, Some(record))
            }
            LoadOutcome::Failure => (AuthResult::Failure, None),
        }
    }

    fn handle_chat_line(&mut self, user_id: UserId, text: &str) -> Result<(), SessionError> {
        let Some(user) = self.registry.user(user_id) else {
            return Ok(());
        };
        if !user.is_authenticated() {
            return Err(SessionError::Auth("Unauthenticated user trying to send a message."));
        }
        if text.is_empty() {
            return Ok(());
        }
        let capacity = ChatLine::text_capacity(user.display_name());

        let result = match text.strip_prefix('/') {
            Some(line) => {
                let (command, args) = match line.split_once(' ') {
                    Some((command, args)) => (command, Some(args)),
                    None => (line, None),
                };
                let room = user
                    .room
                    .and_then(|id| self.registry.room(id))
                    .map(|r| format!("<{}> ", r.name))
                    .unwrap_or_default();
                info!(
                    "{}{} used command: {} with arguments: {}",
                    room,
                    user.display_name(),
                    command,
                    args.unwrap_or("")
                );
                self.run_command(user_id, command, args)
            }
            None if text.len() > capacity => Err(ValidationError::MessageTooLong),
            None if self.relay(user_id, text) => Ok(()),
            None => Err(ValidationError::InvalidCommand),
        };

        if let Err(e) = result {
            self.report(user_id, &e);
        }
        Ok(())
    }

    fn report(&self, user_id: UserId, err: &ValidationError) {
        if let Some(user) = self.registry.user(user_id) {
            warn!("{}: {}", user.display_name(), err);
        }
        self.send_lines(user_id, &err.lines(), color::ERROR);
    }

    fn run_command(&mut self, user_id: UserId, command: &str, args: Option<&str>) -> Result<(), ValidationError> {
        match command {
            "joinroom" => self.join_room_by_name(user_id, required(args, "/joinroom [room name]", None)?),
            "leaveroom" | "leave" => {
                if self.leave_room(user_id) {
                    Ok(())
                } else {
                    Err(ValidationError::NotInRoom)
                }
            }
            "addfriend" => self.add_friend(user_id, required(args, "/addfriend [username]", None)?),
            "removefriend" => self.remove_friend(user_id, required(args, "/removefriend [username]", None)?),
            "friendslist" => {
                self.list_friends(user_id);
                Ok(())
            }
            "pm" => {
                let usage = "/pm [username] [message]";
                let (name, text) = required(args, usage, None)?
                    .split_once(' ')
                    .ok_or(ValidationError::MissingArguments { usage, hint: None })?;
                self.private_message(user_id, name, text)
            }
            "r" | "reply" => self.reply(user_id, required(args, "/reply [message]", None)?),
            "settextcolor" => {
                let value = parse_color(required(args, "/settextcolor [color number]", Some(COLORS_HINT))?)?;
                self.set_color(user_id, ColorTarget::Chat, value);
                Ok(())
            }
            "setnamecolor" => {
                let value = parse_color(required(args, "/setnamecolor [color number]", Some(COLORS_HINT))?)?;
                self.set_color(user_id, ColorTarget::Name, value);
                Ok(())
            }
            "colors" => {
                self.send_lines(user_id, &[palette()], color::DEFAULT);
                Ok(())
            }
            "help" | "h" | "?" | "commands" => {
                self.send_lines(user_id, &HELP_LINES, color::DEFAULT);
                Ok(())
            }
            _ => Err(ValidationError::InvalidCommand),
        }
    }

    /// Leave the current room, then join or create `name`
    fn join_room_by_name(&mut self, user_id: UserId, name: &str) -> Result<(), ValidationError> {
        if name.is_empty() || name.len() > MAX_ROOM_NAME_LEN {
            return Err(ValidationError::InvalidRoomName);
        }
        self.leave_room(user_id);

        let room_id = match self.registry.room_by_name(name) {
            Some(room_id) => room_id,
            None => match self.registry.create_room(name, user_id) {
                Some(room_id) => {
                    info!("Room {} created.", name);
                    room_id
                }
                None => {
                    warn!("Room table full, cannot create {}", name);
                    self.send_to(user_id, ServerMessage::JoinRoomAttempt(JoinRoomResult::Failure));
                    return Ok(());
                }
            },
        };
        self.enter_room(user_id, room_id);
        Ok(())
    }

    fn add_friend(&mut self, user_id: UserId, name: &str) -> Result<(), ValidationError> {
        if name.is_empty() || !is_valid_username(name) {
            return Err(ValidationError::InvalidUsername);
        }
        let proper = match self.registry.find_online(name) {
            Some(online) => online.display_name().to_string(),
            None => self
                .store
                .proper_name(name)
                .ok_or_else(|| ValidationError::NoSuchUser(name.to_string()))?,
        };
        let active = self.registry.find_online(&proper).map(|u| u.id);
        let online = self.registry.is_online(active);

        let Some(user) = self.registry.user_mut(user_id) else {
            return Ok(());
        };
        if proper.to_lowercase() == user.display_name_lowercase() {
            return Err(ValidationError::SelfFriend);
        }
        if user.friends.contains(&proper) {
            return Err(ValidationError::AlreadyFriend(proper));
        }
        user.friends.add(&proper, active)?;
        info!("{} added {} as a friend", user.display_name(), proper);
        user.send(ServerMessage::FriendAdded { name: proper, online });
        self.after_friends_changed(user_id);
        Ok(())
    }

    fn remove_friend(&mut self, user_id: UserId, name: &str) -> Result<(), ValidationError> {
        if name.is_empty() || !is_valid_username(name) {
            return Err(ValidationError::InvalidUsername);
        }
        let Some(user) = self.registry.user_mut(user_id) else {
            return Ok(());
        };
        let removed = user.friends.remove(name)?;
        info!("{} removed {} as a friend", user.display_name(), removed.display_name());
        user.send(ServerMessage::FriendRemoved {
            name: removed.display_name().to_string(),
        });
        self.after_friends_changed(user_id);
        Ok(())
    }

    /// Persist the list and recolor the room member list the user sees
    fn after_friends_changed(&self, user_id: UserId) {
        let Some(user) = self.registry.user(user_id) else {
            return;
        };
        self.store.save(&user.record());
        if let Some(room_id) = user.room {
            self.send_member_list(room_id, user_id);
        }
    }

    fn list_friends(&self, user_id: UserId) {
        let Some(user) = self.registry.user(user_id) else {
            return;
        };
        for friend in user.friends.iter() {
            let shade = if friend.is_online(&self.registry) {
                color::FRIEND
            } else {
                color::FRIEND_OFFLINE
            };
            user.send_text(friend.display_name(), shade);
        }
    }

    fn private_message(&mut self, user_id: UserId, name: &str, text: &str) -> Result<(), ValidationError> {
        if !is_valid_username(name) {
            return Err(ValidationError::InvalidUsername);
        }
        let target_id = self
            .registry
            .find_online(name)
            .map(|u| u.id)
            .ok_or_else(|| ValidationError::UserNotFound(name.to_string()))?;
        if target_id == user_id {
            return Err(ValidationError::SelfMessage);
        }
        let Some((sender_name, target_name)) = self.deliver_private(user_id, target_id, text)? else {
            return Ok(());
        };
        if let Some(user) = self.registry.user_mut(user_id) {
            user.reply_to = Some(target_name);
        }
        if let Some(target) = self.registry.user_mut(target_id) {
            target.reply_to = Some(sender_name);
        }
        Ok(())
    }

    fn reply(&mut self, user_id: UserId, text: &str) -> Result<(), ValidationError> {
        let reply_to = self
            .registry
            .user(user_id)
            .and_then(|u| u.reply_to.clone())
            .ok_or(ValidationError::NobodyToReply)?;
        let target_id = match self.registry.find_online(&reply_to) {
            Some(target) if target.id != user_id => target.id,
            _ => return Err(ValidationError::NoLongerOnline(reply_to)),
        };
        let Some((sender_name, _)) = self.deliver_private(user_id, target_id, text)? else {
            return Ok(());
        };
        if let Some(target) = self.registry.user_mut(target_id) {
            target.reply_to = Some(sender_name);
        }
        Ok(())
    }

    /// Send a private line to both ends; returns (sender, target) names
    ///
    /// The sender's copy is tagged with the target's name so the client can
    /// render it as outgoing. Text that would not fit either copy is refused.
    fn deliver_private(
        &self,
        from: UserId,
        to: UserId,
        text: &str,
    ) -> Result<Option<(String, String)>, ValidationError> {
        let (Some(sender), Some(target)) = (self.registry.user(from), self.registry.user(to)) else {
            return Ok(None);
        };
        let capacity = ChatLine::text_capacity(sender.display_name())
            .min(ChatLine::text_capacity(target.display_name()));
        if text.len() > capacity {
            return Err(ValidationError::MessageTooLong);
        }
        sender.send(ServerMessage::Chat(ChatLine {
            is_personal: true,
            is_sender: true,
            ..chat_line(target, text, false)
        }));
        target.send(ServerMessage::Chat(ChatLine {
            is_personal: true,
            ..chat_line(sender, text, false)
        }));
        info!("{} -> {}: {}", sender.display_name(), target.display_name(), text);
        Ok(Some((sender.display_name().to_string(), target.display_name().to_string())))
    }

    fn set_color(&mut self, user_id: UserId, target: ColorTarget, value: u16) {
        let Some(user) = self.registry.user_mut(user_id) else {
            return;
        };
        match target {
            ColorTarget::Name => user.name_color = value,
            ColorTarget::Chat => user.chat_color = value,
        }
        let room = user.room;
        self.store.save(&user.record());
        if let (ColorTarget::Name, Some(room_id)) = (target, room) {
            self.broadcast_member_list(room_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::server::tests::{connect, drain, login, say, test_server, test_server_with, texts};
    use crate::server::ServerCommand;
    use crate::types::{MAX_FRIENDS, MAX_ROOM_USERS, VERSION_CODE};
    use tokio::sync::mpsc;

    fn send(server: &mut ChatServer, user_id: UserId, message: ClientMessage) {
        server.handle_command(ServerCommand::Message { user_id, message });
    }

    fn handshake(server: &mut ChatServer, user_id: UserId) {
        send(
            server,
            user_id,
            ClientMessage::Handshake {
                version: VERSION_CODE.into(),
            },
        );
    }

    fn authenticate(server: &mut ChatServer, user_id: UserId, username: &str, password: &str) {
        send(
            server,
            user_id,
            ClientMessage::Authenticate {
                username: username.into(),
                password: password.into(),
            },
        );
    }

    fn auth_result(rx: &mut mpsc::Receiver<ServerMessage>) -> Option<AuthResult> {
        drain(rx).into_iter().find_map(|m| match m {
            ServerMessage::AuthResult(code) => Some(code),
            _ => None,
        })
    }

    fn error_lines(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<String> {
        texts(&drain(rx))
    }

    #[test]
    fn test_handshake_reply() {
        let (mut server, _) = test_server();
        let (id, mut rx) = connect(&mut server);
        handshake(&mut server, id);
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::Handshake {
                version: VERSION_CODE.into()
            }]
        );
        assert!(server.registry.user(id).unwrap().is_verified());
    }

    #[test]
    fn test_handshake_version_mismatch_closes() {
        let (mut server, _) = test_server();
        let (id, mut rx) = connect(&mut server);
        send(
            &mut server,
            id,
            ClientMessage::Handshake {
                version: "Drocsid 0.2".into(),
            },
        );
        assert!(drain(&mut rx).is_empty());
        assert!(!server.registry.user(id).unwrap().is_open());
    }

    #[test]
    fn test_second_handshake_is_fatal() {
        let (mut server, _) = test_server();
        let (id, _rx) = connect(&mut server);
        handshake(&mut server, id);
        handshake(&mut server, id);
        assert!(!server.registry.user(id).unwrap().is_open());
    }

    #[test]
    fn test_authenticate_before_handshake_is_fatal() {
        let (mut server, _) = test_server();
        let (id, mut rx) = connect(&mut server);
        authenticate(&mut server, id, "Alice", "pw");
        assert_eq!(auth_result(&mut rx), None);
        assert!(!server.registry.user(id).unwrap().is_open());
    }

    #[test]
    fn test_new_user_login() {
        let (mut server, store) = test_server();
        let (id, mut rx) = connect(&mut server);
        handshake(&mut server, id);
        drain(&mut rx);
        authenticate(&mut server, id, "Alice", "secret");

        let msgs = drain(&mut rx);
        assert_eq!(msgs[0], ServerMessage::AuthResult(AuthResult::Success));
        assert_eq!(
            texts(&msgs),
            vec![
                "<15>Welcome to <11>Drocsid!",
                "<15>Type /joinroom [name] to join/create a room.",
                "<15>Type /help for more commands.",
            ]
        );
        assert!(msgs.contains(&ServerMessage::FriendsList { friends: vec![] }));
        assert_eq!(msgs.last(), Some(&ServerMessage::RoomList { rooms: vec![] }));
        assert!(server.registry.user(id).unwrap().is_authenticated());
        assert_eq!(store.get("alice").unwrap().password, "secret");
    }

    #[test]
    fn test_invalid_username() {
        let (mut server, _) = test_server();
        for name in ["", "bad name", "al!ce"] {
            let (id, mut rx) = connect(&mut server);
            handshake(&mut server, id);
            authenticate(&mut server, id, name, "pw");
            assert_eq!(auth_result(&mut rx), Some(AuthResult::InvalidUsername));
            assert!(!server.registry.user(id).unwrap().is_authenticated());
        }
    }

    #[test]
    fn test_name_in_use_is_case_insensitive() {
        let (mut server, _) = test_server();
        let _alice = login(&mut server, "Alice");
        let (id, mut rx) = connect(&mut server);
        handshake(&mut server, id);
        authenticate(&mut server, id, "ALICE", "pw");
        assert_eq!(auth_result(&mut rx), Some(AuthResult::NameInUse));
    }

    #[test]
    fn test_wrong_password() {
        let (mut server, store) = test_server();
        store.insert(UserRecord::new("Alice", "right"));
        let (id, mut rx) = connect(&mut server);
        handshake(&mut server, id);
        authenticate(&mut server, id, "alice", "wrong");
        assert_eq!(auth_result(&mut rx), Some(AuthResult::InvalidPassword));

        // A failed attempt may be retried on the same connection
        authenticate(&mut server, id, "alice", "right");
        assert_eq!(auth_result(&mut rx), Some(AuthResult::Success));
        assert_eq!(server.registry.user(id).unwrap().display_name(), "Alice");
    }

    #[test]
    fn test_login_resolves_friends_and_announces() {
        let (mut server, store) = test_server();
        let mut record = UserRecord::new("Alice", "pw");
        record.friends = vec!["Bob".into(), "Carol".into()];
        store.insert(record);
        let (bob, mut bob_rx) = login(&mut server, "Bob");
        server.registry.user_mut(bob).unwrap().friends.add("Alice", None).unwrap();

        let (id, mut rx) = connect(&mut server);
        handshake(&mut server, id);
        authenticate(&mut server, id, "Alice", "pw");

        let msgs = drain(&mut rx);
        assert!(msgs.contains(&ServerMessage::FriendsList {
            friends: vec![
                crate::message::FriendEntry {
                    name: "Bob".into(),
                    online: true
                },
                crate::message::FriendEntry {
                    name: "Carol".into(),
                    online: false
                },
            ]
        }));

        let bob_msgs = drain(&mut bob_rx);
        assert_eq!(
            bob_msgs[0],
            ServerMessage::FriendStatus {
                name: "Alice".into(),
                online: true
            }
        );
        assert!(matches!(
            &bob_msgs[1],
            ServerMessage::Chat(line) if line.is_status && line.from == "Alice" && line.text == "has just logged on."
        ));
        let friend = server.registry.user(bob).unwrap().friends.get("alice").unwrap().clone();
        assert_eq!(friend.active_user, Some(id));
    }

    #[test]
    fn test_chat_before_login_is_fatal() {
        let (mut server, _) = test_server();
        let (id, _rx) = connect(&mut server);
        handshake(&mut server, id);
        say(&mut server, id, "/help");
        assert!(!server.registry.user(id).unwrap().is_open());
    }

    #[test]
    fn test_empty_line_ignored() {
        let (mut server, _) = test_server();
        let (id, mut rx) = login(&mut server, "Alice");
        say(&mut server, id, "");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_text_outside_room_is_invalid() {
        let (mut server, _) = test_server();
        let (id, mut rx) = login(&mut server, "Alice");
        say(&mut server, id, "hello?");
        assert_eq!(
            error_lines(&mut rx),
            vec![
                "<12>Invalid command.",
                "<12>Type /help to see a list of proper commands."
            ]
        );
        say(&mut server, id, "/dance");
        assert_eq!(error_lines(&mut rx)[0], "<12>Invalid command.");
    }

    #[test]
    fn test_joinroom_validation() {
        let (mut server, _) = test_server();
        let (id, mut rx) = login(&mut server, "Alice");

        say(&mut server, id, "/joinroom");
        assert_eq!(
            error_lines(&mut rx),
            vec![
                "<12>Invalid command arguments.",
                "<12>Try as /joinroom [room name]"
            ]
        );
        say(&mut server, id, "/joinroom ");
        assert_eq!(error_lines(&mut rx), vec!["<12>Please specify a proper room name."]);
        say(&mut server, id, "/joinroom elevenchars");
        assert_eq!(error_lines(&mut rx), vec!["<12>Please specify a proper room name."]);
        say(&mut server, id, "/joinroom tenchars10");
        assert!(server.registry.room_by_name("tenchars10").is_some());
    }

    #[test]
    fn test_room_names_match_exactly() {
        let (mut server, _) = test_server();
        let (alice, _a) = login(&mut server, "Alice");
        let (bob, _b) = login(&mut server, "Bob");
        say(&mut server, alice, "/joinroom General");
        say(&mut server, bob, "/joinroom general");
        assert_eq!(server.registry.room_count(), 2);
    }

    #[test]
    fn test_room_table_full() {
        let (mut server, _) = test_server_with(Registry::with_capacity(10, 1));
        let (alice, _a) = login(&mut server, "Alice");
        let (bob, mut bob_rx) = login(&mut server, "Bob");
        say(&mut server, alice, "/joinroom one");
        drain(&mut bob_rx);
        say(&mut server, bob, "/joinroom two");
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerMessage::JoinRoomAttempt(JoinRoomResult::Failure)]
        );
        assert!(server.registry.user(bob).unwrap().room.is_none());
    }

    #[test]
    fn test_room_full() {
        let (mut server, _) = test_server();
        let mut users = Vec::new();
        for i in 0..MAX_ROOM_USERS {
            let (id, rx) = login(&mut server, &format!("user{}", i));
            say(&mut server, id, "/joinroom full");
            users.push((id, rx));
        }
        let (late, mut late_rx) = login(&mut server, "late");
        say(&mut server, late, "/joinroom full");
        assert_eq!(
            drain(&mut late_rx),
            vec![ServerMessage::JoinRoomAttempt(JoinRoomResult::Failure)]
        );
        let room = server.registry.room_by_name("full").unwrap();
        assert_eq!(server.registry.room(room).unwrap().member_count(), MAX_ROOM_USERS);
    }

    #[test]
    fn test_switching_rooms_leaves_old_one() {
        let (mut server, _) = test_server();
        let (alice, mut rx) = login(&mut server, "Alice");
        say(&mut server, alice, "/joinroom one");
        say(&mut server, alice, "/joinroom two");
        assert_eq!(server.registry.room_names(), vec!["two"]);
        let msgs = drain(&mut rx);
        assert!(msgs.contains(&ServerMessage::LeaveRoom));
    }

    #[test]
    fn test_leave_outside_room() {
        let (mut server, _) = test_server();
        let (id, mut rx) = login(&mut server, "Alice");
        say(&mut server, id, "/leaveroom");
        assert_eq!(error_lines(&mut rx), vec!["<12>You're not in a room."]);
    }

    #[test]
    fn test_addfriend_validation() {
        let (mut server, store) = test_server();
        let (id, mut rx) = login(&mut server, "Alice");

        say(&mut server, id, "/addfriend");
        assert_eq!(error_lines(&mut rx)[1], "<12>Try as /addfriend [username]");
        say(&mut server, id, "/addfriend bad!name");
        assert_eq!(error_lines(&mut rx), vec!["<12>Invalid username specified."]);
        say(&mut server, id, "/addfriend ghost");
        assert_eq!(error_lines(&mut rx), vec!["<12>No one exists with the name ghost."]);
        say(&mut server, id, "/addfriend ALICE");
        assert_eq!(error_lines(&mut rx), vec!["<12>You cannot add yourself."]);

        store.insert(UserRecord::new("Bob", "pw"));
        say(&mut server, id, "/addfriend bob");
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::FriendAdded {
                name: "Bob".into(),
                online: false
            }]
        );
        say(&mut server, id, "/addfriend BOB");
        assert_eq!(error_lines(&mut rx), vec!["<12>You've already added Bob."]);
        assert_eq!(store.get("alice").unwrap().friends, vec!["Bob"]);
    }

    #[test]
    fn test_addfriend_limit() {
        let (mut server, store) = test_server();
        let (id, mut rx) = login(&mut server, "Alice");
        for i in 0..=MAX_FRIENDS {
            store.insert(UserRecord::new(&format!("friend{}", i), "pw"));
        }
        for i in 0..MAX_FRIENDS {
            say(&mut server, id, &format!("/addfriend friend{}", i));
        }
        drain(&mut rx);
        say(&mut server, id, &format!("/addfriend friend{}", MAX_FRIENDS));
        assert_eq!(error_lines(&mut rx), vec!["<12>You cannot add more than 10 friends."]);
    }

    #[test]
    fn test_removefriend() {
        let (mut server, _) = test_server();
        let (alice, mut rx) = login(&mut server, "Alice");
        let _bob = login(&mut server, "Bob");
        say(&mut server, alice, "/addfriend Bob");
        drain(&mut rx);

        say(&mut server, alice, "/removefriend bob");
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::FriendRemoved { name: "Bob".into() }]
        );
        say(&mut server, alice, "/removefriend bob");
        assert_eq!(
            error_lines(&mut rx),
            vec!["<12>You don't have a friend with the name bob."]
        );
    }

    #[test]
    fn test_friend_colored_in_member_list() {
        let (mut server, _) = test_server();
        let (alice, mut rx) = login(&mut server, "Alice");
        let (bob, _b) = login(&mut server, "Bob");
        say(&mut server, alice, "/joinroom room");
        say(&mut server, bob, "/joinroom room");
        drain(&mut rx);

        say(&mut server, alice, "/addfriend bob");
        let msgs = drain(&mut rx);
        assert_eq!(
            msgs,
            vec![
                ServerMessage::FriendAdded {
                    name: "Bob".into(),
                    online: true
                },
                ServerMessage::MemberList {
                    members: vec![
                        crate::message::MemberEntry {
                            name_color: color::DEFAULT,
                            name: "Alice".into()
                        },
                        crate::message::MemberEntry {
                            name_color: color::FRIEND,
                            name: "Bob".into()
                        },
                    ]
                },
            ]
        );
    }

    #[test]
    fn test_friendslist_colors() {
        let (mut server, store) = test_server();
        store.insert(UserRecord::new("Carol", "pw"));
        let (alice, mut rx) = login(&mut server, "Alice");
        let _bob = login(&mut server, "Bob");
        say(&mut server, alice, "/addfriend bob");
        say(&mut server, alice, "/addfriend carol");
        drain(&mut rx);

        say(&mut server, alice, "/friendslist");
        assert_eq!(texts(&drain(&mut rx)), vec!["<10>Bob", "<8>Carol"]);
    }

    #[test]
    fn test_pm_offline_target() {
        let (mut server, _) = test_server();
        let (id, mut rx) = login(&mut server, "Alice");
        say(&mut server, id, "/pm bob hello");
        assert_eq!(error_lines(&mut rx), vec!["<12>Could not find bob."]);
        say(&mut server, id, "/pm alice hello");
        assert_eq!(error_lines(&mut rx), vec!["<12>Surely you're not that lonely."]);
        say(&mut server, id, "/pm bob");
        assert_eq!(
            error_lines(&mut rx),
            vec![
                "<12>Invalid command arguments.",
                "<12>Try as /pm [username] [message]"
            ]
        );
    }

    #[test]
    fn test_pm_and_reply() {
        let (mut server, _) = test_server();
        let (alice, mut alice_rx) = login(&mut server, "Alice");
        let (bob, mut bob_rx) = login(&mut server, "Bob");

        say(&mut server, alice, "/pm bob hi there");
        let sent = drain(&mut alice_rx);
        assert!(matches!(
            &sent[..],
            [ServerMessage::Chat(line)]
                if line.from == "Bob" && line.is_personal && line.is_sender && line.text == "hi there"
        ));
        let received = drain(&mut bob_rx);
        assert!(matches!(
            &received[..],
            [ServerMessage::Chat(line)]
                if line.from == "Alice" && line.is_personal && !line.is_sender && line.text == "hi there"
        ));

        say(&mut server, bob, "/r back at you");
        assert!(matches!(
            &drain(&mut alice_rx)[..],
            [ServerMessage::Chat(line)] if line.from == "Bob" && line.text == "back at you"
        ));
        assert_eq!(
            server.registry.user(alice).unwrap().reply_to.as_deref(),
            Some("Bob")
        );
    }

    #[test]
    fn test_reply_errors() {
        let (mut server, _) = test_server();
        let (alice, mut alice_rx) = login(&mut server, "Alice");
        say(&mut server, alice, "/reply hey");
        assert_eq!(error_lines(&mut alice_rx), vec!["<12>You have nobody to reply to."]);

        let (bob, _bob_rx) = login(&mut server, "Bob");
        say(&mut server, bob, "/pm alice hi");
        drain(&mut alice_rx);
        server.handle_command(ServerCommand::Disconnect { user_id: bob });

        say(&mut server, alice, "/reply hey");
        assert_eq!(error_lines(&mut alice_rx), vec!["<12>Bob is no longer online."]);
    }

    #[test]
    fn test_room_line_bounded_to_outbound_buffer() {
        let (mut server, _) = test_server();
        let (alice, mut alice_rx) = login(&mut server, "Alice");
        let (bob, mut bob_rx) = login(&mut server, "Bob");
        say(&mut server, alice, "/joinroom r");
        say(&mut server, bob, "/joinroom r");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let capacity = ChatLine::text_capacity("Alice");
        say(&mut server, alice, &"x".repeat(capacity + 1));
        assert_eq!(error_lines(&mut alice_rx), vec!["<12>Your message is too long."]);
        assert!(drain(&mut bob_rx).is_empty());

        say(&mut server, alice, &"x".repeat(capacity));
        let received = drain(&mut bob_rx);
        assert_eq!(received.len(), 1);
        let mut buf = crate::codec::FrameBuffer::new(crate::types::BUFFER_LENGTH);
        crate::message::Encode::encode(&received[0], &mut buf).unwrap();
        assert!(server.registry.user(bob).unwrap().is_open());
    }

    #[test]
    fn test_pm_bounded_by_both_names() {
        let (mut server, _) = test_server();
        let long_name = "b".repeat(crate::types::MAX_USERNAME_LEN);
        let (alice, mut alice_rx) = login(&mut server, "Al");
        let (_bob, mut bob_rx) = login(&mut server, &long_name);

        // The sender's copy carries the longer target name
        let capacity = ChatLine::text_capacity(&long_name);
        say(&mut server, alice, &format!("/pm {} {}", long_name, "x".repeat(capacity + 1)));
        assert_eq!(error_lines(&mut alice_rx), vec!["<12>Your message is too long."]);
        assert!(drain(&mut bob_rx).is_empty());
        assert!(server.registry.user(alice).unwrap().reply_to.is_none());

        say(&mut server, alice, &format!("/pm {} {}", long_name, "x".repeat(capacity)));
        assert_eq!(drain(&mut bob_rx).len(), 1);
        assert_eq!(drain(&mut alice_rx).len(), 1);
    }

    #[test]
    fn test_overlong_names_are_not_echoed() {
        let (mut server, _) = test_server();
        let (id, mut rx) = login(&mut server, "Alice");
        let name = "n".repeat(4000);
        say(&mut server, id, &format!("/pm {} hi", name));
        assert_eq!(error_lines(&mut rx), vec!["<12>Invalid username specified."]);
        say(&mut server, id, &format!("/removefriend {}", name));
        assert_eq!(error_lines(&mut rx), vec!["<12>Invalid username specified."]);

        let (late, mut late_rx) = connect(&mut server);
        handshake(&mut server, late);
        authenticate(&mut server, late, &name, "pw");
        assert_eq!(auth_result(&mut late_rx), Some(AuthResult::InvalidUsername));
    }

    #[test]
    fn test_color_commands() {
        let (mut server, store) = test_server();
        let (alice, mut rx) = login(&mut server, "Alice");

        say(&mut server, alice, "/settextcolor");
        assert_eq!(
            error_lines(&mut rx),
            vec![
                "<12>Invalid command arguments.",
                "<12>Try as /settextcolor [color number]",
                "<12>Type /colors for a list of available colors."
            ]
        );
        say(&mut server, alice, "/setnamecolor red");
        assert_eq!(
            error_lines(&mut rx),
            vec!["<12>Please type a proper integer for your desired color."]
        );

        say(&mut server, alice, "/settextcolor 3");
        say(&mut server, alice, "/setnamecolor 9");
        let record = store.get("alice").unwrap();
        assert_eq!((record.name_color, record.chat_color), (9, 3));
    }

    #[test]
    fn test_name_color_refreshes_member_list() {
        let (mut server, _) = test_server();
        let (alice, mut rx) = login(&mut server, "Alice");
        say(&mut server, alice, "/joinroom room");
        drain(&mut rx);
        say(&mut server, alice, "/setnamecolor 4");
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::MemberList {
                members: vec![crate::message::MemberEntry {
                    name_color: 4,
                    name: "Alice".into()
                }]
            }]
        );
    }

    #[test]
    fn test_colors_and_help() {
        let (mut server, _) = test_server();
        let (id, mut rx) = login(&mut server, "Alice");

        say(&mut server, id, "/colors");
        let lines = texts(&drain(&mut rx));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("<15><0>0 <1>1 "));
        assert!(lines[0].ends_with("<254>254 "));

        for alias in ["/help", "/h", "/?", "/commands"] {
            say(&mut server, id, alias);
            let lines = texts(&drain(&mut rx));
            assert_eq!(lines.len(), 10);
            assert_eq!(lines[0], "<15>/joinroom [room name]");
        }
    }
}
