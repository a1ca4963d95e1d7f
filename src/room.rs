//! Room struct definition
//!
//! A named chat group with an owner and up to `MAX_ROOM_USERS` members.
//! Members are stored as user ids; the owner leaving, or the last member
//! leaving, destroys the room.

use crate::error::ValidationError;
use crate::registry::SlotTable;
use crate::types::{RoomId, UserId, MAX_ROOM_USERS};

/// What the room needs after a member left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Room survives; refresh member and room lists
    Remains,
    /// Owner left or room is empty; destroy it
    Destroy,
}

/// Multi-user chat room
#[derive(Debug)]
pub struct Room {
    /// Key used by users' back-references
    pub id: RoomId,
    /// Room name, matched exactly
    pub name: String,
    /// Room creator
    pub owner: UserId,
    members: SlotTable<UserId>,
}

impl Room {
    /// Create an empty room; the owner still has to join
    pub fn new(name: &str, owner: UserId) -> Self {
        Self::with_capacity(name, owner, MAX_ROOM_USERS)
    }

    pub fn with_capacity(name: &str, owner: UserId, capacity: usize) -> Self {
        Self {
            id: RoomId::new(),
            name: name.to_string(),
            owner,
            members: SlotTable::with_capacity(capacity),
        }
    }

    pub fn is_full(&self) -> bool {
        self.members.is_full()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.members.position(|m| *m == user).is_some()
    }

    /// Members in slot order
    pub fn members(&self) -> impl Iterator<Item = UserId> + '_ {
        self.members.iter().copied()
    }

    /// Add a member
    ///
    /// Joining twice is a no-op; a full room rejects the join.
    pub fn join(&mut self, user: UserId) -> Result<(), ValidationError> {
        if self.contains(user) {
            return Ok(());
        }
        self.members
            .insert(user)
            .map(|_| ())
            .map_err(|_| ValidationError::RoomFull)
    }

    /// Remove a member and report whether the room must be destroyed
    pub fn leave(&mut self, user: UserId) -> LeaveOutcome {
        self.members.remove_where(|m| *m == user);
        if user == self.owner || self.members.is_empty() {
            LeaveOutcome::Destroy
        } else {
            LeaveOutcome::Remains
        }
    }

    /// Force every remaining member out, returning who was removed
    pub fn ensure_empty(&mut self) -> Vec<UserId> {
        self.members.drain()
    }
}
