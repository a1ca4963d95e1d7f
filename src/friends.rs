//! Per-user friend lists
//!
//! A `Friend` remembers the id of the live user it last resolved to. The id
//! is only a lookup key: presence is always checked through the registry,
//! so a departed user reads as offline even before the entry is refreshed.

use crate::error::ValidationError;
use crate::message::FriendEntry;
use crate::registry::{Registry, SlotTable};
use crate::types::{UserId, MAX_FRIENDS};

/// One entry of a friend list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Friend {
    display_name: String,
    lowercase: String,
    /// Live user this friend last resolved to
    pub active_user: Option<UserId>,
}

impl Friend {
    pub fn new(display_name: &str, active_user: Option<UserId>) -> Self {
        Self {
            display_name: display_name.to_string(),
            lowercase: display_name.to_lowercase(),
            active_user,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn lowercase(&self) -> &str {
        &self.lowercase
    }

    /// Referenced user exists and their connection is open
    pub fn is_online(&self, registry: &Registry) -> bool {
        registry.is_online(self.active_user)
    }
}

/// Bounded friend list
#[derive(Debug)]
pub struct FriendList {
    slots: SlotTable<Friend>,
}

impl FriendList {
    pub fn new() -> Self {
        Self {
            slots: SlotTable::with_capacity(MAX_FRIENDS),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.is_full()
    }

    /// Case-insensitive membership check
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Friend> {
        let lowercase = name.to_lowercase();
        self.slots.find(|f| f.lowercase == lowercase)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Friend> {
        let lowercase = name.to_lowercase();
        self.slots.find_mut(|f| f.lowercase == lowercase)
    }

    /// Add a friend, rejecting duplicates and a full list
    pub fn add(&mut self, name: &str, active_user: Option<UserId>) -> Result<&Friend, ValidationError> {
        if self.contains(name) {
            return Err(ValidationError::AlreadyFriend(name.to_string()));
        }
        let slot = self
            .slots
            .insert(Friend::new(name, active_user))
            .map_err(|_| ValidationError::FriendsFull)?;
        self.slots.get(slot).ok_or(ValidationError::FriendsFull)
    }

    pub fn remove(&mut self, name: &str) -> Result<Friend, ValidationError> {
        let lowercase = name.to_lowercase();
        self.slots
            .remove_where(|f| f.lowercase == lowercase)
            .ok_or_else(|| ValidationError::NotFriend(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Friend> {
        self.slots.iter()
    }

    /// Display names, for persisting
    pub fn names(&self) -> Vec<String> {
        self.iter().map(|f| f.display_name.clone()).collect()
    }

    /// Wire rows with live presence
    pub fn entries(&self, registry: &Registry) -> Vec<FriendEntry> {
        self.iter()
            .map(|f| FriendEntry {
                name: f.display_name.clone(),
                online: f.is_online(registry),
            })
            .collect()
    }
}

impl Default for FriendList {
    fn default() -> Self {
        Self::new()
    }
}
