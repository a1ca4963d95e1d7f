//! Bounded server-wide tables
//!
//! `SlotTable` is a fixed-capacity slot array: inserts take the first free
//! slot found by linear scan and freed slots are reused. `Registry` holds the
//! live users and rooms and resolves ids at use time, so a departed user or
//! destroyed room simply stops resolving.

use crate::room::Room;
use crate::types::{RoomId, UserId, MAX_ROOMS, MAX_USERS};
use crate::user::User;

/// Fixed-capacity table with slot reuse
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Vec<Option<T>>,
    len: usize,
}

impl<T> SlotTable<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Store `value` in the first free slot; hands it back when full
    pub fn insert(&mut self, value: T) -> Result<usize, T> {
        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(value);
                self.len += 1;
                Ok(slot)
            }
            None => Err(value),
        }
    }

    pub fn remove(&mut self, slot: usize) -> Option<T> {
        let value = self.slots.get_mut(slot)?.take();
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Slot of the first occupant matching `pred`
    pub fn position(&self, mut pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(&mut pred))
    }

    pub fn find(&self, pred: impl FnMut(&T) -> bool) -> Option<&T> {
        self.position(pred).and_then(|slot| self.get(slot))
    }

    pub fn find_mut(&mut self, pred: impl FnMut(&T) -> bool) -> Option<&mut T> {
        let slot = self.position(pred)?;
        self.get_mut(slot)
    }

    /// Remove the first occupant matching `pred`
    pub fn remove_where(&mut self, pred: impl FnMut(&T) -> bool) -> Option<T> {
        let slot = self.position(pred)?;
        self.remove(slot)
    }

    /// Occupants in slot order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten()
    }

    /// Empty the table, yielding occupants in slot order
    pub fn drain(&mut self) -> Vec<T> {
        self.len = 0;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

/// The server's bounded tables of live users and rooms
#[derive(Debug)]
pub struct Registry {
    users: SlotTable<User>,
    rooms: SlotTable<Room>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_USERS, MAX_ROOMS)
    }

    pub fn with_capacity(max_users: usize, max_rooms: usize) -> Self {
        Self {
            users: SlotTable::with_capacity(max_users),
            rooms: SlotTable::with_capacity(max_rooms),
        }
    }

    /// Register a freshly accepted connection; hands the user back when full
    pub fn add_user(&mut self, user: User) -> Result<(), User> {
        self.users.insert(user).map(|_| ())
    }

    pub fn remove_user(&mut self, id: UserId) -> Option<User> {
        self.users.remove_where(|u| u.id == id)
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.find(|u| u.id == id)
    }

    pub fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.find_mut(|u| u.id == id)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Authenticated user with this name, compared case-insensitively
    pub fn find_online(&self, name: &str) -> Option<&User> {
        if name.is_empty() {
            return None;
        }
        let lowercase = name.to_lowercase();
        self.users
            .find(|u| u.is_authenticated() && u.display_name_lowercase() == lowercase)
    }

    /// Whether `id` resolves to a user whose connection is still open
    pub fn is_online(&self, id: Option<UserId>) -> bool {
        id.and_then(|id| self.user(id)).is_some_and(User::is_open)
    }

    /// Create a room owned by `owner`; `None` when the room table is full
    pub fn create_room(&mut self, name: &str, owner: UserId) -> Option<RoomId> {
        let room = Room::new(name, owner);
        let id = room.id;
        self.rooms.insert(room).ok().map(|_| id)
    }

    pub fn remove_room(&mut self, id: RoomId) -> Option<Room> {
        self.rooms.remove_where(|r| r.id == id)
    }

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.find(|r| r.id == id)
    }

    pub fn room_mut(&mut self, id: RoomId) -> Option<&mut Room> {
        self.rooms.find_mut(|r| r.id == id)
    }

    /// Room with exactly this name
    pub fn room_by_name(&self, name: &str) -> Option<RoomId> {
        self.rooms.find(|r| r.name == name).map(|r| r.id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Room names in slot order
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.iter().map(|r| r.name.clone()).collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
