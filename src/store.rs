//! Persisted user records
//!
//! The server only needs load/save semantics, so storage sits behind the
//! `UserStore` trait. `JsonFileStore` keeps one JSON file per lowercase
//! username; `MemoryStore` backs tests.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::types::{color, MAX_FRIENDS};

/// Current on-disk record version
pub const RECORD_VERSION: u32 = 2;

/// A user's persistent profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub version: u32,
    pub display_name: String,
    pub name_color: u16,
    pub chat_color: u16,
    pub password: String,
    /// Friend display names, at most `MAX_FRIENDS`
    pub friends: Vec<String>,
}

impl UserRecord {
    /// Fresh record for a first login
    pub fn new(display_name: &str, password: &str) -> Self {
        Self {
            version: RECORD_VERSION,
            display_name: display_name.to_string(),
            name_color: color::DEFAULT,
            chat_color: color::DEFAULT_CHAT,
            password: password.to_string(),
            friends: Vec::new(),
        }
    }

    pub fn key(&self) -> String {
        self.display_name.to_lowercase()
    }
}

/// Result of looking a user up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Success(UserRecord),
    NewUser,
    Failure,
}

/// Storage for user records
pub trait UserStore: Send + Sync {
    /// Look up a record by case-insensitive name
    fn load(&self, name: &str) -> LoadOutcome;

    /// Persist a record; failures are logged, never returned
    fn save(&self, record: &UserRecord);

    /// Registered display name for `name`, if any
    fn proper_name(&self, name: &str) -> Option<String> {
        match self.load(name) {
            LoadOutcome::Success(record) => Some(record.display_name),
            _ => None,
        }
    }
}

/// One `<lowercase name>.json` file per user
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name.to_lowercase()))
    }

    fn read(&self, name: &str) -> Result<Option<UserRecord>, StoreError> {
        let contents = match fs::read_to_string(self.path_for(name)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: UserRecord = serde_json::from_str(&contents)?;
        if record.version != RECORD_VERSION {
            return Err(StoreError::UnsupportedVersion(record.version));
        }
        Ok(Some(record))
    }

    fn write(&self, record: &UserRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(record)?;
        fs::write(self.path_for(&record.display_name), json)?;
        Ok(())
    }
}

impl UserStore for JsonFileStore {
    fn load(&self, name: &str) -> LoadOutcome {
        if name.is_empty() {
            return LoadOutcome::Failure;
        }
        match self.read(name) {
            Ok(Some(record)) => LoadOutcome::Success(record),
            Ok(None) => LoadOutcome::NewUser,
            Err(e) => {
                warn!("Failure loading {}'s user file: {}", name, e);
                LoadOutcome::Failure
            }
        }
    }

    fn save(&self, record: &UserRecord) {
        if record.display_name.is_empty() {
            return;
        }
        match self.write(record) {
            Ok(()) => debug!("Saved user file for {}", record.display_name),
            Err(e) => error!("Failed to save {}'s user file: {}", record.display_name, e),
        }
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a record
    pub fn insert(&self, record: UserRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(record.key(), record);
        }
    }

    pub fn get(&self, name: &str) -> Option<UserRecord> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(&name.to_lowercase()).cloned())
    }
}

impl UserStore for MemoryStore {
    fn load(&self, name: &str) -> LoadOutcome {
        if name.is_empty() {
            return LoadOutcome::Failure;
        }
        match self.records.lock() {
            Ok(records) => match records.get(&name.to_lowercase()) {
                Some(record) => LoadOutcome::Success(record.clone()),
                None => LoadOutcome::NewUser,
            },
            Err(_) => LoadOutcome::Failure,
        }
    }

    fn save(&self, record: &UserRecord) {
        if record.display_name.is_empty() {
            return;
        }
        self.insert(record.clone());
    }
}

/// Trim a friend name list to what a record may hold
pub fn clamp_friends(mut names: Vec<String>) -> Vec<String> {
    names.retain(|n| !n.is_empty());
    names.truncate(MAX_FRIENDS);
    names
}
