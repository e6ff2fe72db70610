//! Durable session persistence.
//!
//! The session is two keys in a small key/value [`Storage`]: the raw token and
//! the JSON-serialized profile. [`SessionStore`] keeps them paired: readers see
//! both or neither.

use crate::profile::UserProfile;
use anyhow::{Context as _, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";

/// Minimal key/value persistence
pub trait Storage {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    /// Removing a missing key is not an error
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// One file per key under a directory. Writes go through a temp file and a rename.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match std::fs::read_to_string(self.key_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(".{}.tmp", key));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, self.key_path(key))
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Process-local storage, used by tests and `--ephemeral` runs
#[derive(Default)]
pub struct MemoryStorage {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Paired token/profile persistence. Cheap to clone; clones share the storage.
#[derive(Clone)]
pub struct SessionStore {
    storage: Rc<dyn Storage>,
}

impl SessionStore {
    pub fn new(storage: Rc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn in_memory() -> Self {
        Self::new(Rc::new(MemoryStorage::new()))
    }

    /// Persist both halves of a session.
    ///
    /// The profile goes first and the token last, so a reader never finds a
    /// new token next to an old profile. If the token write fails the profile
    /// is removed again.
    pub fn write(&self, token: &str, profile: &UserProfile) -> Result<()> {
        let serialized = serde_json::to_string(profile)?;
        // Drop any previous token first so the old pair can't be read half-replaced
        self.storage
            .remove(TOKEN_KEY)
            .context("failed to replace stored token")?;
        self.storage
            .set(USER_KEY, &serialized)
            .context("failed to store user profile")?;
        if let Err(e) = self.storage.set(TOKEN_KEY, token) {
            self.storage.remove(USER_KEY).ok();
            return Err(anyhow::Error::new(e).context("failed to store token"));
        }
        Ok(())
    }

    /// Both halves of the session, or `None` if either is missing or unreadable.
    pub fn read(&self) -> Option<(String, UserProfile)> {
        let token = self.storage.get(TOKEN_KEY).ok().flatten()?;
        let user = self.storage.get(USER_KEY).ok().flatten()?;
        if token.trim().is_empty() {
            return None;
        }
        let profile = serde_json::from_str(&user).ok()?;
        Some((token, profile))
    }

    /// The stored token, read fresh on every call
    pub fn token(&self) -> Option<String> {
        self.read().map(|(token, _)| token)
    }

    /// Remove every session key. Safe to call when nothing is stored.
    pub fn clear(&self) -> Result<()> {
        let token = self.storage.remove(TOKEN_KEY);
        let user = self.storage.remove(USER_KEY);
        token.context("failed to remove stored token")?;
        user.context("failed to remove stored user profile")?;
        Ok(())
    }
}
