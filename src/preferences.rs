//! Persisted user preferences
//!
//! A small key/value store for settings that outlive a session. The hands-free
//! flag is the only piece of session state written here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::{Error, Result};

/// Whether hands-free mode was left on
pub const HANDS_FREE_ENABLED: &str = "handsFreeEnabled";

/// Input device chosen by the user
pub const PREFERRED_MICROPHONE: &str = "preferredMicrophoneDeviceId";

/// Key/value preference storage
pub trait PreferenceStore: Send + Sync {
    /// Read a value
    ///
    /// # Errors
    ///
    /// Returns [`Error::Preferences`] if the backing store cannot be read
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value
    ///
    /// # Errors
    ///
    /// Returns [`Error::Preferences`] if the backing store cannot be written
    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a value
    ///
    /// # Errors
    ///
    /// Returns [`Error::Preferences`] if the backing store cannot be written
    fn remove(&self, key: &str) -> Result<()>;

    /// Persisted hands-free flag, `false` when never set
    ///
    /// # Errors
    ///
    /// Returns [`Error::Preferences`] if the store cannot be read
    fn hands_free_enabled(&self) -> Result<bool> {
        Ok(self
            .get(HANDS_FREE_ENABLED)?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// # Errors
    ///
    /// Returns [`Error::Preferences`] if the store cannot be written
    fn set_hands_free_enabled(&self, enabled: bool) -> Result<()> {
        self.set(HANDS_FREE_ENABLED, Value::Bool(enabled))
    }

    /// # Errors
    ///
    /// Returns [`Error::Preferences`] if the store cannot be read
    fn preferred_microphone(&self) -> Result<Option<String>> {
        Ok(self
            .get(PREFERRED_MICROPHONE)?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    /// Store the preferred input device, or clear it with `None`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Preferences`] if the store cannot be written
    fn set_preferred_microphone(&self, device: Option<&str>) -> Result<()> {
        match device {
            Some(name) => self.set(PREFERRED_MICROPHONE, Value::String(name.to_string())),
            None => self.remove(PREFERRED_MICROPHONE),
        }
    }
}

/// In-memory store, for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryPreferenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// JSON file store
///
/// The whole file is held in memory and rewritten on every change through a
/// temporary file, so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct JsonPreferenceStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonPreferenceStore {
    /// Open the store at `path`, creating parent directories as needed
    ///
    /// A missing file starts empty. An unreadable or corrupt file is logged
    /// and replaced on the next write.
    ///
    /// # Errors
    ///
    /// Returns error if the parent directory cannot be created
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let values = if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|content| serde_json::from_str(&content).map_err(Error::from))
            {
                Ok(values) => {
                    tracing::debug!(path = %path.display(), "loaded preferences");
                    values
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load preferences, starting empty"
                    );
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        let content = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                Error::Preferences(format!("failed to write {}: {e}", self.path.display()))
            })
    }

    fn update(&self, change: impl FnOnce(&mut BTreeMap<String, Value>)) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = values.clone();
        change(&mut next);
        self.write(&next)?;
        *values = next;
        Ok(())
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}
