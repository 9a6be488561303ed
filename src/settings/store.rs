//! Where sound preferences are persisted.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::SoundPreferences;

/// Errors from loading, saving or validating preferences.
#[derive(Debug)]
pub enum SettingsError {
    /// Reading or writing the backing file failed.
    Io(io::Error),
    /// The stored document is not valid preferences JSON.
    Format(serde_json::Error),
    /// A volume that is not a number was supplied.
    InvalidVolume(f32),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "settings storage failed: {}", e),
            Self::Format(e) => write!(f, "settings document is malformed: {}", e),
            Self::InvalidVolume(v) => write!(f, "invalid volume {}", v),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Format(e) => Some(e),
            Self::InvalidVolume(_) => None,
        }
    }
}

impl From<io::Error> for SettingsError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e)
    }
}

/// Backing storage for [`SoundSettings`](super::SoundSettings).
pub trait SettingsStore: Send + Sync {
    /// Stored preferences, or `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<SoundPreferences>, SettingsError>;

    /// Persist `preferences`, replacing what was stored.
    fn save(&self, preferences: &SoundPreferences) -> Result<(), SettingsError>;
}

impl<S: SettingsStore + ?Sized> SettingsStore for Arc<S> {
    fn load(&self) -> Result<Option<SoundPreferences>, SettingsError> {
        (**self).load()
    }

    fn save(&self, preferences: &SoundPreferences) -> Result<(), SettingsError> {
        (**self).save(preferences)
    }
}

/// Keeps preferences in memory. Useful as a fake in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<SoundPreferences>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `preferences`.
    pub fn with(preferences: SoundPreferences) -> Self {
        Self {
            saved: Mutex::new(Some(preferences)),
        }
    }

    /// What was last saved.
    pub fn saved(&self) -> Option<SoundPreferences> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Option<SoundPreferences>, SettingsError> {
        Ok(self.saved())
    }

    fn save(&self, preferences: &SoundPreferences) -> Result<(), SettingsError> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(*preferences);
        Ok(())
    }
}

/// Stores preferences as a JSON document on disk.
///
/// A missing file loads as "nothing saved". Parent directories are created on
/// first save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Use the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<Option<SoundPreferences>, SettingsError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, preferences: &SoundPreferences) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(preferences)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}
