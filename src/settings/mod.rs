//! Sound preferences for notification cues.
//!
//! [`SoundSettings`] is an ordinary value built from a [`SettingsStore`] and
//! handed to whatever needs it. There is no process-wide instance, so tests
//! can pass a [`MemoryStore`] (or any fake) without touching shared state.
//!
//! ```rust
//! use ezclear_core::settings::{MemoryStore, SoundCue, SoundSettings};
//!
//! let settings = SoundSettings::load(MemoryStore::new());
//! assert_eq!(settings.volume_for(SoundCue::Message), Some(0.5));
//!
//! settings.set_enabled(false).unwrap();
//! assert_eq!(settings.volume_for(SoundCue::Message), None);
//! ```

mod store;

use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

pub use store::{JsonFileStore, MemoryStore, SettingsError, SettingsStore};

/// Persisted sound preferences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundPreferences {
    /// Whether cues play at all.
    pub enabled: bool,
    /// Playback volume, `0.0..=1.0`.
    pub volume: f32,
}

impl Default for SoundPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 0.5,
        }
    }
}

/// Events that can play a sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCue {
    /// A new chat message.
    Message,
    /// A generic notification.
    Notification,
    /// A new or updated job application.
    Application,
}

impl fmt::Display for SoundCue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Message => "message",
            Self::Notification => "notification",
            Self::Application => "application",
        };
        f.write_str(name)
    }
}

/// Sound preferences backed by a store.
///
/// Reads are served from memory. Every change is written through to the
/// store; if that fails the error is returned and the in-memory value stays
/// changed, so the session keeps the user's choice.
#[derive(Debug)]
pub struct SoundSettings<S> {
    store: S,
    current: RwLock<SoundPreferences>,
}

impl<S: SettingsStore> SoundSettings<S> {
    /// Load preferences from `store`, falling back to defaults if nothing is
    /// stored or the stored document cannot be read.
    pub fn load(store: S) -> Self {
        let current = match store.load() {
            Ok(Some(preferences)) => sanitize(preferences),
            Ok(None) => SoundPreferences::default(),
            Err(e) => {
                tracing::warn!(error = %e, "could not load sound preferences, using defaults");
                SoundPreferences::default()
            }
        };
        Self {
            store,
            current: RwLock::new(current),
        }
    }

    /// The current preferences.
    pub fn preferences(&self) -> SoundPreferences {
        *self.read()
    }

    /// Whether cues play at all.
    pub fn is_enabled(&self) -> bool {
        self.read().enabled
    }

    /// Current volume.
    pub fn volume(&self) -> f32 {
        self.read().volume
    }

    /// Turn cues on or off.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), SettingsError> {
        self.update(|prefs| prefs.enabled = enabled)
    }

    /// Flip the enabled flag and return the new value.
    pub fn toggle(&self) -> Result<bool, SettingsError> {
        let mut enabled = false;
        self.update(|prefs| {
            prefs.enabled = !prefs.enabled;
            enabled = prefs.enabled;
        })?;
        Ok(enabled)
    }

    /// Set the volume, clamped to `0.0..=1.0`. Returns the stored value.
    pub fn set_volume(&self, volume: f32) -> Result<f32, SettingsError> {
        if volume.is_nan() {
            return Err(SettingsError::InvalidVolume(volume));
        }
        let volume = volume.clamp(0.0, 1.0);
        self.update(|prefs| prefs.volume = volume)?;
        Ok(volume)
    }

    /// Volume to play `cue` at, or `None` if it should stay silent.
    pub fn volume_for(&self, cue: SoundCue) -> Option<f32> {
        let prefs = self.preferences();
        if !prefs.enabled || prefs.volume <= 0.0 {
            tracing::trace!(%cue, "sound suppressed");
            return None;
        }
        Some(prefs.volume)
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn update(&self, change: impl FnOnce(&mut SoundPreferences)) -> Result<(), SettingsError> {
        let snapshot = {
            let mut prefs = self.write();
            change(&mut prefs);
            *prefs
        };
        self.store.save(&snapshot).inspect_err(|e| {
            tracing::warn!(error = %e, "could not save sound preferences");
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, SoundPreferences> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SoundPreferences> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sanitize(mut preferences: SoundPreferences) -> SoundPreferences {
    if preferences.volume.is_nan() {
        preferences.volume = SoundPreferences::default().volume;
    }
    preferences.volume = preferences.volume.clamp(0.0, 1.0);
    preferences
}
