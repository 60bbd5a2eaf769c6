//! Nonvolatile storage seam.
//!
//! The core persists exactly two records: the device-identity record and the
//! saved dial-slot metadata. Both live under a single namespace; the file
//! backend keeps them in one TOML document and updates it atomically via a
//! temp file and rename.

use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::dial::SlotConfig;
use crate::error::{Error, Result};
use crate::identity::IdentityRecord;

/// Saved metadata for one dial position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSlot {
    pub position: usize,
    pub config: SlotConfig,
}

/// Everything the engine persists. Runtime state is never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistState {
    /// Device identity, written once at first boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityRecord>,

    /// Saved slot metadata, keyed by dial position.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<SavedSlot>,
}

impl PersistState {
    /// The saved config for a position, if any.
    pub fn slot(&self, position: usize) -> Option<&SlotConfig> {
        self.slots
            .iter()
            .find(|s| s.position == position)
            .map(|s| &s.config)
    }

    /// Replace the saved config for a position.
    pub fn set_slot(&mut self, position: usize, config: Option<SlotConfig>) {
        self.slots.retain(|s| s.position != position);
        if let Some(config) = config {
            self.slots.push(SavedSlot { position, config });
        }
    }
}

/// Storage provider contract. Atomic update discipline is the provider's
/// responsibility.
pub trait Storage: Send + Sync {
    fn load(&self) -> Result<PersistState>;
    fn save(&self, state: &PersistState) -> Result<()>;
}

/// Volatile store for tests and simulators.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<PersistState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStore {
    fn load(&self) -> Result<PersistState> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &PersistState) -> Result<()> {
        *self.state.lock() = state.clone();
        Ok(())
    }
}

/// TOML file store with atomic replace.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Storage for FileStore {
    fn load(&self) -> Result<PersistState> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => toml::from_str(&content)
                .map_err(|e| Error::Storage(format!("corrupt state file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistState::default()),
            Err(e) => Err(Error::Storage(format!("read failed: {e}"))),
        }
    }

    fn save(&self, state: &PersistState) -> Result<()> {
        let content = toml::to_string_pretty(state)
            .map_err(|e| Error::Storage(format!("serialize failed: {e}")))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content).map_err(|e| Error::Storage(format!("write failed: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Storage(format!("rename failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionKind;

    fn sample_config(code: &str) -> SlotConfig {
        SlotConfig {
            kind: ConnectionKind::Frequency,
            code: code.into(),
            name: "team".into(),
            password: Some("pw".into()),
        }
    }

    #[test]
    fn test_memory_roundtrip() {
        let store = MemoryStore::new();
        let mut state = store.load().unwrap();
        assert!(state.identity.is_none());

        state.set_slot(1, Some(sample_config("12345678")));
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.slot(1).unwrap().code, "12345678");
        assert!(loaded.slot(0).is_none());
    }

    #[test]
    fn test_set_slot_replaces_and_clears() {
        let mut state = PersistState::default();
        state.set_slot(3, Some(sample_config("11111111")));
        state.set_slot(3, Some(sample_config("22222222")));
        assert_eq!(state.slots.len(), 1);
        assert_eq!(state.slot(3).unwrap().code, "22222222");

        state.set_slot(3, None);
        assert!(state.slot(3).is_none());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("wavetalk-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = FileStore::new(dir.join("state.toml"));

        // Missing file reads as empty state.
        assert!(store.load().unwrap().identity.is_none());

        let mut state = PersistState::default();
        let mut config = sample_config("87654321");
        config.kind = ConnectionKind::Device;
        config.password = None;
        state.set_slot(0, Some(config));
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.slot(0).unwrap().name, "team");
        assert_eq!(loaded.slot(0).unwrap().password, None);

        std::fs::remove_dir_all(&dir).ok();
    }
}
