//! Persisted user preferences
//!
//! Four values survive restarts: whether to resume at boot, whether the
//! process is meant to be running, the command string, and whether output is
//! logged. Missing or unreadable values fall back to defaults, so loading
//! never fails.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Keys under which the desired state is stored
pub mod keys {
    /// Resume at boot (bool)
    pub const AUTO_START: &str = "autoStart";
    /// Process intended to be running (bool)
    pub const RUNNING: &str = "running";
    /// Command string (string)
    pub const CMD_STR: &str = "cmdStr";
    /// Append process output to the log (bool)
    pub const LOG_OUTPUT_ENABLED: &str = "logOutputEnabled";
}

/// Key-value storage for preferences
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value
    async fn put(&self, key: &str, value: Value) -> Result<()>;
}

/// What the user wants the host to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    /// Resume the process when the device boots
    pub auto_start: bool,
    /// The process should be running
    pub running: bool,
    /// Command string, also the process identity
    pub cmd_str: String,
    /// Whether output is appended to the log
    pub log_output_enabled: bool,
}

impl Default for DesiredState {
    fn default() -> Self {
        Self {
            auto_start: false,
            running: false,
            cmd_str: String::new(),
            log_output_enabled: true,
        }
    }
}

impl DesiredState {
    /// Load the state, substituting defaults for missing or corrupt values
    pub async fn load(store: &dyn PreferenceStore) -> Self {
        let defaults = Self::default();
        Self {
            auto_start: load_bool(store, keys::AUTO_START, defaults.auto_start).await,
            running: load_bool(store, keys::RUNNING, defaults.running).await,
            cmd_str: load_string(store, keys::CMD_STR, defaults.cmd_str).await,
            log_output_enabled: load_bool(store, keys::LOG_OUTPUT_ENABLED, defaults.log_output_enabled)
                .await,
        }
    }

    /// Write every value
    pub async fn save(&self, store: &dyn PreferenceStore) -> Result<()> {
        store.put(keys::AUTO_START, Value::Bool(self.auto_start)).await?;
        store.put(keys::RUNNING, Value::Bool(self.running)).await?;
        store.put(keys::CMD_STR, Value::String(self.cmd_str.clone())).await?;
        store
            .put(keys::LOG_OUTPUT_ENABLED, Value::Bool(self.log_output_enabled))
            .await?;
        Ok(())
    }

    /// Whether a boot event should resume the process
    pub fn should_resume_on_boot(&self) -> bool {
        self.auto_start && self.should_resume()
    }

    /// Whether the host should start the process when it comes up
    pub fn should_resume(&self) -> bool {
        self.running && !self.cmd_str.is_empty()
    }
}

async fn load_value(store: &dyn PreferenceStore, key: &str) -> Option<Value> {
    match store.get(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "Unreadable preference, using default");
            None
        }
    }
}

async fn load_bool(store: &dyn PreferenceStore, key: &str, default: bool) -> bool {
    match load_value(store, key).await {
        None => default,
        Some(Value::Bool(value)) => value,
        Some(other) => {
            warn!(key, value = %other, "Preference is not a boolean, using default");
            default
        }
    }
}

async fn load_string(store: &dyn PreferenceStore, key: &str, default: String) -> String {
    match load_value(store, key).await {
        None => default,
        Some(Value::String(value)) => value,
        Some(other) => {
            warn!(key, value = %other, "Preference is not a string, using default");
            default
        }
    }
}

/// In-memory preference store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::store("preference map lock poisoned")
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.read().map_err(poisoned)?;
        Ok(values.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.write().map_err(poisoned)?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Sled-backed preference store, values encoded as JSON
pub struct SledStore {
    db: sled::Db,
    preferences: sled::Tree,
}

impl SledStore {
    /// Open or create a store at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening preference database at {:?}", path);
        let db = sled::open(path)?;
        let preferences = db.open_tree("preferences")?;

        Ok(Self { db, preferences })
    }

    /// Create a temporary store removed on drop
    #[cfg(test)]
    pub(crate) async fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let preferences = db.open_tree("preferences")?;
        Ok(Self { db, preferences })
    }

    /// Write raw bytes under `key`, bypassing encoding
    #[cfg(test)]
    pub(crate) async fn put_raw(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.preferences.insert(key.as_bytes(), bytes)?;
        self.preferences.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        debug!(key, "Reading preference");
        match self.preferences.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        debug!(key, %value, "Writing preference");
        let bytes = serde_json::to_vec(&value)?;
        self.preferences.insert(key.as_bytes(), bytes)?;
        self.preferences.flush_async().await?;
        Ok(())
    }
}

impl Drop for SledStore {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("Failed to flush preference database on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("entries", &self.preferences.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_missing_keys_load_defaults() {
        let store = MemoryStore::new();
        let state = DesiredState::load(&store).await;

        assert_eq!(state, DesiredState::default());
        assert!(state.log_output_enabled);
        assert!(!state.should_resume());
    }

    #[smol_potat::test]
    async fn test_wrong_types_fall_back_to_defaults() {
        let store = MemoryStore::new();
        store.put(keys::RUNNING, Value::String("yes".into())).await.unwrap();
        store.put(keys::CMD_STR, Value::Bool(true)).await.unwrap();
        store.put(keys::AUTO_START, Value::Bool(true)).await.unwrap();

        let state = DesiredState::load(&store).await;

        assert!(state.auto_start);
        assert!(!state.running);
        assert_eq!(state.cmd_str, "");
    }

    #[smol_potat::test]
    async fn test_sled_store_corrupt_bytes_fall_back() {
        let store = SledStore::temporary().await.unwrap();
        store.put_raw(keys::LOG_OUTPUT_ENABLED, b"\xff not json").await.unwrap();

        assert!(store.get(keys::LOG_OUTPUT_ENABLED).await.is_err());
        assert!(DesiredState::load(&store).await.log_output_enabled);
    }

    #[smol_potat::test]
    async fn test_sled_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs");
        let state = DesiredState {
            auto_start: true,
            running: true,
            cmd_str: "-server=a:1 -vkey=k".to_string(),
            log_output_enabled: false,
        };

        {
            let store = SledStore::open(&path).await.unwrap();
            state.save(&store).await.unwrap();
        }

        let store = SledStore::open(&path).await.unwrap();
        assert_eq!(DesiredState::load(&store).await, state);
        assert!(state.should_resume_on_boot());
    }

    #[test]
    fn test_boot_requires_all_three_conditions() {
        let full = DesiredState {
            auto_start: true,
            running: true,
            cmd_str: "-a".to_string(),
            log_output_enabled: true,
        };
        assert!(full.should_resume_on_boot());

        let mut no_auto = full.clone();
        no_auto.auto_start = false;
        assert!(!no_auto.should_resume_on_boot());
        assert!(no_auto.should_resume());

        let mut not_running = full.clone();
        not_running.running = false;
        assert!(!not_running.should_resume_on_boot());

        let mut no_cmd = full;
        no_cmd.cmd_str.clear();
        assert!(!no_cmd.should_resume_on_boot());
    }
}
