//! Durable save slots.
//!
//! - `storage` - The key-value adapter contract and two adapters
//! - `migration` - Schema versions and upgrade steps
//!
//! A [`SaveStore`] writes one snapshot and its [`SaveMetadata`] record under
//! two separate keys. It knows nothing about validation; the engine validates
//! before it writes and after it reads.

pub mod migration;
pub mod storage;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::state::{GameState, SaveKind, SnapshotError};

pub use migration::{migrate, needs_migration, schema_version_of, MigrationError, LEGACY_SCHEMA_VERSION};
pub use storage::{FileStorage, MemoryStorage, StorageAdapter, StorageError};

/// Errors from saving or loading. Never fatal to the live session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("no saved game")]
    NoSave,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("saved state is invalid: {0}")]
    InvalidState(String),

    #[error("save metadata is unreadable: {0}")]
    Metadata(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Record stored alongside each snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    pub save_time: DateTime<Utc>,
    pub kind: SaveKind,
    pub byte_size: u64,
    pub schema_version: String,
}

impl fmt::Display for SaveMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} save at {} ({} bytes, schema {})",
            self.kind,
            self.save_time.to_rfc3339(),
            self.byte_size,
            self.schema_version
        )
    }
}

/// A snapshot read back from storage, already migrated.
#[derive(Debug, Clone)]
pub struct LoadedSave {
    pub state: GameState,
    /// Present when the metadata record exists and parses.
    pub metadata: Option<SaveMetadata>,
    /// Schema version found in storage before migration.
    pub stored_version: String,
}

impl LoadedSave {
    pub fn was_migrated(&self) -> bool {
        self.stored_version != self.state.session_data.schema_version
    }
}

/// One save slot: a snapshot key and a metadata key on a shared adapter.
#[derive(Clone)]
pub struct SaveStore {
    storage: Arc<dyn StorageAdapter>,
    key: String,
    metadata_key: String,
}

impl fmt::Debug for SaveStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveStore")
            .field("key", &self.key)
            .field("metadata_key", &self.metadata_key)
            .finish()
    }
}

impl SaveStore {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        key: impl Into<String>,
        metadata_key: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            key: key.into(),
            metadata_key: metadata_key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn exists(&self) -> bool {
        self.storage.contains(&self.key)
    }

    /// Serialize `state` and write it with a fresh metadata record.
    pub fn write(&self, state: &GameState, kind: SaveKind, now: DateTime<Utc>) -> Result<SaveMetadata> {
        let snapshot = state.to_snapshot()?;
        let metadata = SaveMetadata {
            save_time: now,
            kind,
            byte_size: snapshot.len() as u64,
            schema_version: state.session_data.schema_version.clone(),
        };
        let record = serde_json::to_string(&metadata)
            .map_err(|e| PersistenceError::Metadata(e.to_string()))?;

        self.storage.set(&self.key, &snapshot)?;
        self.storage.set(&self.metadata_key, &record)?;

        info!(key = %self.key, %kind, bytes = metadata.byte_size, "game saved");
        Ok(metadata)
    }

    /// Read, decode, and migrate the stored snapshot.
    pub fn read(&self) -> Result<LoadedSave> {
        let text = self.storage.get(&self.key)?.ok_or(PersistenceError::NoSave)?;
        let mut value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            SnapshotError::Malformed {
                line: e.line(),
                column: e.column(),
                message: e.to_string(),
            }
        })?;

        let stored_version = migrate(&mut value)?;
        let state = GameState::from_value(value)?;
        let metadata = self.metadata().unwrap_or_else(|err| {
            debug!(error = %err, "ignoring unreadable save metadata");
            None
        });

        debug!(key = %self.key, version = %stored_version, "save read");
        Ok(LoadedSave {
            state,
            metadata,
            stored_version,
        })
    }

    pub fn metadata(&self) -> Result<Option<SaveMetadata>> {
        let Some(text) = self.storage.get(&self.metadata_key)? else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PersistenceError::Metadata(e.to_string()))
    }

    /// Remove the snapshot and its metadata.
    pub fn delete(&self) -> Result<()> {
        self.storage.remove(&self.key)?;
        self.storage.remove(&self.metadata_key)?;
        info!(key = %self.key, "save deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn store() -> (Arc<MemoryStorage>, SaveStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = SaveStore::new(storage.clone(), "slot", "slot.meta");
        (storage, store)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let (_, store) = store();
        let mut state = GameState::new();
        state.discovered_entities.insert("vega".to_string());
        state.statistics.entities_discovered = 1;

        let meta = store.write(&state, SaveKind::Manual, at(1_700_000_000)).unwrap();
        assert_eq!(meta.kind, SaveKind::Manual);
        assert_eq!(meta.byte_size as usize, state.to_snapshot().unwrap().len());
        assert!(store.exists());

        let loaded = store.read().unwrap();
        assert!(loaded.state.durable_eq(&state));
        assert_eq!(loaded.metadata, Some(meta));
        assert!(!loaded.was_migrated());
    }

    #[test]
    fn test_metadata_wire_format() {
        let meta = SaveMetadata {
            save_time: at(0),
            kind: SaveKind::Checkpoint,
            byte_size: 42,
            schema_version: "2.0.0".to_string(),
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["kind"], "checkpoint");
        assert_eq!(value["byteSize"], 42);
        assert_eq!(value["schemaVersion"], "2.0.0");
        assert!(value["saveTime"].is_string());
    }

    #[test]
    fn test_read_without_save() {
        let (_, store) = store();
        assert_eq!(store.read().unwrap_err(), PersistenceError::NoSave);
        assert_eq!(store.metadata().unwrap(), None);
    }

    #[test]
    fn test_read_corrupt_snapshot() {
        let (storage, store) = store();
        storage.set("slot", "{not json").unwrap();
        assert!(matches!(
            store.read(),
            Err(PersistenceError::Snapshot(SnapshotError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_read_migrates_legacy() {
        let (storage, store) = store();
        storage
            .set("slot", r#"{"discoveredStars":["vega"],"statistics":{"starsDiscovered":1}}"#)
            .unwrap();
        let loaded = store.read().unwrap();
        assert_eq!(loaded.stored_version, "1.0.0");
        assert!(loaded.was_migrated());
        assert!(loaded.state.has_discovered("vega"));
        assert_eq!(loaded.metadata, None);
    }

    #[test]
    fn test_unreadable_metadata_does_not_block_load() {
        let (storage, store) = store();
        store.write(&GameState::new(), SaveKind::Auto, at(5)).unwrap();
        storage.set("slot.meta", "garbage").unwrap();
        assert!(store.metadata().is_err());
        assert!(store.read().unwrap().metadata.is_none());
    }

    #[test]
    fn test_delete() {
        let (storage, store) = store();
        store.write(&GameState::new(), SaveKind::Auto, at(5)).unwrap();
        store.delete().unwrap();
        assert!(!store.exists());
        assert!(storage.is_empty());
    }
}
