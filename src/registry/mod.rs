// SPDX-License-Identifier: Apache-2.0

//! Durable per-file read progress, shared across harvesters.
//!
//! The in-memory map lives behind a std mutex so per-line commits from
//! blocking harvester threads stay cheap; the committer task clones a
//! consistent snapshot under the same lock and writes it atomically.

pub mod committer;
pub mod schema;
pub mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::Result;
use crate::identity::FileIdentity;
use crate::registry::schema::{RegistryEntryV1, RegistrySnapshotV1};
use crate::registry::store::RegistryStore;

pub use committer::{CommitterConfig, RegistryCommitter};

/// Last-known state of one physical file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub identity: FileIdentity,
    pub path: PathBuf,
    /// Bytes successfully consumed and committed
    pub offset: u64,
    /// File size at last observation
    pub size: u64,
    /// Unix timestamp (seconds) of the last observation
    pub last_seen: u64,
    /// True once the file's harvester has permanently stopped
    pub finished: bool,
}

impl FileState {
    pub fn new(identity: FileIdentity, path: PathBuf, offset: u64, size: u64) -> Self {
        Self {
            identity,
            path,
            offset,
            size,
            last_seen: now_unix_secs(),
            finished: false,
        }
    }
}

/// Shared handle to the registry. Clones share the same map and store.
#[derive(Clone)]
pub struct Registry {
    store: Arc<RegistryStore>,
    states: Arc<StdMutex<HashMap<FileIdentity, FileState>>>,
}

impl Registry {
    /// Load the registry from its snapshot path. A missing snapshot is a
    /// normal first run; a corrupted or version-mismatched one is logged and
    /// replaced with an empty mapping rather than aborting startup (it will
    /// be overwritten at the next checkpoint).
    pub fn load(path: impl Into<PathBuf>) -> Registry {
        let store = RegistryStore::new(path);

        let states = match store.load() {
            Ok(snapshot) => {
                if !snapshot.files.is_empty() {
                    debug!(states = snapshot.files.len(), "Loaded registry snapshot");
                }
                snapshot
                    .files
                    .into_values()
                    .map(|entry| {
                        let state = FileState::from(entry);
                        (state.identity, state)
                    })
                    .collect()
            }
            Err(e) => {
                warn!("Discarding unusable registry snapshot, starting empty: {}", e);
                HashMap::new()
            }
        };

        Registry {
            store: Arc::new(store),
            states: Arc::new(StdMutex::new(states)),
        }
    }

    /// Path of the durable snapshot.
    pub fn snapshot_path(&self) -> &Path {
        self.store.path()
    }

    /// State for an identity, if the file has been seen before.
    pub fn lookup(&self, identity: &FileIdentity) -> Option<FileState> {
        self.states.lock().unwrap().get(identity).cloned()
    }

    /// Insert or replace the state for a file.
    pub fn upsert(&self, state: FileState) {
        self.states.lock().unwrap().insert(state.identity, state);
    }

    /// Per-line commit: advance the offset and size observation for an
    /// identity. Safe to call at high frequency; touches only the in-memory
    /// map.
    pub fn commit(&self, identity: &FileIdentity, offset: u64, size: u64) {
        let mut states = self.states.lock().unwrap();
        match states.get_mut(identity) {
            Some(state) => {
                state.offset = offset;
                state.size = size;
                state.last_seen = now_unix_secs();
            }
            None => debug!(identity = %identity, "Commit for unknown registry entry dropped"),
        }
    }

    /// Update the size observation without touching the offset.
    pub fn observe_size(&self, identity: &FileIdentity, size: u64) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(identity) {
            state.size = size;
            state.last_seen = now_unix_secs();
        }
    }

    /// Mark whether the file's harvester has permanently stopped.
    pub fn set_finished(&self, identity: &FileIdentity, finished: bool) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(identity) {
            state.finished = finished;
        }
    }

    /// Write a durable snapshot of the full mapping. Returns the number of
    /// states written.
    pub fn checkpoint(&self) -> Result<usize> {
        let snapshot = {
            let states = self.states.lock().unwrap();
            let mut out = RegistrySnapshotV1::default();
            for state in states.values() {
                let entry = RegistryEntryV1::from(state);
                out.files.insert(entry.key(), entry);
            }
            out
        };

        let count = snapshot.files.len();
        self.store.write(&snapshot)?;
        Ok(count)
    }

    /// A consistent copy of all states, for the scanner and for tests.
    pub fn states(&self) -> Vec<FileState> {
        self.states.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().unwrap().is_empty()
    }
}

impl From<RegistryEntryV1> for FileState {
    fn from(entry: RegistryEntryV1) -> Self {
        FileState {
            identity: FileIdentity::new(entry.dev, entry.ino),
            path: PathBuf::from(entry.path),
            offset: entry.offset,
            size: entry.size,
            last_seen: entry.last_seen,
            finished: entry.finished,
        }
    }
}

impl From<&FileState> for RegistryEntryV1 {
    fn from(state: &FileState) -> Self {
        RegistryEntryV1 {
            path: state.path.display().to_string(),
            dev: state.identity.dev(),
            ino: state.identity.ino(),
            offset: state.offset,
            size: state.size,
            last_seen: state.last_seen,
            finished: state.finished,
        }
    }
}

pub(crate) fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity(ino: u64) -> FileIdentity {
        FileIdentity::new(1, ino)
    }

    #[test]
    fn test_lookup_absent_means_start_at_zero() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::load(dir.path().join("registry.json"));

        assert!(registry.lookup(&identity(100)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_upsert_commit_lookup() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::load(dir.path().join("registry.json"));

        let id = identity(100);
        registry.upsert(FileState::new(id, PathBuf::from("/var/log/a.log"), 0, 40));
        registry.commit(&id, 25, 40);

        let state = registry.lookup(&id).unwrap();
        assert_eq!(state.offset, 25);
        assert_eq!(state.size, 40);
        assert!(!state.finished);

        registry.set_finished(&id, true);
        assert!(registry.lookup(&id).unwrap().finished);
    }

    #[test]
    fn test_commit_for_unknown_identity_is_dropped() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::load(dir.path().join("registry.json"));

        registry.commit(&identity(7), 10, 10);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_checkpoint_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");

        {
            let registry = Registry::load(&path);
            let id = identity(100);
            registry.upsert(FileState::new(id, PathBuf::from("/var/log/a.log"), 0, 10));
            registry.commit(&id, 10, 10);
            registry.set_finished(&id, true);
            assert_eq!(registry.checkpoint().unwrap(), 1);
        }

        let reloaded = Registry::load(&path);
        let state = reloaded.lookup(&identity(100)).unwrap();
        assert_eq!(state.offset, 10);
        assert_eq!(state.path, PathBuf::from("/var/log/a.log"));
        assert!(state.finished);
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ this is not json").unwrap();

        let registry = Registry::load(&path);
        assert!(registry.is_empty());

        // next checkpoint replaces the broken file
        registry.upsert(FileState::new(
            identity(1),
            PathBuf::from("/var/log/a.log"),
            0,
            0,
        ));
        registry.checkpoint().unwrap();
        assert_eq!(Registry::load(&path).len(), 1);
    }

    #[test]
    fn test_two_entries_may_share_a_path() {
        // rotation case: the old identity keeps the path it was harvested
        // under while the new identity takes over the live path
        let dir = TempDir::new().unwrap();
        let registry = Registry::load(dir.path().join("registry.json"));

        let path = PathBuf::from("/var/log/app.log");
        registry.upsert(FileState::new(identity(1), path.clone(), 120, 120));
        registry.upsert(FileState::new(identity(2), path.clone(), 0, 30));

        assert_eq!(registry.len(), 2);
        let same_path = registry
            .states()
            .iter()
            .filter(|s| s.path == path)
            .count();
        assert_eq!(same_path, 2);
    }
}
