// SPDX-License-Identifier: Apache-2.0

//! Durable snapshot storage with atomic writes.
//!
//! Snapshots are written to a uniquely-named temp file then renamed into
//! place, so an interrupted checkpoint leaves the previous snapshot intact.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::registry::schema::{REGISTRY_STATE_VERSION, RegistrySnapshotV1};

pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted snapshot. A missing file is a normal first run and
    /// yields an empty snapshot; unreadable, unparsable, or
    /// version-mismatched snapshots are errors for the caller to handle.
    pub fn load(&self) -> Result<RegistrySnapshotV1> {
        if !self.path.exists() {
            return Ok(RegistrySnapshotV1::default());
        }

        let file = File::open(&self.path)
            .map_err(|e| Error::Registry(format!("failed to open registry snapshot: {}", e)))?;
        let snapshot: RegistrySnapshotV1 = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Registry(format!("failed to parse registry snapshot: {}", e)))?;

        if snapshot.version != REGISTRY_STATE_VERSION {
            return Err(Error::Registry(format!(
                "unsupported registry snapshot version {}",
                snapshot.version
            )));
        }

        Ok(snapshot)
    }

    /// Write the snapshot atomically (write to temp, then rename).
    pub fn write(&self, snapshot: &RegistrySnapshotV1) -> Result<()> {
        use portable_atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Registry(format!("failed to create registry directory: {}", e))
                })?;
            }
        }

        // Use a unique temp file name to avoid race conditions between concurrent writes
        // Combine process ID with a counter to handle multi-threaded writes
        let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let temp_path = self
            .path
            .with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

        let file = File::create(&temp_path)
            .map_err(|e| Error::Registry(format!("failed to create temp file: {}", e)))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, snapshot)
            .map_err(|e| Error::Registry(format!("failed to write registry snapshot: {}", e)))?;

        // Ensure all data is flushed to disk before rename
        writer
            .flush()
            .map_err(|e| Error::Registry(format!("failed to flush registry snapshot: {}", e)))?;

        // Drop the writer to close the file handle before rename
        drop(writer);

        // Rename temp to final (atomic on most filesystems)
        fs::rename(&temp_path, &self.path)
            .map_err(|e| Error::Registry(format!("failed to rename registry snapshot: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::schema::RegistryEntryV1;
    use tempfile::TempDir;

    fn entry(ino: u64, offset: u64) -> RegistryEntryV1 {
        RegistryEntryV1 {
            path: format!("/var/log/{}.log", ino),
            dev: 1,
            ino,
            offset,
            size: offset,
            last_seen: 1_700_000_000,
            finished: false,
        }
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));

        let snapshot = store.load().unwrap();
        assert!(snapshot.files.is_empty());
    }

    #[test]
    fn test_write_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));

        let mut snapshot = RegistrySnapshotV1::default();
        let e = entry(100, 500);
        snapshot.files.insert(e.key(), e);
        store.write(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.files.get("1:100").unwrap().offset, 500);
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("nested/deeper/registry.json"));

        store.write(&RegistrySnapshotV1::default()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_rewrite_replaces_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));

        let mut first = RegistrySnapshotV1::default();
        let e = entry(100, 10);
        first.files.insert(e.key(), e);
        store.write(&first).unwrap();

        let mut second = RegistrySnapshotV1::default();
        let e = entry(100, 20);
        second.files.insert(e.key(), e);
        store.write(&second).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.files.get("1:100").unwrap().offset, 20);

        // no temp files left behind
        let stray: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "registry.json")
            .collect();
        assert!(stray.is_empty(), "leftover temp files: {:?}", stray);
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, r#"{"version": 9, "files": {}}"#).unwrap();

        let store = RegistryStore::new(&path);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "not json at all").unwrap();

        let store = RegistryStore::new(&path);
        assert!(store.load().is_err());
    }
}
