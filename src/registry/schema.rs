// SPDX-License-Identifier: Apache-2.0

//! Versioned schema for the durable registry snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Current schema version for the persisted snapshot
pub const REGISTRY_STATE_VERSION: u8 = 1;

/// Persisted registry snapshot (v1). Keys are "dev:ino" for direct lookup.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrySnapshotV1 {
    /// Schema version (always 1 for this format)
    pub version: u8,
    /// Map from identity key (dev:ino) to file entry
    pub files: HashMap<String, RegistryEntryV1>,
}

impl Default for RegistrySnapshotV1 {
    fn default() -> Self {
        Self {
            version: REGISTRY_STATE_VERSION,
            files: HashMap::new(),
        }
    }
}

/// Persisted state for a single file (v1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntryV1 {
    /// Last known path to the file (human-readable; identity is dev+ino)
    pub path: String,

    /// Device ID (Unix) or volume serial (Windows)
    pub dev: u64,
    /// Inode number (Unix) or file index (Windows)
    pub ino: u64,

    /// Committed read offset in bytes
    pub offset: u64,
    /// File size at last observation
    pub size: u64,
    /// Unix timestamp (seconds) of the last observation
    pub last_seen: u64,
    /// True once the file's harvester has permanently stopped
    pub finished: bool,
}

impl RegistryEntryV1 {
    /// Generate the map key for this entry ("dev:ino" format)
    pub fn key(&self) -> String {
        identity_key(self.dev, self.ino)
    }
}

/// Generate a map key from dev and ino ("dev:ino" format)
pub fn identity_key(dev: u64, ino: u64) -> String {
    format!("{}:{}", dev, ino)
}
