// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file input.

use std::path::PathBuf;
use std::time::Duration;

use crate::encoding::{DecodeErrorPolicy, Encoding};

/// Where to start reading a file that has no registry entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartAt {
    /// Read the whole file from the start
    #[default]
    Beginning,
    /// Only ship content appended after discovery
    End,
}

/// Configuration for the file input.
///
/// This is a plain struct consumed by the core; parsing/deserialization is
/// the caller's job.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Glob patterns for files to include
    pub include: Vec<String>,
    /// Glob patterns for files to exclude
    pub exclude: Vec<String>,
    /// Stream encoding for line extraction
    pub encoding: Encoding,
    /// What to do with messages that do not decode
    pub on_decode_error: DecodeErrorPolicy,
    /// Where to start reading files with no registry entry
    pub start_at: StartAt,
    /// Close a harvester when its file is renamed away from its path
    pub close_renamed: bool,
    /// Close a harvester when its file is unlinked
    pub close_removed: bool,
    /// Close a harvester the first time it reaches end of file
    pub close_eof: bool,
    /// Close a harvester after this long without reading a line
    pub close_inactive: Option<Duration>,
    /// Hard ceiling on harvester lifetime, regardless of progress
    pub close_timeout: Option<Duration>,
    /// Interval between scans for new or grown files
    pub scan_frequency: Duration,
    /// How long an idle harvester waits before checking its file again
    pub backoff: Duration,
    /// Read buffer size per harvester in bytes (segment flush threshold)
    pub harvester_buffer_size: usize,
    /// Maximum size of a reassembled message; longer messages are truncated
    pub max_message_bytes: usize,
    /// Maximum number of concurrently active harvesters (0 = unlimited)
    pub harvester_limit: usize,
    /// Path of the durable registry snapshot
    pub registry_path: PathBuf,
    /// Interval between registry checkpoints
    pub registry_flush_interval: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            encoding: Encoding::default(),
            on_decode_error: DecodeErrorPolicy::default(),
            start_at: StartAt::Beginning,
            close_renamed: false,
            close_removed: true,
            close_eof: false,
            close_inactive: Some(Duration::from_secs(300)),
            close_timeout: None,
            scan_frequency: Duration::from_secs(10),
            backoff: Duration::from_secs(1),
            harvester_buffer_size: 16384,
            max_message_bytes: 10 * 1024 * 1024,
            harvester_limit: 0,
            registry_path: PathBuf::from("/var/lib/skidder/registry.json"),
            registry_flush_interval: Duration::from_secs(1),
        }
    }
}

impl HarvestConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.include.is_empty() {
            return Err("At least one include pattern must be specified".to_string());
        }

        if self.harvester_buffer_size < self.encoding.unit_width() * 2 {
            return Err("harvester_buffer_size is too small for the configured encoding".to_string());
        }

        if self.max_message_bytes == 0 {
            return Err("max_message_bytes must be greater than zero".to_string());
        }

        if self.scan_frequency.is_zero() {
            return Err("scan_frequency must be greater than zero".to_string());
        }

        if self.close_inactive.is_some_and(|d| d.is_zero()) {
            return Err("close_inactive must be greater than zero when set".to_string());
        }

        if self.close_timeout.is_some_and(|d| d.is_zero()) {
            return Err("close_timeout must be greater than zero when set".to_string());
        }

        Ok(())
    }
}
