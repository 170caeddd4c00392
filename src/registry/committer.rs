// SPDX-License-Identifier: Apache-2.0

//! Periodic registry checkpointing.
//!
//! Runs as a separate task so harvester per-line commits never wait on disk.
//! On shutdown it waits for the scanner to drop its completion channel (all
//! harvesters drained and final offsets committed) before writing the final
//! snapshot, bounded by a drain deadline.

use std::time::{Duration, Instant};

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::error::Result;
use crate::registry::Registry;

/// Configuration for the registry committer
pub struct CommitterConfig {
    /// Interval between periodic checkpoints
    pub flush_interval: Duration,
    /// Maximum time to wait for the scanner to finish during shutdown
    pub drain_timeout: Duration,
    /// Maximum duration of consecutive checkpoint failures before returning error
    pub max_checkpoint_failure_duration: Duration,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(3),
            max_checkpoint_failure_duration: Duration::from_secs(60),
        }
    }
}

/// Checkpoints the registry on an interval and once more at shutdown.
pub struct RegistryCommitter {
    registry: Registry,
    config: CommitterConfig,
    flush_interval: tokio::time::Interval,
    /// Closed (returns None) once the scanner has drained its harvesters
    scanner_done: BoundedReceiver<()>,
    /// Tracks when checkpoint failures started (for threshold-based exit)
    checkpoint_first_failure: Option<Instant>,
}

impl RegistryCommitter {
    pub fn new(
        registry: Registry,
        config: CommitterConfig,
        scanner_done: BoundedReceiver<()>,
    ) -> Self {
        let flush_interval = tokio::time::interval(config.flush_interval);

        Self {
            registry,
            config,
            flush_interval,
            scanner_done,
            checkpoint_first_failure: None,
        }
    }

    /// Run the committer loop until cancelled or the scanner finishes, then
    /// write the final checkpoint. Returns error if checkpoint failures
    /// persist beyond the configured threshold.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<()> {
        debug!(path = ?self.registry.snapshot_path(), "Registry committer started");

        let mut fatal_error = None;

        loop {
            select! {
                biased;

                // Periodic checkpoint
                _ = self.flush_interval.tick() => {
                    if let Err(e) = self.maybe_checkpoint() {
                        error!("Checkpoint failures persisted beyond threshold, exiting: {}", e);
                        fatal_error = Some(e);
                        break;
                    }
                }

                // Scanner completion
                done = self.scanner_done.next() => {
                    if done.is_none() {
                        debug!("Scanner finished, exiting registry committer run loop");
                        break;
                    }
                }

                // Handle cancellation
                _ = cancel_token.cancelled() => {
                    debug!("Registry committer cancelled, waiting for harvesters to drain");
                    break;
                }
            }
        }

        self.drain().await;

        match fatal_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Wait (bounded) for the scanner to finish its final commits, then
    /// write the final checkpoint.
    async fn drain(&mut self) {
        let drain_deadline = tokio::time::Instant::now() + self.config.drain_timeout;

        loop {
            match tokio::time::timeout_at(drain_deadline, self.scanner_done.next()).await {
                Ok(None) => break,
                Ok(Some(())) => continue,
                Err(_) => {
                    warn!("Drain deadline reached before scanner finished");
                    break;
                }
            }
        }

        match self.registry.checkpoint() {
            Ok(states) => info!(states, "Final registry checkpoint: {} states written", states),
            Err(e) => warn!("Failed to write final registry checkpoint: {}", e),
        }
    }

    /// Conditionally checkpoint and track failures.
    /// Returns Ok on success or if failure is within threshold.
    /// Returns Err only when failure duration threshold is breached.
    fn maybe_checkpoint(&mut self) -> Result<()> {
        match self.registry.checkpoint() {
            Ok(states) => {
                if self.checkpoint_first_failure.is_some() {
                    debug!("Checkpoint succeeded after previous failures");
                    self.checkpoint_first_failure = None;
                }
                debug!(states, "Registry checkpoint: {} states written", states);
                Ok(())
            }
            Err(e) => {
                // Track when failures started
                let first_failure = *self
                    .checkpoint_first_failure
                    .get_or_insert_with(Instant::now);

                let failure_duration = first_failure.elapsed();

                if failure_duration >= self.config.max_checkpoint_failure_duration {
                    // Threshold breached - return error to trigger shutdown
                    Err(e)
                } else {
                    warn!(
                        "Checkpoint failed (failures started {:?} ago): {}",
                        failure_duration, e
                    );
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel;
    use crate::identity::FileIdentity;
    use crate::registry::FileState;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_committer(
        registry_path: PathBuf,
        config: CommitterConfig,
    ) -> (
        RegistryCommitter,
        Registry,
        bounded_channel::BoundedSender<()>,
    ) {
        let registry = Registry::load(registry_path);
        let (done_tx, done_rx) = bounded_channel::bounded(1);
        let committer = RegistryCommitter::new(registry.clone(), config, done_rx);
        (committer, registry, done_tx)
    }

    #[tokio::test]
    async fn test_checkpoint_persists_states() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("registry.json");

        let (mut committer, registry, _done_tx) =
            create_test_committer(path.clone(), CommitterConfig::default());

        let id = FileIdentity::new(1, 100);
        registry.upsert(FileState::new(id, PathBuf::from("/var/log/a.log"), 0, 80));
        registry.commit(&id, 42, 80);

        committer.maybe_checkpoint().unwrap();

        let reloaded = Registry::load(&path);
        let state = reloaded.lookup(&id).unwrap();
        assert_eq!(state.offset, 42);
        assert_eq!(state.size, 80);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_threshold() {
        let temp_dir = TempDir::new().unwrap();

        // Create config with short failure threshold for testing
        let config = CommitterConfig {
            max_checkpoint_failure_duration: Duration::from_millis(50),
            ..Default::default()
        };

        let readonly_dir = temp_dir.path().join("readonly");
        std::fs::create_dir_all(&readonly_dir).unwrap();

        let (mut committer, _registry, _done_tx) =
            create_test_committer(readonly_dir.join("registry.json"), config);

        // Make directory read-only (this will cause the snapshot write to fail)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&readonly_dir, std::fs::Permissions::from_mode(0o444))
                .unwrap();
        }

        // First checkpoint failure should return Ok (threshold not reached)
        let result = committer.maybe_checkpoint();
        #[cfg(unix)]
        assert!(
            result.is_ok(),
            "First checkpoint failure should return Ok (threshold not reached)"
        );

        // Wait for threshold to be exceeded
        std::thread::sleep(Duration::from_millis(60));

        // Next checkpoint should return Err (threshold breached)
        let result = committer.maybe_checkpoint();
        #[cfg(unix)]
        assert!(
            result.is_err(),
            "Checkpoint should return Err after threshold duration"
        );

        // Cleanup - restore permissions
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&readonly_dir, std::fs::Permissions::from_mode(0o755))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_checkpoint_failure_resets_on_success() {
        let temp_dir = TempDir::new().unwrap();

        let config = CommitterConfig {
            max_checkpoint_failure_duration: Duration::from_millis(100),
            ..Default::default()
        };

        let (mut committer, _registry, _done_tx) =
            create_test_committer(temp_dir.path().join("registry.json"), config);

        // Simulate a failure by setting checkpoint_first_failure
        committer.checkpoint_first_failure = Some(Instant::now());

        // Successful checkpoint should clear the failure tracking
        let result = committer.maybe_checkpoint();
        assert!(result.is_ok(), "checkpoint should succeed");
        assert!(
            committer.checkpoint_first_failure.is_none(),
            "checkpoint_first_failure should be cleared after success"
        );
    }

    #[tokio::test]
    async fn test_final_checkpoint_on_scanner_exit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("registry.json");

        let (committer, registry, done_tx) = create_test_committer(
            path.clone(),
            CommitterConfig {
                // long interval so only the final checkpoint writes
                flush_interval: Duration::from_secs(3600),
                drain_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );

        let id = FileIdentity::new(1, 7);
        registry.upsert(FileState::new(id, PathBuf::from("/var/log/b.log"), 5, 5));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(committer.run(cancel));

        // Dropping the scanner side triggers the final checkpoint
        drop(done_tx);
        handle.await.unwrap().unwrap();

        let reloaded = Registry::load(&path);
        assert_eq!(reloaded.lookup(&id).unwrap().offset, 5);
    }
}
