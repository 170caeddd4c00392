// SPDX-License-Identifier: Apache-2.0

//! File input: discovery scanner plus harvester lifecycle.
//!
//! The scanner wakes on an interval, expands the include globs, and decides
//! per discovered file whether a harvester should start and at which offset.
//! Harvesters run as blocking-pool tasks tracked in a JoinSet; the scanner
//! reaps their exits to keep at most one harvester per file identity.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{self, BoundedSender};
use crate::config::{HarvestConfig, StartAt};
use crate::error::{Error, Result};
use crate::event::LineEvent;
use crate::finder::FileFinder;
use crate::harvester::{Harvester, HarvesterExit};
use crate::identity::FileIdentity;
use crate::registry::{CommitterConfig, FileState, Registry, RegistryCommitter};

/// Bound on waiting for in-flight harvesters after cancellation
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Entry point for harvesting a set of file patterns into a LineEvent
/// channel. Construction validates the config and loads the registry;
/// [`FileInput::start`] spawns the scanner and the registry committer.
pub struct FileInput {
    config: HarvestConfig,
    registry: Registry,
    events: BoundedSender<LineEvent>,
}

impl FileInput {
    pub fn new(config: HarvestConfig, events: BoundedSender<LineEvent>) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let registry = Registry::load(&config.registry_path);

        Ok(Self {
            config,
            registry,
            events,
        })
    }

    /// Shared handle to the registry backing this input.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Spawn the scanner and committer tasks onto the join set. Both stop
    /// on cancellation; the committer additionally waits for the scanner to
    /// drain its harvesters before the final checkpoint.
    pub fn start(self, tasks: &mut JoinSet<Result<()>>, cancel_token: &CancellationToken) {
        let (done_tx, done_rx) = bounded_channel::bounded(1);

        let committer = RegistryCommitter::new(
            self.registry.clone(),
            CommitterConfig {
                flush_interval: self.config.registry_flush_interval,
                ..Default::default()
            },
            done_rx,
        );
        tasks.spawn(committer.run(cancel_token.clone()));

        let scanner = Scanner::new(self.config, self.registry, self.events, done_tx);
        tasks.spawn(scanner.run(cancel_token.clone()));
    }
}

struct Scanner {
    config: HarvestConfig,
    finder: FileFinder,
    registry: Registry,
    events: BoundedSender<LineEvent>,
    /// Identities with a live harvester, and the path each was opened under
    active: HashMap<FileIdentity, PathBuf>,
    harvesters: JoinSet<HarvesterExit>,
    /// Dropped when the scanner exits; the committer watches for the close
    _done: BoundedSender<()>,
}

impl Scanner {
    fn new(
        config: HarvestConfig,
        registry: Registry,
        events: BoundedSender<LineEvent>,
        done: BoundedSender<()>,
    ) -> Self {
        let finder = FileFinder::new(config.include.clone(), config.exclude.clone());

        Self {
            config,
            finder,
            registry,
            events,
            active: HashMap::new(),
            harvesters: JoinSet::new(),
            _done: done,
        }
    }

    async fn run(mut self, cancel_token: CancellationToken) -> Result<()> {
        debug!(include = ?self.config.include, "File scanner started");

        let mut scan_interval = tokio::time::interval(self.config.scan_frequency);

        let cancel = cancel_token.clone();
        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("File scanner cancelled");
                    break;
                }

                Some(joined) = self.harvesters.join_next() => {
                    self.reap(joined);
                }

                _ = scan_interval.tick() => {
                    self.scan(&cancel_token);
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// One discovery pass: match the globs and start harvesters where the
    /// registry says there is something to read.
    fn scan(&mut self, cancel_token: &CancellationToken) {
        let paths = match self.finder.find_files() {
            Ok(paths) => paths,
            Err(e) => {
                warn!("File scan failed: {}", e);
                return;
            }
        };

        for path in paths {
            if self.config.harvester_limit > 0 && self.active.len() >= self.config.harvester_limit
            {
                debug!(
                    limit = self.config.harvester_limit,
                    "Harvester limit reached, deferring remaining files to next scan"
                );
                break;
            }

            // open first, resolve identity from the handle, then hand the
            // same handle to the harvester; a path-then-open pair could
            // race a rotation
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) => {
                    debug!(path = ?path, "Skipping file that could not be opened: {}", e);
                    continue;
                }
            };
            let identity = match FileIdentity::from_file(&file) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(path = ?path, "Failed to resolve file identity: {}", e);
                    continue;
                }
            };

            if self.active.contains_key(&identity) {
                continue;
            }

            let size = match file.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!(path = ?path, "Failed to stat file: {}", e);
                    continue;
                }
            };

            let Some(offset) = self.start_offset(&identity, &path, size) else {
                continue;
            };

            info!(
                identity = %identity,
                path = ?path,
                offset,
                size,
                "Starting harvester"
            );

            self.registry
                .upsert(FileState::new(identity, path.clone(), offset, size));

            let harvester = Harvester::new(
                file,
                identity,
                path.clone(),
                offset,
                &self.config,
                self.registry.clone(),
                self.events.clone(),
                cancel_token.clone(),
            );
            self.harvesters.spawn_blocking(move || harvester.run());
            self.active.insert(identity, path);
        }
    }

    /// Decide the starting offset for a discovered file, or None when no
    /// harvester is needed this scan.
    fn start_offset(&self, identity: &FileIdentity, path: &Path, size: u64) -> Option<u64> {
        match self.registry.lookup(identity) {
            Some(state) => {
                if size < state.offset {
                    // shrank while nothing was harvesting it
                    warn!(
                        identity = %identity,
                        path = ?path,
                        offset = state.offset,
                        size,
                        "File truncated while closed, restarting from beginning"
                    );
                    Some(0)
                } else if size > state.offset {
                    Some(state.offset)
                } else {
                    // fully caught up
                    None
                }
            }
            // an empty unknown file has nothing to read yet under either
            // start mode; it is picked up once it grows
            None if size == 0 => None,
            None => match self.config.start_at {
                StartAt::Beginning => Some(0),
                // tail from the discovery point
                StartAt::End => Some(size),
            },
        }
    }

    fn reap(&mut self, joined: std::result::Result<HarvesterExit, tokio::task::JoinError>) {
        match joined {
            Ok(exit) => {
                debug!(
                    identity = %exit.identity,
                    reason = %exit.reason,
                    offset = exit.offset,
                    "Harvester exited"
                );
                self.active.remove(&exit.identity);
            }
            Err(e) => error!("Harvester task failed: {}", e),
        }
    }

    /// Wait (bounded) for all harvesters to finish their final commits.
    async fn drain(&mut self) {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;

        while !self.harvesters.is_empty() {
            match tokio::time::timeout_at(deadline, self.harvesters.join_next()).await {
                Ok(Some(joined)) => self.reap(joined),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.harvesters.len(),
                        "Drain deadline reached with harvesters still running"
                    );
                    break;
                }
            }
        }

        debug!("File scanner drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scanner_for(dir: &TempDir, config: HarvestConfig) -> (Scanner, Registry) {
        let registry = Registry::load(dir.path().join("registry.json"));
        let (events, _events_rx) = bounded_channel::bounded(8);
        let (done_tx, _done_rx) = bounded_channel::bounded(1);
        let scanner = Scanner::new(config, registry.clone(), events, done_tx);
        (scanner, registry)
    }

    fn base_config(dir: &TempDir) -> HarvestConfig {
        HarvestConfig {
            include: vec![format!("{}/*.log", dir.path().display())],
            registry_path: dir.path().join("registry.json"),
            ..Default::default()
        }
    }

    #[test]
    fn test_start_offset_unknown_file() {
        let dir = TempDir::new().unwrap();
        let (scanner, _) = scanner_for(&dir, base_config(&dir));

        let id = FileIdentity::new(1, 100);
        let path = PathBuf::from("/var/log/a.log");

        assert_eq!(scanner.start_offset(&id, &path, 50), Some(0));
        assert_eq!(scanner.start_offset(&id, &path, 0), None);
    }

    #[test]
    fn test_start_offset_tail_mode() {
        let dir = TempDir::new().unwrap();
        let config = HarvestConfig {
            start_at: StartAt::End,
            ..base_config(&dir)
        };
        let (scanner, _) = scanner_for(&dir, config);

        let id = FileIdentity::new(1, 100);
        let path = PathBuf::from("/var/log/a.log");

        assert_eq!(scanner.start_offset(&id, &path, 50), Some(50));
    }

    #[test]
    fn test_start_offset_resumes_known_file() {
        let dir = TempDir::new().unwrap();
        let (scanner, registry) = scanner_for(&dir, base_config(&dir));

        let id = FileIdentity::new(1, 100);
        let path = PathBuf::from("/var/log/a.log");
        registry.upsert(FileState::new(id, path.clone(), 30, 30));

        // grown since last commit
        assert_eq!(scanner.start_offset(&id, &path, 45), Some(30));
        // caught up
        assert_eq!(scanner.start_offset(&id, &path, 30), None);
        // shrank while closed
        assert_eq!(scanner.start_offset(&id, &path, 10), Some(0));
    }

    #[test]
    fn test_start_offset_finished_file_resumes_on_growth() {
        let dir = TempDir::new().unwrap();
        let (scanner, registry) = scanner_for(&dir, base_config(&dir));

        let id = FileIdentity::new(1, 100);
        let path = PathBuf::from("/var/log/a.log");
        registry.upsert(FileState::new(id, path.clone(), 20, 20));
        registry.set_finished(&id, true);

        assert_eq!(scanner.start_offset(&id, &path, 20), None);
        assert_eq!(scanner.start_offset(&id, &path, 35), Some(20));
    }

    #[test]
    fn test_file_input_rejects_invalid_config() {
        let (events, _rx) = bounded_channel::bounded(8);
        let result = FileInput::new(HarvestConfig::default(), events);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
