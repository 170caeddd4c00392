// SPDX-License-Identifier: Apache-2.0

//! Close-policy triggers deciding when a harvester stops watching its file.

use std::time::{Duration, Instant};

use crate::config::HarvestConfig;

/// Why a harvester stopped.
///
/// The first five variants are the configured close policies; `Stopped` and
/// `Error` are non-policy exits (shutdown / channel closed, and open or read
/// failures). Only the permanent reasons mark a registry entry finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The file was unlinked from the filesystem
    Removed,
    /// A different file now occupies this harvester's path
    Renamed,
    /// The hard lifetime ceiling elapsed
    Timeout,
    /// No line was read for the configured idle duration
    Inactive,
    /// End of file reached with close_eof enabled
    Eof,
    /// Shutdown requested or the event channel disconnected
    Stopped,
    /// The file could not be opened or read
    Error,
}

impl CloseReason {
    /// True for reasons that represent a permanent stop; the scanner will
    /// not re-open the file unless it grows or is truncated.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CloseReason::Removed | CloseReason::Renamed | CloseReason::Eof
        )
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CloseReason::Removed => "removed",
            CloseReason::Renamed => "renamed",
            CloseReason::Timeout => "timeout",
            CloseReason::Inactive => "inactive",
            CloseReason::Eof => "eof",
            CloseReason::Stopped => "stopped",
            CloseReason::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// The enabled subset of close triggers for one harvester.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosePolicy {
    pub renamed: bool,
    pub removed: bool,
    pub eof: bool,
    pub inactive: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl ClosePolicy {
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self {
            renamed: config.close_renamed,
            removed: config.close_removed,
            eof: config.close_eof,
            inactive: config.close_inactive,
            timeout: config.close_timeout,
        }
    }
}

/// Per-harvester trigger evaluation.
///
/// Tie-break when several triggers are eligible in the same evaluation:
/// removed > renamed > timeout > inactive > eof. Removal is the strongest
/// observation (the inode is gone; rename would be a misdiagnosis), rename
/// describes the file rather than the harvester, timeout is the hard
/// ceiling, and EOF yields to anything more specific.
pub struct ClosePolicyEngine {
    policy: ClosePolicy,
    started_at: Instant,
    last_activity: Instant,
}

impl ClosePolicyEngine {
    pub fn new(policy: ClosePolicy) -> Self {
        let now = Instant::now();
        Self {
            policy,
            started_at: now,
            last_activity: now,
        }
    }

    /// Record read progress, resetting the inactivity clock.
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Whether the hard lifetime ceiling has elapsed. Checked on every loop
    /// iteration so it fires even while lines are still flowing.
    pub fn timed_out(&self) -> bool {
        self.policy
            .timeout
            .is_some_and(|limit| self.started_at.elapsed() >= limit)
    }

    /// Full evaluation, run while the harvester is idle.
    pub fn evaluate(&self, removed: bool, renamed: bool, at_eof: bool) -> Option<CloseReason> {
        if self.policy.removed && removed {
            return Some(CloseReason::Removed);
        }
        if self.policy.renamed && renamed {
            return Some(CloseReason::Renamed);
        }
        if self.timed_out() {
            return Some(CloseReason::Timeout);
        }
        if let Some(idle) = self.policy.inactive {
            if self.last_activity.elapsed() >= idle {
                return Some(CloseReason::Inactive);
            }
        }
        if self.policy.eof && at_eof {
            return Some(CloseReason::Eof);
        }
        None
    }
}
