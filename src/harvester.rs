// SPDX-License-Identifier: Apache-2.0

//! Per-file harvester.
//!
//! Each harvester owns one open file handle and runs on a blocking-pool
//! task: it seeks to the committed offset, pulls segments from the line
//! reader, reassembles them into messages, delivers each as a LineEvent
//! through the bounded channel, and commits the advanced offset to the
//! registry before extracting the next line. While idle it stats its file
//! and path to detect truncation, removal, and rename, and evaluates the
//! configured close policies.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedSender, SendTimeoutError};
use crate::close_policy::{ClosePolicy, ClosePolicyEngine, CloseReason};
use crate::config::HarvestConfig;
use crate::encoding::{DecodeErrorPolicy, Encoding};
use crate::event::LineEvent;
use crate::identity::{FileIdentity, is_unlinked};
use crate::reader::{LineReader, Segment};
use crate::registry::Registry;

/// How long one timed send attempt blocks before re-checking cancellation
const SEND_TICK: Duration = Duration::from_millis(100);

/// Upper bound on one idle-wait slice, so cancellation and close_timeout
/// stay responsive under a long backoff
const IDLE_SLICE: Duration = Duration::from_millis(50);

/// Resolution of a finished harvester task, reaped by the scanner.
#[derive(Debug, Clone, Copy)]
pub struct HarvesterExit {
    pub identity: FileIdentity,
    pub reason: CloseReason,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Running,
    Closing(CloseReason),
}

pub struct Harvester {
    identity: FileIdentity,
    path: PathBuf,
    file: File,
    /// Committed offset; advances only on completed lines
    offset: u64,
    reader: LineReader,
    /// Reassembly buffer for the in-progress message
    pending: Vec<u8>,
    /// Raw bytes consumed by the in-progress message
    pending_consumed: u64,
    /// Set when the in-progress message hit max_message_bytes
    pending_truncated: bool,
    encoding: Encoding,
    on_decode_error: DecodeErrorPolicy,
    max_message_bytes: usize,
    backoff: Duration,
    engine: ClosePolicyEngine,
    registry: Registry,
    events: BoundedSender<LineEvent>,
    cancel: CancellationToken,
    state: SessionState,
}

impl Harvester {
    /// Build a harvester around an already-open handle. The caller has
    /// resolved the identity from this handle and registered the file's
    /// state; `offset` is the seek position decided from the registry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file: File,
        identity: FileIdentity,
        path: PathBuf,
        offset: u64,
        config: &HarvestConfig,
        registry: Registry,
        events: BoundedSender<LineEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let reader = LineReader::new(config.encoding, config.harvester_buffer_size, offset == 0);

        Self {
            identity,
            path,
            file,
            offset,
            reader,
            pending: Vec::new(),
            pending_consumed: 0,
            pending_truncated: false,
            encoding: config.encoding,
            on_decode_error: config.on_decode_error,
            max_message_bytes: config.max_message_bytes,
            backoff: config.backoff,
            engine: ClosePolicyEngine::new(ClosePolicy::from_config(config)),
            registry,
            events,
            cancel,
            state: SessionState::Running,
        }
    }

    /// Drive the harvester to completion. Runs on a blocking-pool thread.
    pub fn run(mut self) -> HarvesterExit {
        debug!(
            identity = %self.identity,
            path = ?self.path,
            offset = self.offset,
            "Harvester started"
        );

        if let Err(e) = self.file.seek(SeekFrom::Start(self.offset)) {
            error!(path = ?self.path, "Failed to seek to committed offset: {}", e);
            self.begin_close(CloseReason::Error);
            return self.finish();
        }

        while self.state == SessionState::Running {
            if self.cancel.is_cancelled() {
                self.begin_close(CloseReason::Stopped);
                break;
            }

            // hard ceiling fires even while lines are flowing
            if self.engine.timed_out() {
                warn!(
                    identity = %self.identity,
                    path = ?self.path,
                    "Harvester reached close_timeout, stopping mid-file"
                );
                self.begin_close(CloseReason::Timeout);
                break;
            }

            match self.reader.fill_from(&mut self.file) {
                Ok(0) => self.on_idle(),
                Ok(_) => {
                    self.engine.record_activity();
                    self.drain_segments();
                }
                Err(e) => {
                    error!(path = ?self.path, "Read failed: {}", e);
                    self.begin_close(CloseReason::Error);
                }
            }
        }

        self.finish()
    }

    /// Emit every segment currently extractable from the read buffer.
    fn drain_segments(&mut self) {
        while self.state == SessionState::Running {
            match self.reader.next_segment() {
                Some(segment) => self.handle_segment(segment),
                None => break,
            }
        }
    }

    fn handle_segment(&mut self, segment: Segment) {
        // append under the message cap; bytes past it are dropped but still
        // counted so the offset stays byte-accurate
        let room = self.max_message_bytes.saturating_sub(self.pending.len());
        if segment.bytes.len() > room {
            self.pending.extend_from_slice(&segment.bytes[..room]);
            self.pending_truncated = true;
        } else {
            self.pending.extend_from_slice(&segment.bytes);
        }
        self.pending_consumed += segment.consumed;

        if segment.terminated {
            self.complete_message();
        }
    }

    /// Decode, deliver, and commit the reassembled message.
    fn complete_message(&mut self) {
        let bytes = std::mem::take(&mut self.pending);
        let consumed = std::mem::take(&mut self.pending_consumed);
        let truncated = std::mem::take(&mut self.pending_truncated);
        let offset_after = self.offset + consumed;

        if truncated {
            warn!(
                path = ?self.path,
                "Message exceeded max_message_bytes and was truncated"
            );
        }

        // a lone terminator advances the offset without producing an event
        if !bytes.is_empty() {
            match self.encoding.decode(&bytes, self.on_decode_error) {
                Some(mut message) => {
                    if message.ends_with('\r') {
                        message.pop();
                    }
                    let event = LineEvent {
                        message,
                        path: self.path.clone(),
                        identity: self.identity,
                        consumed,
                        offset: offset_after,
                    };
                    if !self.send_event(event) {
                        // undelivered line stays uncommitted so a restart
                        // replays it
                        return;
                    }
                }
                None => {
                    warn!(
                        path = ?self.path,
                        "Skipped undecodable line ({} bytes)", bytes.len()
                    );
                }
            }
        }

        self.offset = offset_after;
        let size = self.file.metadata().map(|m| m.len()).unwrap_or(offset_after);
        self.registry.commit(&self.identity, self.offset, size);
        self.engine.record_activity();
    }

    /// Timed-send loop so a blocked channel never hides a stop request.
    /// Returns false when delivery failed and the harvester must close.
    fn send_event(&mut self, mut event: LineEvent) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                self.begin_close(CloseReason::Stopped);
                return false;
            }
            match self.events.send_timeout(event, SEND_TICK) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => {
                    event = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    debug!(path = ?self.path, "Event channel closed, stopping harvester");
                    self.begin_close(CloseReason::Stopped);
                    return false;
                }
            }
        }
    }

    /// A read returned no new bytes: look for out-of-band mutation, run the
    /// close policies, and otherwise back off.
    fn on_idle(&mut self) {
        let size = match self.file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                error!(path = ?self.path, "Failed to stat open file: {}", e);
                self.begin_close(CloseReason::Error);
                return;
            }
        };

        if size < self.offset {
            self.handle_truncation(size);
            return;
        }
        self.registry.observe_size(&self.identity, size);

        let removed = is_unlinked(&self.file).unwrap_or(false);

        // the path serving a different identity (or nothing) means the file
        // was renamed away; a fresh file at this path is the scanner's job
        let renamed = match FileIdentity::from_path(&self.path) {
            Ok(current) => current != self.identity,
            Err(_) => !removed,
        };

        if let Some(reason) = self.engine.evaluate(removed, renamed, true) {
            match reason {
                CloseReason::Removed => {
                    info!(identity = %self.identity, path = ?self.path, "Closing harvester: file was removed")
                }
                CloseReason::Renamed => {
                    info!(identity = %self.identity, path = ?self.path, "Closing harvester: file was renamed")
                }
                CloseReason::Inactive => {
                    info!(identity = %self.identity, path = ?self.path, "Closing harvester: inactive")
                }
                CloseReason::Eof => {
                    debug!(identity = %self.identity, path = ?self.path, "Closing harvester: end of file")
                }
                _ => {}
            }
            self.begin_close(reason);
            return;
        }

        self.idle_wait();
    }

    /// The file shrank below the committed offset: it was truncated in
    /// place. Restart from the beginning.
    fn handle_truncation(&mut self, size: u64) {
        warn!(
            identity = %self.identity,
            path = ?self.path,
            offset = self.offset,
            size,
            "File truncated while open, resuming from start"
        );

        self.offset = 0;
        self.pending.clear();
        self.pending_consumed = 0;
        self.pending_truncated = false;
        self.reader.reset(true);

        if let Err(e) = self.file.seek(SeekFrom::Start(0)) {
            error!(path = ?self.path, "Failed to seek after truncation: {}", e);
            self.begin_close(CloseReason::Error);
            return;
        }

        self.registry.commit(&self.identity, 0, size);
        self.engine.record_activity();
    }

    /// Sleep out one backoff period in slices, watching for cancellation
    /// and the timeout ceiling.
    fn idle_wait(&self) {
        let mut remaining = self.backoff;
        while !remaining.is_zero() {
            if self.cancel.is_cancelled() || self.engine.timed_out() {
                return;
            }
            let step = remaining.min(IDLE_SLICE);
            std::thread::sleep(step);
            remaining -= step;
        }
    }

    /// Single assignment point for the Closing transition; later triggers
    /// are ignored.
    fn begin_close(&mut self, reason: CloseReason) {
        if self.state == SessionState::Running {
            self.state = SessionState::Closing(reason);
        }
    }

    /// Drain fully-buffered lines (no further file reads), commit the final
    /// offset, and release the handle.
    fn finish(mut self) -> HarvesterExit {
        let reason = match self.state {
            SessionState::Closing(reason) => reason,
            SessionState::Running => CloseReason::Stopped,
        };

        // deliver lines already sitting complete in the buffer, unless the
        // close was itself a delivery failure
        if reason != CloseReason::Stopped {
            while let Some(segment) = self.reader.next_segment() {
                if !segment.terminated {
                    // partial flush with no terminator in sight stays
                    // unconsumed; a later harvester re-reads it
                    break;
                }
                self.handle_segment(segment);
            }
        }

        let size = self.file.metadata().map(|m| m.len()).unwrap_or(self.offset);
        self.registry.commit(&self.identity, self.offset, size);
        if reason.is_permanent() {
            self.registry.set_finished(&self.identity, true);
        }

        debug!(
            identity = %self.identity,
            path = ?self.path,
            reason = %reason,
            offset = self.offset,
            "Harvester closed"
        );

        HarvesterExit {
            identity: self.identity,
            reason,
            offset: self.offset,
        }
    }
}
