// SPDX-License-Identifier: Apache-2.0

//! Byte-accurate line extraction over a capped read buffer.
//!
//! The reader accumulates at most `capacity` bytes and splits them at the
//! encoding's LF terminator, matched only at code-unit-aligned positions.
//! When the buffer fills without a terminator the accumulated bytes are
//! force-flushed as an unterminated segment; the harvester reassembles
//! consecutive segments into one message, so an over-long line is delivered
//! whole rather than dropped or split.

use std::io::{self, Read};

use crate::encoding::Encoding;

/// One unit of reader output: a complete line, or a forced flush of an
/// over-long line still awaiting its terminator.
#[derive(Debug, PartialEq, Eq)]
pub struct Segment {
    /// Payload bytes, terminator excluded
    pub bytes: Vec<u8>,
    /// Raw bytes this segment advanced the stream by, terminator included
    /// (and the BOM, for the first segment of a stream)
    pub consumed: u64,
    /// False when this is a buffer-capacity flush of a partial line
    pub terminated: bool,
}

pub struct LineReader {
    encoding: Encoding,
    capacity: usize,
    buf: Vec<u8>,
    /// Armed only when reading starts at offset 0; disarmed after the first
    /// decision either way
    bom_pending: bool,
    /// BOM bytes stripped but not yet attributed to a segment's consumed count
    bom_consumed: u64,
}

impl LineReader {
    pub fn new(encoding: Encoding, capacity: usize, at_start: bool) -> Self {
        Self {
            encoding,
            capacity,
            buf: Vec::with_capacity(capacity),
            bom_pending: at_start,
            bom_consumed: 0,
        }
    }

    /// Pull at most enough bytes from the source to fill the buffer to
    /// capacity. Returns the number of bytes read (0 at end of stream).
    pub fn fill_from<R: Read>(&mut self, source: &mut R) -> io::Result<usize> {
        let want = self.capacity.saturating_sub(self.buf.len());
        if want == 0 {
            return Ok(0);
        }

        let start = self.buf.len();
        self.buf.resize(start + want, 0);
        match source.read(&mut self.buf[start..]) {
            Ok(n) => {
                self.buf.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.buf.truncate(start);
                Err(e)
            }
        }
    }

    /// Extract the next segment from the buffered bytes, or None when no
    /// complete line is available and the buffer is below capacity.
    pub fn next_segment(&mut self) -> Option<Segment> {
        self.strip_bom();
        if self.bom_pending {
            // too few bytes to decide whether a BOM is present
            return None;
        }

        let nl = self.encoding.newline();
        let step = self.encoding.unit_width();

        let mut i = 0;
        while i + nl.len() <= self.buf.len() {
            if &self.buf[i..i + nl.len()] == nl {
                let mut bytes: Vec<u8> = self.buf.drain(..i + nl.len()).collect();
                bytes.truncate(i);
                let consumed = (i + nl.len()) as u64 + std::mem::take(&mut self.bom_consumed);
                return Some(Segment {
                    bytes,
                    consumed,
                    terminated: true,
                });
            }
            i += step;
        }

        if self.buf.len() >= self.capacity {
            // forced flush; keep the split unit-aligned so terminator
            // matching stays correct across the boundary
            let flush = self.buf.len() - (self.buf.len() % step);
            if flush > 0 {
                let bytes: Vec<u8> = self.buf.drain(..flush).collect();
                let consumed = flush as u64 + std::mem::take(&mut self.bom_consumed);
                return Some(Segment {
                    bytes,
                    consumed,
                    terminated: false,
                });
            }
        }

        None
    }

    /// Number of buffered bytes not yet emitted as a segment.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discard buffered bytes and re-arm BOM stripping, used when the file
    /// is truncated underneath the harvester and reading restarts at 0.
    pub fn reset(&mut self, at_start: bool) {
        self.buf.clear();
        self.bom_pending = at_start;
        self.bom_consumed = 0;
    }

    fn strip_bom(&mut self) {
        if !self.bom_pending {
            return;
        }

        let bom = self.encoding.bom();
        if self.buf.len() < bom.len() {
            // keep waiting only while the bytes so far could still be a BOM
            if !bom.starts_with(&self.buf) {
                self.bom_pending = false;
            }
            return;
        }

        if self.buf.starts_with(bom) {
            self.buf.drain(..bom.len());
            self.bom_consumed += bom.len() as u64;
        }
        self.bom_pending = false;
    }
}
