// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use crate::identity::FileIdentity;

/// A single harvested log line, handed to the downstream sink.
///
/// The message text has the BOM and the trailing line terminator stripped.
/// `consumed` is the raw byte length this line advanced the file by,
/// including the terminator (and the BOM for the first line of a stream);
/// `offset` is the committed file offset after this line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEvent {
    pub message: String,
    pub path: PathBuf,
    pub identity: FileIdentity,
    pub consumed: u64,
    pub offset: u64,
}
