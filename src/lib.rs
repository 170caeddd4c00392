// SPDX-License-Identifier: Apache-2.0

//! File harvesting core for a log shipping agent.
//!
//! Discovers files by glob pattern, tails each one with a dedicated
//! harvester, and delivers terminated lines as [`LineEvent`]s through a
//! bounded channel. Read progress is tracked per physical file (device and
//! inode, not path) in a durable registry, so restarts resume where the
//! previous run left off and rotated files are never re-read.
//!
//! ```no_run
//! use skidder::{bounded_channel, FileInput, HarvestConfig};
//! use tokio::task::JoinSet;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarvestConfig {
//!     include: vec!["/var/log/*.log".to_string()],
//!     ..Default::default()
//! };
//!
//! let (tx, mut rx) = bounded_channel::bounded(1024);
//! let cancel = CancellationToken::new();
//! let mut tasks = JoinSet::new();
//!
//! FileInput::new(config, tx)?.start(&mut tasks, &cancel);
//!
//! while let Some(event) = rx.next().await {
//!     println!("{}: {}", event.path.display(), event.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bounded_channel;
pub mod close_policy;
pub mod config;
pub mod encoding;
pub mod error;
pub mod event;
pub mod finder;
pub mod harvester;
pub mod identity;
pub mod input;
pub mod reader;
pub mod registry;

pub use close_policy::{ClosePolicy, CloseReason};
pub use config::{HarvestConfig, StartAt};
pub use encoding::{DecodeErrorPolicy, Encoding};
pub use error::{Error, Result};
pub use event::LineEvent;
pub use identity::FileIdentity;
pub use input::FileInput;
pub use registry::{FileState, Registry};
