//! rusty-journal - write-ahead journal for a distributed log-storage node.
//!
//! This crate is the durability boundary for entry writes on a single
//! storage node ("bookie"): every entry is recorded here, forced to
//! stable storage, and only then acknowledged. See `journal` for the
//! append pipeline, group-commit force-write stage, journal-file
//! lifecycle, last-log-mark checkpoint protocol, and replay scanner.

pub mod error;
pub mod journal;

pub use error::{JournalError, Result};
pub use journal::{
    AppendAck, AppendResult, Checkpoint, Journal, JournalConfig, JournalStatsSnapshot, LogMark,
    Scanner, WriteCallback,
};
