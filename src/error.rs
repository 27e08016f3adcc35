use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy for the journal. Every fallible operation in this
/// crate returns one of these variants; `Io` covers anything else the
/// OS reports that the other variants don't name more specifically.
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no writable ledger directory among {attempted:?}")]
    NoWritableLedgerDir { attempted: Vec<PathBuf> },

    #[error("corrupt record in journal {log_id:016x} at offset {offset}: {reason}")]
    CorruptRecord {
        log_id: u64,
        offset: u64,
        reason: String,
    },

    #[error("replay mark points at missing journal {log_id:016x}")]
    MissingRecoveryLog { log_id: u64 },

    #[error("journal is shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, JournalError>;
