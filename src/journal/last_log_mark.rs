//! Last-log-mark protocol (§4.5): the durable watermark every ledger
//! directory keeps a copy of, the checkpoint snapshot taken from it,
//! and checkpoint-driven backup-journal garbage collection.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::journal::file;
use crate::journal::record::LogMark;
use crate::journal::stats::JournalStats;

const LAST_MARK_FILE_NAME: &str = "lastMark";

/// The single mutable source of truth for how far the journal has been
/// durably synced. Only the force-write stage ever advances it.
pub struct LastLogMark {
    mark: RwLock<LogMark>,
}

impl LastLogMark {
    pub fn new(initial: LogMark) -> Self {
        LastLogMark {
            mark: RwLock::new(initial),
        }
    }

    /// Advances the mark to `new_mark` if it is strictly greater than
    /// the current one under the `(log_id, offset)` total order.
    pub fn advance(&self, new_mark: LogMark) {
        let mut guard = self.mark.write();
        if new_mark > *guard {
            *guard = new_mark;
        }
    }

    pub fn snapshot(&self) -> LogMark {
        *self.mark.read()
    }
}

/// An immutable snapshot of the durable mark, taken by
/// `Journal::request_checkpoint`. `completed` is the caller's
/// acknowledgement that everything up to this mark has been persisted
/// elsewhere (e.g. ledger index checkpoints), so the journal can record
/// the mark and, optionally, reclaim old journal files.
pub struct Checkpoint {
    mark: LogMark,
    journal_dir: PathBuf,
    ledger_dirs: Arc<Vec<PathBuf>>,
    max_backup_journals: usize,
    stats: Arc<JournalStats>,
}

impl Checkpoint {
    pub fn new(
        mark: LogMark,
        journal_dir: PathBuf,
        ledger_dirs: Arc<Vec<PathBuf>>,
        max_backup_journals: usize,
        stats: Arc<JournalStats>,
    ) -> Self {
        Checkpoint {
            mark,
            journal_dir,
            ledger_dirs,
            max_backup_journals,
            stats,
        }
    }

    pub fn mark(&self) -> LogMark {
        self.mark
    }

    /// Persists the mark to every ledger directory. `compact=true`
    /// additionally garbage-collects journal files with `log_id` below
    /// this checkpoint's mark, keeping at most `max_backup_journals` of
    /// them around for recovery debugging.
    pub fn completed(&self, compact: bool) -> Result<()> {
        self.roll_log()?;
        if compact {
            self.garbage_collect()?;
        }
        Ok(())
    }

    fn roll_log(&self) -> Result<()> {
        if self.ledger_dirs.is_empty() {
            return Err(crate::error::JournalError::NoWritableLedgerDir { attempted: vec![] });
        }
        let bytes = self.mark.to_bytes();
        let mut any_ok = false;
        for dir in self.ledger_dirs.iter() {
            match write_last_mark(dir, &bytes) {
                Ok(()) => any_ok = true,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "failed to write lastMark for ledger directory");
                }
            }
        }
        if !any_ok {
            // Open Question 2: all directories failed. The spec resolves
            // this as non-fatal, logged loudly so an operator notices;
            // request_checkpoint keeps returning the same mark until the
            // write succeeds somewhere.
            tracing::warn!(
                mark_log_id = self.mark.log_id,
                mark_offset = self.mark.offset,
                "every ledger directory rejected the lastMark write; durable mark is stale until an operator intervenes"
            );
        }
        Ok(())
    }

    fn garbage_collect(&self) -> Result<()> {
        let mut ids = file::list_log_ids(&self.journal_dir)?;
        ids.retain(|&id| id < self.mark.log_id);
        ids.sort_unstable();
        if ids.len() > self.max_backup_journals {
            let delete_count = ids.len() - self.max_backup_journals;
            for id in &ids[..delete_count] {
                let path = self.journal_dir.join(file::log_id_to_filename(*id));
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        self.stats.file_garbage_collected();
                        tracing::info!(file = %path.display(), "garbage-collected old journal file");
                    }
                    Err(e) => tracing::warn!(file = %path.display(), error = %e, "failed to delete old journal during checkpoint GC"),
                }
            }
        }
        Ok(())
    }
}

fn write_last_mark(ledger_dir: &Path, bytes: &[u8; 16]) -> std::io::Result<()> {
    std::fs::create_dir_all(ledger_dir)?;
    let path = ledger_dir.join(LAST_MARK_FILE_NAME);
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    Ok(())
}

/// Startup read path: reads every ledger directory's `lastMark` and
/// returns the maximum by the `(log_id, offset)` total order. Absent,
/// short, or corrupt files are treated as the zero mark rather than
/// rejected, since a ledger directory that was just created has no
/// mark yet.
pub fn read_last_mark(ledger_dirs: &[PathBuf]) -> LogMark {
    let mut best = LogMark::ZERO;
    for dir in ledger_dirs {
        let path = dir.join(LAST_MARK_FILE_NAME);
        if let Ok(bytes) = std::fs::read(&path) {
            if let Some(mark) = LogMark::from_bytes(&bytes) {
                if mark > best {
                    best = mark;
                }
            }
        }
    }
    best
}
