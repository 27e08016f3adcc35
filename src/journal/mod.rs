//! Write-ahead journal for a distributed log-storage node: a three-
//! stage producer/consumer pipeline (submit -> writer -> force-write)
//! plus an ordered callback executor, as described in the module-level
//! design documents at the repository root.

pub mod callback;
pub mod config;
pub mod file;
pub mod force_writer;
pub mod last_log_mark;
pub mod record;
pub mod scanner;
pub mod stats;
pub mod writer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Sender;

pub use callback::OrderedCallbackExecutor;
pub use config::JournalConfig;
pub use last_log_mark::Checkpoint;
pub use record::LogMark;
pub use scanner::Scanner;
pub use stats::JournalStatsSnapshot;
pub use writer::{AppendAck, AppendResult, WriteCallback};

use crate::error::{JournalError, Result};
use crate::journal::stats::JournalStats;
use crate::journal::writer::QueueEntry;

const CALLBACK_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The write-ahead journal. Construction starts the writer,
/// force-write, and callback-executor threads; `replay` is a separate,
/// explicit step callers run once at startup before any `append`.
pub struct Journal {
    config: Arc<JournalConfig>,
    write_tx: Sender<QueueEntry>,
    running: Arc<AtomicBool>,
    last_log_mark: Arc<last_log_mark::LastLogMark>,
    stats: Arc<JournalStats>,
    writer_handle: Option<std::thread::JoinHandle<()>>,
    force_handle: Option<std::thread::JoinHandle<()>>,
    callback_executor: Option<Arc<OrderedCallbackExecutor>>,
}

impl Journal {
    /// Starts the journal's pipeline. Requires at least one ledger
    /// directory; an empty list is a construction-time configuration
    /// error, not a runtime I/O race (see `DESIGN.md` Open Question 2).
    pub fn new(config: JournalConfig) -> Result<Journal> {
        if config.ledger_dirs.is_empty() {
            return Err(JournalError::NoWritableLedgerDir { attempted: vec![] });
        }
        std::fs::create_dir_all(&config.journal_dir)?;
        for dir in &config.ledger_dirs {
            std::fs::create_dir_all(dir)?;
        }

        let config = Arc::new(config);
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(JournalStats::default());
        let initial_mark = last_log_mark::read_last_mark(&config.ledger_dirs);
        let last_log_mark = Arc::new(last_log_mark::LastLogMark::new(initial_mark));

        let (write_tx, write_rx) = crossbeam::channel::unbounded::<QueueEntry>();
        let (force_tx, force_rx) = crossbeam::channel::unbounded::<force_writer::ForceWriteRequest>();

        let callback_executor = Arc::new(OrderedCallbackExecutor::new(config.num_journal_callback_threads));

        let force_handle = force_writer::spawn_force_writer_thread(
            config.clone(),
            force_rx,
            force_tx.clone(),
            last_log_mark.clone(),
            callback_executor.clone(),
            stats.clone(),
            running.clone(),
        );
        let writer_handle = writer::spawn_writer_thread(
            config.clone(),
            write_rx,
            force_tx,
            running.clone(),
            stats.clone(),
        );

        Ok(Journal {
            config,
            write_tx,
            running,
            last_log_mark,
            stats,
            writer_handle: Some(writer_handle),
            force_handle: Some(force_handle),
            callback_executor: Some(callback_executor),
        })
    }

    /// Enqueues `payload` for durable append and returns immediately;
    /// never blocks on I/O. `payload`'s first 16 bytes must be the
    /// `(ledger_id, entry_id)` header -- a shorter payload is a
    /// programmer error (panics), not a recoverable condition.
    /// `callback` runs exactly once, in FIFO order relative to other
    /// callbacks submitted with the same `ctx`.
    pub fn append(&self, payload: &[u8], ctx: u64, callback: WriteCallback) {
        let (ledger_id, entry_id) = record::parse_header(payload);
        let entry = QueueEntry {
            payload: payload.to_vec(),
            ledger_id,
            entry_id,
            ctx,
            callback,
            enqueue_time: std::time::Instant::now(),
        };
        if let Err(crossbeam::channel::SendError(entry)) = self.write_tx.send(entry) {
            (entry.callback)(Err(JournalError::Closed));
        }
    }

    /// Number of entries currently waiting in `write_queue` (does not
    /// include entries already picked up by the writer thread).
    pub fn journal_queue_length(&self) -> usize {
        self.write_tx.len()
    }

    /// Snapshots the current durable mark into an immutable checkpoint
    /// the caller can persist (and optionally use to trigger journal
    /// GC) once it has made everything up to this mark durable
    /// elsewhere.
    pub fn request_checkpoint(&self) -> Checkpoint {
        Checkpoint::new(
            self.last_log_mark.snapshot(),
            self.config.journal_dir.clone(),
            Arc::new(self.config.ledger_dirs.clone()),
            self.config.max_backup_journals,
            self.stats.clone(),
        )
    }

    /// Replays every record from the durable mark forward, delivering
    /// each to `scanner`. Must be called once at startup before the
    /// first `append`; refines the in-memory mark to the exact offset
    /// replay stopped at.
    pub fn replay(&self, scanner: &mut dyn Scanner) -> Result<LogMark> {
        let start_mark = self.last_log_mark.snapshot();
        let refined = scanner::replay(&self.config.journal_dir, start_mark, scanner)?;
        self.last_log_mark.advance(refined);
        Ok(refined)
    }

    /// Scans a single journal file by `log_id`, independent of replay.
    pub fn scan_journal(
        &self,
        log_id: u64,
        start_offset: u64,
        scanner: &mut dyn Scanner,
    ) -> Result<u64> {
        let path = self.config.journal_dir.join(file::log_id_to_filename(log_id));
        scanner::scan_journal_file(&path, start_offset, scanner)
    }

    /// Known `log_id`s on disk, ascending.
    pub fn journal_directory_listing(&self) -> Result<Vec<u64>> {
        file::list_log_ids(&self.config.journal_dir)
    }

    pub fn stats(&self) -> JournalStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stops accepting new appends, drains and closes the current
    /// journal file, and joins the writer/force-write/callback
    /// threads. Entries already enqueued before this call are still
    /// flushed and their callbacks dispatched; calls to `append` that
    /// race with (or follow) `shutdown` get `JournalError::Closed`
    /// instead of blocking forever. Callers should still quiesce their
    /// own submitters first -- this is a safety net, not a supported
    /// concurrent-shutdown protocol.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::Release);
        let Journal {
            write_tx,
            writer_handle,
            force_handle,
            callback_executor,
            ..
        } = self;
        drop(write_tx);
        if let Some(handle) = writer_handle {
            let _ = handle.join();
        }
        if let Some(handle) = force_handle {
            let _ = handle.join();
        }
        if let Some(executor) = callback_executor {
            match Arc::try_unwrap(executor) {
                Ok(executor) => executor.shutdown(CALLBACK_SHUTDOWN_GRACE),
                Err(_) => {
                    tracing::warn!("callback executor still has outstanding references at shutdown");
                }
            }
        }
    }
}
