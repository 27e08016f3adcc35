//! Force-write stage (§4.3): drains `force_queue`, decides whether to
//! actually sync or elide the sync via adaptive grouping, advances the
//! durable `last_log_mark`, and dispatches waiter callbacks in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use crate::journal::callback::OrderedCallbackExecutor;
use crate::journal::config::JournalConfig;
use crate::journal::file::JournalSyncHandle;
use crate::journal::last_log_mark::LastLogMark;
use crate::journal::record::LogMark;
use crate::journal::stats::JournalStats;
use crate::journal::writer::{AppendAck, QueueEntry};

/// One unit of work for the force-write stage: a flushed byte range
/// that needs syncing (or is a marker/no-op carrying no range), plus
/// the entries whose callbacks are waiting on it.
pub struct ForceWriteRequest {
    pub sync: Arc<JournalSyncHandle>,
    pub log_id: u64,
    pub start_flush_pos: u64,
    pub end_flush_pos: u64,
    pub waiters: Vec<QueueEntry>,
    pub should_close: bool,
    pub is_marker: bool,
}

impl ForceWriteRequest {
    pub fn marker(sync: Arc<JournalSyncHandle>, log_id: u64) -> Self {
        ForceWriteRequest {
            sync,
            log_id,
            start_flush_pos: 0,
            end_flush_pos: 0,
            waiters: Vec::new(),
            should_close: false,
            is_marker: true,
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn spawn_force_writer_thread(
    config: Arc<JournalConfig>,
    force_rx: Receiver<ForceWriteRequest>,
    marker_tx: Sender<ForceWriteRequest>,
    last_log_mark: Arc<LastLogMark>,
    callback_executor: Arc<OrderedCallbackExecutor>,
    stats: Arc<JournalStats>,
    running: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("bk-journal-force".to_string())
        .spawn(move || {
            run_force_writer(
                &config,
                &force_rx,
                marker_tx,
                &last_log_mark,
                &callback_executor,
                &stats,
                &running,
            )
        })
        .expect("failed to spawn journal force-write thread")
}

fn run_force_writer(
    config: &JournalConfig,
    force_rx: &Receiver<ForceWriteRequest>,
    mut marker_tx: Sender<ForceWriteRequest>,
    last_log_mark: &LastLogMark,
    callback_executor: &OrderedCallbackExecutor,
    stats: &JournalStats,
    running: &AtomicBool,
) {
    // True when the next non-marker request still needs a real sync;
    // cleared once we've synced and armed a marker to re-enable it.
    let mut need_sync = true;

    loop {
        // Once shutdown begins, stop self-enqueueing markers so the
        // channel can actually drain to disconnect once the writer
        // thread's sender side is gone too.
        if !running.load(Ordering::Acquire) {
            marker_tx = drop_marker_tx(marker_tx);
        }

        let req = match force_rx.recv() {
            Ok(req) => req,
            Err(_) => break,
        };

        if req.is_marker {
            need_sync = true;
            continue;
        }

        if config.journal_adaptive_group_writes {
            // A `should_close` request is never part of the skip set,
            // even while elision is active: its bytes must be durable
            // before the file is dropped, since there is no later
            // marker-driven fsync to cover them once it's closed.
            if need_sync || req.should_close {
                if let Err(e) = req.sync.force_write(false) {
                    tracing::error!(log_id = req.log_id, error = %e, "fsync failed in force-write stage");
                    fail_waiters(req.waiters, &e);
                    continue;
                }
                stats.fsync();
                need_sync = false;
                if running.load(Ordering::Acquire) {
                    let _ = marker_tx.send(ForceWriteRequest::marker(req.sync.clone(), req.log_id));
                }
            }
        } else if let Err(e) = req.sync.sync_range(req.start_flush_pos, req.end_flush_pos - req.start_flush_pos) {
            tracing::error!(log_id = req.log_id, error = %e, "range sync failed in force-write stage");
            fail_waiters(req.waiters, &e);
            continue;
        } else {
            stats.fsync();
        }

        if config.journal_remove_pages_from_cache {
            req.sync
                .advise_dont_need(req.start_flush_pos, req.end_flush_pos - req.start_flush_pos);
        }

        last_log_mark.advance(LogMark::new(req.log_id, req.end_flush_pos));

        for waiter in req.waiters {
            let ack = AppendAck {
                log_id: req.log_id,
                offset: req.end_flush_pos,
            };
            callback_executor.submit(waiter.ctx, Box::new(move || (waiter.callback)(Ok(ack))));
        }

        if req.should_close {
            need_sync = true;
            tracing::debug!(log_id = req.log_id, path = %req.sync.path.display(), "closing journal file");
            // `JournalSyncHandle` closes its fd on drop; dropping our
            // reference here (the writer side has already dropped
            // its own) is what makes close idempotent: there is
            // nothing left to close a second time.
        }
    }
}

fn drop_marker_tx(_tx: Sender<ForceWriteRequest>) -> Sender<ForceWriteRequest> {
    // Replace the live sender with one whose receiver is immediately
    // dropped, so further (accidental) sends fail silently instead of
    // keeping the real force_queue artificially alive.
    let (tx, _rx) = crossbeam::channel::unbounded();
    tx
}

/// Fans a fatal I/O error out to every waiter's callback. `JournalError`
/// is not `Clone` (it wraps `std::io::Error`), so each waiter gets its
/// own freshly built error carrying the same message.
fn fail_waiters(waiters: Vec<QueueEntry>, err: &crate::error::JournalError) {
    let message = err.to_string();
    for waiter in waiters {
        (waiter.callback)(Err(crate::error::JournalError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            message.clone(),
        ))));
    }
}
