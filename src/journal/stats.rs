//! In-process counter block (§4.12). Mirrors the atomics-plus-snapshot
//! pattern the teacher repository uses for its own storage-engine
//! stats blocks: no external reporter wired up, just a point-in-time
//! read.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct JournalStats {
    records_appended: AtomicU64,
    bytes_appended: AtomicU64,
    flushes: AtomicU64,
    fsyncs: AtomicU64,
    group_commit_batches: AtomicU64,
    group_commit_entries: AtomicU64,
    queue_depth_high_water: AtomicU64,
    files_rolled: AtomicU64,
    files_garbage_collected: AtomicU64,
}

impl JournalStats {
    pub fn record_appended(&self, bytes: u64) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn flush(&self, batch_entries: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.group_commit_batches.fetch_add(1, Ordering::Relaxed);
        self.group_commit_entries.fetch_add(batch_entries, Ordering::Relaxed);
    }

    pub fn fsync(&self) {
        self.fsyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_queue_depth(&self, depth: u64) {
        self.queue_depth_high_water.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn file_rolled(&self) {
        self.files_rolled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_garbage_collected(&self) {
        self.files_garbage_collected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JournalStatsSnapshot {
        JournalStatsSnapshot {
            records_appended: self.records_appended.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            fsyncs: self.fsyncs.load(Ordering::Relaxed),
            group_commit_batches: self.group_commit_batches.load(Ordering::Relaxed),
            group_commit_entries: self.group_commit_entries.load(Ordering::Relaxed),
            queue_depth_high_water: self.queue_depth_high_water.load(Ordering::Relaxed),
            files_rolled: self.files_rolled.load(Ordering::Relaxed),
            files_garbage_collected: self.files_garbage_collected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStatsSnapshot {
    pub records_appended: u64,
    pub bytes_appended: u64,
    pub flushes: u64,
    pub fsyncs: u64,
    pub group_commit_batches: u64,
    pub group_commit_entries: u64,
    pub queue_depth_high_water: u64,
    pub files_rolled: u64,
    pub files_garbage_collected: u64,
}

impl JournalStatsSnapshot {
    /// Average number of entries per group-commit flush; `0.0` before
    /// the first flush.
    pub fn avg_group_commit_size(&self) -> f64 {
        if self.group_commit_batches == 0 {
            0.0
        } else {
            self.group_commit_entries as f64 / self.group_commit_batches as f64
        }
    }
}
