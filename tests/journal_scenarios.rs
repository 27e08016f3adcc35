//! Cross-module scenario tests (S1-S6 from the durability spec this
//! crate implements), exercised through the public `Journal` API rather
//! than any single module's internals.

use std::sync::{mpsc, Once};
use std::time::Duration;

use rusty_journal::{AppendResult, Journal, JournalConfig, LogMark, Scanner};
use tempfile::tempdir;

static TRACING_INIT: Once = Once::new();

/// Surfaces the journal's `tracing` output (flush/fsync/GC decisions)
/// under `cargo test -- --nocapture`, matching how the teacher
/// repository wires up `tracing_subscriber` for anything that logs.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn payload_of(ledger_id: u64, entry_id: u64, body_len: usize) -> Vec<u8> {
    let mut p = vec![0u8; 16 + body_len];
    p[0..8].copy_from_slice(&ledger_id.to_be_bytes());
    p[8..16].copy_from_slice(&entry_id.to_be_bytes());
    p
}

fn append_and_wait(journal: &Journal, payload: &[u8], ctx: u64) -> AppendResult {
    let (tx, rx) = mpsc::channel();
    journal.append(
        payload,
        ctx,
        Box::new(move |res| {
            let _ = tx.send(res);
        }),
    );
    rx.recv_timeout(Duration::from_secs(5))
        .expect("callback should fire within timeout")
}

struct Collector(Vec<(u32, u64, Vec<u8>)>);

impl Scanner for Collector {
    fn process(&mut self, format_version: u32, offset: u64, payload: &[u8]) -> rusty_journal::Result<()> {
        self.0.push((format_version, offset, payload.to_vec()));
        Ok(())
    }
}

/// S1: single append, single fsync. A small record flushed eagerly
/// (queue-empty flush) should ack quickly and leave the durable mark at
/// the sector-aligned position right after the padding record.
#[test]
fn s1_single_append_single_fsync() {
    init_tracing();
    let journal_dir = tempdir().unwrap();
    let ledger_dir = tempdir().unwrap();
    let mut cfg = JournalConfig::new(journal_dir.path(), vec![ledger_dir.path().to_path_buf()]);
    cfg.journal_max_group_wait_ms = 10;
    cfg.journal_flush_when_queue_empty = true;
    let journal = Journal::new(cfg).unwrap();

    let payload = payload_of(7, 0, 16); // 32 bytes total
    let result = append_and_wait(&journal, &payload, 7);
    assert!(result.is_ok(), "callback should report success: {:?}", result.err());

    let checkpoint = journal.request_checkpoint();
    let ids = journal.journal_directory_listing().unwrap();
    assert_eq!(ids.len(), 1);
    // header (512) + [len:4][payload:32] = 548, padded up to the next
    // 512-byte boundary (1024).
    assert_eq!(checkpoint.mark(), LogMark::new(ids[0], 1024));

    journal.shutdown();
}

/// S2: group commit amortizes fsync. A burst of small records under
/// adaptive grouping should land on far fewer than one fsync per record.
#[test]
fn s2_group_commit_amortizes_fsync() {
    init_tracing();
    let journal_dir = tempdir().unwrap();
    let ledger_dir = tempdir().unwrap();
    let mut cfg = JournalConfig::new(journal_dir.path(), vec![ledger_dir.path().to_path_buf()]);
    cfg.journal_adaptive_group_writes = true;
    cfg.journal_max_group_wait_ms = 5;
    let journal = Journal::new(cfg).unwrap();

    const N: u64 = 1000;
    let mut receivers = Vec::with_capacity(N as usize);
    for i in 0..N {
        let payload = payload_of(1, i, 112); // 128 bytes total
        let (tx, rx) = mpsc::channel();
        journal.append(
            &payload,
            1,
            Box::new(move |res| {
                let _ = tx.send(res);
            }),
        );
        receivers.push(rx);
        std::thread::sleep(Duration::from_micros(100)); // ~10 kHz
    }

    let mut ok_count = 0;
    for rx in receivers {
        if rx.recv_timeout(Duration::from_secs(10)).unwrap().is_ok() {
            ok_count += 1;
        }
    }
    assert_eq!(ok_count, N);

    let stats = journal.stats();
    assert!(
        stats.fsyncs < 250,
        "expected amortized fsyncs under group commit, got {}",
        stats.fsyncs
    );

    journal.shutdown();
}

/// S3: rollover. Once the flushed position crosses `max_journal_size`,
/// the writer rolls to a new file; replay after shutdown walks both
/// files in ascending log_id order and recovers every record.
#[test]
fn s3_rollover_preserves_sequence() {
    init_tracing();
    let journal_dir = tempdir().unwrap();
    let ledger_dir = tempdir().unwrap();
    let mut cfg = JournalConfig::new(journal_dir.path(), vec![ledger_dir.path().to_path_buf()]);
    cfg.max_journal_size_mb = 1; // smallest unit this config exposes
    cfg.journal_buffered_entries_threshold = 1; // flush every entry, deterministic rollover point
    let journal = Journal::new(cfg).unwrap();

    const TOTAL: u64 = 15;
    const BODY_LEN: usize = 100_000; // ~100 KB records cross the 1 MiB mark quickly
    for i in 0..TOTAL {
        let payload = payload_of(3, i, BODY_LEN);
        let result = append_and_wait(&journal, &payload, 3);
        assert!(result.is_ok());
    }

    let ids = journal.journal_directory_listing().unwrap();
    assert!(ids.len() >= 2, "expected at least one rollover, got {} files", ids.len());

    journal.shutdown();

    let journal2 = Journal::new(JournalConfig::new(
        journal_dir.path(),
        vec![ledger_dir.path().to_path_buf()],
    ))
    .unwrap();
    let mut collector = Collector(Vec::new());
    journal2.replay(&mut collector).unwrap();
    journal2.shutdown();

    let entry_ids: Vec<u64> = collector
        .0
        .iter()
        .map(|(_, _, payload)| u64::from_be_bytes(payload[8..16].try_into().unwrap()))
        .collect();
    assert_eq!(entry_ids, (0..TOTAL).collect::<Vec<_>>());
}

/// S4: torn-tail replay. A crash mid-write of the final record must not
/// lose or corrupt any earlier record; replay stops cleanly at the tear.
#[test]
fn s4_torn_tail_replay_recovers_prior_records() {
    init_tracing();
    let journal_dir = tempdir().unwrap();
    let ledger_dir = tempdir().unwrap();
    let cfg = JournalConfig::new(journal_dir.path(), vec![ledger_dir.path().to_path_buf()]);
    let journal = Journal::new(cfg).unwrap();

    for i in 0..10u64 {
        let payload = payload_of(9, i, 16);
        let result = append_and_wait(&journal, &payload, 9);
        assert!(result.is_ok());
    }
    let ids = journal.journal_directory_listing().unwrap();
    assert_eq!(ids.len(), 1);
    journal.shutdown();

    let path = journal_dir
        .path()
        .join(format!("{:016x}.txn", ids[0]));
    let full_len = std::fs::metadata(&path).unwrap().len();
    std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(full_len - 5)
        .unwrap();

    let journal2 = Journal::new(JournalConfig::new(
        journal_dir.path(),
        vec![ledger_dir.path().to_path_buf()],
    ))
    .unwrap();
    let mut collector = Collector(Vec::new());
    journal2.replay(&mut collector).unwrap();
    journal2.shutdown();

    assert_eq!(collector.0.len(), 10);
}

/// S5: checkpoint GC. After a compacting checkpoint, only
/// `max_backup_journals` files older than the mark (plus the current
/// file) remain.
#[test]
fn s5_checkpoint_gc_retains_backup_limit() {
    init_tracing();
    let journal_dir = tempdir().unwrap();
    let ledger_dir = tempdir().unwrap();
    let mut cfg = JournalConfig::new(journal_dir.path(), vec![ledger_dir.path().to_path_buf()]);
    cfg.max_journal_size_mb = 1;
    cfg.journal_buffered_entries_threshold = 1;
    cfg.max_backup_journals = 2;
    let journal = Journal::new(cfg).unwrap();

    const BODY_LEN: usize = 100_000;
    let mut i = 0u64;
    while journal.journal_directory_listing().unwrap().len() < 5 {
        let payload = payload_of(4, i, BODY_LEN);
        append_and_wait(&journal, &payload, 4).unwrap();
        i += 1;
    }

    let checkpoint = journal.request_checkpoint();
    checkpoint.completed(true).unwrap();

    let remaining = journal.journal_directory_listing().unwrap();
    let below_mark = remaining.iter().filter(|&&id| id < checkpoint.mark().log_id).count();
    assert!(
        below_mark <= 2,
        "expected at most max_backup_journals=2 files below the mark, found {}",
        below_mark
    );

    journal.shutdown();
}

/// S6: startup reads the lexicographic max of every ledger directory's
/// `lastMark`, not just the first one found.
#[test]
fn s6_startup_mark_is_best_of_all_ledger_dirs() {
    init_tracing();
    let journal_dir = tempdir().unwrap();
    let ledger_dir_a = tempdir().unwrap();
    let ledger_dir_b = tempdir().unwrap();

    std::fs::write(
        ledger_dir_a.path().join("lastMark"),
        LogMark::new(10, 100).to_bytes(),
    )
    .unwrap();
    std::fs::write(
        ledger_dir_b.path().join("lastMark"),
        LogMark::new(12, 50).to_bytes(),
    )
    .unwrap();

    let cfg = JournalConfig::new(
        journal_dir.path(),
        vec![
            ledger_dir_a.path().to_path_buf(),
            ledger_dir_b.path().to_path_buf(),
        ],
    );
    let journal = Journal::new(cfg).unwrap();
    let checkpoint = journal.request_checkpoint();
    assert_eq!(checkpoint.mark(), LogMark::new(12, 50));

    journal.shutdown();
}
