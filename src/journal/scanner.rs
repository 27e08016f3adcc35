//! Replay/scan protocol (§4.7): sequential, torn-tail tolerant reading
//! of a journal file's records, and `replay` across the ascending
//! sequence of journal files starting at a recovery mark.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{JournalError, Result};
use crate::journal::file::{self, HEADER_LEN};
use crate::journal::record::{self, LogMark, PADDING_MASK};

/// Receives records found during a scan. `process` sees
/// `(format_version, record_offset, payload)` for every real record;
/// padding records and a torn final record are never delivered.
pub trait Scanner {
    fn process(&mut self, format_version: u32, record_offset: u64, payload: &[u8]) -> Result<()>;
}

impl<F> Scanner for F
where
    F: FnMut(u32, u64, &[u8]) -> Result<()>,
{
    fn process(&mut self, format_version: u32, record_offset: u64, payload: &[u8]) -> Result<()> {
        self(format_version, record_offset, payload)
    }
}

/// Scans one journal file starting at `start_offset` (clamped to just
/// after the header), delivering every real record to `scanner`.
/// Returns the file offset of the last record delivered (or
/// `start_offset` if none were).
pub fn scan_journal_file(
    path: &Path,
    start_offset: u64,
    scanner: &mut dyn Scanner,
) -> Result<u64> {
    let (mut f, format_version) = file::JournalFile::open_for_scan(path)?;
    let log_id = file::filename_to_log_id(
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default(),
    )
    .unwrap_or(0);

    let start = start_offset.max(HEADER_LEN);
    f.seek(SeekFrom::Start(start))?;

    let mut last_offset = start;
    loop {
        let pos = f.stream_position()?;
        let len = match read_i32(&mut f)? {
            Some(v) => v,
            None => break, // EOF/short read: stop cleanly, nothing to undo.
        };

        if len == 0 {
            // Logical EOF: trailing zero bytes left by preallocation.
            break;
        }

        if len == PADDING_MASK {
            record::check_format_supports_padding(format_version, log_id, pos)?;
            let pad_len = match read_i32(&mut f)? {
                Some(v) => v,
                None => break,
            };
            if pad_len < 0 {
                return Err(record::corrupt(
                    log_id,
                    pos,
                    format!("negative padding length {pad_len}"),
                ));
            }
            if pad_len > 0 && !skip_exact(&mut f, pad_len as u64)? {
                break; // torn padding tail: stop cleanly.
            }
            continue; // padding is never delivered to the scanner.
        }

        if len < 0 {
            return Err(record::corrupt(
                log_id,
                pos,
                format!("negative record length {len} on a non-padding record"),
            ));
        }

        let mut payload = vec![0u8; len as usize];
        if !read_exact_or_eof(&mut f, &mut payload)? {
            tracing::warn!(file = %path.display(), offset = pos, "torn tail: final record truncated, stopping replay at this file");
            break;
        }

        scanner.process(format_version, pos, &payload)?;
        last_offset = pos;
    }

    Ok(last_offset)
}

/// Reads a 4-byte big-endian `i32`. Returns `Ok(None)` on a clean EOF
/// (no bytes at all) or a short read (a torn length prefix), both of
/// which mean "stop scanning", not "error".
fn read_i32(f: &mut File) -> Result<Option<i32>> {
    let mut buf = [0u8; 4];
    if !read_exact_or_eof(f, &mut buf)? {
        return Ok(None);
    }
    Ok(Some(i32::from_be_bytes(buf)))
}

/// Like `Read::read_exact`, but a short read (including zero bytes
/// read) returns `Ok(false)` instead of an `UnexpectedEof` error.
fn read_exact_or_eof(f: &mut File, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match f.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn skip_exact(f: &mut File, len: u64) -> Result<bool> {
    let mut remaining = len;
    let mut buf = [0u8; 4096];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        match f.read(&mut buf[..want]) {
            Ok(0) => return Ok(false),
            Ok(n) => remaining -= n as u64,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Enumerates every journal file with `log_id >= mark.log_id`
/// ascending, scanning each: the first file resumes at `mark.offset`,
/// every later file starts from its body (right after the header).
/// Raises `MissingRecoveryLog` when `mark.log_id > 0` but the file it
/// names is absent.
pub fn replay(journal_dir: &Path, mark: LogMark, scanner: &mut dyn Scanner) -> Result<LogMark> {
    let ids = file::list_log_ids(journal_dir)?;
    let candidates: Vec<u64> = ids.into_iter().filter(|&id| id >= mark.log_id).collect();

    if mark.log_id > 0 {
        match candidates.first() {
            Some(&first) if first == mark.log_id => {}
            _ => return Err(JournalError::MissingRecoveryLog { log_id: mark.log_id }),
        }
    }

    tracing::info!(
        files = candidates.len(),
        from_log_id = mark.log_id,
        from_offset = mark.offset,
        "replay starting"
    );

    let mut current_mark = mark;
    for (i, log_id) in candidates.iter().enumerate() {
        let path = journal_dir.join(file::log_id_to_filename(*log_id));
        let start_offset = if i == 0 { mark.offset } else { 0 };
        let last_offset = scan_journal_file(&path, start_offset, scanner)?;
        if last_offset > 0 || *log_id > mark.log_id {
            current_mark = LogMark::new(*log_id, last_offset);
        }
    }
    Ok(current_mark)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::file::JournalFile;
    use tempfile::tempdir;

    struct Collector(Vec<(u64, u64, Vec<u8>)>);

    impl Scanner for Collector {
        fn process(&mut self, format_version: u32, offset: u64, payload: &[u8]) -> Result<()> {
            self.0.push((format_version as u64, offset, payload.to_vec()));
            Ok(())
        }
    }

    fn payload_for(ledger_id: u64, entry_id: u64) -> Vec<u8> {
        let mut p = vec![0u8; 32];
        p[0..8].copy_from_slice(&ledger_id.to_be_bytes());
        p[8..16].copy_from_slice(&entry_id.to_be_bytes());
        p
    }

    #[test]
    fn scans_records_and_skips_padding() {
        let dir = tempdir().unwrap();
        let (mut jf, sync) = JournalFile::create(dir.path(), 1, 8192, 8192).unwrap();
        jf.write_record(&payload_for(1, 1)).unwrap();
        jf.write_record(&payload_for(1, 2)).unwrap();
        jf.write_padding_if_needed();
        jf.flush(true).unwrap();
        sync.force_write(true).unwrap();

        let path = dir.path().join(file::log_id_to_filename(1));
        let mut collector = Collector(Vec::new());
        scan_journal_file(&path, 0, &mut collector).unwrap();
        assert_eq!(collector.0.len(), 2);
        assert_eq!(collector.0[0].2, payload_for(1, 1));
        assert_eq!(collector.0[1].2, payload_for(1, 2));
    }

    #[test]
    fn torn_tail_is_silently_truncated() {
        let dir = tempdir().unwrap();
        let (mut jf, _sync) = JournalFile::create(dir.path(), 1, 8192, 8192).unwrap();
        for i in 0..11u64 {
            jf.write_record(&payload_for(1, i)).unwrap();
        }
        jf.flush(true).unwrap();

        let path = dir.path().join(file::log_id_to_filename(1));
        // Truncate the file to chop off the 11th record's tail.
        let full_len = std::fs::metadata(&path).unwrap().len();
        let truncated = full_len - 10;
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(truncated).unwrap();
        drop(f);

        let mut collector = Collector(Vec::new());
        scan_journal_file(&path, 0, &mut collector).unwrap();
        assert_eq!(collector.0.len(), 10);
    }

    #[test]
    fn missing_recovery_log_is_raised_when_mark_points_at_absent_file() {
        let dir = tempdir().unwrap();
        let mut collector = Collector(Vec::new());
        let err = replay(dir.path(), LogMark::new(5, 0), &mut collector).unwrap_err();
        assert!(matches!(err, JournalError::MissingRecoveryLog { log_id: 5 }));
    }

    #[test]
    fn zero_mark_with_empty_directory_replays_nothing() {
        let dir = tempdir().unwrap();
        let mut collector = Collector(Vec::new());
        let mark = replay(dir.path(), LogMark::ZERO, &mut collector).unwrap();
        assert_eq!(mark, LogMark::ZERO);
        assert!(collector.0.is_empty());
    }

    #[test]
    fn replay_spans_rollover_across_two_files_in_order() {
        let dir = tempdir().unwrap();
        let (mut jf1, _s1) = JournalFile::create(dir.path(), 1, 8192, 8192).unwrap();
        jf1.write_record(&payload_for(1, 1)).unwrap();
        jf1.write_record(&payload_for(1, 2)).unwrap();
        jf1.flush(true).unwrap();

        let (mut jf2, _s2) = JournalFile::create(dir.path(), 2, 8192, 8192).unwrap();
        jf2.write_record(&payload_for(1, 3)).unwrap();
        jf2.flush(true).unwrap();

        let mut collector = Collector(Vec::new());
        replay(dir.path(), LogMark::ZERO, &mut collector).unwrap();
        let entry_ids: Vec<u8> = collector.0.iter().map(|(_, _, p)| p[15]).collect();
        assert_eq!(entry_ids, vec![1, 2, 3]);
    }
}
