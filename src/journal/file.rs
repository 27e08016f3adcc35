//! On-disk `JournalFile`: a fixed header followed by length-prefixed
//! records, a buffered write channel, and the preallocation/force-write
//! primitives the writer and force-write stages drive.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::error::Result;
use crate::journal::record::{self, CURRENT_FORMAT_VERSION};

/// Magic bytes identifying a journal file.
const MAGIC: &[u8; 4] = b"BKJL";
/// Fixed header length. One sector, so the first real record after the
/// header already starts on a sector boundary.
pub const HEADER_LEN: u64 = 512;

/// Filename for the journal file holding the given `log_id`: zero-padded
/// lowercase hex, matching `<log_id_hex>.txn` from the data model.
pub fn log_id_to_filename(log_id: u64) -> String {
    format!("{:016x}.txn", log_id)
}

/// Parses a `log_id` back out of a `.txn` filename; returns `None` for
/// anything that doesn't match the naming convention (directory noise
/// such as `lastMark` or a stray temp file).
pub fn filename_to_log_id(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".txn")?;
    u64::from_str_radix(stem, 16).ok()
}

/// Lists the `log_id`s of every journal file in `dir`, ascending.
pub fn list_log_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(id) = filename_to_log_id(name) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Picks the next `log_id` for a freshly minted journal file: strictly
/// greater than every existing id and than the wall clock, so a
/// backward clock jump can never collide with a file already on disk
/// (§9 Design Note 3).
pub fn next_log_id(existing: &[u64], wall_clock_millis: u64) -> u64 {
    let max_existing = existing.iter().copied().max().unwrap_or(0);
    max_existing.max(wall_clock_millis) + 1
}

/// A fd-only handle used by the force-write stage to fsync/range-sync a
/// journal file while the writer stage keeps writing to it through a
/// separate handle. Both share the same underlying open file
/// description (via `try_clone`), so syncing one observes the other's
/// writes; neither side seeks through this handle.
pub struct JournalSyncHandle {
    file: File,
    pub log_id: u64,
    pub path: PathBuf,
}

impl JournalSyncHandle {
    /// `meta=true` syncs data and metadata (`fsync`); `meta=false`
    /// syncs data only (`fdatasync`), falling back to `fsync` on
    /// platforms without a data-only sync call.
    pub fn force_write(&self, meta: bool) -> Result<()> {
        #[cfg(unix)]
        {
            let rc = unsafe {
                if meta {
                    libc::fsync(self.file.as_raw_fd())
                } else {
                    libc::fdatasync(self.file.as_raw_fd())
                }
            };
            if rc != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            if meta {
                self.file.sync_all()?;
            } else {
                self.file.sync_data()?;
            }
            Ok(())
        }
    }

    /// Syncs only `[offset, offset+len)`. Falls back to a full
    /// `force_write(true)` on platforms (or filesystems) without range
    /// sync support.
    pub fn sync_range(&self, offset: u64, len: u64) -> Result<()> {
        #[cfg(target_os = "linux")]
        {
            let rc = unsafe {
                libc::sync_file_range(
                    self.file.as_raw_fd(),
                    offset as libc::off64_t,
                    len as libc::off64_t,
                    libc::SYNC_FILE_RANGE_WAIT_BEFORE
                        | libc::SYNC_FILE_RANGE_WRITE
                        | libc::SYNC_FILE_RANGE_WAIT_AFTER,
                )
            };
            if rc != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            Ok(())
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (offset, len);
            self.force_write(true)
        }
    }

    /// Best-effort hint that the synced range can be evicted from the
    /// page cache. Failures are not surfaced; this is an optimization,
    /// not a correctness requirement.
    pub fn advise_dont_need(&self, offset: u64, len: u64) {
        #[cfg(target_os = "linux")]
        {
            unsafe {
                libc::posix_fadvise(
                    self.file.as_raw_fd(),
                    offset as libc::off_t,
                    len as libc::off_t,
                    libc::POSIX_FADV_DONTNEED,
                );
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = (offset, len);
        }
    }
}

/// The writer stage's exclusive handle to a journal file: owns the
/// write-side fd, the pending write buffer, and preallocation
/// bookkeeping. Closed files are immutable; only one `JournalFile` is
/// open for append at a time.
pub struct JournalFile {
    path: PathBuf,
    pub log_id: u64,
    pub format_version: u32,
    file: File,
    write_buffer: Vec<u8>,
    buffer_capacity: usize,
    /// Bytes physically written to the fd (flushed, not necessarily
    /// synced), including the header.
    flushed_len: u64,
    alloc_watermark: u64,
    prealloc_chunk: u64,
}

impl JournalFile {
    /// Creates and opens a brand-new journal file named after `log_id`,
    /// writes its fixed header, and returns both the writer-side
    /// handle and a cheap sync-only handle for the force-write stage.
    pub fn create(
        dir: &Path,
        log_id: u64,
        buffer_capacity: usize,
        prealloc_chunk: u64,
    ) -> Result<(JournalFile, Arc<JournalSyncHandle>)> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(log_id_to_filename(log_id));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = vec![0u8; HEADER_LEN as usize];
        header[0..4].copy_from_slice(MAGIC);
        header[4..8].copy_from_slice(&CURRENT_FORMAT_VERSION.to_be_bytes());
        file.write_all(&header)?;

        let sync_file = file.try_clone()?;
        let sync_handle = Arc::new(JournalSyncHandle {
            file: sync_file,
            log_id,
            path: path.clone(),
        });

        let mut jf = JournalFile {
            path,
            log_id,
            format_version: CURRENT_FORMAT_VERSION,
            file,
            write_buffer: Vec::with_capacity(buffer_capacity),
            buffer_capacity,
            flushed_len: HEADER_LEN,
            alloc_watermark: HEADER_LEN,
            prealloc_chunk,
        };
        jf.preallocate_if_needed(0)?;
        Ok((jf, sync_handle))
    }

    /// Opens an existing journal file read-only, for replay/scanning.
    /// Returns the open file positioned right after the header, plus
    /// the format version recorded in it.
    pub fn open_for_scan(path: &Path) -> Result<(File, u32)> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        let mut header = vec![0u8; HEADER_LEN as usize];
        file.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                record::corrupt(0, 0, "journal file shorter than its own header")
            } else {
                e.into()
            }
        })?;
        if &header[0..4] != MAGIC {
            return Err(record::corrupt(0, 0, "bad magic bytes in journal header"));
        }
        let format_version = u32::from_be_bytes(header[4..8].try_into().unwrap());
        Ok((file, format_version))
    }

    /// Current logical append position: bytes already flushed to the
    /// fd plus whatever is still sitting in the write buffer.
    pub fn position(&self) -> u64 {
        self.flushed_len + self.write_buffer.len() as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Grows the file by `prealloc_chunk`-sized steps until at least
    /// `additional` more bytes beyond the current logical position can
    /// be written without hitting the real end of file.
    pub fn preallocate_if_needed(&mut self, additional: u64) -> Result<bool> {
        let required_end = self.position() + additional;
        let mut grew = false;
        while required_end > self.alloc_watermark {
            let new_watermark = self.alloc_watermark + self.prealloc_chunk.max(1);
            Self::grow_to(&self.file, new_watermark)?;
            self.alloc_watermark = new_watermark;
            grew = true;
        }
        Ok(grew)
    }

    #[cfg(unix)]
    fn grow_to(file: &File, new_len: u64) -> Result<()> {
        let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, new_len as libc::off_t) };
        if rc != 0 {
            return Err(std::io::Error::from_raw_os_error(rc).into());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn grow_to(file: &File, new_len: u64) -> Result<()> {
        file.set_len(new_len)?;
        Ok(())
    }

    /// Appends one regular record `[len: i32 BE][payload]` to the write
    /// buffer, auto-spilling to the fd first if the buffer is already
    /// at capacity.
    pub fn write_record(&mut self, payload: &[u8]) -> Result<()> {
        if self.write_buffer.len() + 4 + payload.len() > self.buffer_capacity
            && !self.write_buffer.is_empty()
        {
            self.flush(true)?;
        }
        self.write_buffer.extend_from_slice(&record::encode_record(payload));
        Ok(())
    }

    /// Appends a padding record sized to align the post-write position
    /// to a sector boundary, if one is needed at the current position.
    pub fn write_padding_if_needed(&mut self) {
        if let Some(pad_len) = record::padding_len_for(self.position()) {
            self.write_buffer
                .extend_from_slice(&record::encode_padding_record(pad_len));
        }
    }

    /// Pushes buffered bytes into the OS (page cache); does not fsync.
    /// Returns `(start, end)`: the flushed-position range this call
    /// just moved from buffer to fd, used to build a `ForceWriteRequest`.
    pub fn flush(&mut self, _no_sync: bool) -> Result<(u64, u64)> {
        let start = self.flushed_len;
        if self.write_buffer.is_empty() {
            return Ok((start, start));
        }
        self.file.seek(SeekFrom::Start(self.flushed_len))?;
        self.file.write_all(&self.write_buffer)?;
        self.flushed_len += self.write_buffer.len() as u64;
        self.write_buffer.clear();
        Ok((start, self.flushed_len))
    }

    pub fn has_buffered_data(&self) -> bool {
        !self.write_buffer.is_empty()
    }

    pub fn buffered_len(&self) -> usize {
        self.write_buffer.len()
    }
}
