//! Wire format: `LogMark` total order and the length-prefixed record
//! framing described in the data model (§3). No serde here — the
//! layout is fixed-width big-endian, the same hand-rolled discipline
//! the teacher repository uses for its WAL record headers.

use crate::error::{JournalError, Result};

/// Ledger/entry identifiers embedded in every record's first 16 bytes.
pub type LedgerId = u64;
pub type EntryId = u64;

/// Length in bytes of the `(ledger_id, entry_id)` header every payload
/// must carry as its first 16 bytes.
pub const PAYLOAD_HEADER_LEN: usize = 16;

/// Sentinel length value marking a padding record instead of a real one.
pub const PADDING_MASK: i32 = -256;

/// Journal files are padded to this boundary before each flush so that
/// `sync_file_range`/direct-I/O friendly offsets line up on sector
/// boundaries.
pub const SECTOR_SIZE: u64 = 512;

/// On-disk format version this crate writes. Replay understands this
/// version; anything older that uses the padding-mask length sentinel
/// is treated as corrupt (padding records were introduced in v5).
pub const CURRENT_FORMAT_VERSION: u32 = 5;
pub const MIN_PADDING_AWARE_FORMAT_VERSION: u32 = 5;

/// A `(log_id, offset)` pair identifying a position in the journal
/// under the total order `log_id` then `offset`. The zero mark means
/// "nothing has been persisted yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogMark {
    pub log_id: u64,
    pub offset: u64,
}

impl LogMark {
    pub const ZERO: LogMark = LogMark {
        log_id: 0,
        offset: 0,
    };

    pub fn new(log_id: u64, offset: u64) -> Self {
        LogMark { log_id, offset }
    }

    pub fn is_zero(&self) -> bool {
        *self == LogMark::ZERO
    }

    pub fn to_bytes(self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&self.log_id.to_be_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<LogMark> {
        if bytes.len() < 16 {
            return None;
        }
        let mut log_id_buf = [0u8; 8];
        let mut offset_buf = [0u8; 8];
        log_id_buf.copy_from_slice(&bytes[0..8]);
        offset_buf.copy_from_slice(&bytes[8..16]);
        Some(LogMark {
            log_id: u64::from_be_bytes(log_id_buf),
            offset: u64::from_be_bytes(offset_buf),
        })
    }
}

/// Parses the mandatory `(ledger_id, entry_id)` header out of a
/// record's payload. Payload shape is a programmer contract, not a
/// runtime contingency: callers that hand in a too-short payload get a
/// panic, not a silent `Result::Err`.
pub fn parse_header(payload: &[u8]) -> (LedgerId, EntryId) {
    assert!(
        payload.len() >= PAYLOAD_HEADER_LEN,
        "payload must carry at least a {}-byte (ledger_id, entry_id) header, got {} bytes",
        PAYLOAD_HEADER_LEN,
        payload.len()
    );
    let mut ledger_buf = [0u8; 8];
    let mut entry_buf = [0u8; 8];
    ledger_buf.copy_from_slice(&payload[0..8]);
    entry_buf.copy_from_slice(&payload[8..16]);
    (
        u64::from_be_bytes(ledger_buf),
        u64::from_be_bytes(entry_buf),
    )
}

/// Computes the padding length needed so that, after writing an
/// 8-byte padding header plus `pad_len` zero bytes, the file position
/// lands exactly on a sector boundary. Returns `None` when `position`
/// is already aligned and no padding record is needed. When the gap to
/// the next boundary is too small to hold the 8-byte header, padding
/// extends a full further sector instead of leaving a sub-header gap.
pub fn padding_len_for(position: u64) -> Option<u64> {
    let gap = SECTOR_SIZE - (position % SECTOR_SIZE);
    let gap = gap % SECTOR_SIZE;
    if gap == 0 {
        return None;
    }
    const HEADER_LEN: u64 = 8;
    if gap >= HEADER_LEN {
        Some(gap - HEADER_LEN)
    } else {
        Some(gap + SECTOR_SIZE - HEADER_LEN)
    }
}

/// Encodes a padding record: `[PADDING_MASK: i32][pad_len: i32][pad_len zero bytes]`.
pub fn encode_padding_record(pad_len: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + pad_len as usize);
    buf.extend_from_slice(&PADDING_MASK.to_be_bytes());
    buf.extend_from_slice(&(pad_len as i32).to_be_bytes());
    buf.resize(8 + pad_len as usize, 0u8);
    buf
}

/// Encodes a regular record: `[len: i32 BE][payload]`.
pub fn encode_record(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub fn corrupt(log_id: u64, offset: u64, reason: impl Into<String>) -> JournalError {
    JournalError::CorruptRecord {
        log_id,
        offset,
        reason: reason.into(),
    }
}

pub fn check_format_supports_padding(format_version: u32, log_id: u64, offset: u64) -> Result<()> {
    if format_version < MIN_PADDING_AWARE_FORMAT_VERSION {
        return Err(corrupt(
            log_id,
            offset,
            format!(
                "padding-mask length sentinel seen on format version {} (padding records require >= {})",
                format_version, MIN_PADDING_AWARE_FORMAT_VERSION
            ),
        ));
    }
    Ok(())
}
