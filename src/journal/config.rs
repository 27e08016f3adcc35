//! `JournalConfig`: a plain struct with a `Default` impl matching the
//! configuration table in §6/§4.11. Config-file parsing is an external
//! collaborator (a Non-goal); this struct is what that collaborator
//! would populate.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub journal_dir: PathBuf,
    pub ledger_dirs: Vec<PathBuf>,
    pub max_journal_size_mb: u64,
    pub journal_prealloc_size_mb: u64,
    pub journal_write_buffer_size_kb: u64,
    pub max_backup_journals: usize,
    pub journal_adaptive_group_writes: bool,
    pub journal_max_group_wait_ms: u64,
    pub journal_buffered_writes_threshold: usize,
    pub journal_buffered_entries_threshold: usize,
    pub journal_flush_when_queue_empty: bool,
    pub journal_remove_pages_from_cache: bool,
    pub num_journal_callback_threads: usize,
}

impl JournalConfig {
    /// Builds a config with every default from the table except the
    /// two fields the spec requires callers to supply: `journal_dir`
    /// and at least one `ledger_dirs` entry.
    pub fn new(journal_dir: impl Into<PathBuf>, ledger_dirs: Vec<PathBuf>) -> Self {
        JournalConfig {
            journal_dir: journal_dir.into(),
            ledger_dirs,
            ..Default::default()
        }
    }

    pub fn max_journal_size_bytes(&self) -> u64 {
        self.max_journal_size_mb * 1024 * 1024
    }

    pub fn journal_prealloc_size_bytes(&self) -> u64 {
        self.journal_prealloc_size_mb * 1024 * 1024
    }

    pub fn journal_write_buffer_size_bytes(&self) -> usize {
        (self.journal_write_buffer_size_kb * 1024) as usize
    }

    pub fn max_group_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.journal_max_group_wait_ms)
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        JournalConfig {
            journal_dir: PathBuf::new(),
            ledger_dirs: Vec::new(),
            max_journal_size_mb: 2048,
            journal_prealloc_size_mb: 16,
            journal_write_buffer_size_kb: 64,
            max_backup_journals: 5,
            journal_adaptive_group_writes: true,
            journal_max_group_wait_ms: 2,
            journal_buffered_writes_threshold: 512 * 1024,
            journal_buffered_entries_threshold: 0,
            journal_flush_when_queue_empty: false,
            journal_remove_pages_from_cache: false,
            num_journal_callback_threads: num_cpus::get().min(4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_configuration_table() {
        let cfg = JournalConfig::new("/tmp/journal", vec![PathBuf::from("/tmp/ledger")]);
        assert_eq!(cfg.max_journal_size_mb, 2048);
        assert_eq!(cfg.journal_prealloc_size_mb, 16);
        assert_eq!(cfg.journal_write_buffer_size_kb, 64);
        assert_eq!(cfg.max_backup_journals, 5);
        assert!(cfg.journal_adaptive_group_writes);
        assert_eq!(cfg.journal_max_group_wait_ms, 2);
        assert_eq!(cfg.journal_buffered_writes_threshold, 512 * 1024);
        assert_eq!(cfg.journal_buffered_entries_threshold, 0);
        assert!(!cfg.journal_flush_when_queue_empty);
        assert!(!cfg.journal_remove_pages_from_cache);
        assert!(cfg.num_journal_callback_threads >= 1);
    }

    #[test]
    fn byte_conversions_scale_from_mb_and_kb() {
        let cfg = JournalConfig::new("/tmp/journal", vec![PathBuf::from("/tmp/ledger")]);
        assert_eq!(cfg.max_journal_size_bytes(), 2048 * 1024 * 1024);
        assert_eq!(cfg.journal_prealloc_size_bytes(), 16 * 1024 * 1024);
        assert_eq!(cfg.journal_write_buffer_size_bytes(), 64 * 1024);
    }
}
