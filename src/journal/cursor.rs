//! Thread-safe cursor shared by all workers of a job
//!
//! One cursor wraps one journal. Every worker calls [`JournalCursor::read`]
//! on the same cursor; the mutex around the underlying journal is the only
//! thing partitioning keys between workers, so each record is handed to
//! exactly one caller. The failure journal gets its own cursor, written
//! through [`JournalCursor::write`].

use crate::error::{JournalError, JournalResult};
use crate::journal::{JournalMode, Key, KeyJournal};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info};

/// Log a progress line every this many records
pub const PROGRESS_LOG_INTERVAL: u64 = 100_000;

/// Consistent view of cursor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub exhausted: bool,
    pub processed: u64,
}

/// Shared cursor over one key journal
#[derive(Debug)]
pub struct JournalCursor {
    bucket: String,
    path: PathBuf,
    mode: JournalMode,
    journal: Mutex<KeyJournal>,
    // Written only while `journal` is locked; read lock-free for polling
    exhausted: AtomicBool,
    processed: AtomicU64,
}

impl JournalCursor {
    pub fn new(bucket: impl Into<String>, journal: KeyJournal) -> Self {
        Self {
            bucket: bucket.into(),
            path: journal.path().to_path_buf(),
            mode: journal.mode(),
            journal: Mutex::new(journal),
            exhausted: AtomicBool::new(false),
            processed: AtomicU64::new(0),
        }
    }

    /// Bucket the journal belongs to
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> JournalMode {
        self.mode
    }

    /// Hand out the next record, or `None` once the journal is exhausted.
    ///
    /// After the first `None` the file is never touched again. An I/O or
    /// corruption error also ends the cursor so no other worker consumes
    /// bytes past the damaged record. Misuse errors leave it untouched.
    pub fn read(&self) -> JournalResult<Option<Key>> {
        let mut journal = self.journal.lock();

        if self.exhausted.load(Ordering::Acquire) {
            return Ok(None);
        }

        match journal.read_record() {
            Ok(Some(key)) => {
                let processed = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
                if processed % PROGRESS_LOG_INTERVAL == 0 {
                    info!(bucket = %self.bucket, records = processed, "Key journal progress");
                }
                Ok(Some(key))
            }
            Ok(None) => {
                self.exhausted.store(true, Ordering::Release);
                debug!(
                    bucket = %self.bucket,
                    records = self.processed.load(Ordering::Acquire),
                    "Key journal exhausted"
                );
                Ok(None)
            }
            Err(e) => {
                if matches!(e, JournalError::Io { .. } | JournalError::Corrupt { .. }) {
                    self.exhausted.store(true, Ordering::Release);
                }
                error!(bucket = %self.bucket, error = %e, "Key journal read failed");
                Err(e)
            }
        }
    }

    /// Append a record (failure journal)
    pub fn write(&self, key: &[u8]) -> JournalResult<()> {
        let mut journal = self.journal.lock();
        journal.write_record(key)?;
        self.processed.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// True once a read has returned end-of-journal
    pub fn is_finished(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// Records read or written through this cursor
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    /// Both counters taken under the lock
    pub fn snapshot(&self) -> CursorSnapshot {
        let _journal = self.journal.lock();
        CursorSnapshot {
            exhausted: self.exhausted.load(Ordering::Acquire),
            processed: self.processed.load(Ordering::Acquire),
        }
    }

    /// Flush buffered writes
    pub fn flush(&self) -> JournalResult<()> {
        self.journal.lock().flush()
    }

    /// Close the underlying journal; idempotent
    pub fn close(&self) {
        self.journal.lock().close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn journal_with(dir: &Path, keys: &[&str]) -> PathBuf {
        let path = dir.join("bucketkeys.keys");
        let mut writer = KeyJournal::create(&path).unwrap();
        for key in keys {
            writer.write_record(key.as_bytes()).unwrap();
        }
        writer.close();
        path
    }

    #[test]
    fn test_read_counts_and_exhausts() {
        let dir = tempdir().unwrap();
        let path = journal_with(dir.path(), &["a", "b"]);
        let cursor = JournalCursor::new("users", KeyJournal::open_read(&path).unwrap());

        assert_eq!(cursor.bucket(), "users");
        assert_eq!(cursor.read().unwrap(), Some(Key::from("a")));
        assert_eq!(cursor.read().unwrap(), Some(Key::from("b")));
        assert!(!cursor.is_finished());
        assert_eq!(cursor.read().unwrap(), None);
        assert!(cursor.is_finished());
        assert_eq!(cursor.processed_count(), 2);
    }

    #[test]
    fn test_exhaustion_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = journal_with(dir.path(), &["only"]);
        let cursor = JournalCursor::new("b", KeyJournal::open_read(&path).unwrap());

        assert!(cursor.read().unwrap().is_some());
        assert!(cursor.read().unwrap().is_none());

        // Closing the file proves later reads never reach it
        cursor.close();
        for _ in 0..5 {
            assert!(cursor.read().unwrap().is_none());
        }
        assert_eq!(
            cursor.snapshot(),
            CursorSnapshot {
                exhausted: true,
                processed: 1
            }
        );
    }

    #[test]
    fn test_write_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bucketkeys.failed");
        let cursor = JournalCursor::new("b", KeyJournal::create(&path).unwrap());

        cursor.write(b"k1").unwrap();
        cursor.write(b"k2").unwrap();
        assert_eq!(cursor.processed_count(), 2);
        assert!(matches!(cursor.read(), Err(JournalError::InvalidMode { .. })));
        assert!(!cursor.is_finished());
        cursor.write(b"k3").unwrap();
        cursor.close();

        assert_eq!(crate::journal::count_records(&path).unwrap(), 3);
    }

    #[test]
    fn test_read_error_ends_cursor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.keys");
        std::fs::write(&path, [0u8, 0, 0]).unwrap();
        let cursor = JournalCursor::new("b", KeyJournal::open_read(&path).unwrap());

        assert!(matches!(cursor.read(), Err(JournalError::Corrupt { .. })));
        assert!(cursor.is_finished());
        assert!(cursor.read().unwrap().is_none());
    }
}
