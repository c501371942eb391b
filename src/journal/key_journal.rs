//! Key journal file format
//!
//! A journal is a flat sequence of records, one per key:
//!
//! ```text
//! ┌──────────────────────┬─────────────────────────┐
//! │ length (u32, BE)     │ key bytes (length)      │  record 0
//! ├──────────────────────┼─────────────────────────┤
//! │ length (u32, BE)     │ key bytes (length)      │  record 1
//! └──────────────────────┴─────────────────────────┘
//! ```
//!
//! Zero bytes remaining at a record boundary is end-of-journal. Any other
//! short read is reported as corruption.

use crate::error::{JournalError, JournalResult};
use crate::journal::layout::chunk_path_for;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Largest key accepted by the format
pub const MAX_KEY_LEN: usize = 1 << 20;

/// Width of the record length prefix
const LEN_PREFIX_BYTES: usize = 4;

/// Buffer size for journal file I/O
const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Direction a journal was opened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Read,
    Write,
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalMode::Read => f.write_str("READ"),
            JournalMode::Write => f.write_str("WRITE"),
        }
    }
}

/// A key as stored in the source cluster (opaque bytes)
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(\"{}\")", self.0.escape_ascii())
    }
}

enum Handle {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
}

/// Sequential key journal bound to one file and one mode
pub struct KeyJournal {
    path: PathBuf,
    mode: JournalMode,
    handle: Option<Handle>,
    /// Byte offset of the next record
    offset: u64,
    /// Records read or written through this handle
    records: u64,
}

impl KeyJournal {
    /// Open a journal. Write mode creates (or truncates) the file.
    pub fn open(path: impl AsRef<Path>, mode: JournalMode) -> JournalResult<Self> {
        let path = path.as_ref().to_path_buf();

        let handle = match mode {
            JournalMode::Write => {
                let file = File::create(&path).map_err(|e| JournalError::io(&path, e))?;
                Handle::Writer(BufWriter::with_capacity(IO_BUFFER_SIZE, file))
            }
            JournalMode::Read => {
                let file = File::open(&path).map_err(|e| JournalError::io(&path, e))?;
                Handle::Reader(BufReader::with_capacity(IO_BUFFER_SIZE, file))
            }
        };

        debug!(path = %path.display(), mode = %mode, "Journal opened");

        Ok(Self {
            path,
            mode,
            handle: Some(handle),
            offset: 0,
            records: 0,
        })
    }

    /// Open an existing journal for reading
    pub fn open_read(path: impl AsRef<Path>) -> JournalResult<Self> {
        Self::open(path, JournalMode::Read)
    }

    /// Create a fresh journal for writing
    pub fn create(path: impl AsRef<Path>) -> JournalResult<Self> {
        Self::open(path, JournalMode::Write)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> JournalMode {
        self.mode
    }

    /// Records read or written so far through this handle
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Append one key record
    pub fn write_record(&mut self, key: &[u8]) -> JournalResult<()> {
        if self.mode != JournalMode::Write {
            return Err(JournalError::InvalidMode {
                path: self.path.clone(),
                mode: self.mode,
                operation: "write",
            });
        }

        if key.len() > MAX_KEY_LEN {
            return Err(JournalError::InvalidArgument(format!(
                "key of {} bytes exceeds maximum of {} bytes",
                key.len(),
                MAX_KEY_LEN
            )));
        }

        let writer = match self.handle.as_mut() {
            Some(Handle::Writer(w)) => w,
            _ => {
                return Err(JournalError::Closed {
                    path: self.path.clone(),
                })
            }
        };

        let len = key.len() as u32;
        writer
            .write_all(&len.to_be_bytes())
            .and_then(|_| writer.write_all(key))
            .map_err(|e| JournalError::io(&self.path, e))?;

        self.offset += (LEN_PREFIX_BYTES + key.len()) as u64;
        self.records += 1;
        Ok(())
    }

    /// Read the next key record; `None` at end-of-journal
    pub fn read_record(&mut self) -> JournalResult<Option<Key>> {
        if self.mode != JournalMode::Read {
            return Err(JournalError::InvalidMode {
                path: self.path.clone(),
                mode: self.mode,
                operation: "read",
            });
        }

        let reader = match self.handle.as_mut() {
            Some(Handle::Reader(r)) => r,
            _ => {
                return Err(JournalError::Closed {
                    path: self.path.clone(),
                })
            }
        };

        let mut prefix = [0u8; LEN_PREFIX_BYTES];
        let got = read_full(reader, &mut prefix).map_err(|e| JournalError::io(&self.path, e))?;
        if got == 0 {
            return Ok(None);
        }
        if got < LEN_PREFIX_BYTES {
            return Err(JournalError::Corrupt {
                path: self.path.clone(),
                offset: self.offset,
                reason: format!("truncated length prefix ({} of {} bytes)", got, LEN_PREFIX_BYTES),
            });
        }

        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_KEY_LEN {
            return Err(JournalError::Corrupt {
                path: self.path.clone(),
                offset: self.offset,
                reason: format!("record length {} exceeds maximum of {}", len, MAX_KEY_LEN),
            });
        }

        let mut key = vec![0u8; len];
        let got = read_full(reader, &mut key).map_err(|e| JournalError::io(&self.path, e))?;
        if got < len {
            return Err(JournalError::Corrupt {
                path: self.path.clone(),
                offset: self.offset,
                reason: format!("truncated record ({} of {} bytes)", got, len),
            });
        }

        self.offset += (LEN_PREFIX_BYTES + len) as u64;
        self.records += 1;
        Ok(Some(Key(key)))
    }

    /// Flush buffered writes without closing
    pub fn flush(&mut self) -> JournalResult<()> {
        if let Some(Handle::Writer(w)) = self.handle.as_mut() {
            w.flush().map_err(|e| JournalError::io(&self.path, e))?;
        }
        Ok(())
    }

    /// Flush and release the file handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        match self.handle.take() {
            Some(Handle::Writer(mut w)) => {
                if let Err(e) = w.flush() {
                    warn!(path = %self.path.display(), error = %e, "Failed to flush journal on close");
                }
                debug!(path = %self.path.display(), records = self.records, "Journal closed");
            }
            Some(Handle::Reader(_)) => {
                debug!(path = %self.path.display(), records = self.records, "Journal closed");
            }
            None => {}
        }
    }

    /// Iterate the remaining records
    pub fn iter(&mut self) -> Records<'_> {
        Records {
            journal: self,
            done: false,
        }
    }
}

impl Drop for KeyJournal {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for KeyJournal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyJournal")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .field("records", &self.records)
            .finish()
    }
}

/// Iterator over the remaining records of a read-mode journal.
/// Stops after end-of-journal or the first error.
pub struct Records<'a> {
    journal: &'a mut KeyJournal,
    done: bool,
}

impl Iterator for Records<'_> {
    type Item = JournalResult<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.journal.read_record() {
            Ok(Some(key)) => Some(Ok(key)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read until `buf` is full or the stream ends; returns bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Count the records in a journal file
pub fn count_records(path: impl AsRef<Path>) -> JournalResult<u64> {
    let mut journal = KeyJournal::open_read(path)?;
    let mut count = 0u64;
    while journal.read_record()?.is_some() {
        count += 1;
    }
    Ok(count)
}

/// Split a journal into chunks of at most `chunk_size` records.
///
/// Chunks are written next to the source as `<stem>.0`, `<stem>.1`, ...
/// and returned in order.
pub fn split(source: impl AsRef<Path>, chunk_size: usize) -> JournalResult<Vec<PathBuf>> {
    if chunk_size == 0 {
        return Err(JournalError::InvalidArgument(
            "chunk size must be at least 1".into(),
        ));
    }

    let source = source.as_ref();
    let mut reader = KeyJournal::open_read(source)?;
    let mut chunks: Vec<PathBuf> = Vec::new();
    let mut current: Option<KeyJournal> = None;
    let mut in_chunk = 0usize;
    let mut total = 0u64;

    while let Some(key) = reader.read_record()? {
        if current.is_none() || in_chunk == chunk_size {
            if let Some(mut full) = current.take() {
                full.close();
            }
            let path = chunk_path_for(source, chunks.len());
            current = Some(KeyJournal::create(&path)?);
            chunks.push(path);
            in_chunk = 0;
        }

        if let Some(journal) = current.as_mut() {
            journal.write_record(key.as_bytes())?;
        }
        in_chunk += 1;
        total += 1;
    }

    if let Some(mut last) = current.take() {
        last.close();
    }

    info!(
        source = %source.display(),
        records = total,
        chunks = chunks.len(),
        chunk_size,
        "Journal split"
    );

    Ok(chunks)
}
