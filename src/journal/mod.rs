//! Key journals
//!
//! A key journal is the list of keys to mirror for one bucket, produced
//! out-of-band. The same format is used for the dead-letter journal, so a
//! failure journal can be fed straight back in as the input of a rerun.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐            ┌────────────────────┐
//! │  bucketkeys.keys   │            │ bucketkeys.failed  │
//! │  KeyJournal (READ) │            │ KeyJournal (WRITE) │
//! └─────────┬──────────┘            └─────────▲──────────┘
//!           │                                 │
//! ┌─────────▼──────────┐            ┌─────────┴──────────┐
//! │   JournalCursor    │            │   JournalCursor    │
//! │   (mutex, shared)  │            │   (mutex, shared)  │
//! └─────────┬──────────┘            └─────────▲──────────┘
//!           │ read()                          │ write()
//!           └──────────► workers ─────────────┘
//! ```

pub mod cursor;
pub mod key_journal;
pub mod layout;

pub use cursor::{CursorSnapshot, JournalCursor, PROGRESS_LOG_INTERVAL};
pub use key_journal::{count_records, split, JournalMode, Key, KeyJournal, Records, MAX_KEY_LEN};
pub use layout::{chunk_path_for, encode_bucket, key_path_for, BucketLayout, FAILED_FILE, KEYS_FILE};
