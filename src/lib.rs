//! bucket-mirror - Journaled, concurrent bucket mirroring
//!
//! Copies the contents of named buckets from one key-value store cluster to
//! another, object by object, driven by a pre-built list of keys (the key
//! journal) instead of a live scan. Writes at the destination are
//! create-only. Keys that cannot be copied within the retry budget land in a
//! failure journal that is itself a valid key journal for a rerun.
//!
//! # Features
//!
//! - **Key Journals**: Length-prefixed binary key lists with a shared,
//!   thread-safe cursor that hands each record to exactly one worker.
//!
//! - **Parallel Mirroring**: A fixed pool of worker threads, each with its
//!   own source and destination connection.
//!
//! - **Bounded Retries**: Fetch and store are each attempted a fixed number
//!   of times; exhausted keys are dead-lettered, never dropped.
//!
//! - **HTTP Store**: Blocking client for the Riak-style HTTP object API,
//!   including sibling fetches and `If-None-Match` create-only writes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                            ┌──────────────────┐
//! │  Source cluster  │                            │ Dest. cluster    │
//! └────────▲─────────┘                            └────────▲─────────┘
//!          │ fetch                                         │ store-if-absent
//! ┌────────┴───────────────────────────────────────────────┴─────────┐
//! │                         Worker Threads                           │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐       │
//! │  │mirror-0 │  │mirror-1 │  │mirror-2 │  ...    │mirror-N │       │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘       │
//! │       └────────────┴─────┬──────┴───────────────────┘            │
//! │                          │                                       │
//! │          ┌───────────────┴───────────────┐                       │
//! │          ▼                               ▼                       │
//! │  ┌────────────────┐             ┌────────────────┐               │
//! │  │  read cursor   │             │ failure cursor │               │
//! │  │ (mutex, FIFO)  │             │ (mutex, FIFO)  │               │
//! │  └───────┬────────┘             └───────┬────────┘               │
//! └──────────┼──────────────────────────────┼────────────────────────┘
//!            ▼                              ▼
//!   <root>/<bucket>/bucketkeys.keys   <root>/<bucket>/bucketkeys.failed
//! ```
//!
//! # Example
//!
//! ```bash
//! # Mirror two buckets with 16 workers
//! bucket-mirror mirror --source http://old:8098 --destination http://new:8098 \
//!     --data-root ./data -w 16 users orders
//!
//! # Rerun the failures of one bucket
//! mv data/users/bucketkeys.failed data/users/bucketkeys.keys
//! ```

pub mod config;
pub mod error;
pub mod journal;
pub mod mirror;
pub mod progress;
pub mod store;

pub use config::{CliArgs, Command, MirrorArgs, MirrorConfig};
pub use error::{KeyOutcome, MirrorError, Result};
pub use journal::{JournalCursor, JournalMode, Key, KeyJournal};
pub use mirror::{BucketMirror, BucketSummary, DriverOptions, JobOptions, JobReport, MirrorJob, MirrorSummary, RetryPolicy};
pub use store::{ConnectionPair, Connector, HttpConnector, MemoryStore, StoreConnection, StoredObject};
