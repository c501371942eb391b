//! Mirroring engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BucketMirror                          │
//! │   (per bucket: open journals, provision pairs, poll job)    │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │ start / is_finished / shutdown
//! ┌──────────────────────────────▼──────────────────────────────┐
//! │                         MirrorJob                           │
//! │        (fixed pool, JobTally, cancellation flag)            │
//! └──────┬──────────────────────┬──────────────────────┬────────┘
//!        │                      │                      │
//! ┌──────▼──────┐        ┌──────▼──────┐        ┌──────▼──────┐
//! │  mirror-0   │        │  mirror-1   │  ...   │  mirror-N   │
//! │ src ─► dst  │        │ src ─► dst  │        │ src ─► dst  │
//! └─────────────┘        └─────────────┘        └─────────────┘
//!        ▲ read cursor (shared)          failure cursor ▼
//! ```

pub mod driver;
pub mod job;
pub mod retry;
pub mod worker;

pub use driver::{BucketMirror, BucketStatus, BucketSummary, DriverOptions, MirrorSummary, DEFAULT_POLL_INTERVAL};
pub use job::{JobOptions, JobReport, JobTally, MirrorJob, MirrorProgress};
pub use retry::{Attempt, RetryOutcome, RetryPolicy, MAX_TRIES};
pub use worker::{mirror_key, MirrorWorker, WorkerStats, WorkerTotals};
