//! Bucket mirror driver - runs one job per bucket
//!
//! The driver is responsible for:
//! - Resolving each bucket's journal files under the data root
//! - Provisioning one connection pair per worker
//! - Starting the job and polling it until it finishes
//! - Cancelling the job when shutdown is requested
//! - Closing both journals and summarizing the run

use crate::error::{ConfigError, Result};
use crate::journal::{BucketLayout, JournalCursor, KeyJournal};
use crate::mirror::job::{JobOptions, JobReport, MirrorJob, MirrorProgress};
use crate::mirror::retry::RetryPolicy;
use crate::store::{ConnectionPair, Connector};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default interval between job completion checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Options shared by every bucket a driver mirrors
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Directory holding one subdirectory per bucket
    pub data_root: PathBuf,

    /// Workers (and connection pairs) per bucket
    pub workers: usize,

    /// Attempt budget for fetch and store
    pub retry: RetryPolicy,

    /// How often to check whether the job finished
    pub poll_interval: Duration,
}

impl DriverOptions {
    pub fn new(data_root: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            data_root: data_root.into(),
            workers,
            retry: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// How a bucket run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    /// Every key in the journal was attempted
    Completed,

    /// No key journal for this bucket; nothing was attempted
    MissingKeys,

    /// Shutdown was requested before the journal was drained
    Cancelled,

    /// A worker stopped on a journal error
    Aborted,
}

impl BucketStatus {
    pub fn label(&self) -> &'static str {
        match self {
            BucketStatus::Completed => "completed",
            BucketStatus::MissingKeys => "missing keys",
            BucketStatus::Cancelled => "cancelled",
            BucketStatus::Aborted => "aborted",
        }
    }
}

/// Result of mirroring one bucket
#[derive(Debug, Clone)]
pub struct BucketSummary {
    pub bucket: String,
    pub processed: u64,
    pub mirrored: u64,
    pub already_present: u64,
    /// Records in the failure journal
    pub failed: u64,
    pub bytes: u64,
    pub duration: Duration,
    pub status: BucketStatus,
    pub keys_path: PathBuf,
    pub failed_path: PathBuf,
}

impl BucketSummary {
    fn missing(bucket: &str, layout: &BucketLayout) -> Self {
        Self {
            bucket: bucket.to_string(),
            processed: 0,
            mirrored: 0,
            already_present: 0,
            failed: 0,
            bytes: 0,
            duration: Duration::ZERO,
            status: BucketStatus::MissingKeys,
            keys_path: layout.keys_path(),
            failed_path: layout.failed_path(),
        }
    }
}

/// Result of mirroring a list of buckets
#[derive(Debug, Clone)]
pub struct MirrorSummary {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub buckets: Vec<BucketSummary>,
    /// Shutdown stopped the run before every bucket was attempted
    pub interrupted: bool,
}

impl MirrorSummary {
    pub fn processed(&self) -> u64 {
        self.buckets.iter().map(|b| b.processed).sum()
    }

    pub fn mirrored(&self) -> u64 {
        self.buckets.iter().map(|b| b.mirrored).sum()
    }

    pub fn already_present(&self) -> u64 {
        self.buckets.iter().map(|b| b.already_present).sum()
    }

    pub fn failed(&self) -> u64 {
        self.buckets.iter().map(|b| b.failed).sum()
    }

    pub fn bytes(&self) -> u64 {
        self.buckets.iter().map(|b| b.bytes).sum()
    }

    /// True if every bucket completed and nothing was interrupted
    pub fn is_complete(&self) -> bool {
        !self.interrupted
            && self
                .buckets
                .iter()
                .all(|b| matches!(b.status, BucketStatus::Completed | BucketStatus::MissingKeys))
    }
}

/// Mirrors buckets from a source cluster to a destination cluster
pub struct BucketMirror {
    source: Arc<dyn Connector>,
    destination: Arc<dyn Connector>,
    options: DriverOptions,
    shutdown: Arc<AtomicBool>,
}

impl BucketMirror {
    pub fn new(source: Arc<dyn Connector>, destination: Arc<dyn Connector>, options: DriverOptions) -> Self {
        Self {
            source,
            destination,
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Mirror one bucket without progress callbacks
    pub fn mirror_bucket(&self, bucket: &str) -> Result<BucketSummary> {
        self.mirror_bucket_with_progress(bucket, |_, _| {})
    }

    /// Mirror one bucket, calling `on_progress` on every poll
    pub fn mirror_bucket_with_progress<F>(&self, bucket: &str, mut on_progress: F) -> Result<BucketSummary>
    where
        F: FnMut(&str, &MirrorProgress),
    {
        if bucket.is_empty() {
            return Err(ConfigError::EmptyBucketName.into());
        }

        let layout = BucketLayout::new(&self.options.data_root, bucket);
        let keys_path = layout.keys_path();
        let failed_path = layout.failed_path();

        if !keys_path.is_file() {
            warn!(bucket = %bucket, path = %keys_path.display(), "Key journal not found, skipping bucket");
            return Ok(BucketSummary::missing(bucket, &layout));
        }

        info!(
            bucket = %bucket,
            keys = %keys_path.display(),
            source = %self.source.endpoint(),
            destination = %self.destination.endpoint(),
            "Mirroring bucket"
        );

        let pairs = ConnectionPair::open_many(
            self.source.as_ref(),
            self.destination.as_ref(),
            self.options.workers,
        )?;

        let read_cursor = Arc::new(JournalCursor::new(bucket, KeyJournal::open_read(&keys_path)?));
        let failure_cursor = match KeyJournal::create(&failed_path) {
            Ok(journal) => Arc::new(JournalCursor::new(bucket, journal)),
            Err(e) => {
                read_cursor.close();
                return Err(e.into());
            }
        };

        let result = self.run_job(bucket, &read_cursor, &failure_cursor, pairs, &mut on_progress);

        read_cursor.close();
        failure_cursor.close();

        let report = result?;
        let failed = failure_cursor.processed_count();
        if failed != report.failed {
            warn!(bucket = %bucket, journal = failed, workers = report.failed, "Failure counts disagree");
        }

        let status = if !report.worker_errors.is_empty() {
            BucketStatus::Aborted
        } else if report.completed {
            BucketStatus::Completed
        } else {
            BucketStatus::Cancelled
        };

        let summary = BucketSummary {
            bucket: bucket.to_string(),
            processed: report.processed,
            mirrored: report.mirrored,
            already_present: report.already_present,
            failed,
            bytes: report.bytes,
            duration: report.duration,
            status,
            keys_path,
            failed_path,
        };

        info!(
            bucket = %bucket,
            processed = summary.processed,
            failed = summary.failed,
            status = summary.status.label(),
            "Bucket finished"
        );

        Ok(summary)
    }

    fn run_job<F>(
        &self,
        bucket: &str,
        read_cursor: &Arc<JournalCursor>,
        failure_cursor: &Arc<JournalCursor>,
        pairs: Vec<ConnectionPair>,
        on_progress: &mut F,
    ) -> Result<JobReport>
    where
        F: FnMut(&str, &MirrorProgress),
    {
        let options = JobOptions::new(self.options.workers).with_retry(self.options.retry.clone());
        let job = MirrorJob::start(options, Arc::clone(read_cursor), Arc::clone(failure_cursor), pairs)?;

        let ticker = crossbeam_channel::tick(self.options.poll_interval);
        while !job.is_finished() {
            if self.is_shutdown() {
                info!(bucket = %bucket, "Shutdown requested, cancelling job");
                job.cancel();
                break;
            }

            on_progress(bucket, &job.progress());

            if ticker.recv().is_err() {
                break;
            }
        }

        on_progress(bucket, &job.progress());
        debug!(bucket = %bucket, processed = job.processed_count(), "Job stopped polling");

        let report = job.shutdown();
        for e in &report.worker_errors {
            error!(bucket = %bucket, error = %e, "Worker error");
        }
        Ok(report)
    }

    /// Mirror buckets in order; stops early on shutdown
    pub fn mirror_buckets<S, F>(&self, buckets: &[S], mut on_progress: F) -> Result<MirrorSummary>
    where
        S: AsRef<str>,
        F: FnMut(&str, &MirrorProgress),
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut summaries = Vec::with_capacity(buckets.len());
        let mut interrupted = false;

        for bucket in buckets {
            if self.is_shutdown() {
                interrupted = true;
                break;
            }
            let summary = self.mirror_bucket_with_progress(bucket.as_ref(), &mut on_progress)?;
            if summary.status == BucketStatus::Cancelled {
                interrupted = true;
            }
            summaries.push(summary);
        }

        Ok(MirrorSummary {
            started_at,
            duration: start.elapsed(),
            buckets: summaries,
            interrupted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::count_records;
    use crate::store::MemoryStore;
    use std::fs;
    use tempfile::tempdir;

    fn write_keys(layout: &BucketLayout, keys: &[&str]) {
        fs::create_dir_all(layout.dir()).unwrap();
        let mut journal = KeyJournal::create(layout.keys_path()).unwrap();
        for key in keys {
            journal.write_record(key.as_bytes()).unwrap();
        }
        journal.close();
    }

    fn driver(root: &std::path::Path, source: &MemoryStore, destination: &MemoryStore) -> BucketMirror {
        let options = DriverOptions::new(root, 2)
            .with_retry(RetryPolicy::immediate(3))
            .with_poll_interval(Duration::from_millis(10));
        BucketMirror::new(Arc::new(source.clone()), Arc::new(destination.clone()), options)
    }

    #[test]
    fn test_missing_keys_file() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new("s");
        let summary = driver(dir.path(), &store, &store).mirror_bucket("absent").unwrap();
        assert_eq!(summary.status, BucketStatus::MissingKeys);
        assert_eq!(summary.processed, 0);
        assert!(!summary.failed_path.exists());
    }

    #[test]
    fn test_empty_bucket_name() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::new("s");
        assert!(driver(dir.path(), &store, &store).mirror_bucket("").is_err());
    }

    #[test]
    fn test_bucket_summary_and_failure_journal() {
        let dir = tempdir().unwrap();
        let layout = BucketLayout::new(dir.path(), "user accounts");
        write_keys(&layout, &["k1", "k2", "k3"]);

        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("user accounts", "k1", "one");
        source.insert("user accounts", "k3", "three");

        let mut polls = 0;
        let summary = driver(dir.path(), &source, &destination)
            .mirror_bucket_with_progress("user accounts", |bucket, _| {
                assert_eq!(bucket, "user accounts");
                polls += 1;
            })
            .unwrap();

        assert!(polls >= 1);
        assert_eq!(summary.status, BucketStatus::Completed);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.mirrored, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_path, dir.path().join("user%20accounts").join("bucketkeys.failed"));
        assert_eq!(count_records(&summary.failed_path).unwrap(), 1);
    }

    #[test]
    fn test_failure_journal_recreated_each_run() {
        let dir = tempdir().unwrap();
        let layout = BucketLayout::new(dir.path(), "b");
        write_keys(&layout, &["gone"]);
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        let mirror = driver(dir.path(), &source, &destination);

        assert_eq!(mirror.mirror_bucket("b").unwrap().failed, 1);
        assert_eq!(mirror.mirror_bucket("b").unwrap().failed, 1);
        assert_eq!(count_records(layout.failed_path()).unwrap(), 1);
    }

    #[test]
    fn test_mirror_buckets_totals() {
        let dir = tempdir().unwrap();
        write_keys(&BucketLayout::new(dir.path(), "a"), &["x", "y"]);
        write_keys(&BucketLayout::new(dir.path(), "b"), &["z"]);
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("a", "x", "12");
        source.insert("a", "y", "34");
        source.insert("b", "z", "5");

        let summary = driver(dir.path(), &source, &destination)
            .mirror_buckets(&["a", "b", "c"], |_, _| {})
            .unwrap();

        assert_eq!(summary.buckets.len(), 3);
        assert_eq!(summary.processed(), 3);
        assert_eq!(summary.mirrored(), 3);
        assert_eq!(summary.bytes(), 5);
        assert_eq!(summary.failed(), 0);
        assert_eq!(summary.buckets[2].status, BucketStatus::MissingKeys);
        assert!(summary.is_complete());
    }

    #[test]
    fn test_shutdown_before_start() {
        let dir = tempdir().unwrap();
        write_keys(&BucketLayout::new(dir.path(), "a"), &["x"]);
        let store = MemoryStore::new("s");
        let mirror = driver(dir.path(), &store, &store);
        mirror.shutdown_flag().store(true, Ordering::SeqCst);

        let summary = mirror.mirror_buckets(&["a"], |_, _| {}).unwrap();
        assert!(summary.interrupted);
        assert!(summary.buckets.is_empty());
        assert!(!summary.is_complete());
    }
}
