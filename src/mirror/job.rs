//! Mirror job - a fixed pool of workers over one bucket
//!
//! A job is started once per bucket run and never reused. Its workers share
//! one read cursor and one failure cursor; each owns exactly one connection
//! pair. The job counts a worker as finished when the worker's completion
//! guard reports its tally, which happens exactly once per worker.

use crate::error::{ConfigError, MirrorError, Result, WorkerError};
use crate::journal::JournalCursor;
use crate::mirror::retry::RetryPolicy;
use crate::mirror::worker::{aggregate_stats, MirrorWorker, WorkerContext};
use crate::store::ConnectionPair;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Options fixed for the lifetime of a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
    /// Number of worker threads (one connection pair each)
    pub worker_count: usize,

    /// Attempt budget for each fetch and each store
    pub retry: RetryPolicy,
}

impl JobOptions {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Default)]
struct TallyState {
    finished_workers: usize,
    processed: u64,
}

/// Completion bookkeeping shared between a job and its workers
#[derive(Debug)]
pub struct JobTally {
    worker_count: usize,
    state: Mutex<TallyState>,
}

impl JobTally {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            state: Mutex::new(TallyState::default()),
        }
    }

    /// Merge one worker's processed count and mark it finished
    pub fn report(&self, processed: u64) {
        let mut state = self.state.lock();
        state.processed += processed;
        if state.finished_workers < self.worker_count {
            state.finished_workers += 1;
        }
    }

    pub fn finished_workers(&self) -> usize {
        self.state.lock().finished_workers
    }

    pub fn processed(&self) -> u64 {
        self.state.lock().processed
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished_workers == self.worker_count
    }
}

/// Live view of a running job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorProgress {
    pub processed: u64,
    pub mirrored: u64,
    pub already_present: u64,
    pub failed: u64,
    pub bytes: u64,
    pub finished_workers: usize,
    pub worker_count: usize,
}

/// Final accounting of a job
#[derive(Debug)]
pub struct JobReport {
    /// Bucket the job ran over
    pub bucket: String,

    /// Keys taken from the read journal
    pub processed: u64,

    /// Keys created at the destination
    pub mirrored: u64,

    /// Keys the destination already held
    pub already_present: u64,

    /// Keys written to the failure journal
    pub failed: u64,

    /// Value bytes written
    pub bytes: u64,

    /// Wall-clock time from start to join
    pub duration: Duration,

    /// Errors that stopped individual workers
    pub worker_errors: Vec<WorkerError>,

    /// The read journal was drained and no worker stopped on an error
    pub completed: bool,
}

/// A running pool of mirror workers over one bucket
pub struct MirrorJob {
    bucket: String,
    worker_count: usize,
    workers: Vec<MirrorWorker>,
    tally: Arc<JobTally>,
    cancel: Arc<AtomicBool>,
    read_cursor: Arc<JournalCursor>,
    started: Instant,
}

impl MirrorJob {
    /// Validate the connections and spawn one worker per pair.
    ///
    /// Surplus pairs beyond `worker_count` are dropped.
    pub fn start(
        options: JobOptions,
        read_cursor: Arc<JournalCursor>,
        failure_cursor: Arc<JournalCursor>,
        mut pairs: Vec<ConnectionPair>,
    ) -> Result<Self> {
        let worker_count = options.worker_count;
        if worker_count == 0 {
            return Err(ConfigError::NoWorkers.into());
        }

        if pairs.len() < worker_count {
            return Err(ConfigError::InsufficientConnections {
                workers: worker_count,
                available: pairs.len(),
            }
            .into());
        }

        if pairs.len() > worker_count {
            debug!(surplus = pairs.len() - worker_count, "Dropping surplus connection pairs");
            pairs.truncate(worker_count);
        }

        for (index, pair) in pairs.iter_mut().enumerate() {
            if !pair.source.connected() {
                return Err(MirrorError::NotConnected {
                    role: "source",
                    index,
                    endpoint: pair.source.endpoint(),
                });
            }
            if !pair.destination.connected() {
                return Err(MirrorError::NotConnected {
                    role: "destination",
                    index,
                    endpoint: pair.destination.endpoint(),
                });
            }
        }

        let bucket = read_cursor.bucket().to_string();
        let tally = Arc::new(JobTally::new(worker_count));
        let cancel = Arc::new(AtomicBool::new(false));

        info!(bucket = %bucket, workers = worker_count, max_tries = options.retry.max_tries, "Starting mirror job");

        let mut workers = Vec::with_capacity(worker_count);
        for (id, pair) in pairs.into_iter().enumerate() {
            let context = WorkerContext {
                read_cursor: Arc::clone(&read_cursor),
                failure_cursor: Arc::clone(&failure_cursor),
                retry: options.retry.clone(),
                cancel: Arc::clone(&cancel),
                tally: Arc::clone(&tally),
            };

            match MirrorWorker::spawn(id, context, pair) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    error!(worker = id, error = %e, "Failed to spawn worker");
                    cancel.store(true, Ordering::SeqCst);
                    for mut worker in workers {
                        let _ = worker.join();
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            bucket,
            worker_count,
            workers,
            tally,
            cancel,
            read_cursor,
            started: Instant::now(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// True once every worker has reported completion. Never blocks on
    /// workers.
    pub fn is_finished(&self) -> bool {
        self.tally.is_finished()
    }

    /// Keys processed by workers that have finished; final once
    /// [`is_finished`](Self::is_finished) is true
    pub fn processed_count(&self) -> u64 {
        self.tally.processed()
    }

    /// Live counters summed over all workers
    pub fn progress(&self) -> MirrorProgress {
        let totals = aggregate_stats(&self.workers);
        MirrorProgress {
            processed: totals.processed,
            mirrored: totals.mirrored,
            already_present: totals.already_present,
            failed: totals.failed,
            bytes: totals.bytes,
            finished_workers: self.tally.finished_workers(),
            worker_count: self.worker_count,
        }
    }

    /// Ask workers to stop after their current key
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Get a clone of the cancellation flag (for signal handlers)
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Cancel if still running, join every worker, and account for the run
    pub fn shutdown(mut self) -> JobReport {
        if !self.is_finished() {
            debug!(bucket = %self.bucket, "Shutting down unfinished job");
            self.cancel();
        }

        let mut workers = std::mem::take(&mut self.workers);
        let mut worker_errors = Vec::new();
        for worker in workers.iter_mut() {
            if let Err(e) = worker.join() {
                error!(bucket = %self.bucket, worker = worker.id(), error = %e, "Worker stopped with error");
                worker_errors.push(e);
            }
        }

        // Counters are final only once every worker has stopped
        let totals = aggregate_stats(&workers);

        let completed = self.read_cursor.is_finished() && worker_errors.is_empty();
        let report = JobReport {
            bucket: self.bucket.clone(),
            processed: self.tally.processed(),
            mirrored: totals.mirrored,
            already_present: totals.already_present,
            failed: totals.failed,
            bytes: totals.bytes,
            duration: self.started.elapsed(),
            worker_errors,
            completed,
        };

        info!(
            bucket = %report.bucket,
            processed = report.processed,
            mirrored = report.mirrored,
            already_present = report.already_present,
            failed = report.failed,
            duration_ms = report.duration.as_millis() as u64,
            completed = report.completed,
            "Mirror job finished"
        );

        report
    }
}

impl Drop for MirrorJob {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
        for worker in self.workers.iter_mut() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::KeyJournal;
    use crate::store::MemoryStore;
    use std::path::Path;
    use std::thread;
    use tempfile::tempdir;

    fn cursors(dir: &Path, keys: &[&str]) -> (Arc<JournalCursor>, Arc<JournalCursor>) {
        let keys_path = dir.join("bucketkeys.keys");
        let mut writer = KeyJournal::create(&keys_path).unwrap();
        for key in keys {
            writer.write_record(key.as_bytes()).unwrap();
        }
        writer.close();

        let read = JournalCursor::new("b", KeyJournal::open_read(&keys_path).unwrap());
        let failed = JournalCursor::new("b", KeyJournal::create(dir.join("bucketkeys.failed")).unwrap());
        (Arc::new(read), Arc::new(failed))
    }

    fn pairs(source: &MemoryStore, destination: &MemoryStore, count: usize) -> Vec<ConnectionPair> {
        ConnectionPair::open_many(source, destination, count).unwrap()
    }

    fn wait(job: &MirrorJob) {
        while !job.is_finished() {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_tally_is_bounded() {
        let tally = JobTally::new(2);
        assert!(!tally.is_finished());
        tally.report(3);
        tally.report(4);
        assert!(tally.is_finished());
        tally.report(0);
        assert_eq!(tally.finished_workers(), 2);
        assert_eq!(tally.processed(), 7);
    }

    #[test]
    fn test_job_mirrors_all_keys() {
        let dir = tempdir().unwrap();
        let (read, failed) = cursors(dir.path(), &["a", "b", "c", "d"]);
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        for key in ["a", "b", "c", "d"] {
            source.insert("b", key, key.repeat(4));
        }

        let options = JobOptions::new(3).with_retry(RetryPolicy::immediate(3));
        let job = MirrorJob::start(options, read, Arc::clone(&failed), pairs(&source, &destination, 3)).unwrap();
        wait(&job);

        assert_eq!(job.processed_count(), 4);
        let report = job.shutdown();
        assert!(report.completed);
        assert_eq!(report.mirrored, 4);
        assert_eq!(report.bytes, 16);
        assert_eq!(report.failed, 0);
        assert_eq!(failed.processed_count(), 0);
        assert_eq!(destination.len("b"), 4);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let dir = tempdir().unwrap();
        let (read, failed) = cursors(dir.path(), &[]);
        let result = MirrorJob::start(JobOptions::new(0), read, failed, Vec::new());
        assert!(matches!(
            result,
            Err(MirrorError::Config(ConfigError::NoWorkers))
        ));
    }

    #[test]
    fn test_large_pool_allowed() {
        let dir = tempdir().unwrap();
        let (read, failed) = cursors(dir.path(), &["a", "b"]);
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("b", "a", "v");
        source.insert("b", "b", "v");

        let workers = crate::config::MAX_WORKERS + 4;
        let job = MirrorJob::start(JobOptions::new(workers), read, failed, pairs(&source, &destination, workers)).unwrap();
        assert_eq!(job.worker_count(), workers);
        wait(&job);
        let report = job.shutdown();
        assert!(report.completed);
        assert_eq!(report.mirrored, 2);
    }

    #[test]
    fn test_insufficient_connections() {
        let dir = tempdir().unwrap();
        let (read, failed) = cursors(dir.path(), &["a"]);
        let store = MemoryStore::new("s");

        let result = MirrorJob::start(JobOptions::new(4), read, failed, pairs(&store, &store, 2));
        assert!(matches!(
            result,
            Err(MirrorError::Config(ConfigError::InsufficientConnections {
                workers: 4,
                available: 2
            }))
        ));
    }

    #[test]
    fn test_surplus_pairs_dropped() {
        let dir = tempdir().unwrap();
        let (read, failed) = cursors(dir.path(), &["a"]);
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        source.insert("b", "a", "v");

        let job = MirrorJob::start(JobOptions::new(1), read, failed, pairs(&source, &destination, 3)).unwrap();
        assert_eq!(job.worker_count(), 1);
        wait(&job);
        let report = job.shutdown();
        assert_eq!(report.processed, 1);
        assert_eq!(report.mirrored, 1);
        assert_eq!(source.connections_opened(), 3);
    }

    #[test]
    fn test_disconnected_destination_refused() {
        let dir = tempdir().unwrap();
        let (read, failed) = cursors(dir.path(), &["a"]);
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        destination.set_connected(false);

        let result = MirrorJob::start(JobOptions::new(2), Arc::clone(&read), failed, pairs(&source, &destination, 2));
        assert!(matches!(
            result,
            Err(MirrorError::NotConnected {
                role: "destination",
                index: 0,
                ..
            })
        ));
        // No worker ran
        assert_eq!(read.processed_count(), 0);
    }

    #[test]
    fn test_shutdown_before_finish_cancels() {
        let dir = tempdir().unwrap();
        let keys: Vec<String> = (0..100).map(|i| format!("k{}", i)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (read, failed) = cursors(dir.path(), &refs);
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");

        // Every key is missing; the worker parks inside the first fetch
        let gate = source.hold_fetch("k0");
        let job = MirrorJob::start(
            JobOptions::new(1).with_retry(RetryPolicy::immediate(3)),
            Arc::clone(&read),
            Arc::clone(&failed),
            pairs(&source, &destination, 1),
        )
        .unwrap();
        while source.fetch_attempts("k0") == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        job.cancel();
        gate.open();
        let report = job.shutdown();

        assert!(report.worker_errors.is_empty());
        assert!(!report.completed);
        assert!(!read.is_finished());
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(failed.processed_count(), 1);
        assert_eq!(source.fetch_attempts("k0"), 3);
        assert_eq!(source.fetch_attempts("k1"), 0);
    }

    #[test]
    fn test_cancelled_report_is_consistent() {
        let dir = tempdir().unwrap();
        let keys: Vec<String> = (0..5_000).map(|i| format!("k{}", i)).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (read, failed) = cursors(dir.path(), &refs);
        let source = MemoryStore::new("src");
        let destination = MemoryStore::new("dst");
        for key in &keys {
            source.insert("b", key.as_str(), "v");
        }

        let job = MirrorJob::start(JobOptions::new(2), read, failed, pairs(&source, &destination, 2)).unwrap();
        job.cancel();
        let report = job.shutdown();

        // Workers may finish a key after cancel; the report must count it everywhere
        assert_eq!(report.processed, report.mirrored + report.already_present + report.failed);
        assert_eq!(report.mirrored, destination.len("b") as u64);
        assert_eq!(report.bytes, report.mirrored);
    }
}
