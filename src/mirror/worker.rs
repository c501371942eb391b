//! Worker thread logic for mirroring keys
//!
//! Each worker:
//! - Owns one source and one destination connection for its whole run
//! - Pulls keys from the shared read cursor until it is exhausted
//! - Fetches each key (bounded retries) and stores the first sibling
//!   create-only (bounded retries)
//! - Writes keys it could not mirror to the shared failure cursor
//! - Reports its tally to the job exactly once when it stops

use crate::error::{KeyOutcome, WorkerError};
use crate::journal::{JournalCursor, Key};
use crate::mirror::job::JobTally;
use crate::mirror::retry::{Attempt, RetryOutcome, RetryPolicy};
use crate::store::{ConnectionPair, StoreOutcome, StoredObject};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Live counters for one worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Keys taken from the read cursor
    pub processed: AtomicU64,

    /// Keys created at the destination
    pub mirrored: AtomicU64,

    /// Keys the destination already held
    pub already_present: AtomicU64,

    /// Keys written to the failure journal
    pub failed: AtomicU64,

    /// Value bytes written to the destination
    pub bytes: AtomicU64,
}

impl WorkerStats {
    fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_outcome(&self, outcome: &KeyOutcome) {
        match outcome {
            KeyOutcome::Mirrored { bytes } => {
                self.mirrored.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(*bytes, Ordering::Relaxed);
            }
            KeyOutcome::AlreadyPresent => {
                self.already_present.fetch_add(1, Ordering::Relaxed);
            }
            KeyOutcome::FetchExhausted | KeyOutcome::StoreExhausted | KeyOutcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Sum of counters across workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTotals {
    pub processed: u64,
    pub mirrored: u64,
    pub already_present: u64,
    pub failed: u64,
    pub bytes: u64,
}

/// Everything a worker shares with the rest of the job
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub read_cursor: Arc<JournalCursor>,
    pub failure_cursor: Arc<JournalCursor>,
    pub retry: RetryPolicy,
    pub cancel: Arc<AtomicBool>,
    pub tally: Arc<JobTally>,
}

/// A worker thread that mirrors keys
pub struct MirrorWorker {
    /// Worker ID
    id: usize,

    /// Thread handle
    handle: Option<JoinHandle<Result<(), WorkerError>>>,

    /// Worker statistics
    stats: Arc<WorkerStats>,
}

impl MirrorWorker {
    /// Spawn a new worker thread owning `pair`
    pub fn spawn(id: usize, context: WorkerContext, pair: ConnectionPair) -> Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("mirror-{}", id))
            .spawn(move || worker_loop(id, context, pair, stats_clone))
            .map_err(|e| WorkerError::InitFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get worker statistics
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Wait for the worker to finish. Later calls return `Ok(())`.
    pub fn join(&mut self) -> Result<(), WorkerError> {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result,
                Err(payload) => Err(WorkerError::Panicked {
                    id: self.id,
                    message: panic_message(payload.as_ref()),
                }),
            }
        } else {
            Ok(())
        }
    }
}

/// Reports the worker's tally to the job when dropped, so completion is
/// counted once whether the loop returns normally, early, or by unwinding.
struct CompletionGuard {
    tally: Arc<JobTally>,
    stats: Arc<WorkerStats>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.tally
            .report(self.stats.processed.load(Ordering::Relaxed));
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    context: WorkerContext,
    mut pair: ConnectionPair,
    stats: Arc<WorkerStats>,
) -> Result<(), WorkerError> {
    let _completion = CompletionGuard {
        tally: Arc::clone(&context.tally),
        stats: Arc::clone(&stats),
    };

    let bucket = context.read_cursor.bucket().to_string();
    debug!(
        worker = id,
        bucket = %bucket,
        source = %pair.source.endpoint(),
        destination = %pair.destination.endpoint(),
        "Worker starting"
    );

    loop {
        if context.cancel.load(Ordering::Relaxed) {
            info!(worker = id, bucket = %bucket, "Worker cancelled");
            break;
        }

        let key = match context.read_cursor.read() {
            Ok(Some(key)) => key,
            Ok(None) => break,
            Err(source) => {
                error!(worker = id, bucket = %bucket, error = %source, "Stopping on key journal error");
                return Err(WorkerError::Journal { id, source });
            }
        };
        stats.record_processed();

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            mirror_key(&bucket, &key, &mut pair, &context.retry)
        })) {
            Ok(outcome) => outcome,
            Err(payload) => KeyOutcome::Failed {
                reason: format!("panicked: {}", panic_message(payload.as_ref())),
            },
        };
        stats.record_outcome(&outcome);

        match &outcome {
            KeyOutcome::Mirrored { bytes } => {
                trace!(worker = id, key = %key, bytes = bytes, "Key mirrored");
            }
            KeyOutcome::AlreadyPresent => {
                trace!(worker = id, key = %key, "Key already present");
            }
            KeyOutcome::FetchExhausted | KeyOutcome::StoreExhausted => {
                warn!(
                    worker = id,
                    bucket = %bucket,
                    key = %key,
                    tries = context.retry.max_tries,
                    "{}",
                    outcome.label()
                );
            }
            KeyOutcome::Failed { reason } => {
                warn!(worker = id, bucket = %bucket, key = %key, reason = %reason, "Key failed");
            }
        }

        if !outcome.is_success() {
            context
                .failure_cursor
                .write(key.as_bytes())
                .map_err(|source| WorkerError::Journal { id, source })?;
        }
    }

    info!(
        worker = id,
        bucket = %bucket,
        processed = stats.processed.load(Ordering::Relaxed),
        failed = stats.failed.load(Ordering::Relaxed),
        "Worker finished"
    );

    Ok(())
}

/// Mirror one key: fetch from the source, store the first sibling
/// create-only at the destination.
pub fn mirror_key(bucket: &str, key: &Key, pair: &mut ConnectionPair, retry: &RetryPolicy) -> KeyOutcome {
    let fetched = retry.run(|attempt| match pair.source.fetch(bucket, key) {
        Ok(objects) => match objects.into_iter().next() {
            Some(object) => Attempt::Success(object),
            None => {
                debug!(key = %key, attempt = attempt, "Fetch returned no objects");
                Attempt::Retryable("no objects returned".into())
            }
        },
        Err(e) => {
            debug!(key = %key, attempt = attempt, error = %e, "Fetch attempt failed");
            Attempt::from(Err::<StoredObject, _>(e))
        }
    });

    let object = match fetched {
        RetryOutcome::Success { value, .. } => value,
        RetryOutcome::Exhausted { .. } => return KeyOutcome::FetchExhausted,
        RetryOutcome::Aborted { error, .. } => return KeyOutcome::Failed { reason: error },
    };

    let stored = retry.run(|attempt| {
        let result = pair.destination.store_if_absent(&object);
        if let Err(e) = &result {
            debug!(key = %key, attempt = attempt, error = %e, "Store attempt failed");
        }
        Attempt::from(result)
    });

    match stored {
        RetryOutcome::Success {
            value: StoreOutcome::Created,
            ..
        } => KeyOutcome::Mirrored {
            bytes: object.size(),
        },
        RetryOutcome::Success {
            value: StoreOutcome::AlreadyExists,
            ..
        } => KeyOutcome::AlreadyPresent,
        RetryOutcome::Exhausted { .. } => KeyOutcome::StoreExhausted,
        RetryOutcome::Aborted { error, .. } => KeyOutcome::Failed { reason: error },
    }
}

/// Aggregate statistics from multiple workers
pub fn aggregate_stats(workers: &[MirrorWorker]) -> WorkerTotals {
    workers.iter().fold(WorkerTotals::default(), |mut totals, worker| {
        totals.processed += worker.stats.processed.load(Ordering::Relaxed);
        totals.mirrored += worker.stats.mirrored.load(Ordering::Relaxed);
        totals.already_present += worker.stats.already_present.load(Ordering::Relaxed);
        totals.failed += worker.stats.failed.load(Ordering::Relaxed);
        totals.bytes += worker.stats.bytes.load(Ordering::Relaxed);
        totals
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
