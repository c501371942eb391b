//! Error types for bucket-mirror
//!
//! This module defines the error hierarchy for:
//! - Key journal I/O and format errors
//! - Store connection (fetch/store) errors
//! - Configuration and job-start errors
//! - Worker thread errors
//!
//! Only journal-open, connection provisioning and job-start failures reach
//! the caller as hard errors. Failures inside the per-key loop are turned
//! into dead-letter records by the workers (see [`KeyOutcome`]).

use crate::journal::JournalMode;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for bucket-mirror
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Key journal errors
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// Store connection errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// A provisioned connection failed its liveness check at job start
    #[error("{role} connection {index} to '{endpoint}' is not connected")]
    NotConnected {
        role: &'static str,
        index: usize,
        endpoint: String,
    },
}

/// Key journal errors
#[derive(Error, Debug)]
pub enum JournalError {
    /// Operation does not match the mode the journal was opened in
    #[error("Journal '{path}' is in {mode} mode, cannot {operation}")]
    InvalidMode {
        path: PathBuf,
        mode: JournalMode,
        operation: &'static str,
    },

    /// Record cannot be represented in the journal format
    #[error("Invalid journal argument: {0}")]
    InvalidArgument(String),

    /// Open/read/write failure
    #[error("I/O error on journal '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Short read or impossible length prefix
    #[error("Corrupt journal '{path}' at byte {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Journal was already closed
    #[error("Journal '{path}' is closed")]
    Closed { path: PathBuf },
}

impl JournalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JournalError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Store connection errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Network-level failure (connection refused, reset, DNS)
    #[error("Transport error talking to '{endpoint}': {reason}")]
    Transport { endpoint: String, reason: String },

    /// Request timed out
    #[error("Request to '{endpoint}' timed out")]
    Timeout { endpoint: String },

    /// Unexpected HTTP status
    #[error("Unexpected status {code} from '{endpoint}'")]
    Status { endpoint: String, code: u16 },

    /// Malformed response
    #[error("Protocol error from '{endpoint}': {reason}")]
    Protocol { endpoint: String, reason: String },

    /// Connection is not usable
    #[error("Not connected to '{endpoint}'")]
    NotConnected { endpoint: String },
}

impl StoreError {
    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport { .. }
            | StoreError::Timeout { .. }
            | StoreError::NotConnected { .. } => true,
            StoreError::Status { code, .. } => *code >= 500,
            StoreError::Protocol { .. } => false,
        }
    }
}

/// Configuration and job-start errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// A job was started without workers
    #[error("A mirror job needs at least one worker")]
    NoWorkers,

    /// Fewer connection pairs than workers
    #[error("Insufficient connections: {workers} workers need {workers} connection pairs, got {available}")]
    InsufficientConnections { workers: usize, available: usize },

    /// Invalid retry count
    #[error("Invalid retry count {count}: must be between 1 and {max}")]
    InvalidRetryCount { count: u32, max: u32 },

    /// Invalid store endpoint
    #[error("Invalid store URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Data root problem
    #[error("Invalid data root '{path}': {reason}")]
    InvalidDataRoot { path: PathBuf, reason: String },

    /// Empty bucket name
    #[error("Bucket name cannot be empty")]
    EmptyBucketName,

    /// Missing subcommand arguments
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked outside the per-key guard
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker thread could not be spawned
    #[error("Failed to initialize worker {id}: {reason}")]
    InitFailed { id: usize, reason: String },

    /// Journal failure that stops the worker
    #[error("Worker {id} journal error: {source}")]
    Journal {
        id: usize,
        #[source]
        source: JournalError,
    },
}

/// Result type alias for MirrorError
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Result type alias for JournalError
pub type JournalResult<T> = std::result::Result<T, JournalError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of mirroring a single key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Object was created at the destination
    Mirrored { bytes: u64 },

    /// Destination already held the key; nothing written
    AlreadyPresent,

    /// Source returned nothing usable within the attempt budget
    FetchExhausted,

    /// Destination write failed on every attempt
    StoreExhausted,

    /// Non-retryable error or panic while processing the key
    Failed { reason: String },
}

impl KeyOutcome {
    /// Returns true if the key ended up at the destination
    pub fn is_success(&self) -> bool {
        matches!(self, KeyOutcome::Mirrored { .. } | KeyOutcome::AlreadyPresent)
    }

    /// Short label used in log lines
    pub fn label(&self) -> &'static str {
        match self {
            KeyOutcome::Mirrored { .. } => "mirrored",
            KeyOutcome::AlreadyPresent => "already present",
            KeyOutcome::FetchExhausted => "fetch exhausted",
            KeyOutcome::StoreExhausted => "store exhausted",
            KeyOutcome::Failed { .. } => "failed",
        }
    }
}
