//! Configuration types for bucket-mirror
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Store endpoint URL validation

use crate::error::ConfigError;
use crate::mirror::{DriverOptions, RetryPolicy, MAX_TRIES};
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum reasonable worker count
pub const MAX_WORKERS: usize = 256;

/// Maximum attempts per fetch or store
pub const MAX_RETRIES: u32 = 10;

/// Poll interval limits (milliseconds)
const MIN_POLL_MS: u64 = 10;
const MAX_POLL_MS: u64 = 60_000;

/// Regex for store endpoint URLs
static STORE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: http://host:8098 or https://host/prefix
    Regex::new(r"^https?://[^\s/:?#]+(:\d{1,5})?(/[^\s?#]*)?$").expect("Invalid store URL regex")
});

/// Mirror buckets between two key-value store clusters
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bucket-mirror",
    version,
    about = "Mirror buckets between key-value store clusters from pre-built key journals",
    long_about = "Copies every key listed in a bucket's key journal from a source cluster to a\n\
                  destination cluster, create-only. Keys that cannot be copied after the retry\n\
                  budget is spent are written to a failure journal next to the input, which can\n\
                  be fed back in as the key journal of a later run.",
    after_help = "EXAMPLES:\n    \
        bucket-mirror mirror --source http://old:8098 --destination http://new:8098 --data-root ./data users orders\n    \
        bucket-mirror split ./data/users/bucketkeys.keys --chunk-size 1000000\n    \
        bucket-mirror count ./data/users/bucketkeys.failed\n    \
        bucket-mirror dump ./data/users/bucketkeys.failed --limit 20"
)]
pub struct CliArgs {
    /// Subcommand
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Mirror one or more buckets
    Mirror(MirrorArgs),

    /// Split a key journal into chunks of at most N records
    Split {
        /// Key journal to split
        #[arg(value_name = "JOURNAL")]
        journal: PathBuf,

        /// Records per chunk
        #[arg(long, value_name = "NUM")]
        chunk_size: usize,
    },

    /// Count the records in a key journal
    Count {
        /// Key journal to count
        #[arg(value_name = "JOURNAL")]
        journal: PathBuf,
    },

    /// Print the keys in a key journal
    Dump {
        /// Key journal to print
        #[arg(value_name = "JOURNAL")]
        journal: PathBuf,

        /// Stop after this many keys
        #[arg(long, value_name = "NUM")]
        limit: Option<usize>,
    },
}

/// Arguments of the `mirror` subcommand
#[derive(Args, Debug, Clone)]
pub struct MirrorArgs {
    /// Source cluster HTTP endpoint
    #[arg(long, value_name = "URL", env = "BUCKET_MIRROR_SOURCE")]
    pub source: String,

    /// Destination cluster HTTP endpoint
    #[arg(long, value_name = "URL", env = "BUCKET_MIRROR_DESTINATION")]
    pub destination: String,

    /// Directory with one subdirectory of key journals per bucket
    #[arg(long, value_name = "DIR")]
    pub data_root: PathBuf,

    /// Number of worker threads (one source and one destination connection each)
    #[arg(
        short = 'w',
        long,
        default_value_t = default_workers(),
        value_name = "NUM"
    )]
    pub workers: usize,

    /// Attempts per fetch and per store
    #[arg(long, default_value_t = MAX_TRIES, value_name = "NUM")]
    pub retries: u32,

    /// Job completion poll interval in milliseconds
    #[arg(long, default_value = "500", value_name = "MS")]
    pub poll_ms: u64,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub timeout: u64,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Buckets to mirror, in order
    #[arg(value_name = "BUCKET", required = true, num_args = 1..)]
    pub buckets: Vec<String>,
}

fn default_workers() -> usize {
    // Fetch and store are network bound
    (num_cpus::get() * 2).min(MAX_WORKERS)
}

/// Validate a store endpoint URL and strip any trailing slash
pub fn validate_store_url(url: &str) -> Result<String, ConfigError> {
    let trimmed = url.trim().trim_end_matches('/');
    if !STORE_URL_REGEX.is_match(trimmed) {
        return Err(ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: "expected http://host[:port][/path]".to_string(),
        });
    }

    if let Some(port) = STORE_URL_REGEX
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| &m.as_str()[1..])
    {
        if port.parse::<u16>().is_err() {
            return Err(ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: format!("invalid port '{}'", port),
            });
        }
    }

    Ok(trimmed.to_string())
}

/// Validated runtime configuration for a mirror run
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Source endpoint
    pub source_url: String,

    /// Destination endpoint
    pub destination_url: String,

    /// Root of the per-bucket journal directories
    pub data_root: PathBuf,

    /// Number of worker threads per bucket
    pub worker_count: usize,

    /// Fetch/store attempt policy
    pub retry: RetryPolicy,

    /// Job completion poll interval
    pub poll_interval: Duration,

    /// HTTP request timeout
    pub timeout: Duration,

    /// Buckets in run order
    pub buckets: Vec<String>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl MirrorConfig {
    /// Create and validate configuration from `mirror` arguments
    pub fn from_args(args: MirrorArgs, verbose: bool) -> Result<Self, ConfigError> {
        let source_url = validate_store_url(&args.source)?;
        let destination_url = validate_store_url(&args.destination)?;

        // Validate worker count
        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        // Validate retry count
        if args.retries == 0 || args.retries > MAX_RETRIES {
            return Err(ConfigError::InvalidRetryCount {
                count: args.retries,
                max: MAX_RETRIES,
            });
        }

        // Validate data root
        if !args.data_root.is_dir() {
            return Err(ConfigError::InvalidDataRoot {
                path: args.data_root.clone(),
                reason: "not an existing directory".to_string(),
            });
        }

        if args.buckets.is_empty() {
            return Err(ConfigError::MissingArgument("BUCKET"));
        }
        if args.buckets.iter().any(|b| b.is_empty()) {
            return Err(ConfigError::EmptyBucketName);
        }

        let poll_ms = args.poll_ms.clamp(MIN_POLL_MS, MAX_POLL_MS);

        Ok(Self {
            source_url,
            destination_url,
            data_root: args.data_root,
            worker_count: args.workers,
            retry: RetryPolicy::default().with_max_tries(args.retries),
            poll_interval: Duration::from_millis(poll_ms),
            timeout: Duration::from_secs(args.timeout.max(1)),
            buckets: args.buckets,
            show_progress: !args.quiet,
            verbose,
        })
    }

    /// Options for the bucket driver
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions::new(self.data_root.clone(), self.worker_count)
            .with_retry(self.retry.clone())
            .with_poll_interval(self.poll_interval)
    }
}
