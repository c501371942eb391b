//! bucket-mirror - Journaled, concurrent bucket mirroring
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use bucket_mirror::config::{CliArgs, Command, MirrorArgs, MirrorConfig};
use bucket_mirror::journal::{count_records, split, KeyJournal};
use bucket_mirror::mirror::{BucketMirror, BucketStatus};
use bucket_mirror::progress::{format_number, print_header, print_summary, ProgressReporter};
use bucket_mirror::store::{Connector, HttpConnector};
use chrono::Utc;
use clap::Parser;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    match args.command {
        Command::Mirror(mirror_args) => run_mirror(mirror_args, args.verbose),
        Command::Split { journal, chunk_size } => run_split(&journal, chunk_size),
        Command::Count { journal } => run_count(&journal),
        Command::Dump { journal, limit } => run_dump(&journal, limit),
    }
}

/// Mirror every requested bucket
fn run_mirror(args: MirrorArgs, verbose: bool) -> Result<()> {
    let config = MirrorConfig::from_args(args, verbose).context("Invalid configuration")?;

    if config.source_url == config.destination_url {
        warn!(url = %config.source_url, "Source and destination are the same endpoint");
    }

    let source: Arc<dyn Connector> = Arc::new(HttpConnector::new(&config.source_url, config.timeout));
    let destination: Arc<dyn Connector> =
        Arc::new(HttpConnector::new(&config.destination_url, config.timeout));
    let mirror = BucketMirror::new(source, destination, config.driver_options());

    // Setup signal handler for graceful shutdown
    let shutdown_flag = mirror.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing in-flight keys...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    if config.show_progress {
        print_header(
            &config.source_url,
            &config.destination_url,
            config.worker_count,
            &config.buckets,
            Utc::now(),
        );
    }

    // Create progress reporter
    let mut progress = if config.show_progress {
        Some(ProgressReporter::new())
    } else {
        None
    };

    if let Some(ref p) = progress {
        p.set_status("Connecting...");
    }

    let mut current_bucket = String::new();
    let summary = mirror
        .mirror_buckets(&config.buckets, |bucket, update| {
            if let Some(p) = progress.as_mut() {
                if bucket != current_bucket {
                    current_bucket = bucket.to_string();
                    p.start_bucket(bucket);
                }
                p.update(bucket, update);
            }
        })
        .context("Mirror failed")?;

    // Finish progress
    if let Some(ref p) = progress {
        if summary.is_complete() {
            p.finish("Mirror completed");
        } else {
            p.finish("Mirror incomplete");
        }
    }

    // Print summary
    if config.show_progress {
        print_summary(&summary);
    }

    info!(
        buckets = summary.buckets.len(),
        processed = summary.processed(),
        failed = summary.failed(),
        duration_secs = summary.duration.as_secs(),
        "Run finished"
    );

    if summary.interrupted {
        bail!("Interrupted before every bucket was mirrored");
    }

    let aborted: Vec<&str> = summary
        .buckets
        .iter()
        .filter(|b| b.status == BucketStatus::Aborted)
        .map(|b| b.bucket.as_str())
        .collect();
    if !aborted.is_empty() {
        bail!("Workers stopped on journal errors in: {}", aborted.join(", "));
    }

    if summary.failed() > 0 {
        info!(failed = summary.failed(), "Some keys were written to failure journals");
    }

    Ok(())
}

/// Split a journal into chunk files
fn run_split(journal: &Path, chunk_size: usize) -> Result<()> {
    let chunks = split(journal, chunk_size)
        .with_context(|| format!("Failed to split '{}'", journal.display()))?;

    for chunk in &chunks {
        println!("{}", chunk.display());
    }
    Ok(())
}

/// Print the record count of a journal
fn run_count(journal: &Path) -> Result<()> {
    let count = count_records(journal)
        .with_context(|| format!("Failed to count '{}'", journal.display()))?;

    println!("{}", format_number(count));
    Ok(())
}

/// Print the keys of a journal, one per line
fn run_dump(journal: &Path, limit: Option<usize>) -> Result<()> {
    let mut reader = KeyJournal::open_read(journal)
        .with_context(|| format!("Failed to open '{}'", journal.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in reader.iter().take(limit.unwrap_or(usize::MAX)) {
        let key = record.with_context(|| format!("Failed to read '{}'", journal.display()))?;
        writeln!(out, "{}", String::from_utf8_lossy(key.as_bytes()))?;
    }
    out.flush()?;
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("bucket_mirror=debug,warn")
    } else {
        EnvFilter::new("bucket_mirror=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_names(verbose)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
