//! Progress reporting for mirror runs
//!
//! Provides real-time progress display using indicatif progress bars.

use crate::mirror::{BucketStatus, MirrorProgress, MirrorSummary};
use chrono::{DateTime, Local, Utc};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Progress reporter that displays job status
pub struct ProgressReporter {
    /// Progress bar
    bar: ProgressBar,

    /// Start of the current bucket, for the rate
    bucket_start: Instant,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            bucket_start: Instant::now(),
        }
    }

    /// Reset the rate clock for a new bucket
    pub fn start_bucket(&mut self, bucket: &str) {
        self.bucket_start = Instant::now();
        self.bar.set_message(format!("{}: starting...", bucket));
    }

    /// Update the progress display
    pub fn update(&self, bucket: &str, progress: &MirrorProgress) {
        self.bar
            .set_message(progress_line(bucket, progress, self.bucket_start.elapsed()));
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn progress_line(bucket: &str, progress: &MirrorProgress, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        progress.processed as f64 / secs
    } else {
        0.0
    };

    format!(
        "{} | Keys: {} | Mirrored: {} | Present: {} | Failed: {} | Size: {} | Rate: {:.0}/s | Workers: {}/{}",
        bucket,
        format_number(progress.processed),
        format_number(progress.mirrored),
        format_number(progress.already_present),
        format_number(progress.failed),
        format_size(progress.bytes, BINARY),
        rate,
        progress.worker_count - progress.finished_workers.min(progress.worker_count),
        progress.worker_count,
    )
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the mirror run
pub fn print_summary(summary: &MirrorSummary) {
    let duration_secs = summary.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        summary.processed() as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    if summary.is_complete() {
        println!("{}", style("Mirror Complete").green().bold());
    } else {
        println!("{}", style("Mirror Incomplete").yellow().bold());
    }
    println!("{}", style("─".repeat(50)).dim());

    for bucket in &summary.buckets {
        let status = match bucket.status {
            BucketStatus::Completed => style(bucket.status.label()).green(),
            BucketStatus::MissingKeys => style(bucket.status.label()).dim(),
            BucketStatus::Cancelled | BucketStatus::Aborted => style(bucket.status.label()).yellow(),
        };
        println!(
            "  {} {} keys, {} failed ({})",
            style(format!("{}:", bucket.bucket)).bold(),
            format_number(bucket.processed),
            format_number(bucket.failed),
            status
        );
        if bucket.failed > 0 {
            println!("    {} {}", style("Failures:").dim(), bucket.failed_path.display());
        }
    }

    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Keys:").bold(), format_number(summary.processed()));
    println!("  {} {}", style("Mirrored:").bold(), format_number(summary.mirrored()));
    println!(
        "  {} {}",
        style("Already present:").bold(),
        format_number(summary.already_present())
    );
    println!("  {} {}", style("Total Size:").bold(), format_size(summary.bytes(), BINARY));
    println!(
        "  {} {:.1}s ({:.0} keys/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if summary.failed() > 0 {
        println!(
            "  {} {}",
            style("Failed:").yellow().bold(),
            format_number(summary.failed())
        );
    }
    println!();
}

/// Print a header at the start of the run
pub fn print_header(source: &str, destination: &str, workers: usize, buckets: &[String], started_at: DateTime<Utc>) {
    println!();
    println!(
        "{} {}",
        style("bucket-mirror").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), source);
    println!("  {} {}", style("Destination:").bold(), destination);
    println!("  {} {}", style("Workers:").bold(), workers);
    println!("  {} {}", style("Buckets:").bold(), buckets.join(", "));
    println!(
        "  {} {}",
        style("Started:").bold(),
        started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    println!();
}
