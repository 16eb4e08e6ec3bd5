//! Statistics from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! sync statistics from the storage layer.

use crate::engine::JobKind;
use crate::storage::{ClassificationCounts, RunRecord, Storage};
use crate::Result;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct SyncStatistics {
    /// Total number of stored posts
    pub total_posts: u64,

    /// Posts by classification outcome
    pub classification: ClassificationCounts,

    /// Events extracted from matched posts
    pub total_events: u64,

    /// Accounts with a watermark
    pub tracked_accounts: u64,

    /// Credentials with a pending rate-limit reset
    pub rate_limited_credentials: u64,

    /// Most recent run of each job kind
    pub last_runs: Vec<(JobKind, Option<RunRecord>)>,
}

/// Loads statistics from storage
pub fn load_statistics(storage: &dyn Storage) -> Result<SyncStatistics> {
    let mut last_runs = Vec::new();
    for kind in [JobKind::Extraction, JobKind::Classification] {
        last_runs.push((kind, storage.latest_run(kind.as_str())?));
    }

    Ok(SyncStatistics {
        total_posts: storage.count_posts()?,
        classification: storage.classification_counts()?,
        total_events: storage.count_events()?,
        tracked_accounts: storage.count_watermarks()?,
        rate_limited_credentials: storage.count_rate_limits()?,
        last_runs,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &SyncStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Total posts: {}", stats.total_posts);
    println!("  Tracked accounts: {}", stats.tracked_accounts);
    println!("  Extracted events: {}", stats.total_events);
    println!();

    println!("Classification:");
    let counts = &stats.classification;
    for (label, count) in [
        ("Pending", counts.pending),
        ("Matched", counts.matched),
        ("Not matched", counts.not_matched),
    ] {
        let percentage = if stats.total_posts > 0 {
            (count as f64 / stats.total_posts as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", label, count, percentage);
    }
    println!();

    if stats.rate_limited_credentials > 0 {
        println!(
            "Rate Limited Credentials: {}",
            stats.rate_limited_credentials
        );
        println!();
    }

    println!("Last Runs:");
    for (kind, run) in &stats.last_runs {
        match run {
            Some(run) => println!(
                "  {}: {} at {} ({} items, {} failed)",
                kind, run.status, run.started_at, run.items_total, run.items_failed
            ),
            None => println!("  {}: never", kind),
        }
    }
}
