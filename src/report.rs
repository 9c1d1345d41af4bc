//! Result aggregation and report emission.
//!
//! Shard outcomes merge commutatively: broken sets by union, pass counts by
//! sum, annotations concatenated in shard-index order so the printed report
//! is reproducible no matter which shard finished first.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::results::{ShardFailure, ShardResult};
use crate::suite::TestSuiteTarget;

/// Unified outcome of one suite run across all shards.
///
/// Created fresh per suite, consumed by the dispatcher for the overall
/// failure tally, then discarded.
#[derive(Debug)]
pub struct AggregatedReport {
    /// The suite this report covers.
    pub suite: String,

    /// Total tests that passed across all shards.
    pub passed: usize,

    /// Every broken test, deduplicated. A test reported broken by any shard
    /// counts once. Tests assigned to a shard that never reported are
    /// included here: from the run's point of view they crashed.
    pub broken: BTreeSet<String>,

    /// Shard annotations in shard-index order.
    pub annotations: String,

    /// Shards that failed for infrastructure reasons.
    pub shard_failures: Vec<ShardFailure>,

    /// Duration of the longest shard (the run is as slow as its slowest
    /// device).
    pub duration: Duration,

    /// Debug-info directories captured by the shards, for the log-dump
    /// archive.
    pub debug_info_dirs: Vec<PathBuf>,
}

impl AggregatedReport {
    /// The suite's contribution to the overall failure tally.
    ///
    /// A shard that failed without having a concrete test list (filter-mode
    /// runs) still counts as one failure; otherwise an all-shards-down run
    /// would read as success.
    pub fn broken_count(&self) -> usize {
        let untracked_failures = self
            .shard_failures
            .iter()
            .filter(|f| f.tests.is_empty())
            .count();
        self.broken.len() + untracked_failures
    }

    /// Whether every test in the suite passed.
    pub fn success(&self) -> bool {
        self.broken_count() == 0
    }

    /// Prints the suite-qualified summary and, on failure, the step-failure
    /// marker the surrounding pipeline greps for.
    pub fn emit(&self) {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        println!();
        println!("Test results for {} ({}):", self.suite, now);
        println!("  Passed: {}", console::style(self.passed).green());
        println!(
            "  Broken: {}",
            if self.broken_count() > 0 {
                console::style(self.broken_count()).red()
            } else {
                console::style(self.broken_count()).green()
            }
        );
        for test in &self.broken {
            println!("    - {}", console::style(test).red());
        }
        for failure in &self.shard_failures {
            println!(
                "  Shard {} on {} did not report: {}",
                failure.shard_index,
                failure.device,
                console::style(&failure.error).red()
            );
        }
        println!("  Duration: {:?}", self.duration);

        if !self.annotations.is_empty() {
            println!("{}", self.annotations);
        }

        if !self.success() {
            println!("[STEP_FAILURE] {}: {} broken test(s)", self.suite, self.broken_count());
        }
    }
}

/// Merges all shard outcomes of one suite into a single report.
///
/// Merging is commutative and associative over the input order; results are
/// re-sorted by shard index internally.
pub fn merge(
    suite: &TestSuiteTarget,
    mut results: Vec<ShardResult>,
    mut failures: Vec<ShardFailure>,
) -> AggregatedReport {
    results.sort_by_key(|r| r.shard_index);
    failures.sort_by_key(|f| f.shard_index);

    let mut broken = BTreeSet::new();
    let mut passed = 0;
    let mut annotations = String::new();
    let mut duration = Duration::ZERO;
    let mut debug_info_dirs = Vec::new();

    for result in &results {
        passed += result.passed.len();
        broken.extend(result.broken().cloned());
        duration = duration.max(result.duration);
        if !result.annotation.is_empty() {
            annotations.push_str(&result.annotation);
            if !result.annotation.ends_with('\n') {
                annotations.push('\n');
            }
        }
        if let Some(dir) = &result.debug_info_dir {
            debug_info_dirs.push(dir.clone());
        }
    }

    for failure in &failures {
        broken.extend(failure.tests.iter().cloned());
    }

    AggregatedReport {
        suite: suite.name.clone(),
        passed,
        broken,
        annotations,
        shard_failures: failures,
        duration,
        debug_info_dirs,
    }
}

/// Packs every shard's debug-info directory into `<name>.tar` under
/// `dest_dir`, then removes the captured directories.
pub fn archive_debug_info(
    report: &AggregatedReport,
    archive_name: &str,
    dest_dir: &Path,
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dest_dir)?;
    let archive_path = dest_dir.join(format!("{archive_name}.tar"));

    let file = File::create(&archive_path)?;
    let mut builder = tar::Builder::new(file);
    for dir in &report.debug_info_dirs {
        let Some(name) = dir.file_name() else {
            continue;
        };
        builder.append_dir_all(name, dir)?;
    }
    builder.finish()?;

    for dir in &report.debug_info_dirs {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("Failed to clean debug info dir {}: {}", dir.display(), e);
        }
    }

    info!("Wrote debug info archive {}", archive_path.display());
    Ok(archive_path)
}
