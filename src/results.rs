//! Per-shard outcome types.
//!
//! A [`ShardResult`] is what one device hands back after running its slice of
//! a suite: the test identifiers bucketed by outcome, the log annotation for
//! that shard, and a pointer to any captured debug artifacts. A
//! [`ShardFailure`] records a shard job that never produced results at all
//! (device disconnected, runner crashed) together with the tests it had been
//! assigned, so the aggregate can still account for them.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceHandle;

/// Outcome of running one shard on one device.
///
/// Produced by the device service, owned by the shard executor until the
/// aggregator merges it. A result existing at all means the runner completed;
/// how many individual tests failed is data, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardResult {
    /// Index of this shard in the plan (also the device's pool index).
    pub shard_index: usize,

    /// The device this shard ran on.
    pub device: DeviceHandle,

    /// Tests that passed.
    pub passed: Vec<String>,

    /// Tests that ran and failed an assertion.
    pub failed: Vec<String>,

    /// Tests that crashed the runner process.
    pub crashed: Vec<String>,

    /// Tests that exceeded the per-shard timeout.
    pub timed_out: Vec<String>,

    /// Log annotation for this shard, emitted verbatim in the suite report.
    pub annotation: String,

    /// Directory holding captured debug info, when capture was requested.
    pub debug_info_dir: Option<PathBuf>,

    /// Wall-clock time the shard took.
    pub duration: Duration,
}

impl ShardResult {
    /// Creates an empty result for a shard that had nothing to run.
    pub fn empty(shard_index: usize, device: DeviceHandle) -> Self {
        Self {
            shard_index,
            device,
            passed: Vec::new(),
            failed: Vec::new(),
            crashed: Vec::new(),
            timed_out: Vec::new(),
            annotation: String::new(),
            debug_info_dir: None,
            duration: Duration::ZERO,
        }
    }

    /// All broken tests in this shard: failed, crashed, or timed out.
    pub fn broken(&self) -> impl Iterator<Item = &String> {
        self.failed
            .iter()
            .chain(self.crashed.iter())
            .chain(self.timed_out.iter())
    }

    /// Returns `true` if every test in this shard passed.
    pub fn clean(&self) -> bool {
        self.failed.is_empty() && self.crashed.is_empty() && self.timed_out.is_empty()
    }
}

/// Infrastructure failure of one shard job.
///
/// Unlike test failures, these mean the shard produced no per-test results.
/// The assigned test list is kept so the aggregator can mark those tests
/// broken instead of silently losing them.
#[derive(Debug, Clone)]
pub struct ShardFailure {
    /// Index of the shard that failed.
    pub shard_index: usize,

    /// The device the shard was assigned to.
    pub device: DeviceHandle,

    /// Tests that were assigned to the shard and never reported.
    pub tests: Vec<String>,

    /// Description of what went wrong.
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_covers_all_failure_buckets() {
        let mut result = ShardResult::empty(0, DeviceHandle::new("serial-1"));
        result.passed.push("A.ok".to_string());
        result.failed.push("A.fail".to_string());
        result.crashed.push("B.crash".to_string());
        result.timed_out.push("C.slow".to_string());

        let broken: Vec<_> = result.broken().cloned().collect();
        assert_eq!(broken, vec!["A.fail", "B.crash", "C.slow"]);
        assert!(!result.clean());
    }

    #[test]
    fn empty_result_is_clean() {
        let result = ShardResult::empty(3, DeviceHandle::new("serial-9"));
        assert!(result.clean());
        assert_eq!(result.broken().count(), 0);
    }
}
