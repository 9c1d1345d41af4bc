//! Device and emulator service contracts.
//!
//! This module defines the seams between the sharding engine and the
//! machinery that actually talks to hardware. The engine never shells out to
//! `adb` itself; it drives these traits, and tests drive them with fakes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DeviceService                           │
//! │                                                              │
//! │  list_attached() ──────────► [DeviceHandle]                 │
//! │  deploy(device, suite)                                       │
//! │  list_all_tests(device, suite) ──► [test id]                │
//! │  run_filtered(device, suite, filter, opts) ──► ShardResult  │
//! └─────────────────────────────────────────────────────────────┘
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     EmulatorService                          │
//! │                                                              │
//! │  launch(count, wait_for_boot) ──► [DeviceHandle]            │
//! │  shutdown(device)                                            │
//! │  delete_all_temp_instances()                                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in implementations
//!
//! | Service | Module | Backend |
//! |---------|--------|---------|
//! | [`adb::AdbDeviceService`] | [`adb`] | the `adb` command-line tool |
//! | [`emulator::LocalEmulatorService`] | [`emulator`] | locally booted emulator instances |
//!
//! # Error handling
//!
//! All operations return [`DeviceResult<T>`] wrapping [`DeviceError`]. A test
//! that fails on the device is NOT an error: errors mean the operation
//! itself could not run (deploy failed, device gone, timeout). Enumeration
//! absorbs these by dropping the device from the pool; execution absorbs
//! them into per-shard failure records.

pub mod adb;
pub mod emulator;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::results::ShardResult;
use crate::suite::TestSuiteTarget;

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while operating on a device.
///
/// Categories matter more than messages here: enumeration retries on the next
/// device for any variant, while the executor records the variant text in the
/// shard failure.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Copying or installing the suite binary onto the device failed.
    #[error("failed to deploy suite to {device}: {reason}")]
    DeployFailed { device: String, reason: String },

    /// Asking the deployed binary for its test list failed.
    #[error("failed to list tests on {device}: {reason}")]
    ListFailed { device: String, reason: String },

    /// A command could not be started or its output could not be read.
    ///
    /// A command that runs and exits non-zero is NOT this error; runner exit
    /// codes are folded into the shard result.
    #[error("failed to execute on {device}: {reason}")]
    ExecFailed { device: String, reason: String },

    /// An operation exceeded its timeout.
    #[error("operation on {device} timed out after {timeout_secs}s")]
    Timeout { device: String, timeout_secs: u64 },

    /// The device dropped off the bus mid-operation.
    #[error("device {device} disconnected")]
    Disconnected { device: String },

    /// I/O error on the host side.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific error not covered by other variants.
    #[error("device error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Opaque reference to one execution target.
///
/// Wraps the device serial (or emulator console id). Handles are owned by the
/// resolved pool; a handle dropped during enumeration is never reused in the
/// same run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    serial: String,
}

impl DeviceHandle {
    /// Creates a handle for the given serial.
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }

    /// The device serial as passed to `adb -s`.
    pub fn serial(&self) -> &str {
        &self.serial
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serial)
    }
}

/// Suite-level settings shared by every shard job in one run.
///
/// Each job additionally owns its device handle and filter expression; these
/// options are the part that is identical across shards.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Per-shard execution timeout.
    pub timeout: Duration,

    /// Remove pushed binaries and scratch data from the device afterwards.
    pub cleanup_test_files: bool,

    /// Optional tool wrapper (e.g. `"valgrind --leak-check=full"`) prefixed
    /// to the runner invocation. Parsed with shell word splitting.
    pub tool: Option<String>,

    /// Extra arguments appended to the runner invocation.
    pub test_arguments: String,

    /// Capture per-shard debug info directories for the log-dump archive.
    pub capture_debug_info: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            cleanup_test_files: false,
            tool: None,
            test_arguments: String::new(),
            capture_debug_info: false,
        }
    }
}

/// Talks to physical or virtual devices.
///
/// Implementations must be `Send + Sync`; the executor calls `run_filtered`
/// from one scoped task per shard, each with its own device handle.
#[async_trait]
pub trait DeviceService: Send + Sync {
    /// Lists devices currently attached and online, in bus order.
    async fn list_attached(&self) -> DeviceResult<Vec<DeviceHandle>>;

    /// Deploys (pushes or installs) the suite binary onto the device.
    async fn deploy(&self, device: &DeviceHandle, suite: &TestSuiteTarget) -> DeviceResult<()>;

    /// Asks the deployed binary for its full test list.
    ///
    /// Returns identifiers in `Fixture.Case` form, in the order the binary
    /// reports them. Requires a prior successful [`deploy`](Self::deploy).
    async fn list_all_tests(
        &self,
        device: &DeviceHandle,
        suite: &TestSuiteTarget,
    ) -> DeviceResult<Vec<String>>;

    /// Runs the suite on the device with the given filter expression.
    ///
    /// `shard_index` is recorded in the result for deterministic aggregation
    /// order. The filter uses gtest syntax: colon-separated identifiers, with
    /// `*`/`?` wildcards allowed.
    async fn run_filtered(
        &self,
        device: &DeviceHandle,
        suite: &TestSuiteTarget,
        filter: &str,
        shard_index: usize,
        options: &ExecutionOptions,
    ) -> DeviceResult<ShardResult>;
}

/// Boots and tears down emulator instances.
#[async_trait]
pub trait EmulatorService: Send + Sync {
    /// Launches `count` instances, returning handles only for instances that
    /// reached boot-complete. Partial boot failures shrink the returned set;
    /// they are not an error.
    async fn launch(&self, count: usize, wait_for_boot: bool) -> DeviceResult<Vec<DeviceHandle>>;

    /// Shuts down one instance previously returned by [`launch`](Self::launch).
    async fn shutdown(&self, device: &DeviceHandle) -> DeviceResult<()>;

    /// Deletes leftover temporary instance state from previous runs.
    async fn delete_all_temp_instances(&self) -> DeviceResult<()>;
}
