//! devshard: sharded native-test execution across device pools.
//!
//! This crate turns "N tests, M devices" into "M concurrent jobs, 1
//! aggregated result": it asks one device for a suite's full test list,
//! strips host-suppressed tests, strides the remainder across every usable
//! device, runs the shards concurrently with per-device failure isolation,
//! and merges the outcomes into a single pass/fail verdict.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Device services**: narrow contracts over adb and emulator tooling
//! - **Pool / Enumerate**: resolve usable devices, obtain the canonical list
//! - **Shard / Executor**: deterministic partitioning, concurrent execution
//! - **Report / Dispatch**: aggregation, summary emission, exit accounting
//!
//! # Example
//!
//! ```no_run
//! use devshard::config::RunConfig;
//! use devshard::device::adb::AdbDeviceService;
//! use devshard::device::emulator::LocalEmulatorService;
//! use devshard::dispatch::Dispatcher;
//! use devshard::ports::FilePortAllocator;
//! use devshard::suite::{resolve_suites, BinaryKind};
//! use devshard::suppress::FilePatternStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::default();
//!     let suites = resolve_suites(
//!         &config.build_dir(),
//!         BinaryKind::Executable,
//!         &config.suites,
//!         Some("base_unittests"),
//!     )?;
//!
//!     let devices = AdbDeviceService::new("adb", config.debug_info_root());
//!     let emulators = LocalEmulatorService::new("devshard");
//!     let ports = FilePortAllocator::new(std::env::temp_dir().join("devshard_ports.json"));
//!     let patterns = FilePatternStore::new(&config.filter_dir);
//!
//!     let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
//!     let failures = dispatcher.dispatch(&suites, &config).await?;
//!     println!("{failures} broken test(s)");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod dispatch;
pub mod enumerate;
pub mod executor;
pub mod pool;
pub mod ports;
pub mod report;
pub mod results;
pub mod shard;
pub mod suite;
pub mod suppress;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use config::{load_config, RunConfig};
pub use device::{DeviceHandle, DeviceService, EmulatorService, ExecutionOptions};
pub use dispatch::Dispatcher;
pub use report::AggregatedReport;
pub use results::ShardResult;
pub use shard::ShardPlan;
pub use suite::TestSuiteTarget;
