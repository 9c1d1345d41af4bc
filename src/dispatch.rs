//! Suite dispatch.
//!
//! Drives the full pipeline once per suite: resolve pool → enumerate → plan
//! → execute → aggregate, summing broken counts across suites. The shared
//! test-server port allocation is reset exactly once, before the first
//! suite; emulator instances booted for a suite are released after its
//! shards complete whether execution succeeded or not.

use tracing::{info, warn};

use crate::config::RunConfig;
use crate::device::{DeviceService, EmulatorService};
use crate::enumerate::{self, EnumerateError};
use crate::executor;
use crate::pool::{self, DevicePool, PoolError};
use crate::ports::{PortAllocator, PortError};
use crate::report::{self, AggregatedReport};
use crate::shard;
use crate::suite::TestSuiteTarget;
use crate::suppress::PatternStore;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Fatal errors terminating the run.
///
/// Device-level failures are absorbed and retried at the pool level, and
/// shard-level failures are absorbed at aggregation; only pool exhaustion
/// and port-allocation failures surface here.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Enumerate(#[from] EnumerateError),

    #[error("failed to reset test server port allocation: {0}")]
    PortAllocation(#[from] PortError),
}

/// Runs suites against the configured services.
pub struct Dispatcher<'a> {
    devices: &'a dyn DeviceService,
    emulators: &'a dyn EmulatorService,
    ports: &'a dyn PortAllocator,
    patterns: &'a dyn PatternStore,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        devices: &'a dyn DeviceService,
        emulators: &'a dyn EmulatorService,
        ports: &'a dyn PortAllocator,
        patterns: &'a dyn PatternStore,
    ) -> Self {
        Self {
            devices,
            emulators,
            ports,
            patterns,
        }
    }

    /// Dispatches every suite in order and returns the total number of
    /// failing tests across all of them.
    pub async fn dispatch(
        &self,
        suites: &[TestSuiteTarget],
        config: &RunConfig,
    ) -> DispatchResult<usize> {
        // Shards race for port ranges if this happens any later.
        self.ports.reset_allocation().await?;

        let mut failures = 0;
        for suite in suites {
            // Each suite gets its own copy so one run's mutations cannot
            // leak into the next.
            let suite_config = config.clone();
            failures += self.run_suite(suite, &suite_config).await?;
        }
        Ok(failures)
    }

    /// Runs a single suite and returns its broken-test count.
    ///
    /// Emulator instances acquired for this suite are shut down on every
    /// exit path before any error propagates.
    async fn run_suite(
        &self,
        suite: &TestSuiteTarget,
        config: &RunConfig,
    ) -> DispatchResult<usize> {
        info!("Running test suite {}", suite.name);

        let pool = pool::resolve(config, self.devices, self.emulators).await?;

        let outcome = self.run_shards(suite, config, &pool).await;

        for instance in &pool.emulators {
            if let Err(e) = self.emulators.shutdown(instance).await {
                warn!("Failed to shut down emulator {}: {}", instance, e);
            }
        }

        let report = outcome?;
        Ok(report.broken_count())
    }

    async fn run_shards(
        &self,
        suite: &TestSuiteTarget,
        config: &RunConfig,
        pool: &DevicePool,
    ) -> DispatchResult<AggregatedReport> {
        // An explicit filter already names the subset to run, so the
        // enumeration round-trip is skipped entirely.
        let (tests, surviving) = if config.test_filter.is_empty() {
            enumerate::enumerate(
                self.devices,
                self.patterns,
                suite,
                pool.devices.clone(),
                pool.is_emulator_pool(),
            )
            .await?
        } else {
            (Vec::new(), pool.devices.clone())
        };

        let plan = shard::plan(&tests, &surviving, &config.test_filter);
        let options = config.execution_options();

        let (results, failures) = executor::execute(self.devices, suite, &plan, &options).await;

        let report = report::merge(suite, results, failures);
        report.emit();

        if let Some(archive_name) = &config.log_dump {
            if let Err(e) =
                report::archive_debug_info(&report, archive_name, &config.debug_info_root())
            {
                warn!("Failed to write debug info archive: {}", e);
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceHandle;
    use crate::testutil::{
        suite_target, FakeDeviceService, FakeEmulatorService, FakePatternStore, FakePortAllocator,
    };
    use crate::suppress::DisabledPattern;

    fn test_ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Fixture.Case{i}")).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn all_passing_suite_reports_zero_failures() {
        let devices = FakeDeviceService::with_attached(&["d0", "d1", "d2"])
            .with_test_ids(test_ids(10));
        let emulators = FakeEmulatorService::default();
        let ports = FakePortAllocator::default();
        let patterns = FakePatternStore::default();

        let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
        let failures = dispatcher
            .dispatch(&[suite_target("base_unittests")], &RunConfig::default())
            .await
            .unwrap();

        assert_eq!(failures, 0);
        assert_eq!(ports.resets(), 1);
        // All three devices ran a shard.
        assert_eq!(devices.run_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn broken_tests_sum_across_suites() {
        let devices = FakeDeviceService::with_attached(&["d0", "d1"])
            .with_test_ids(test_ids(6))
            .failing_tests(&["Fixture.Case1", "Fixture.Case4"]);
        let emulators = FakeEmulatorService::default();
        let ports = FakePortAllocator::default();
        let patterns = FakePatternStore::default();

        let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
        let failures = dispatcher
            .dispatch(
                &[suite_target("base_unittests"), suite_target("net_unittests")],
                &RunConfig::default(),
            )
            .await
            .unwrap();

        // Two broken tests per suite, two suites.
        assert_eq!(failures, 4);
        // Port allocation is reset once per dispatch, not per suite.
        assert_eq!(ports.resets(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_pool_aborts_before_any_shard() {
        let devices = FakeDeviceService::default();
        let emulators = FakeEmulatorService::default();
        let ports = FakePortAllocator::default();
        let patterns = FakePatternStore::default();

        let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
        let err = dispatcher
            .dispatch(&[suite_target("base_unittests")], &RunConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Pool(PoolError::NoDeviceAvailable)
        ));
        assert_eq!(devices.run_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn port_reset_failure_is_fatal_before_any_suite() {
        let devices = FakeDeviceService::with_attached(&["d0"]).with_test_ids(test_ids(2));
        let emulators = FakeEmulatorService::default();
        let ports = FakePortAllocator::failing();
        let patterns = FakePatternStore::default();

        let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
        let err = dispatcher
            .dispatch(&[suite_target("base_unittests")], &RunConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::PortAllocation(_)));
        assert_eq!(devices.run_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn explicit_filter_skips_enumeration_and_shards_once() {
        let devices = FakeDeviceService::with_attached(&["d0", "d1"]).with_test_ids(test_ids(4));
        let emulators = FakeEmulatorService::default();
        let ports = FakePortAllocator::default();
        let patterns = FakePatternStore::default();

        let config = RunConfig {
            test_filter: "SocketTest.*".to_string(),
            ..RunConfig::default()
        };

        let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
        dispatcher
            .dispatch(&[suite_target("net_unittests")], &config)
            .await
            .unwrap();

        // No enumeration round-trip happened.
        assert_eq!(devices.list_count(), 0);
        // One shard only, despite two devices.
        assert_eq!(devices.run_count(), 1);
        assert_eq!(devices.filters(), vec!["SocketTest.*".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn suppressed_tests_never_reach_a_shard() {
        let devices = FakeDeviceService::with_attached(&["d0"])
            .with_tests(&["A.keep", "B.drop", "C.keep"]);
        let emulators = FakeEmulatorService::default();
        let ports = FakePortAllocator::default();
        let patterns = FakePatternStore::with_patterns(vec![DisabledPattern::new("B.*")]);

        let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
        dispatcher
            .dispatch(&[suite_target("base_unittests")], &RunConfig::default())
            .await
            .unwrap();

        let filters = devices.filters();
        assert_eq!(filters, vec!["A.keep:C.keep".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn emulators_are_released_after_a_clean_run() {
        let devices = FakeDeviceService::default().with_test_ids(test_ids(4));
        let emulators = FakeEmulatorService::booting(&["emulator-5554", "emulator-5556"]);
        let ports = FakePortAllocator::default();
        let patterns = FakePatternStore::default();

        let mut config = RunConfig::default();
        config.emulator.enabled = true;
        config.emulator.count = 2;

        let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
        dispatcher
            .dispatch(&[suite_target("base_unittests")], &config)
            .await
            .unwrap();

        assert_eq!(
            emulators.shutdowns(),
            vec!["emulator-5554".to_string(), "emulator-5556".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn emulators_are_released_when_enumeration_fails() {
        // Both emulator instances fail deployment, so enumeration exhausts
        // the pool; shutdown must still run before the error propagates.
        let devices = FakeDeviceService::default()
            .with_test_ids(test_ids(2))
            .failing_deploy("emulator-5554")
            .failing_deploy("emulator-5556");
        let emulators = FakeEmulatorService::booting(&["emulator-5554", "emulator-5556"]);
        let ports = FakePortAllocator::default();
        let patterns = FakePatternStore::default();

        let mut config = RunConfig::default();
        config.emulator.enabled = true;
        config.emulator.count = 2;

        let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
        let err = dispatcher
            .dispatch(&[suite_target("base_unittests")], &config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Enumerate(EnumerateError::NoDeviceAvailable)
        ));
        assert_eq!(emulators.shutdowns().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn surviving_pool_is_used_for_sharding() {
        // d0 fails during enumeration; sharding proceeds on d1 alone.
        let devices = FakeDeviceService::with_attached(&["d0", "d1"])
            .with_test_ids(test_ids(4))
            .failing_deploy("d0");
        let emulators = FakeEmulatorService::default();
        let ports = FakePortAllocator::default();
        let patterns = FakePatternStore::default();

        let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
        let failures = dispatcher
            .dispatch(&[suite_target("base_unittests")], &RunConfig::default())
            .await
            .unwrap();

        assert_eq!(failures, 0);
        assert_eq!(devices.run_count(), 1);
        assert_eq!(
            devices.run_devices(),
            vec![DeviceHandle::new("d1")]
        );
    }
}
