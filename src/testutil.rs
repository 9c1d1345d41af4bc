//! Shared in-memory fakes for the service seams.
//!
//! Every fake records the calls it receives so tests can assert on retry
//! counts, filter expressions, and release ordering without touching adb.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::device::{
    DeviceError, DeviceHandle, DeviceResult, DeviceService, EmulatorService, ExecutionOptions,
};
use crate::ports::{PortAllocator, PortError, PortResult};
use crate::results::ShardResult;
use crate::suite::{BinaryKind, TestSuiteTarget};
use crate::suppress::{DisabledPattern, PatternStore};

/// A resolved suite target without touching the filesystem.
pub fn suite_target(name: &str) -> TestSuiteTarget {
    TestSuiteTarget {
        name: name.to_string(),
        path: format!("out/Debug/{name}").into(),
        kind: BinaryKind::Executable,
    }
}

/// Scriptable in-memory device backend.
#[derive(Default)]
pub struct FakeDeviceService {
    attached: Vec<DeviceHandle>,
    tests: Vec<String>,
    fail_deploy: HashSet<String>,
    fail_run: HashSet<String>,
    failing_tests: HashSet<String>,
    deploy_calls: Mutex<HashMap<String, usize>>,
    list_calls: Mutex<usize>,
    runs: Mutex<Vec<(DeviceHandle, usize, String)>>,
}

impl FakeDeviceService {
    pub fn with_attached(serials: &[&str]) -> Self {
        Self {
            attached: serials.iter().map(|s| DeviceHandle::new(*s)).collect(),
            ..Self::default()
        }
    }

    pub fn with_tests(mut self, ids: &[&str]) -> Self {
        self.tests = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_test_ids(mut self, ids: Vec<String>) -> Self {
        self.tests = ids;
        self
    }

    /// Makes deployment fail on the given serial.
    pub fn failing_deploy(mut self, serial: &str) -> Self {
        self.fail_deploy.insert(serial.to_string());
        self
    }

    /// Makes shard execution fail on the given serial.
    pub fn failing_run(mut self, serial: &str) -> Self {
        self.fail_run.insert(serial.to_string());
        self
    }

    /// Marks test identifiers that fail whenever they run.
    pub fn failing_tests(mut self, ids: &[&str]) -> Self {
        self.failing_tests = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn attached(&self) -> Vec<DeviceHandle> {
        self.attached.clone()
    }

    pub fn deploy_attempts(&self, serial: &str) -> usize {
        *self.deploy_calls.lock().unwrap().get(serial).unwrap_or(&0)
    }

    pub fn list_count(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    /// Filter expressions passed to `run_filtered`, in shard-index order.
    pub fn filters(&self) -> Vec<String> {
        let mut runs = self.runs.lock().unwrap().clone();
        runs.sort_by_key(|(_, index, _)| *index);
        runs.into_iter().map(|(_, _, filter)| filter).collect()
    }

    /// Devices that executed a shard, in shard-index order.
    pub fn run_devices(&self) -> Vec<DeviceHandle> {
        let mut runs = self.runs.lock().unwrap().clone();
        runs.sort_by_key(|(_, index, _)| *index);
        runs.into_iter().map(|(device, _, _)| device).collect()
    }
}

#[async_trait]
impl DeviceService for FakeDeviceService {
    async fn list_attached(&self) -> DeviceResult<Vec<DeviceHandle>> {
        Ok(self.attached.clone())
    }

    async fn deploy(&self, device: &DeviceHandle, _suite: &TestSuiteTarget) -> DeviceResult<()> {
        *self
            .deploy_calls
            .lock()
            .unwrap()
            .entry(device.serial().to_string())
            .or_insert(0) += 1;

        if self.fail_deploy.contains(device.serial()) {
            return Err(DeviceError::DeployFailed {
                device: device.serial().to_string(),
                reason: "scripted deploy failure".to_string(),
            });
        }
        Ok(())
    }

    async fn list_all_tests(
        &self,
        _device: &DeviceHandle,
        _suite: &TestSuiteTarget,
    ) -> DeviceResult<Vec<String>> {
        *self.list_calls.lock().unwrap() += 1;
        Ok(self.tests.clone())
    }

    async fn run_filtered(
        &self,
        device: &DeviceHandle,
        _suite: &TestSuiteTarget,
        filter: &str,
        shard_index: usize,
        _options: &ExecutionOptions,
    ) -> DeviceResult<ShardResult> {
        self.runs
            .lock()
            .unwrap()
            .push((device.clone(), shard_index, filter.to_string()));

        if self.fail_run.contains(device.serial()) {
            return Err(DeviceError::Disconnected {
                device: device.serial().to_string(),
            });
        }

        let mut result = ShardResult::empty(shard_index, device.clone());
        for id in filter
            .split(':')
            .filter(|s| !s.is_empty() && !s.contains('*') && !s.contains('?'))
        {
            if self.failing_tests.contains(id) {
                result.failed.push(id.to_string());
            } else {
                result.passed.push(id.to_string());
            }
        }
        result.duration = Duration::from_millis(10);
        Ok(result)
    }
}

/// Scriptable emulator backend.
#[derive(Default)]
pub struct FakeEmulatorService {
    boots: Vec<DeviceHandle>,
    shutdowns: Mutex<Vec<String>>,
}

impl FakeEmulatorService {
    /// Instances that will report boot-complete.
    pub fn booting(serials: &[&str]) -> Self {
        Self {
            boots: serials.iter().map(|s| DeviceHandle::new(*s)).collect(),
            ..Self::default()
        }
    }

    pub fn shutdowns(&self) -> Vec<String> {
        self.shutdowns.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmulatorService for FakeEmulatorService {
    async fn launch(&self, _count: usize, _wait_for_boot: bool) -> DeviceResult<Vec<DeviceHandle>> {
        Ok(self.boots.clone())
    }

    async fn shutdown(&self, device: &DeviceHandle) -> DeviceResult<()> {
        self.shutdowns
            .lock()
            .unwrap()
            .push(device.serial().to_string());
        Ok(())
    }

    async fn delete_all_temp_instances(&self) -> DeviceResult<()> {
        Ok(())
    }
}

/// Port allocator that only counts resets.
#[derive(Default)]
pub struct FakePortAllocator {
    resets: Mutex<usize>,
    fail: bool,
}

impl FakePortAllocator {
    pub fn failing() -> Self {
        Self {
            resets: Mutex::new(0),
            fail: true,
        }
    }

    pub fn resets(&self) -> usize {
        *self.resets.lock().unwrap()
    }
}

#[async_trait]
impl PortAllocator for FakePortAllocator {
    async fn reset_allocation(&self) -> PortResult<()> {
        *self.resets.lock().unwrap() += 1;
        if self.fail {
            return Err(PortError::Other(anyhow::anyhow!("scripted reset failure")));
        }
        Ok(())
    }
}

/// Pattern store serving fixed lists.
#[derive(Default)]
pub struct FakePatternStore {
    patterns: Vec<DisabledPattern>,
    emulator_patterns: Vec<DisabledPattern>,
}

impl FakePatternStore {
    pub fn with_patterns(patterns: Vec<DisabledPattern>) -> Self {
        Self {
            patterns,
            emulator_patterns: Vec::new(),
        }
    }

    pub fn with_emulator_patterns(mut self, patterns: Vec<DisabledPattern>) -> Self {
        self.emulator_patterns = patterns;
        self
    }
}

impl PatternStore for FakePatternStore {
    fn load_patterns(
        &self,
        _suite_name: &str,
        emulator_pool: bool,
    ) -> std::io::Result<Vec<DisabledPattern>> {
        let mut patterns = self.patterns.clone();
        if emulator_pool {
            patterns.extend(self.emulator_patterns.iter().cloned());
        }
        Ok(patterns)
    }
}
