//! adb-backed device service.
//!
//! Talks to devices through the `adb` command-line tool: `adb devices` for
//! discovery, `adb push`/`adb install` for deployment, and `adb shell` to
//! drive the test runner. Runner output is streamed line by line and parsed
//! for the gtest console markers.
//!
//! Executable suites land in the device scratch directory and run directly.
//! Package suites are installed and driven through `am instrument`; the
//! packaged instrumentation is expected to mirror the gtest console log in
//! its output.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, warn};

use super::{DeviceError, DeviceHandle, DeviceResult, DeviceService, ExecutionOptions};
use crate::results::ShardResult;
use crate::suite::{BinaryKind, TestSuiteTarget};

const DEPLOY_TIMEOUT: Duration = Duration::from_secs(300);
const LIST_TIMEOUT: Duration = Duration::from_secs(120);

/// Device service shelling out to `adb`.
pub struct AdbDeviceService {
    adb_path: String,
    device_dir: String,
    debug_info_root: PathBuf,
}

impl AdbDeviceService {
    /// Directory on the device where executable suites are staged.
    pub const DEFAULT_DEVICE_DIR: &'static str = "/data/local/tmp";

    pub fn new(adb_path: impl Into<String>, debug_info_root: impl Into<PathBuf>) -> Self {
        Self {
            adb_path: adb_path.into(),
            device_dir: Self::DEFAULT_DEVICE_DIR.to_string(),
            debug_info_root: debug_info_root.into(),
        }
    }

    fn remote_path(&self, suite: &TestSuiteTarget) -> String {
        format!("{}/{}", self.device_dir, suite.name)
    }

    /// Runs one adb command to completion with a timeout, capturing output.
    async fn adb(
        &self,
        device: Option<&DeviceHandle>,
        args: &[&str],
        timeout: Duration,
    ) -> DeviceResult<std::process::Output> {
        let mut command = tokio::process::Command::new(&self.adb_path);
        if let Some(device) = device {
            command.arg("-s").arg(device.serial());
        }
        command.args(args);

        let serial = device.map(|d| d.serial().to_string()).unwrap_or_default();
        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| DeviceError::Timeout {
                device: serial.clone(),
                timeout_secs: timeout.as_secs(),
            })?
            .map_err(|e| DeviceError::ExecFailed {
                device: serial.clone(),
                reason: e.to_string(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("device not found") || stderr.contains("device offline") {
            return Err(DeviceError::Disconnected { device: serial });
        }
        Ok(output)
    }

    /// Builds the on-device runner invocation for a shard.
    fn runner_invocation(
        &self,
        suite: &TestSuiteTarget,
        filter: &str,
        options: &ExecutionOptions,
    ) -> DeviceResult<Vec<String>> {
        let mut argv = Vec::new();

        if let Some(tool) = &options.tool {
            argv.extend(
                shell_words::split(tool)
                    .map_err(|e| DeviceError::Other(anyhow::anyhow!("bad tool wrapper: {e}")))?,
            );
        }

        match suite.kind {
            BinaryKind::Executable => {
                argv.push(self.remote_path(suite));
                argv.push(format!("--gtest_filter={filter}"));
            }
            BinaryKind::Package => {
                argv.extend(
                    [
                        "am",
                        "instrument",
                        "-w",
                        "-e",
                        "gtest_filter",
                        filter,
                    ]
                    .map(String::from),
                );
                argv.push(format!("{}/.TestInstrumentation", suite.name));
            }
        }

        if !options.test_arguments.is_empty() {
            argv.extend(shell_words::split(&options.test_arguments).map_err(|e| {
                DeviceError::Other(anyhow::anyhow!("bad test arguments: {e}"))
            })?);
        }

        Ok(argv)
    }

    async fn capture_debug_info(
        &self,
        suite: &TestSuiteTarget,
        shard_index: usize,
        log: &str,
    ) -> Option<PathBuf> {
        let dir = self.debug_info_root.join(format!(
            "{}_shard{}_{}",
            suite.name,
            shard_index,
            uuid::Uuid::new_v4()
        ));
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("Failed to create debug info dir {}: {}", dir.display(), e);
            return None;
        }
        if let Err(e) = tokio::fs::write(dir.join("runner.log"), log).await {
            warn!("Failed to write runner log: {}", e);
            return None;
        }
        Some(dir)
    }
}

#[async_trait]
impl DeviceService for AdbDeviceService {
    async fn list_attached(&self) -> DeviceResult<Vec<DeviceHandle>> {
        let output = self.adb(None, &["devices"], LIST_TIMEOUT).await?;
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn deploy(&self, device: &DeviceHandle, suite: &TestSuiteTarget) -> DeviceResult<()> {
        let local = suite.path.to_string_lossy().to_string();
        let deploy_failed = |reason: String| DeviceError::DeployFailed {
            device: device.serial().to_string(),
            reason,
        };

        match suite.kind {
            BinaryKind::Executable => {
                let remote = self.remote_path(suite);
                let output = self
                    .adb(Some(device), &["push", &local, &remote], DEPLOY_TIMEOUT)
                    .await?;
                if !output.status.success() {
                    return Err(deploy_failed(
                        String::from_utf8_lossy(&output.stderr).to_string(),
                    ));
                }

                let output = self
                    .adb(
                        Some(device),
                        &["shell", "chmod", "755", &remote],
                        LIST_TIMEOUT,
                    )
                    .await?;
                if !output.status.success() {
                    return Err(deploy_failed("chmod failed".to_string()));
                }
            }
            BinaryKind::Package => {
                let output = self
                    .adb(Some(device), &["install", "-r", &local], DEPLOY_TIMEOUT)
                    .await?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                if !output.status.success() || !stdout.contains("Success") {
                    return Err(deploy_failed(stdout.to_string()));
                }
            }
        }

        debug!("Deployed {} to {}", suite.name, device);
        Ok(())
    }

    async fn list_all_tests(
        &self,
        device: &DeviceHandle,
        suite: &TestSuiteTarget,
    ) -> DeviceResult<Vec<String>> {
        let output = match suite.kind {
            BinaryKind::Executable => {
                let remote = self.remote_path(suite);
                self.adb(
                    Some(device),
                    &["shell", &remote, "--gtest_list_tests"],
                    LIST_TIMEOUT,
                )
                .await?
            }
            BinaryKind::Package => {
                let component = format!("{}/.TestInstrumentation", suite.name);
                self.adb(
                    Some(device),
                    &[
                        "shell",
                        "am",
                        "instrument",
                        "-w",
                        "-e",
                        "gtest_list_tests",
                        "true",
                        &component,
                    ],
                    LIST_TIMEOUT,
                )
                .await?
            }
        };

        if !output.status.success() {
            return Err(DeviceError::ListFailed {
                device: device.serial().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let tests = parse_test_list(&String::from_utf8_lossy(&output.stdout));
        if tests.is_empty() {
            return Err(DeviceError::ListFailed {
                device: device.serial().to_string(),
                reason: "runner reported no tests".to_string(),
            });
        }
        Ok(tests)
    }

    async fn run_filtered(
        &self,
        device: &DeviceHandle,
        suite: &TestSuiteTarget,
        filter: &str,
        shard_index: usize,
        options: &ExecutionOptions,
    ) -> DeviceResult<ShardResult> {
        let start = Instant::now();

        // Enumeration only stages the binary on one device; every shard
        // device stages its own copy here.
        self.deploy(device, suite).await?;

        let argv = self.runner_invocation(suite, filter, options)?;

        let mut command = tokio::process::Command::new(&self.adb_path);
        command
            .arg("-s")
            .arg(device.serial())
            .arg("shell")
            .args(&argv)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| DeviceError::ExecFailed {
            device: device.serial().to_string(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let mut merged = Box::pin(stream::select(
            LinesStream::new(BufReader::new(stdout).lines())
                .map(|line| line.unwrap_or_default()),
            LinesStream::new(BufReader::new(stderr).lines())
                .map(|line| line.unwrap_or_default()),
        ));

        let mut parser = GtestLogParser::new();
        let mut log = String::new();

        let drained = tokio::time::timeout(options.timeout, async {
            while let Some(line) = merged.next().await {
                parser.feed(&line);
                log.push_str(&line);
                log.push('\n');
            }
            child.wait().await
        })
        .await;

        let hit_timeout = drained.is_err();
        let mut clean_exit = false;
        match drained {
            Ok(Ok(status)) => {
                clean_exit = status.success();
                if !clean_exit {
                    parser.abort_crashed();
                }
            }
            Ok(Err(e)) => {
                return Err(DeviceError::ExecFailed {
                    device: device.serial().to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                let _ = child.start_kill();
                parser.abort_timed_out();
            }
        }

        let mut buckets = parser.into_buckets();
        // When the runner exited abnormally and the filter names concrete
        // tests, the ones that never reported are still accounted for.
        if !clean_exit && !filter.contains('*') && !filter.contains('?') {
            let reported: HashSet<&str> = buckets.iter_all().map(String::as_str).collect();
            let missing: Vec<String> = filter
                .split(':')
                .filter(|id| !id.is_empty() && !reported.contains(id))
                .map(String::from)
                .collect();
            if hit_timeout {
                buckets.timed_out.extend(missing);
            } else {
                buckets.crashed.extend(missing);
            }
        }

        if options.cleanup_test_files {
            match suite.kind {
                BinaryKind::Executable => {
                    let remote = self.remote_path(suite);
                    if let Err(e) = self
                        .adb(Some(device), &["shell", "rm", "-f", &remote], LIST_TIMEOUT)
                        .await
                    {
                        warn!("Failed to clean {} from {}: {}", remote, device, e);
                    }
                }
                BinaryKind::Package => {
                    debug!("Leaving package {} installed on {}", suite.name, device);
                }
            }
        }

        let duration = start.elapsed();
        let broken =
            buckets.failed.len() + buckets.crashed.len() + buckets.timed_out.len();
        let annotation = format!(
            "shard {} on {}: {} passed, {} broken in {:.1}s",
            shard_index,
            device,
            buckets.passed.len(),
            broken,
            duration.as_secs_f64()
        );

        let debug_info_dir = if options.capture_debug_info {
            self.capture_debug_info(suite, shard_index, &log).await
        } else {
            None
        };

        Ok(ShardResult {
            shard_index,
            device: device.clone(),
            passed: buckets.passed,
            failed: buckets.failed,
            crashed: buckets.crashed,
            timed_out: buckets.timed_out,
            annotation,
            debug_info_dir,
            duration,
        })
    }
}

/// Parses `adb devices` output into handles for online devices.
fn parse_device_list(output: &str) -> Vec<DeviceHandle> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(DeviceHandle::new(serial)),
                _ => None,
            }
        })
        .collect()
}

/// Parses `--gtest_list_tests` output into `Fixture.Case` identifiers.
///
/// The runner prints fixtures as unindented lines ending in `.` and cases as
/// indented lines below them; `#` starts a trailing comment on either.
fn parse_test_list(output: &str) -> Vec<String> {
    let mut tests = Vec::new();
    let mut fixture: Option<String> = None;

    for line in output.lines() {
        let content = line.split('#').next().unwrap_or("");
        if content.trim().is_empty() {
            continue;
        }
        if !line.starts_with(' ') {
            let candidate = content.trim();
            if candidate.ends_with('.') {
                fixture = Some(candidate.to_string());
            } else {
                fixture = None;
            }
        } else if let Some(fixture) = &fixture {
            tests.push(format!("{}{}", fixture, content.trim()));
        }
    }

    tests
}

#[derive(Debug, Default)]
struct Buckets {
    passed: Vec<String>,
    failed: Vec<String>,
    crashed: Vec<String>,
    timed_out: Vec<String>,
}

impl Buckets {
    fn iter_all(&self) -> impl Iterator<Item = &String> {
        self.passed
            .iter()
            .chain(self.failed.iter())
            .chain(self.crashed.iter())
            .chain(self.timed_out.iter())
    }
}

/// Incremental parser for the gtest console log.
///
/// Tracks the currently running test so the end-of-run summary repeats of
/// `[  FAILED  ]` lines are not double counted, and so a test left running
/// when the stream ends can be classified as crashed or timed out.
struct GtestLogParser {
    buckets: Buckets,
    current: Option<String>,
}

impl GtestLogParser {
    fn new() -> Self {
        Self {
            buckets: Buckets::default(),
            current: None,
        }
    }

    fn feed(&mut self, line: &str) {
        if let Some(id) = marker_payload(line, "[ RUN      ]") {
            self.current = Some(id);
        } else if let Some(id) = marker_payload(line, "[       OK ]") {
            if self.current.as_deref() == Some(id.as_str()) {
                self.buckets.passed.push(id);
                self.current = None;
            }
        } else if let Some(id) = marker_payload(line, "[  FAILED  ]") {
            if self.current.as_deref() == Some(id.as_str()) {
                self.buckets.failed.push(id);
                self.current = None;
            }
        }
    }

    /// The stream ended with a test still running: it crashed the runner.
    fn abort_crashed(&mut self) {
        if let Some(id) = self.current.take() {
            self.buckets.crashed.push(id);
        }
    }

    /// The run hit its deadline with a test still running.
    fn abort_timed_out(&mut self) {
        if let Some(id) = self.current.take() {
            self.buckets.timed_out.push(id);
        }
    }

    fn into_buckets(self) -> Buckets {
        self.buckets
    }
}

fn marker_payload(line: &str, marker: &str) -> Option<String> {
    let rest = line.split(marker).nth(1)?;
    rest.split_whitespace().next().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_list() {
        let output = "\
* daemon not running; starting now\n\
List of devices attached\n\
0123456789ABCDEF\tdevice\n\
emulator-5554\tdevice\n\
FEDCBA9876543210\toffline\n\
\n";
        let devices = parse_device_list(output);
        assert_eq!(
            devices,
            vec![
                DeviceHandle::new("0123456789ABCDEF"),
                DeviceHandle::new("emulator-5554"),
            ]
        );
    }

    #[test]
    fn parses_test_list_with_comments() {
        let output = "DataPackTest.\n  Load\n  LoadFromBuffer\nPathServiceTest.\n  Get\nVector/ParamTest.  # TypeParam = int\n  Grow/0  # GetParam() = 4\n  Grow/1  # GetParam() = 8\n";
        let tests = parse_test_list(output);
        assert_eq!(
            tests,
            vec![
                "DataPackTest.Load",
                "DataPackTest.LoadFromBuffer",
                "PathServiceTest.Get",
                "Vector/ParamTest.Grow/0",
                "Vector/ParamTest.Grow/1",
            ]
        );
    }

    #[test]
    fn ignores_runner_noise_in_list_output() {
        let output = "Note: Google Test filter = *\nSomeTest.\n  Works\n";
        assert_eq!(parse_test_list(output), vec!["SomeTest.Works"]);
    }

    #[test]
    fn log_parser_buckets_outcomes() {
        let mut parser = GtestLogParser::new();
        for line in [
            "[==========] Running 3 tests from 2 test cases.",
            "[ RUN      ] A.one",
            "[       OK ] A.one (3 ms)",
            "[ RUN      ] A.two",
            "[  FAILED  ] A.two (1 ms)",
            "[ RUN      ] B.one",
            "[       OK ] B.one (0 ms)",
            "[==========] 3 tests ran. (4 ms total)",
            "[  FAILED  ] A.two",
        ] {
            parser.feed(line);
        }
        let buckets = parser.into_buckets();
        assert_eq!(buckets.passed, vec!["A.one", "B.one"]);
        // The summary repeat of A.two is not double counted.
        assert_eq!(buckets.failed, vec!["A.two"]);
        assert!(buckets.crashed.is_empty());
    }

    #[test]
    fn log_parser_classifies_crash() {
        let mut parser = GtestLogParser::new();
        parser.feed("[ RUN      ] A.one");
        parser.feed("[       OK ] A.one (3 ms)");
        parser.feed("[ RUN      ] A.two");
        parser.feed("Segmentation fault");
        parser.abort_crashed();

        let buckets = parser.into_buckets();
        assert_eq!(buckets.passed, vec!["A.one"]);
        assert_eq!(buckets.crashed, vec!["A.two"]);
    }

    #[test]
    fn log_parser_classifies_timeout() {
        let mut parser = GtestLogParser::new();
        parser.feed("[ RUN      ] Slow.test");
        parser.abort_timed_out();

        let buckets = parser.into_buckets();
        assert_eq!(buckets.timed_out, vec!["Slow.test"]);
    }
}
