//! Run configuration loading and schema.
//!
//! Configuration comes from an optional `devshard.toml` overlaid by CLI
//! flags. Every suite in a dispatch runs with its own clone of the loaded
//! [`RunConfig`], so mutation by one suite's run cannot leak into the next.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::device::ExecutionOptions;
use crate::suite::BinaryKind;

/// Build variant the suite binaries were produced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildVariant {
    Debug,
    Release,
}

impl BuildVariant {
    /// Directory name under the output root.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildVariant::Debug => "Debug",
            BuildVariant::Release => "Release",
        }
    }
}

/// Configuration for one dispatch.
///
/// # TOML structure
///
/// ```toml
/// suites = ["base_unittests", "net_unittests"]
/// out_dir = "out"
/// variant = "debug"
/// timeout_secs = 600
/// filter_dir = "gtest_filter"
///
/// [emulator]
/// enabled = false
/// count = 1
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Suites known to this checkout. Ran in order when no suite is named.
    #[serde(default)]
    pub suites: Vec<String>,

    /// Explicit device serial. Overrides attached-device discovery.
    #[serde(default)]
    pub device: Option<String>,

    /// Emulator settings.
    #[serde(default)]
    pub emulator: EmulatorConfig,

    /// Build variant selecting the output subdirectory.
    #[serde(default = "default_variant")]
    pub variant: BuildVariant,

    /// Build output root, e.g. `out`. `~` is expanded.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Whether suites are native executables or installable packages.
    #[serde(default = "default_binary_kind")]
    pub binary_kind: BinaryKind,

    /// Explicit gtest filter expression. Non-empty disables sharding.
    #[serde(default)]
    pub test_filter: String,

    /// Extra arguments appended to every runner invocation.
    #[serde(default)]
    pub test_arguments: String,

    /// Per-shard execution timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Remove pushed binaries and scratch data from devices afterwards.
    #[serde(default)]
    pub cleanup_test_files: bool,

    /// Tool wrapper prefixed to runner invocations (e.g. `valgrind`).
    #[serde(default)]
    pub tool: Option<String>,

    /// Archive name for the per-shard debug-info dump. `None` disables
    /// capture.
    #[serde(default)]
    pub log_dump: Option<String>,

    /// When `true`, the process exit status equals the total broken-test
    /// count. When `false` (the default), failures are communicated only via
    /// printed step-failure markers and the exit status is 0.
    #[serde(default)]
    pub exit_code: bool,

    /// Host directory holding per-suite disabled-test pattern files.
    #[serde(default = "default_filter_dir")]
    pub filter_dir: PathBuf,
}

/// Emulator pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmulatorConfig {
    /// Boot fresh emulator instances instead of using attached devices.
    #[serde(default)]
    pub enabled: bool,

    /// How many instances to boot.
    #[serde(default = "default_emulator_count")]
    pub count: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            count: default_emulator_count(),
        }
    }
}

fn default_variant() -> BuildVariant {
    BuildVariant::Debug
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_binary_kind() -> BinaryKind {
    BinaryKind::Executable
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_filter_dir() -> PathBuf {
    PathBuf::from("gtest_filter")
}

fn default_emulator_count() -> usize {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        // serde defaults and Default must agree; an empty TOML table is the
        // canonical default.
        load_config_str("").expect("empty config must parse")
    }
}

impl RunConfig {
    /// Output directory for the configured variant, with `~` expanded.
    pub fn build_dir(&self) -> PathBuf {
        let raw = self.out_dir.to_string_lossy();
        let expanded = shellexpand::tilde(raw.as_ref());
        Path::new(expanded.as_ref()).join(self.variant.as_str())
    }

    /// Root directory for captured per-shard debug info.
    pub fn debug_info_root(&self) -> PathBuf {
        self.build_dir().join("debug_info_dumps")
    }

    /// Suite-level execution options shared by every shard job.
    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            cleanup_test_files: self.cleanup_test_files,
            tool: self.tool.clone(),
            test_arguments: self.test_arguments.clone(),
            capture_debug_info: self.log_dump.is_some(),
        }
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    load_config_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Loads configuration from a TOML string.
///
/// Useful for testing and for generating configuration programmatically.
pub fn load_config_str(content: &str) -> Result<RunConfig> {
    let config: RunConfig = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
