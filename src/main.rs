//! devshard CLI - sharded native-test execution across device pools.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn, Level};
use tracing_subscriber::FmtSubscriber;

use devshard::config::{self, BuildVariant, RunConfig};
use devshard::device::adb::AdbDeviceService;
use devshard::device::emulator::LocalEmulatorService;
use devshard::device::EmulatorService;
use devshard::dispatch::Dispatcher;
use devshard::ports::FilePortAllocator;
use devshard::suite::{self, BinaryKind};
use devshard::suppress::FilePatternStore;

/// Exit status for fatal errors, distinct from any broken-test count.
const FATAL_EXIT: u8 = 2;
/// Broken-test counts are clamped below the shell's special exit codes.
const MAX_FAILURE_EXIT: usize = 125;

#[derive(Parser)]
#[command(name = "devshard")]
#[command(about = "Shards native gtest suites across connected devices", long_about = None)]
#[command(version)]
struct Cli {
    /// Suite to run, or `help` to list configured suites. Runs every
    /// configured suite when omitted.
    suite: Option<String>,

    /// Configuration file path
    #[arg(short, long, default_value = "devshard.toml")]
    config: PathBuf,

    /// Run on this device serial only
    #[arg(short, long)]
    device: Option<String>,

    /// Boot fresh emulator instances instead of using attached devices
    #[arg(short = 'e', long)]
    use_emulator: bool,

    /// Number of emulator instances to boot
    #[arg(long)]
    emulator_count: Option<usize>,

    /// Use Release build output instead of Debug
    #[arg(long)]
    release: bool,

    /// Build output root
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Suites are installable packages rather than native executables
    #[arg(long)]
    apk: bool,

    /// Explicit gtest filter expression (disables sharding)
    #[arg(short = 'f', long)]
    gtest_filter: Option<String>,

    /// Extra arguments passed to the test runner
    #[arg(short = 'a', long)]
    test_arguments: Option<String>,

    /// Per-shard timeout in seconds
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Tool wrapper for the runner, e.g. "valgrind"
    #[arg(long)]
    tool: Option<String>,

    /// Remove pushed binaries from devices after the run
    #[arg(long)]
    cleanup_test_files: bool,

    /// Archive name for the per-shard debug-info dump
    #[arg(long)]
    log_dump: Option<String>,

    /// Make the exit status equal the total broken-test count
    #[arg(long)]
    exit_code: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to install tracing subscriber");
        return ExitCode::from(FATAL_EXIT);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(FATAL_EXIT)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = build_config(&cli)?;

    if cli.suite.as_deref() == Some("help") {
        suite::list_suites(&config.suites);
        return Ok(ExitCode::SUCCESS);
    }

    let suites = suite::resolve_suites(
        &config.build_dir(),
        config.binary_kind,
        &config.suites,
        cli.suite.as_deref(),
    )?;

    let devices = AdbDeviceService::new("adb", config.debug_info_root());
    let emulators = LocalEmulatorService::new("devshard");
    let ports = FilePortAllocator::new(std::env::temp_dir().join("devshard_ports.json"));
    let filter_dir = config.filter_dir.to_string_lossy();
    let patterns = FilePatternStore::new(shellexpand::tilde(filter_dir.as_ref()).to_string());

    if config.emulator.enabled {
        // Stale scratch from an interrupted previous run would collide with
        // the ports this run claims.
        if let Err(e) = emulators.delete_all_temp_instances().await {
            warn!("Failed to delete stale emulator instances: {}", e);
        }
    }

    let dispatcher = Dispatcher::new(&devices, &emulators, &ports, &patterns);
    let failed_tests = dispatcher.dispatch(&suites, &config).await?;

    // Failures of individual suites are communicated by step-failure
    // markers in the report; a forced-zero exit keeps a multi-step pipeline
    // from pinning all of them on the last step.
    if config.exit_code {
        Ok(ExitCode::from(failed_tests.min(MAX_FAILURE_EXIT) as u8))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn build_config(cli: &Cli) -> Result<RunConfig> {
    let mut config = if cli.config.exists() {
        config::load_config(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    } else {
        RunConfig::default()
    };

    if let Some(device) = &cli.device {
        config.device = Some(device.clone());
    }
    if cli.use_emulator {
        config.emulator.enabled = true;
    }
    if let Some(count) = cli.emulator_count {
        config.emulator.count = count;
    }
    if cli.release {
        config.variant = BuildVariant::Release;
    }
    if let Some(out_dir) = &cli.out_dir {
        config.out_dir = out_dir.clone();
    }
    if cli.apk {
        config.binary_kind = BinaryKind::Package;
    }
    if let Some(filter) = &cli.gtest_filter {
        config.test_filter = filter.clone();
    }
    if let Some(args) = &cli.test_arguments {
        config.test_arguments = args.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(tool) = &cli.tool {
        config.tool = Some(tool.clone());
    }
    if cli.cleanup_test_files {
        config.cleanup_test_files = true;
    }
    if let Some(log_dump) = &cli.log_dump {
        config.log_dump = Some(log_dump.clone());
    }
    if cli.exit_code {
        config.exit_code = true;
    }

    Ok(config)
}
