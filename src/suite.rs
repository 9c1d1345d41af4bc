//! Test suite target resolution.
//!
//! A suite is one test binary containing many individually addressable test
//! cases. Suites are resolved against the build output directory before
//! anything touches a device, so a missing binary fails fast with the list
//! of suites the configuration knows about.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How the suite binary lands on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryKind {
    /// A native executable pushed to the device and run directly.
    Executable,
    /// An installable package (`<name>_apk/<name>-debug.apk` under the
    /// output directory).
    Package,
}

/// Identifies one test binary to run.
///
/// Immutable once resolved; created during suite path resolution and consumed
/// by every downstream component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSuiteTarget {
    /// Suite name, e.g. `base_unittests`.
    pub name: String,

    /// Resolved filesystem path of the binary on the host.
    pub path: PathBuf,

    /// Executable or installable package.
    pub kind: BinaryKind,
}

/// Errors raised while resolving suite targets.
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    /// The suite binary does not exist at its resolved path.
    #[error(
        "suite {name} not found at {path}; known suites: {known}. Ensure it has been built."
    )]
    NotBuilt {
        name: String,
        path: String,
        known: String,
    },

    /// No suite was named and the configuration lists none.
    #[error("no suite requested and no suites configured")]
    NoneConfigured,
}

/// Computes the on-disk path for a suite under the build output directory.
fn qualified_path(out_dir: &Path, name: &str, kind: BinaryKind) -> PathBuf {
    match kind {
        BinaryKind::Executable => out_dir.join(name),
        BinaryKind::Package => out_dir
            .join(format!("{name}_apk"))
            .join(format!("{name}-debug.apk")),
    }
}

/// Resolves the suites for a run to absolute targets.
///
/// When `requested` is `Some`, only that suite is resolved; otherwise every
/// configured suite runs. Each resolved path must exist on disk.
pub fn resolve_suites(
    out_dir: &Path,
    kind: BinaryKind,
    configured: &[String],
    requested: Option<&str>,
) -> Result<Vec<TestSuiteTarget>, SuiteError> {
    let names: Vec<String> = match requested {
        Some(name) => vec![name.to_string()],
        None if configured.is_empty() => return Err(SuiteError::NoneConfigured),
        None => configured.to_vec(),
    };

    let mut targets = Vec::with_capacity(names.len());
    for name in names {
        let path = qualified_path(out_dir, &name, kind);
        if !path.exists() {
            return Err(SuiteError::NotBuilt {
                name,
                path: path.display().to_string(),
                known: configured.join(", "),
            });
        }
        targets.push(TestSuiteTarget { name, path, kind });
    }
    Ok(targets)
}

/// Prints the configured suites, one per line.
pub fn list_suites(configured: &[String]) {
    println!("Available test suites are:");
    for name in configured {
        println!("{name}");
    }
}
