//! Test enumeration.
//!
//! Enumeration must run on a real device because test presence can depend on
//! the deployed binary, but it only needs to succeed once: every other device
//! reuses the same canonical list for sharding. Devices that fail to deploy
//! or list are dropped from the pool and never retried within one
//! enumeration; the run proceeds with whatever pool survives.

use std::collections::VecDeque;

use tracing::{info, warn};

use crate::device::{DeviceHandle, DeviceResult, DeviceService};
use crate::suite::TestSuiteTarget;
use crate::suppress::{is_disabled, PatternStore};

/// Result type for enumeration.
pub type EnumerateResult<T> = Result<T, EnumerateError>;

/// Errors raised while enumerating tests.
#[derive(Debug, thiserror::Error)]
pub enum EnumerateError {
    /// Every candidate device failed. Fatal for the suite.
    #[error("no device available to get the list of tests")]
    NoDeviceAvailable,

    /// The host-side suppression list could not be read.
    #[error("failed to load disabled patterns for {suite}: {source}")]
    Patterns {
        suite: String,
        source: std::io::Error,
    },
}

/// Obtains the canonical test list for a suite.
///
/// Walks the pool in order, attempting deploy-then-list on each candidate;
/// the first success wins. Failed candidates are dropped from the returned
/// pool. The canonical list preserves the order the device reported, minus
/// anything matching a disabled pattern.
///
/// Returns `(canonical_tests, surviving_pool)`.
pub async fn enumerate(
    service: &dyn DeviceService,
    patterns: &dyn PatternStore,
    suite: &TestSuiteTarget,
    pool: Vec<DeviceHandle>,
    emulator_pool: bool,
) -> EnumerateResult<(Vec<String>, Vec<DeviceHandle>)> {
    let disabled = patterns
        .load_patterns(&suite.name, emulator_pool)
        .map_err(|source| EnumerateError::Patterns {
            suite: suite.name.clone(),
            source,
        })?;

    let mut candidates: VecDeque<DeviceHandle> = pool.into();
    while let Some(device) = candidates.front().cloned() {
        match tests_from_device(service, suite, &device).await {
            Ok(all_tests) => {
                let total = all_tests.len();
                let enabled: Vec<String> = all_tests
                    .into_iter()
                    .filter(|t| !is_disabled(t, &disabled))
                    .collect();
                info!(
                    "Enumerated {} tests on {} ({} suppressed)",
                    enabled.len(),
                    device,
                    total - enabled.len()
                );
                return Ok((enabled, candidates.into_iter().collect()));
            }
            Err(e) => {
                warn!("Failed obtaining tests from {}: {}", device, e);
                candidates.pop_front();
            }
        }
    }

    Err(EnumerateError::NoDeviceAvailable)
}

async fn tests_from_device(
    service: &dyn DeviceService,
    suite: &TestSuiteTarget,
    device: &DeviceHandle,
) -> DeviceResult<Vec<String>> {
    info!("Obtaining tests from {}", device);
    // The binary has to land on the device before it can be asked anything.
    service.deploy(device, suite).await?;
    service.list_all_tests(device, suite).await
}
