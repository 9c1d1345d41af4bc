//! Device pool resolution.
//!
//! Turns run configuration into a non-empty ordered set of execution targets:
//! an explicit serial, freshly booted emulator instances, or everything on
//! the bus. Emulator instances acquired here are recorded on the pool so the
//! dispatcher can release them when the suite finishes, win or fail.

use tracing::{info, warn};

use crate::config::RunConfig;
use crate::device::{DeviceError, DeviceHandle, DeviceService, EmulatorService};

/// Result type for pool resolution.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised while resolving the device pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No device qualified for the run. Fatal for the suite.
    #[error("no device available: a device must be attached and online")]
    NoDeviceAvailable,

    /// The device backend itself failed (not a per-device condition).
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// The resolved set of execution targets for one suite run.
#[derive(Debug, Clone)]
pub struct DevicePool {
    /// Usable targets, most-preferred first.
    pub devices: Vec<DeviceHandle>,

    /// The subset of `devices` that are emulator instances this run booted
    /// and therefore owns. Empty unless emulator mode was requested.
    pub emulators: Vec<DeviceHandle>,
}

impl DevicePool {
    /// Whether the pool was built from freshly booted emulator instances.
    pub fn is_emulator_pool(&self) -> bool {
        !self.emulators.is_empty()
    }
}

/// Resolves the pool for a run.
///
/// Emulator mode boots instances as a blocking call and keeps only the ones
/// that report boot-complete; partial boot failures shrink the pool. An
/// explicit device serial short-circuits discovery. Otherwise every attached
/// device joins the pool in bus order.
pub async fn resolve(
    config: &RunConfig,
    devices: &dyn DeviceService,
    emulators: &dyn EmulatorService,
) -> PoolResult<DevicePool> {
    let pool = if config.emulator.enabled {
        let booted = emulators.launch(config.emulator.count, true).await?;
        if booted.len() < config.emulator.count {
            warn!(
                "Only {} of {} emulator instances booted",
                booted.len(),
                config.emulator.count
            );
        }
        DevicePool {
            devices: booted.clone(),
            emulators: booted,
        }
    } else if let Some(serial) = &config.device {
        DevicePool {
            devices: vec![DeviceHandle::new(serial.clone())],
            emulators: Vec::new(),
        }
    } else {
        DevicePool {
            devices: devices.list_attached().await?,
            emulators: Vec::new(),
        }
    };

    if pool.devices.is_empty() {
        return Err(PoolError::NoDeviceAvailable);
    }

    info!("Resolved device pool: {} target(s)", pool.devices.len());
    Ok(pool)
}
