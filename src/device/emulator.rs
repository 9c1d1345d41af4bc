//! Locally booted emulator instances.
//!
//! Each launched instance gets a sequential console port and a uniquely
//! named scratch directory under the service's scratch root. Boot is
//! confirmed by polling `sys.boot_completed` through adb; instances that
//! miss the boot deadline are killed and simply left out of the returned
//! pool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{DeviceError, DeviceHandle, DeviceResult, EmulatorService};

const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Prefix for per-instance scratch directories, also used by cleanup.
const INSTANCE_PREFIX: &str = "devshard-emu-";

/// Emulator service driving a local `emulator` binary.
pub struct LocalEmulatorService {
    emulator_path: String,
    adb_path: String,
    avd: String,
    scratch_root: PathBuf,
    base_port: u16,
    boot_timeout: Duration,
    children: Mutex<HashMap<String, Child>>,
}

impl LocalEmulatorService {
    pub fn new(avd: impl Into<String>) -> Self {
        Self {
            emulator_path: "emulator".to_string(),
            adb_path: "adb".to_string(),
            avd: avd.into(),
            scratch_root: std::env::temp_dir(),
            base_port: 5554,
            boot_timeout: Duration::from_secs(180),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the scratch root; used by tests.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    async fn boot_completed(&self, device: &DeviceHandle) -> bool {
        let output = tokio::process::Command::new(&self.adb_path)
            .args([
                "-s",
                device.serial(),
                "shell",
                "getprop",
                "sys.boot_completed",
            ])
            .output()
            .await;
        match output {
            Ok(output) => String::from_utf8_lossy(&output.stdout).trim() == "1",
            Err(_) => false,
        }
    }

    async fn wait_for_boot(&self, device: &DeviceHandle) -> bool {
        let deadline = tokio::time::Instant::now() + self.boot_timeout;
        while tokio::time::Instant::now() < deadline {
            if self.boot_completed(device).await {
                return true;
            }
            tokio::time::sleep(BOOT_POLL_INTERVAL).await;
        }
        false
    }
}

#[async_trait]
impl EmulatorService for LocalEmulatorService {
    async fn launch(&self, count: usize, wait_for_boot: bool) -> DeviceResult<Vec<DeviceHandle>> {
        let mut booted = Vec::new();

        for i in 0..count {
            // Console ports come in even/odd pairs per instance.
            let port = self.base_port + 2 * i as u16;
            let serial = format!("emulator-{port}");

            let scratch = self
                .scratch_root
                .join(format!("{INSTANCE_PREFIX}{}", uuid::Uuid::new_v4()));
            tokio::fs::create_dir_all(&scratch).await?;

            info!("Launching emulator instance {} ({})", serial, self.avd);
            let child = tokio::process::Command::new(&self.emulator_path)
                .args(["-avd", &self.avd, "-port", &port.to_string(), "-no-window"])
                .env("ANDROID_TMP", &scratch)
                .spawn()
                .map_err(|e| DeviceError::ExecFailed {
                    device: serial.clone(),
                    reason: e.to_string(),
                })?;

            let device = DeviceHandle::new(serial.clone());
            self.children.lock().await.insert(serial.clone(), child);

            if wait_for_boot && !self.wait_for_boot(&device).await {
                warn!("Emulator {} did not finish booting; dropping it", serial);
                if let Some(mut child) = self.children.lock().await.remove(&serial) {
                    let _ = child.start_kill();
                }
                continue;
            }

            booted.push(device);
        }

        Ok(booted)
    }

    async fn shutdown(&self, device: &DeviceHandle) -> DeviceResult<()> {
        info!("Shutting down emulator {}", device);
        let output = tokio::process::Command::new(&self.adb_path)
            .args(["-s", device.serial(), "emu", "kill"])
            .output()
            .await
            .map_err(|e| DeviceError::ExecFailed {
                device: device.serial().to_string(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            warn!(
                "adb emu kill for {} reported: {}",
                device,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        if let Some(mut child) = self.children.lock().await.remove(device.serial()) {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        Ok(())
    }

    async fn delete_all_temp_instances(&self) -> DeviceResult<()> {
        let mut entries = tokio::fs::read_dir(&self.scratch_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(INSTANCE_PREFIX) && entry.file_type().await?.is_dir() {
                info!("Deleting stale emulator scratch {}", name);
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    warn!("Failed to delete {}: {}", entry.path().display(), e);
                }
            }
        }
        Ok(())
    }
}
