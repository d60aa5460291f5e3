//! Thin typed wrapper around the platform's firmware update endpoints.
//!
//! Stateless per call: prepare a manifest, trigger the install, read
//! the update entity. Normalization of the polled entity lives in
//! `presman_core::progress` so the rules stay test-covered in one place.

use std::sync::Arc;

use presman_core::progress;
use presman_platform::types::{PreparedFirmware, UpdateEntityStatus};
use presman_platform::{PlatformClient, PlatformError};

/// A normalized view of one update-entity poll.
#[derive(Debug, Clone)]
pub struct UpdateSnapshot {
    /// Raw entity state string as reported by the platform.
    pub state: String,
    /// Whether a flash is underway.
    pub in_progress: bool,
    /// Normalized progress percentage, when the entity reports one.
    pub progress: Option<f64>,
    /// Installed firmware version, when the entity reports one.
    pub installed_version: Option<String>,
}

impl From<UpdateEntityStatus> for UpdateSnapshot {
    fn from(status: UpdateEntityStatus) -> Self {
        Self {
            in_progress: progress::is_in_progress(&status.state, &status.attributes),
            progress: progress::progress_percent(&status.attributes),
            installed_version: progress::installed_version(&status.attributes),
            state: status.state,
        }
    }
}

/// Client for a single device's firmware update surface.
#[derive(Clone)]
pub struct DeviceUpdateClient {
    platform: Arc<dyn PlatformClient>,
}

impl DeviceUpdateClient {
    pub fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self { platform }
    }

    /// Stage a firmware manifest for the device.
    pub async fn prepare(
        &self,
        device_id: &str,
        manifest_source: &str,
    ) -> Result<PreparedFirmware, PlatformError> {
        let prepared = self.platform.prepare_firmware(device_id, manifest_source).await?;
        tracing::info!(
            device_id,
            version = %prepared.version,
            "Firmware manifest prepared",
        );
        Ok(prepared)
    }

    /// Start the installation. Fire-and-forget; the device will begin
    /// flashing and eventually reboot.
    pub async fn trigger(&self, device_id: &str, token: &str) -> Result<(), PlatformError> {
        self.platform.trigger_update(device_id, token).await?;
        tracing::info!(device_id, "Firmware update triggered");
        Ok(())
    }

    /// Poll the device's update entity and normalize it.
    pub async fn status(&self, device_id: &str) -> Result<UpdateSnapshot, PlatformError> {
        let status = self.platform.read_update_status(device_id).await?;
        Ok(UpdateSnapshot::from(status))
    }
}
