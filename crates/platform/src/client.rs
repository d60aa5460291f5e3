//! The `PlatformClient` trait: every platform interaction the migration
//! core performs, as one async seam.

use async_trait::async_trait;

use presman_core::zones::{ZonePolygon, ZoneRect};

use crate::types::{
    AvailableUpdate, DeviceConfigInfo, DeviceMapping, DeviceReadiness, EntityState,
    PreparedFirmware, ReadinessQuery, UpdateEntityStatus,
};

/// Errors from the platform boundary.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The platform returned a non-2xx status code.
    #[error("Platform API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Abstract interface to the home-automation platform.
///
/// All calls are logically stateless reads or single-entity writes; the
/// orchestrator owns sequencing and retries. Implementations must be
/// safe to share across tasks.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Device configuration gate: `inferred` schemas block updates.
    async fn get_device_config(
        &self,
        model: &str,
        firmware_version: &str,
        device_id: &str,
    ) -> Result<DeviceConfigInfo, PlatformError>;

    /// Updates currently offered for the device.
    async fn get_available_updates(
        &self,
        model: &str,
        firmware_version: &str,
        device_id: &str,
    ) -> Result<Vec<AvailableUpdate>, PlatformError>;

    /// A single entity's state, or `None` if the entity does not exist.
    async fn fetch_entity_state(
        &self,
        entity_id: &str,
    ) -> Result<Option<EntityState>, PlatformError>;

    /// Probe whether a required entity subset is present and available.
    async fn fetch_device_readiness(
        &self,
        device_id: &str,
        query: &ReadinessQuery,
    ) -> Result<DeviceReadiness, PlatformError>;

    /// The device's current rectangular zone entities.
    async fn fetch_rect_zones(
        &self,
        device_id: &str,
        profile_id: &str,
        entity_prefix: &str,
    ) -> Result<Vec<ZoneRect>, PlatformError>;

    /// The device's current polygon zone entities.
    async fn fetch_polygon_zones(
        &self,
        device_id: &str,
        profile_id: &str,
        entity_prefix: &str,
    ) -> Result<Vec<ZonePolygon>, PlatformError>;

    /// Write one polygon zone onto the device.
    async fn write_polygon_zone(
        &self,
        device_id: &str,
        profile_id: &str,
        entity_prefix: &str,
        polygon: &ZonePolygon,
    ) -> Result<(), PlatformError>;

    /// Stage a firmware manifest; returns the trigger token and the
    /// version it resolves to.
    async fn prepare_firmware(
        &self,
        device_id: &str,
        manifest_source: &str,
    ) -> Result<PreparedFirmware, PlatformError>;

    /// Start the installation. Fire-and-forget: all subsequent knowledge
    /// comes from polling [`read_update_status`].
    ///
    /// [`read_update_status`]: PlatformClient::read_update_status
    async fn trigger_update(&self, device_id: &str, token: &str) -> Result<(), PlatformError>;

    /// Current snapshot of the device's update entity.
    async fn read_update_status(
        &self,
        device_id: &str,
    ) -> Result<UpdateEntityStatus, PlatformError>;

    /// Re-run entity discovery for the device and persist the resulting
    /// mapping. Idempotent; `None` when no mapping could be produced.
    async fn discover_and_save_mapping(
        &self,
        device_id: &str,
        profile_id: &str,
        device_name: &str,
    ) -> Result<Option<DeviceMapping>, PlatformError>;
}
