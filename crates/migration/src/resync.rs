//! Entity re-sync trigger.
//!
//! A firmware change can rename or re-publish a device's entities, so
//! the saved device-to-entity mapping must be rebuilt afterwards. The
//! discovery/matching pass itself is a platform concern; this wrapper
//! adds the timeout -- discovery can stall indefinitely if the device
//! never republishes its entity registry after reboot -- and the error
//! classification.

use std::time::Duration;

use presman_core::phase::MigrationStep;
use presman_platform::types::DeviceMapping;
use presman_platform::PlatformClient;

use crate::error::MigrationError;

/// Budget for one discovery/matching pass.
pub const RESYNC_TIMEOUT: Duration = Duration::from_secs(45);

/// Re-run entity discovery and persist the resulting mapping.
///
/// Idempotent: calling it twice with the device unchanged yields the
/// same mapping. `None` means discovery ran but produced no mapping.
pub async fn resync_entities(
    platform: &dyn PlatformClient,
    device_id: &str,
    profile_id: &str,
    device_name: &str,
) -> Result<Option<DeviceMapping>, MigrationError> {
    let result = tokio::time::timeout(
        RESYNC_TIMEOUT,
        platform.discover_and_save_mapping(device_id, profile_id, device_name),
    )
    .await;

    match result {
        Ok(Ok(mapping)) => {
            tracing::info!(
                device_id,
                found = mapping.is_some(),
                "Entity re-sync finished",
            );
            Ok(mapping)
        }
        Ok(Err(e)) => Err(MigrationError::Step {
            step: MigrationStep::Resync,
            message: e.to_string(),
        }),
        Err(_) => Err(MigrationError::Timeout {
            step: MigrationStep::Resync,
            condition: "entity re-sync",
        }),
    }
}
