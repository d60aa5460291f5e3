//! Polling monitor for an in-flight firmware installation.
//!
//! After `trigger_update` the only source of truth is the device's
//! update entity, and -- once the flash finishes -- its availability
//! entity, which dips to unavailable while the device reboots. The
//! monitor waits through three checkpoints: the start signal, the end
//! of the flash, and (when an availability entity is mapped) the
//! down-then-up reboot transition. Devices with no availability entity
//! skip the reboot confirmation and rely solely on the update entity's
//! completion signal.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use presman_core::phase::MigrationStep;
use presman_platform::PlatformClient;

use crate::error::MigrationError;
use crate::update::DeviceUpdateClient;

/// Tunable parameters for the install monitor.
pub struct MonitorConfig {
    /// Fixed delay between polls.
    pub poll_interval: Duration,
    /// Overall budget from trigger to confirmed reboot.
    pub reboot_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            reboot_timeout: Duration::from_secs(120),
        }
    }
}

/// Where the monitor is in the install lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallStage {
    WaitingForStart,
    Flashing,
    WaitingForRebootDown,
    WaitingForRebootUp,
}

/// Poll until the installation completes or the reboot budget elapses.
///
/// Transport errors while polling are expected mid-reboot (the device
/// is offline) and count as "device down", never as failures. Returns
/// `Ok(())` on confirmed completion, [`MigrationError::Timeout`] tagged
/// `install` when the budget runs out, or [`MigrationError::Cancelled`].
pub async fn monitor_install(
    update: &DeviceUpdateClient,
    platform: &dyn PlatformClient,
    device_id: &str,
    availability_entity: Option<&str>,
    config: &MonitorConfig,
    cancel: &CancellationToken,
) -> Result<(), MigrationError> {
    let started = Instant::now();
    let mut stage = InstallStage::WaitingForStart;

    loop {
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        if started.elapsed() >= config.reboot_timeout {
            tracing::warn!(device_id, stage = ?stage, "Install monitor timed out");
            return Err(MigrationError::Timeout {
                step: MigrationStep::Install,
                condition: "device reboot",
            });
        }

        stage = match stage {
            InstallStage::WaitingForStart | InstallStage::Flashing => {
                match update.status(device_id).await {
                    Ok(snapshot) => {
                        tracing::debug!(
                            device_id,
                            state = %snapshot.state,
                            in_progress = snapshot.in_progress,
                            progress = snapshot.progress,
                            "Update entity polled",
                        );
                        match (stage, snapshot.in_progress) {
                            (InstallStage::WaitingForStart, true) => InstallStage::Flashing,
                            (InstallStage::WaitingForStart, false) => InstallStage::WaitingForStart,
                            (_, true) => InstallStage::Flashing,
                            // Flash finished. Without an availability
                            // entity there is nothing more to confirm.
                            (_, false) => match availability_entity {
                                Some(_) => InstallStage::WaitingForRebootDown,
                                None => {
                                    tracing::info!(
                                        device_id,
                                        "Install complete (no availability entity, skipping reboot confirmation)",
                                    );
                                    return Ok(());
                                }
                            },
                        }
                    }
                    Err(e) => {
                        // The update entity can vanish while the device
                        // reboots; keep polling until the budget says stop.
                        tracing::debug!(device_id, error = %e, "Update entity unreadable");
                        stage
                    }
                }
            }
            InstallStage::WaitingForRebootDown | InstallStage::WaitingForRebootUp => {
                let Some(entity_id) = availability_entity else {
                    // Unreachable by construction; treat as complete.
                    return Ok(());
                };
                let up = match platform.fetch_entity_state(entity_id).await {
                    Ok(Some(state)) => state.is_available(),
                    Ok(None) => false,
                    Err(_) => false,
                };
                match (stage, up) {
                    (InstallStage::WaitingForRebootDown, false) => {
                        tracing::info!(device_id, "Device went down for reboot");
                        InstallStage::WaitingForRebootUp
                    }
                    (InstallStage::WaitingForRebootUp, true) => {
                        tracing::info!(device_id, "Device back up after reboot");
                        return Ok(());
                    }
                    (unchanged, _) => unchanged,
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }
}
