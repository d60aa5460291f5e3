//! Zone snapshot service: backup, restore, verify.
//!
//! The backup is a snapshot of the device's rectangular zones; restore
//! writes those zones back **as polygons** with slots renumbered (the
//! geometry and renumbering rules live in `presman_core::zones`);
//! verify recomputes the same expected set and compares it against
//! what the device actually reports.

use std::sync::Arc;

use uuid::Uuid;

use presman_core::zones::{self, ZoneLimits, ZonePolygon};
use presman_db::models::zone_backup::{CreateZoneBackup, ZoneBackup};
use presman_platform::{PlatformClient, PlatformError};

use crate::store::ZoneBackupStore;

/// `source` tag recorded on backups taken by the migration flow.
pub const BACKUP_SOURCE_MIGRATION: &str = "migration";

/// Errors from snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Backup {0} not found")]
    BackupNotFound(Uuid),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid backup payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One entity write that failed during restore. Not a hard failure:
/// restore continues with the remaining zones.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RestoreWarning {
    pub entity_id: Option<String>,
    pub description: String,
    pub error: String,
}

/// Result of a restore pass.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// Zones successfully written to the device.
    pub written: usize,
    pub warnings: Vec<RestoreWarning>,
}

/// Verification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Success,
    Warning,
    Error,
}

/// Result of a verification pass.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub status: VerifyStatus,
    pub message: String,
}

/// Backup/restore/verify over the platform client and the backup store.
#[derive(Clone)]
pub struct ZoneSnapshotService {
    platform: Arc<dyn PlatformClient>,
    backups: Arc<dyn ZoneBackupStore>,
}

impl ZoneSnapshotService {
    pub fn new(platform: Arc<dyn PlatformClient>, backups: Arc<dyn ZoneBackupStore>) -> Self {
        Self { platform, backups }
    }

    /// Snapshot the device's current rectangular zones.
    ///
    /// Invalid rects (non-positive extent) are dropped before the
    /// backup is persisted.
    pub async fn create_backup(
        &self,
        device_id: &str,
        profile_id: &str,
        entity_prefix: &str,
        source: &str,
    ) -> Result<ZoneBackup, SnapshotError> {
        let zones = self
            .platform
            .fetch_rect_zones(device_id, profile_id, entity_prefix)
            .await?;
        let total = zones.len();
        let valid: Vec<_> = zones.into_iter().filter(|z| z.is_valid()).collect();
        if valid.len() < total {
            tracing::debug!(
                device_id,
                dropped = total - valid.len(),
                "Dropped degenerate rects from backup",
            );
        }

        let input = CreateZoneBackup::from_zones(device_id, profile_id, source, &valid)?;
        let backup = self.backups.create(&input).await?;
        tracing::info!(
            device_id,
            backup_id = %backup.id,
            zones = valid.len(),
            "Zone backup created",
        );
        Ok(backup)
    }

    /// The polygon set a backup restores to, slots renumbered.
    pub async fn planned_polygons(
        &self,
        backup_id: Uuid,
        limits: &ZoneLimits,
    ) -> Result<Vec<ZonePolygon>, SnapshotError> {
        let backup = self
            .backups
            .find(backup_id)
            .await?
            .ok_or(SnapshotError::BackupNotFound(backup_id))?;
        let zones = backup.zone_list()?;
        Ok(zones::plan_restore(&zones, limits))
    }

    /// Write a backup's zones onto the device as polygon entities.
    ///
    /// Individual entity-write failures are collected as warnings and
    /// the remaining zones still go out.
    pub async fn restore(
        &self,
        backup_id: Uuid,
        device_id: &str,
        profile_id: &str,
        entity_prefix: &str,
        limits: &ZoneLimits,
    ) -> Result<RestoreReport, SnapshotError> {
        let plan = self.planned_polygons(backup_id, limits).await?;

        let mut report = RestoreReport {
            written: 0,
            warnings: Vec::new(),
        };
        for polygon in &plan {
            match self
                .platform
                .write_polygon_zone(device_id, profile_id, entity_prefix, polygon)
                .await
            {
                Ok(()) => report.written += 1,
                Err(e) => {
                    tracing::warn!(
                        device_id,
                        zone = %polygon.id,
                        error = %e,
                        "Zone write failed during restore",
                    );
                    report.warnings.push(RestoreWarning {
                        entity_id: Some(zone_entity_id(entity_prefix, &polygon.id)),
                        description: format!("Failed to write {}", polygon.id),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            device_id,
            backup_id = %backup_id,
            written = report.written,
            warnings = report.warnings.len(),
            "Zone restore finished",
        );
        Ok(report)
    }

    /// Compare the device's polygon zones against the renumbered
    /// expected set, within the 1-unit vertex tolerance.
    ///
    /// `Error` status means the device could not be read; mismatches
    /// are `Warning`, never a hard failure.
    pub async fn verify(
        &self,
        backup_id: Uuid,
        device_id: &str,
        profile_id: &str,
        entity_prefix: &str,
        limits: &ZoneLimits,
    ) -> Result<VerifyOutcome, SnapshotError> {
        let expected = self.planned_polygons(backup_id, limits).await?;

        let actual = match self
            .platform
            .fetch_polygon_zones(device_id, profile_id, entity_prefix)
            .await
        {
            Ok(actual) => actual,
            Err(e) => {
                return Ok(VerifyOutcome {
                    status: VerifyStatus::Error,
                    message: format!("Failed to read polygon zones: {e}"),
                });
            }
        };

        let mismatches = zones::count_mismatches(&expected, &actual);
        if mismatches > 0 {
            tracing::warn!(device_id, mismatches, "Zone verification found mismatches");
            return Ok(VerifyOutcome {
                status: VerifyStatus::Warning,
                message: format!(
                    "{mismatches} of {} restored zones missing or mismatched",
                    expected.len()
                ),
            });
        }
        Ok(VerifyOutcome {
            status: VerifyStatus::Success,
            message: format!("All {} zones verified", expected.len()),
        })
    }
}

/// Best-effort entity id for a restored zone, used in warnings.
fn zone_entity_id(entity_prefix: &str, zone_id: &str) -> String {
    format!(
        "{entity_prefix}{}",
        zone_id.to_ascii_lowercase().replace(' ', "_")
    )
}
