//! Zone backup entity model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use presman_core::types::Timestamp;
use presman_core::zones::ZoneRect;

/// A row from the `zone_backups` table.
///
/// Immutable once created: the zone list is a snapshot of the device's
/// rectangular zones at backup time, stored as JSONB.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ZoneBackup {
    pub id: Uuid,
    pub device_id: String,
    pub profile_id: String,
    pub source: String,
    pub zones: serde_json::Value,
    pub created_at: Timestamp,
}

impl ZoneBackup {
    /// Decode the stored zone list.
    pub fn zone_list(&self) -> Result<Vec<ZoneRect>, serde_json::Error> {
        serde_json::from_value(self.zones.clone())
    }
}

/// DTO for creating a new backup.
#[derive(Debug, Deserialize)]
pub struct CreateZoneBackup {
    pub device_id: String,
    pub profile_id: String,
    pub source: String,
    pub zones: serde_json::Value,
}

impl CreateZoneBackup {
    /// Build a create DTO from an already-filtered zone list.
    pub fn from_zones(
        device_id: &str,
        profile_id: &str,
        source: &str,
        zones: &[ZoneRect],
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            device_id: device_id.to_string(),
            profile_id: profile_id.to_string(),
            source: source.to_string(),
            zones: serde_json::to_value(zones)?,
        })
    }
}
