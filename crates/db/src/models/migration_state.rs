//! Migration state entity model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use presman_core::phase::{MigrationPhase, MigrationStep};
use presman_core::types::Timestamp;

/// A row from the `migration_states` table: one per device, upserted on
/// every phase transition and deleted on completion or cancellation.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MigrationStateRecord {
    pub device_id: String,
    pub phase: String,
    pub backup_id: Option<Uuid>,
    pub prepared_version: Option<String>,
    pub last_error: Option<String>,
    pub error_step: Option<String>,
    pub started_at: Timestamp,
    pub updated_at: Timestamp,
}

impl MigrationStateRecord {
    /// Decode the stored phase, if it is a known value.
    pub fn migration_phase(&self) -> Option<MigrationPhase> {
        MigrationPhase::from_str(&self.phase)
    }

    /// Decode the stored failing-step tag, if any.
    pub fn failing_step(&self) -> Option<MigrationStep> {
        self.error_step.as_deref().and_then(MigrationStep::from_str)
    }
}

/// DTO for upserting a device's migration state.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertMigrationState {
    pub phase: String,
    pub backup_id: Option<Uuid>,
    pub prepared_version: Option<String>,
    pub last_error: Option<String>,
    pub error_step: Option<String>,
}
