//! Repository for the `zone_backups` table.
//!
//! Backups are write-once: there is no update method by design -- a
//! backup that could drift from what was actually on the device would
//! be worthless for verification.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::zone_backup::{CreateZoneBackup, ZoneBackup};

/// Column list for `zone_backups` queries.
const COLUMNS: &str = "id, device_id, profile_id, source, zones, created_at";

/// CRUD (minus the U) for zone backups.
pub struct ZoneBackupRepo;

impl ZoneBackupRepo {
    /// Persist a new backup snapshot.
    pub async fn create(
        pool: &PgPool,
        input: &CreateZoneBackup,
    ) -> Result<ZoneBackup, sqlx::Error> {
        let query = format!(
            "INSERT INTO zone_backups (device_id, profile_id, source, zones) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ZoneBackup>(&query)
            .bind(&input.device_id)
            .bind(&input.profile_id)
            .bind(&input.source)
            .bind(&input.zones)
            .fetch_one(pool)
            .await
    }

    /// Find a backup by its ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<ZoneBackup>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM zone_backups WHERE id = $1");
        sqlx::query_as::<_, ZoneBackup>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List all backups for a device, newest first.
    pub async fn list_by_device(
        pool: &PgPool,
        device_id: &str,
    ) -> Result<Vec<ZoneBackup>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM zone_backups \
             WHERE device_id = $1 ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, ZoneBackup>(&query)
            .bind(device_id)
            .fetch_all(pool)
            .await
    }

    /// Delete a backup. Returns the number of rows deleted.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM zone_backups WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
