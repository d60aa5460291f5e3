//! Repository for the `migration_states` table.
//!
//! One row per device, keyed on `device_id`. Upserting on every phase
//! transition keeps the record current; deleting it marks the migration
//! terminal.

use sqlx::PgPool;

use crate::models::migration_state::{MigrationStateRecord, UpsertMigrationState};

/// Column list for `migration_states` queries.
const COLUMNS: &str = "\
    device_id, phase, backup_id, prepared_version, \
    last_error, error_step, started_at, updated_at";

/// Upsert/find/delete for per-device migration state.
pub struct MigrationStateRepo;

impl MigrationStateRepo {
    /// Write the device's current migration state.
    ///
    /// Uses `ON CONFLICT` to upsert -- `started_at` is preserved across
    /// updates within one migration, `updated_at` always advances.
    pub async fn upsert(
        pool: &PgPool,
        device_id: &str,
        input: &UpsertMigrationState,
    ) -> Result<MigrationStateRecord, sqlx::Error> {
        let query = format!(
            "INSERT INTO migration_states \
                 (device_id, phase, backup_id, prepared_version, last_error, error_step) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (device_id) DO UPDATE SET \
                 phase            = EXCLUDED.phase, \
                 backup_id        = EXCLUDED.backup_id, \
                 prepared_version = EXCLUDED.prepared_version, \
                 last_error       = EXCLUDED.last_error, \
                 error_step       = EXCLUDED.error_step, \
                 updated_at       = now() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, MigrationStateRecord>(&query)
            .bind(device_id)
            .bind(&input.phase)
            .bind(input.backup_id)
            .bind(&input.prepared_version)
            .bind(&input.last_error)
            .bind(&input.error_step)
            .fetch_one(pool)
            .await
    }

    /// Find the live record for a device, if any.
    pub async fn find_by_device(
        pool: &PgPool,
        device_id: &str,
    ) -> Result<Option<MigrationStateRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM migration_states WHERE device_id = $1");
        sqlx::query_as::<_, MigrationStateRecord>(&query)
            .bind(device_id)
            .fetch_optional(pool)
            .await
    }

    /// Delete the device's record (completion or cancellation).
    ///
    /// Returns the number of rows deleted.
    pub async fn delete_by_device(pool: &PgPool, device_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM migration_states WHERE device_id = $1")
            .bind(device_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
