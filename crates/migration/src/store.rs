//! Thin persistence adapters for the coordinator.
//!
//! The coordinator programs against two small traits so the transition
//! logic is testable without a database; the Postgres implementations
//! delegate straight to the repository layer, and the in-memory
//! implementations back the orchestrator's integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use presman_db::models::migration_state::{MigrationStateRecord, UpsertMigrationState};
use presman_db::models::zone_backup::{CreateZoneBackup, ZoneBackup};
use presman_db::repositories::{MigrationStateRepo, ZoneBackupRepo};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Durable per-device migration state: load, overwrite, clear.
#[async_trait]
pub trait MigrationStateStore: Send + Sync {
    async fn load(&self, device_id: &str) -> Result<Option<MigrationStateRecord>, sqlx::Error>;

    async fn save(
        &self,
        device_id: &str,
        state: &UpsertMigrationState,
    ) -> Result<MigrationStateRecord, sqlx::Error>;

    async fn clear(&self, device_id: &str) -> Result<(), sqlx::Error>;
}

/// Durable zone backups: create and fetch.
///
/// Listing and deletion stay on the repository -- only the operations
/// the coordinator itself performs go through this seam.
#[async_trait]
pub trait ZoneBackupStore: Send + Sync {
    async fn create(&self, input: &CreateZoneBackup) -> Result<ZoneBackup, sqlx::Error>;

    async fn find(&self, id: Uuid) -> Result<Option<ZoneBackup>, sqlx::Error>;
}

// ---------------------------------------------------------------------------
// Postgres implementations
// ---------------------------------------------------------------------------

/// [`MigrationStateStore`] backed by the `migration_states` table.
pub struct PgMigrationStateStore {
    pool: PgPool,
}

impl PgMigrationStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MigrationStateStore for PgMigrationStateStore {
    async fn load(&self, device_id: &str) -> Result<Option<MigrationStateRecord>, sqlx::Error> {
        MigrationStateRepo::find_by_device(&self.pool, device_id).await
    }

    async fn save(
        &self,
        device_id: &str,
        state: &UpsertMigrationState,
    ) -> Result<MigrationStateRecord, sqlx::Error> {
        MigrationStateRepo::upsert(&self.pool, device_id, state).await
    }

    async fn clear(&self, device_id: &str) -> Result<(), sqlx::Error> {
        MigrationStateRepo::delete_by_device(&self.pool, device_id).await?;
        Ok(())
    }
}

/// [`ZoneBackupStore`] backed by the `zone_backups` table.
pub struct PgZoneBackupStore {
    pool: PgPool,
}

impl PgZoneBackupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ZoneBackupStore for PgZoneBackupStore {
    async fn create(&self, input: &CreateZoneBackup) -> Result<ZoneBackup, sqlx::Error> {
        ZoneBackupRepo::create(&self.pool, input).await
    }

    async fn find(&self, id: Uuid) -> Result<Option<ZoneBackup>, sqlx::Error> {
        ZoneBackupRepo::find_by_id(&self.pool, id).await
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Map-backed [`MigrationStateStore`] for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryMigrationStateStore {
    records: Mutex<HashMap<String, MigrationStateRecord>>,
}

#[async_trait]
impl MigrationStateStore for InMemoryMigrationStateStore {
    async fn load(&self, device_id: &str) -> Result<Option<MigrationStateRecord>, sqlx::Error> {
        Ok(self.records.lock().unwrap().get(device_id).cloned())
    }

    async fn save(
        &self,
        device_id: &str,
        state: &UpsertMigrationState,
    ) -> Result<MigrationStateRecord, sqlx::Error> {
        let now = chrono::Utc::now();
        let mut records = self.records.lock().unwrap();
        let started_at = records
            .get(device_id)
            .map(|existing| existing.started_at)
            .unwrap_or(now);
        let record = MigrationStateRecord {
            device_id: device_id.to_string(),
            phase: state.phase.clone(),
            backup_id: state.backup_id,
            prepared_version: state.prepared_version.clone(),
            last_error: state.last_error.clone(),
            error_step: state.error_step.clone(),
            started_at,
            updated_at: now,
        };
        records.insert(device_id.to_string(), record.clone());
        Ok(record)
    }

    async fn clear(&self, device_id: &str) -> Result<(), sqlx::Error> {
        self.records.lock().unwrap().remove(device_id);
        Ok(())
    }
}

/// Map-backed [`ZoneBackupStore`] for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryZoneBackupStore {
    backups: Mutex<HashMap<Uuid, ZoneBackup>>,
}

#[async_trait]
impl ZoneBackupStore for InMemoryZoneBackupStore {
    async fn create(&self, input: &CreateZoneBackup) -> Result<ZoneBackup, sqlx::Error> {
        let backup = ZoneBackup {
            id: Uuid::new_v4(),
            device_id: input.device_id.clone(),
            profile_id: input.profile_id.clone(),
            source: input.source.clone(),
            zones: input.zones.clone(),
            created_at: chrono::Utc::now(),
        };
        self.backups.lock().unwrap().insert(backup.id, backup.clone());
        Ok(backup)
    }

    async fn find(&self, id: Uuid) -> Result<Option<ZoneBackup>, sqlx::Error> {
        Ok(self.backups.lock().unwrap().get(&id).cloned())
    }
}
