//! Integration tests for the backup and migration-state repositories.
//!
//! Exercises the persistence contract against a real database:
//! - Backup create / fetch / newest-first listing / delete
//! - Migration state upsert semantics (one row per device, overwrite)
//! - Record lifecycle: exists mid-flight, gone after delete

use sqlx::PgPool;
use uuid::Uuid;

use presman_core::phase::MigrationPhase;
use presman_core::zones::{ZoneRect, ZoneType};
use presman_db::models::migration_state::UpsertMigrationState;
use presman_db::models::zone_backup::CreateZoneBackup;
use presman_db::repositories::{MigrationStateRepo, ZoneBackupRepo};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sample_zones() -> Vec<ZoneRect> {
    vec![
        ZoneRect {
            id: "Zone 1".to_string(),
            zone_type: ZoneType::Regular,
            x: 0,
            y: 0,
            width: 2000,
            height: 1500,
            enabled: Some(true),
            label: None,
        },
        ZoneRect {
            id: "Exclusion 2".to_string(),
            zone_type: ZoneType::Exclusion,
            x: 500,
            y: 500,
            width: 300,
            height: 300,
            enabled: None,
            label: Some("couch".to_string()),
        },
    ]
}

fn new_backup(device_id: &str) -> CreateZoneBackup {
    CreateZoneBackup::from_zones(device_id, "profile-lite", "migration", &sample_zones()).unwrap()
}

fn upsert_input(phase: MigrationPhase, backup_id: Option<Uuid>) -> UpsertMigrationState {
    UpsertMigrationState {
        phase: phase.as_str().to_string(),
        backup_id,
        prepared_version: Some("1.3.0".to_string()),
        last_error: None,
        error_step: None,
    }
}

// ---------------------------------------------------------------------------
// Zone backups
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn backup_round_trips_zone_list(pool: PgPool) {
    let created = ZoneBackupRepo::create(&pool, &new_backup("dev-1")).await.unwrap();

    let fetched = ZoneBackupRepo::find_by_id(&pool, created.id)
        .await
        .unwrap()
        .expect("backup should exist");
    assert_eq!(fetched.device_id, "dev-1");
    assert_eq!(fetched.source, "migration");

    let zones = fetched.zone_list().unwrap();
    assert_eq!(zones, sample_zones());
}

#[sqlx::test(migrations = "./migrations")]
async fn backups_list_newest_first_per_device(pool: PgPool) {
    let first = ZoneBackupRepo::create(&pool, &new_backup("dev-1")).await.unwrap();
    let second = ZoneBackupRepo::create(&pool, &new_backup("dev-1")).await.unwrap();
    ZoneBackupRepo::create(&pool, &new_backup("dev-other")).await.unwrap();

    let listed = ZoneBackupRepo::list_by_device(&pool, "dev-1").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[1].id, first.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn backup_delete_removes_row(pool: PgPool) {
    let created = ZoneBackupRepo::create(&pool, &new_backup("dev-1")).await.unwrap();

    assert_eq!(ZoneBackupRepo::delete(&pool, created.id).await.unwrap(), 1);
    assert!(ZoneBackupRepo::find_by_id(&pool, created.id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(ZoneBackupRepo::delete(&pool, created.id).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Migration states
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn upsert_keeps_one_row_per_device(pool: PgPool) {
    let backup = ZoneBackupRepo::create(&pool, &new_backup("dev-1")).await.unwrap();

    MigrationStateRepo::upsert(&pool, "dev-1", &upsert_input(MigrationPhase::BackingUp, None))
        .await
        .unwrap();
    let updated = MigrationStateRepo::upsert(
        &pool,
        "dev-1",
        &upsert_input(MigrationPhase::Installing, Some(backup.id)),
    )
    .await
    .unwrap();

    assert_eq!(updated.phase, "installing");
    assert_eq!(updated.backup_id, Some(backup.id));
    assert_eq!(updated.migration_phase(), Some(MigrationPhase::Installing));

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM migration_states")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn upsert_preserves_started_at(pool: PgPool) {
    let first = MigrationStateRepo::upsert(
        &pool,
        "dev-1",
        &upsert_input(MigrationPhase::BackingUp, None),
    )
    .await
    .unwrap();
    let second = MigrationStateRepo::upsert(
        &pool,
        "dev-1",
        &upsert_input(MigrationPhase::Installing, None),
    )
    .await
    .unwrap();

    assert_eq!(second.started_at, first.started_at);
    assert!(second.updated_at >= first.updated_at);
}

#[sqlx::test(migrations = "./migrations")]
async fn error_state_round_trips_failing_step(pool: PgPool) {
    let input = UpsertMigrationState {
        phase: MigrationPhase::Error.as_str().to_string(),
        backup_id: None,
        prepared_version: Some("1.3.0".to_string()),
        last_error: Some("Timed out waiting for device entities".to_string()),
        error_step: Some("resync".to_string()),
    };
    MigrationStateRepo::upsert(&pool, "dev-1", &input).await.unwrap();

    let fetched = MigrationStateRepo::find_by_device(&pool, "dev-1")
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(fetched.migration_phase(), Some(MigrationPhase::Error));
    assert_eq!(
        fetched.failing_step(),
        Some(presman_core::phase::MigrationStep::Resync)
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn delete_marks_migration_terminal(pool: PgPool) {
    MigrationStateRepo::upsert(&pool, "dev-1", &upsert_input(MigrationPhase::Verifying, None))
        .await
        .unwrap();

    assert_eq!(
        MigrationStateRepo::delete_by_device(&pool, "dev-1").await.unwrap(),
        1
    );
    assert!(MigrationStateRepo::find_by_device(&pool, "dev-1")
        .await
        .unwrap()
        .is_none());
    // Deleting an absent record is a no-op, not an error.
    assert_eq!(
        MigrationStateRepo::delete_by_device(&pool, "dev-1").await.unwrap(),
        0
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn deleting_backup_nulls_state_reference(pool: PgPool) {
    let backup = ZoneBackupRepo::create(&pool, &new_backup("dev-1")).await.unwrap();
    MigrationStateRepo::upsert(
        &pool,
        "dev-1",
        &upsert_input(MigrationPhase::Restoring, Some(backup.id)),
    )
    .await
    .unwrap();

    ZoneBackupRepo::delete(&pool, backup.id).await.unwrap();

    let fetched = MigrationStateRepo::find_by_device(&pool, "dev-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.backup_id, None);
}
