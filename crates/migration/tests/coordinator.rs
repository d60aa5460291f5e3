//! Integration tests for the migration coordinator.
//!
//! Drives full migrations against a scripted in-process platform and
//! the in-memory stores. Time is paused, so polling budgets (120s
//! reboot, 120s discovery, 90s polygon) elapse virtually and the tests
//! stay fast.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;

use presman_core::firmware::ConfigSource;
use presman_core::phase::{MigrationPhase, MigrationStep, StepStatus};
use presman_core::zones::{ZoneRect, ZoneType};
use presman_db::models::migration_state::UpsertMigrationState;
use presman_db::models::zone_backup::CreateZoneBackup;
use presman_migration::store::{
    InMemoryMigrationStateStore, InMemoryZoneBackupStore, MigrationStateStore, ZoneBackupStore,
};
use presman_migration::{MigrationConfig, MigrationError, SessionRegistry, StartOutcome};
use presman_platform::types::{
    AvailableUpdate, DeviceConfigInfo, DeviceMapping, DeviceReadiness, EntityState,
    PreparedFirmware, ReadinessQuery, ReadinessRequirement, UpdateEntityStatus,
};
use presman_platform::{PlatformClient, PlatformError};

// ---------------------------------------------------------------------------
// Scripted platform
// ---------------------------------------------------------------------------

struct FakePlatform {
    config_source: ConfigSource,
    prepared_version: String,
    updates: Vec<AvailableUpdate>,
    rect_zones: Vec<ZoneRect>,
    /// Update entity polls, consumed front to back; the last entry
    /// repeats forever.
    update_script: Mutex<VecDeque<UpdateEntityStatus>>,
    /// Availability entity polls, same consumption rule. Empty means
    /// "always available".
    availability_script: Mutex<VecDeque<Option<EntityState>>>,
    discovery_ready: AtomicBool,
    polygon_ready: AtomicBool,
    mapping_available: bool,
    /// Polygon ids whose writes fail with a 500.
    fail_write_ids: Vec<String>,
    written: Mutex<Vec<presman_core::zones::ZonePolygon>>,
    readiness_queries: Mutex<Vec<ReadinessQuery>>,
    prepare_calls: AtomicUsize,
    trigger_calls: AtomicUsize,
    discover_calls: AtomicUsize,
    rect_fetches: AtomicUsize,
}

fn update_status(state: &str) -> UpdateEntityStatus {
    UpdateEntityStatus {
        state: state.to_string(),
        attributes: json!({}).as_object().unwrap().clone(),
    }
}

fn entity_up() -> Option<EntityState> {
    Some(EntityState {
        state: "on".to_string(),
        attributes: json!({}).as_object().unwrap().clone(),
    })
}

fn rect(id: &str, zone_type: ZoneType, x: i32) -> ZoneRect {
    ZoneRect {
        id: id.to_string(),
        zone_type,
        x,
        y: 0,
        width: 100,
        height: 100,
        enabled: Some(true),
        label: None,
    }
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            config_source: ConfigSource::Entities,
            prepared_version: "1.3.0".to_string(),
            updates: vec![AvailableUpdate {
                current_version: "1.1.0".to_string(),
                new_version: "1.3.0".to_string(),
                migration: None,
            }],
            rect_zones: vec![
                rect("Zone 1", ZoneType::Regular, 0),
                rect("Zone 2", ZoneType::Regular, 200),
                rect("Exclusion 2", ZoneType::Exclusion, 400),
            ],
            update_script: Mutex::new(VecDeque::from([
                update_status("installing"),
                update_status("idle"),
            ])),
            availability_script: Mutex::new(VecDeque::new()),
            discovery_ready: AtomicBool::new(true),
            polygon_ready: AtomicBool::new(true),
            mapping_available: true,
            fail_write_ids: Vec::new(),
            written: Mutex::new(Vec::new()),
            readiness_queries: Mutex::new(Vec::new()),
            prepare_calls: AtomicUsize::new(0),
            trigger_calls: AtomicUsize::new(0),
            discover_calls: AtomicUsize::new(0),
            rect_fetches: AtomicUsize::new(0),
        }
    }
}

impl FakePlatform {
    fn written_ids(&self) -> Vec<String> {
        self.written.lock().unwrap().iter().map(|p| p.id.clone()).collect()
    }

    fn pop_script<T: Clone>(script: &Mutex<VecDeque<T>>) -> Option<T> {
        let mut script = script.lock().unwrap();
        match script.len() {
            0 => None,
            1 => script.front().cloned(),
            _ => script.pop_front(),
        }
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_device_config(
        &self,
        _model: &str,
        _firmware_version: &str,
        _device_id: &str,
    ) -> Result<DeviceConfigInfo, PlatformError> {
        Ok(DeviceConfigInfo {
            config_source: self.config_source,
        })
    }

    async fn get_available_updates(
        &self,
        _model: &str,
        _firmware_version: &str,
        _device_id: &str,
    ) -> Result<Vec<AvailableUpdate>, PlatformError> {
        Ok(self.updates.clone())
    }

    async fn fetch_entity_state(
        &self,
        _entity_id: &str,
    ) -> Result<Option<EntityState>, PlatformError> {
        Ok(Self::pop_script(&self.availability_script).unwrap_or_else(entity_up))
    }

    async fn fetch_device_readiness(
        &self,
        _device_id: &str,
        query: &ReadinessQuery,
    ) -> Result<DeviceReadiness, PlatformError> {
        self.readiness_queries.lock().unwrap().push(query.clone());
        let ready = match query.requirement {
            ReadinessRequirement::Discovery => self.discovery_ready.load(Ordering::SeqCst),
            ReadinessRequirement::Polygon { .. } => self.polygon_ready.load(Ordering::SeqCst),
        };
        Ok(DeviceReadiness {
            ready,
            checked_entity_ids: vec!["sensor.presence".to_string()],
            available_entity_count: if ready { 12 } else { 3 },
        })
    }

    async fn fetch_rect_zones(
        &self,
        _device_id: &str,
        _profile_id: &str,
        _entity_prefix: &str,
    ) -> Result<Vec<ZoneRect>, PlatformError> {
        self.rect_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.rect_zones.clone())
    }

    async fn fetch_polygon_zones(
        &self,
        _device_id: &str,
        _profile_id: &str,
        _entity_prefix: &str,
    ) -> Result<Vec<presman_core::zones::ZonePolygon>, PlatformError> {
        Ok(self.written.lock().unwrap().clone())
    }

    async fn write_polygon_zone(
        &self,
        _device_id: &str,
        _profile_id: &str,
        _entity_prefix: &str,
        polygon: &presman_core::zones::ZonePolygon,
    ) -> Result<(), PlatformError> {
        if self.fail_write_ids.contains(&polygon.id) {
            return Err(PlatformError::Api {
                status: 500,
                body: "zone entity rejected the write".to_string(),
            });
        }
        self.written.lock().unwrap().push(polygon.clone());
        Ok(())
    }

    async fn prepare_firmware(
        &self,
        _device_id: &str,
        _manifest_source: &str,
    ) -> Result<PreparedFirmware, PlatformError> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PreparedFirmware {
            token: "prep-token".to_string(),
            version: self.prepared_version.clone(),
        })
    }

    async fn trigger_update(&self, _device_id: &str, _token: &str) -> Result<(), PlatformError> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_update_status(
        &self,
        _device_id: &str,
    ) -> Result<UpdateEntityStatus, PlatformError> {
        Self::pop_script(&self.update_script).ok_or(PlatformError::Api {
            status: 404,
            body: "no update entity".to_string(),
        })
    }

    async fn discover_and_save_mapping(
        &self,
        device_id: &str,
        profile_id: &str,
        _device_name: &str,
    ) -> Result<Option<DeviceMapping>, PlatformError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        if !self.mapping_available {
            return Ok(None);
        }
        Ok(Some(DeviceMapping {
            device_id: device_id.to_string(),
            profile_id: profile_id.to_string(),
            entities: json!({"zone_1": "number.zone_1_x"}).as_object().unwrap().clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    platform: Arc<FakePlatform>,
    store: Arc<InMemoryMigrationStateStore>,
    backups: Arc<InMemoryZoneBackupStore>,
    registry: SessionRegistry,
}

fn harness(platform: FakePlatform) -> Harness {
    let platform = Arc::new(platform);
    let store = Arc::new(InMemoryMigrationStateStore::default());
    let backups = Arc::new(InMemoryZoneBackupStore::default());
    let registry = SessionRegistry::new(
        Arc::clone(&platform) as Arc<dyn PlatformClient>,
        Arc::clone(&store) as Arc<dyn MigrationStateStore>,
        Arc::clone(&backups) as Arc<dyn ZoneBackupStore>,
    );
    Harness {
        platform,
        store,
        backups,
        registry,
    }
}

fn config() -> MigrationConfig {
    MigrationConfig {
        device_id: "dev-1".to_string(),
        device_name: "Living Room Sensor".to_string(),
        model: "presence-lite".to_string(),
        firmware_version: "1.1.0".to_string(),
        profile_id: "profile-lite".to_string(),
        entity_prefix: "living_room_".to_string(),
        manifest_source: "https://firmware.example/presence-lite/manifest.json".to_string(),
        availability_entity: None,
        limits: Default::default(),
    }
}

/// Poll the registry until the device reaches `phase`. Virtual time
/// only; panics if it takes more than ten (virtual) minutes.
async fn wait_for_phase(h: &Harness, phase: MigrationPhase) {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            if let Some(status) = h.registry.status("dev-1").await {
                if status.phase == phase {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("device never reached phase {phase}"));
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn migration_end_to_end_success() {
    let h = harness(FakePlatform::default());

    let outcome = h.registry.start(config()).await.unwrap();
    assert_matches!(outcome, StartOutcome::PromptRequired { ref version } if version == "1.3.0");

    // The prompt is persisted so a reload re-shows it.
    let record = h.store.load("dev-1").await.unwrap().unwrap();
    assert_eq!(record.phase, "prompt");

    let session = h.registry.get("dev-1").await.unwrap();
    session.confirm_and_install().await.unwrap();
    wait_for_phase(&h, MigrationPhase::Complete).await;

    // Install triggered exactly once.
    assert_eq!(h.platform.trigger_calls.load(Ordering::SeqCst), 1);

    // Restore wrote renumbered polygons: "Exclusion 2" became slot 1.
    assert_eq!(h.platform.written_ids(), ["Zone 1", "Zone 2", "Exclusion 1"]);

    // The polygon readiness wait asked for exactly the backup's counts.
    let queries = h.platform.readiness_queries.lock().unwrap().clone();
    let polygon_query = queries
        .iter()
        .find_map(|q| match q.requirement {
            ReadinessRequirement::Polygon {
                regular,
                exclusion,
                entry,
            } => Some((regular, exclusion, entry)),
            ReadinessRequirement::Discovery => None,
        })
        .expect("polygon readiness was queried");
    assert_eq!(polygon_query, (2, 1, 0));

    let status = h.registry.status("dev-1").await.unwrap();
    assert!(status.warnings.is_empty());
    for step in &status.steps {
        assert_eq!(step.status, StepStatus::Done, "step {:?}", step.step);
    }

    // Terminal: the record is gone, the backup is not.
    assert!(h.store.load("dev-1").await.unwrap().is_none());
    assert!(h.backups.find(status.backup_id.unwrap()).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn restore_warning_still_completes() {
    let h = harness(FakePlatform {
        fail_write_ids: vec!["Exclusion 1".to_string()],
        ..FakePlatform::default()
    });

    h.registry.start(config()).await.unwrap();
    let session = h.registry.get("dev-1").await.unwrap();
    session.confirm_and_install().await.unwrap();
    wait_for_phase(&h, MigrationPhase::Complete).await;

    let status = h.registry.status("dev-1").await.unwrap();

    // One warning from the failed write, one from verify spotting the
    // missing exclusion polygon.
    assert_eq!(status.warnings.len(), 2);
    assert!(status.warnings[0].contains("Exclusion 1"));
    assert!(status.warnings[1].contains("missing or mismatched"));

    let by_step = |step: MigrationStep| {
        status
            .steps
            .iter()
            .find(|s| s.step == step)
            .unwrap()
            .status
    };
    assert_eq!(by_step(MigrationStep::Restore), StepStatus::Warning);
    assert_eq!(by_step(MigrationStep::Verify), StepStatus::Warning);
    assert_eq!(by_step(MigrationStep::Backup), StepStatus::Done);

    // Partial success is still terminal.
    assert!(h.store.load("dev-1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn plain_update_never_enters_migration() {
    // Already past the 1.2.0 threshold: no prompt, no zones touched.
    let h = harness(FakePlatform::default());
    let outcome = h
        .registry
        .start(MigrationConfig {
            firmware_version: "1.2.5".to_string(),
            ..config()
        })
        .await
        .unwrap();
    assert_matches!(outcome, StartOutcome::UpdateStarted { .. });

    wait_for_phase(&h, MigrationPhase::Complete).await;

    assert_eq!(h.platform.trigger_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.platform.rect_fetches.load(Ordering::SeqCst), 0);
    assert_eq!(h.platform.discover_calls.load(Ordering::SeqCst), 0);
    assert!(h.platform.written_ids().is_empty());
    // Plain updates never persist migration state.
    assert!(h.store.load("dev-1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn reboot_confirmation_waits_for_down_then_up() {
    let h = harness(FakePlatform {
        availability_script: Mutex::new(VecDeque::from([
            entity_up(), // still up right after the flash
            None,        // down for reboot
            entity_up(), // back up
        ])),
        ..FakePlatform::default()
    });

    h.registry
        .start(MigrationConfig {
            availability_entity: Some("binary_sensor.living_room_online".to_string()),
            ..config()
        })
        .await
        .unwrap();
    let session = h.registry.get("dev-1").await.unwrap();
    session.confirm_and_install().await.unwrap();
    wait_for_phase(&h, MigrationPhase::Complete).await;

    // All three availability polls were consumed.
    assert!(h.platform.availability_script.lock().unwrap().len() <= 1);
}

// ---------------------------------------------------------------------------
// Timeouts and retry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn resync_wait_timeout_errors_without_discovery() {
    let h = harness(FakePlatform::default());
    h.platform.discovery_ready.store(false, Ordering::SeqCst);

    h.registry.start(config()).await.unwrap();
    let session = h.registry.get("dev-1").await.unwrap();
    session.confirm_and_install().await.unwrap();
    wait_for_phase(&h, MigrationPhase::Error).await;

    let status = h.registry.status("dev-1").await.unwrap();
    assert_eq!(status.error_step, Some(MigrationStep::Resync));
    assert!(status.last_error.unwrap().contains("device entities"));

    // The timeout fired before discovery was ever attempted.
    assert_eq!(h.platform.discover_calls.load(Ordering::SeqCst), 0);

    // The error phase is persisted for resume.
    let record = h.store.load("dev-1").await.unwrap().unwrap();
    assert_eq!(record.phase, "error");
    assert_eq!(record.error_step.as_deref(), Some("resync"));
}

#[tokio::test(start_paused = true)]
async fn retry_resync_recovers_in_place() {
    let h = harness(FakePlatform::default());
    h.platform.discovery_ready.store(false, Ordering::SeqCst);

    h.registry.start(config()).await.unwrap();
    let session = h.registry.get("dev-1").await.unwrap();
    session.confirm_and_install().await.unwrap();
    wait_for_phase(&h, MigrationPhase::Error).await;

    let triggers_before = h.platform.trigger_calls.load(Ordering::SeqCst);

    // Device finally republishes its entities; retry just the resync.
    h.platform.discovery_ready.store(true, Ordering::SeqCst);
    session.retry_resync().await.unwrap();
    wait_for_phase(&h, MigrationPhase::Complete).await;

    // Earlier phases did not re-run.
    assert_eq!(h.platform.trigger_calls.load(Ordering::SeqCst), triggers_before);
    assert_eq!(h.platform.written_ids(), ["Zone 1", "Zone 2", "Exclusion 1"]);
}

#[tokio::test(start_paused = true)]
async fn retry_is_rejected_for_non_retryable_steps() {
    let h = harness(FakePlatform::default());
    h.registry.start(config()).await.unwrap();
    let session = h.registry.get("dev-1").await.unwrap();

    // Still in prompt: neither retry applies.
    assert_matches!(
        session.retry_resync().await,
        Err(MigrationError::InvalidAction { .. })
    );
    assert_matches!(
        session.retry_restore().await,
        Err(MigrationError::InvalidAction { .. })
    );
}

#[tokio::test(start_paused = true)]
async fn force_resync_short_circuits_the_wait() {
    let h = harness(FakePlatform::default());
    h.platform.discovery_ready.store(false, Ordering::SeqCst);

    h.registry.start(config()).await.unwrap();
    let session = h.registry.get("dev-1").await.unwrap();
    session.confirm_and_install().await.unwrap();
    wait_for_phase(&h, MigrationPhase::ResyncWait).await;

    session.force_resync_now().await.unwrap();
    wait_for_phase(&h, MigrationPhase::Complete).await;

    // Discovery ran despite the readiness probe never reporting ready.
    assert_eq!(h.platform.discover_calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Cancellation, resume, gating
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_clears_the_record() {
    // Update entity reports installing forever; cancel mid-install.
    let h = harness(FakePlatform {
        update_script: Mutex::new(VecDeque::from([update_status("installing")])),
        ..FakePlatform::default()
    });

    h.registry.start(config()).await.unwrap();
    let session = h.registry.get("dev-1").await.unwrap();
    session.confirm_and_install().await.unwrap();
    wait_for_phase(&h, MigrationPhase::Installing).await;

    assert!(h.registry.cancel("dev-1").await);
    assert!(h.store.load("dev-1").await.unwrap().is_none());
    assert!(h.registry.status("dev-1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn declining_the_prompt_clears_state_without_error() {
    let h = harness(FakePlatform::default());
    h.registry.start(config()).await.unwrap();
    assert!(h.store.load("dev-1").await.unwrap().is_some());

    assert!(h.registry.cancel("dev-1").await);
    assert!(h.store.load("dev-1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn resume_restarts_only_the_interrupted_phase() {
    let h = harness(FakePlatform::default());

    // Seed the stores as if a prior process died mid-restore.
    let backup = h
        .backups
        .create(
            &CreateZoneBackup::from_zones(
                "dev-1",
                "profile-lite",
                "migration",
                &[
                    rect("Zone 1", ZoneType::Regular, 0),
                    rect("Exclusion 2", ZoneType::Exclusion, 400),
                ],
            )
            .unwrap(),
        )
        .await
        .unwrap();
    h.store
        .save(
            "dev-1",
            &UpsertMigrationState {
                phase: "restoring".to_string(),
                backup_id: Some(backup.id),
                prepared_version: Some("1.3.0".to_string()),
                last_error: None,
                error_step: None,
            },
        )
        .await
        .unwrap();

    let outcome = h.registry.start(config()).await.unwrap();
    assert_matches!(
        outcome,
        StartOutcome::Resumed {
            phase: MigrationPhase::Restoring
        }
    );
    wait_for_phase(&h, MigrationPhase::Complete).await;

    // Completed phases did not re-run: no prepare, no trigger, no
    // discovery -- only restore and verify.
    assert_eq!(h.platform.prepare_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.platform.trigger_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.platform.discover_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.platform.written_ids(), ["Zone 1", "Exclusion 1"]);
    assert!(h.store.load("dev-1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn inferred_config_blocks_the_flow() {
    let h = harness(FakePlatform {
        config_source: ConfigSource::Inferred,
        ..FakePlatform::default()
    });

    let result = h.registry.start(config()).await;
    assert_matches!(result, Err(MigrationError::UpdatesUnsupported { .. }));
    assert!(h.store.load("dev-1").await.unwrap().is_none());
    assert_eq!(h.platform.prepare_calls.load(Ordering::SeqCst), 0);
}
