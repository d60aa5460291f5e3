//! Migration coordinator: per-device sessions and the phase driver.
//!
//! One [`MigrationSession`] exists per device at a time, held in the
//! [`SessionRegistry`]. A session runs its phases strictly sequentially
//! on one spawned task, persists every transition into a non-terminal
//! phase through the state store, and exposes the step list and action
//! hooks the UI layer consumes. Starting a new migration for a device
//! that already has one replaces it -- last-writer-wins, no queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use presman_core::firmware::{migration_required, ConfigSource};
use presman_core::phase::{can_transition, step_list, MigrationPhase, MigrationStep, StepStatus};
use presman_core::zones::{plan_counts, ZoneLimits};
use presman_db::models::migration_state::{MigrationStateRecord, UpsertMigrationState};
use presman_platform::types::{ReadinessQuery, ReadinessRequirement};
use presman_platform::PlatformClient;

use crate::error::MigrationError;
use crate::monitor::{monitor_install, MonitorConfig};
use crate::readiness::{wait_until_ready, ReadinessPoll, ReadyOutcome};
use crate::resync::resync_entities;
use crate::snapshot::{VerifyStatus, ZoneSnapshotService, BACKUP_SOURCE_MIGRATION};
use crate::store::{MigrationStateStore, ZoneBackupStore};
use crate::update::DeviceUpdateClient;

/// Minimum visible duration of each phase, so fast operations do not
/// flicker through the step list.
const MIN_STEP_VISIBLE: Duration = Duration::from_millis(1200);

// ---------------------------------------------------------------------------
// Configuration and status types
// ---------------------------------------------------------------------------

/// Everything a session needs to know about its device.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    pub device_id: String,
    pub device_name: String,
    pub model: String,
    /// Firmware version currently on the device.
    pub firmware_version: String,
    pub profile_id: String,
    /// Prefix shared by the device's entity ids.
    pub entity_prefix: String,
    /// Where to fetch the target firmware manifest from.
    pub manifest_source: String,
    /// Availability entity used for reboot detection, when one is
    /// mapped. Without it the install monitor skips the down/up check.
    #[serde(default)]
    pub availability_entity: Option<String>,
    #[serde(default)]
    pub limits: ZoneLimits,
}

/// How a start request resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StartOutcome {
    /// The target firmware drops rectangular-zone support; the user
    /// must confirm before the migration runs.
    PromptRequired { version: String },
    /// Plain update, no migration; installation already triggered.
    UpdateStarted { version: String },
    /// A live record existed and the session resumed from its phase.
    Resumed { phase: MigrationPhase },
}

/// Display state of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepDisplay {
    pub step: MigrationStep,
    pub status: StepStatus,
    pub detail: String,
}

/// Snapshot of a session for the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub device_id: String,
    pub phase: MigrationPhase,
    pub prepared_version: Option<String>,
    pub backup_id: Option<Uuid>,
    pub error_step: Option<MigrationStep>,
    pub last_error: Option<String>,
    /// Messages retained from partial restore / verify mismatches.
    pub warnings: Vec<String>,
    pub steps: Vec<StepDisplay>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Mutable session state, behind one lock, never held across awaits.
struct SessionState {
    phase: MigrationPhase,
    /// Full migration (true) or plain firmware update (false). Plain
    /// updates never touch the state store.
    migrate: bool,
    backup_id: Option<Uuid>,
    prepared_version: Option<String>,
    prepare_token: Option<String>,
    error_step: Option<MigrationStep>,
    last_error: Option<String>,
    warnings: Vec<String>,
    warning_steps: Vec<MigrationStep>,
    details: HashMap<MigrationStep, String>,
}

/// A single device's migration session.
pub struct MigrationSession {
    config: MigrationConfig,
    platform: Arc<dyn PlatformClient>,
    store: Arc<dyn MigrationStateStore>,
    snapshot: ZoneSnapshotService,
    update: DeviceUpdateClient,
    state: RwLock<SessionState>,
    cancel: CancellationToken,
    resync_now: Notify,
}

impl MigrationSession {
    fn new(
        config: MigrationConfig,
        platform: Arc<dyn PlatformClient>,
        store: Arc<dyn MigrationStateStore>,
        backups: Arc<dyn ZoneBackupStore>,
        migrate: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            snapshot: ZoneSnapshotService::new(Arc::clone(&platform), backups),
            update: DeviceUpdateClient::new(Arc::clone(&platform)),
            config,
            platform,
            store,
            state: RwLock::new(SessionState {
                phase: MigrationPhase::Idle,
                migrate,
                backup_id: None,
                prepared_version: None,
                prepare_token: None,
                error_step: None,
                last_error: None,
                warnings: Vec::new(),
                warning_steps: Vec::new(),
                details: HashMap::new(),
            }),
            cancel: CancellationToken::new(),
            resync_now: Notify::new(),
        })
    }

    /// Current snapshot for display.
    pub async fn status(&self) -> MigrationStatus {
        let state = self.state.read().await;
        let steps = step_list(state.phase, state.error_step, &state.warning_steps)
            .into_iter()
            .map(|(step, status)| StepDisplay {
                step,
                status,
                detail: state.details.get(&step).cloned().unwrap_or_default(),
            })
            .collect();
        MigrationStatus {
            device_id: self.config.device_id.clone(),
            phase: state.phase,
            prepared_version: state.prepared_version.clone(),
            backup_id: state.backup_id,
            error_step: state.error_step,
            last_error: state.last_error.clone(),
            warnings: state.warnings.clone(),
            steps,
        }
    }

    // -- action hooks -------------------------------------------------------

    /// Confirm the migration prompt and begin with the backup phase.
    ///
    /// The check-and-transition happens under the state lock so a
    /// double confirm cannot spawn two drivers.
    pub async fn confirm_and_install(self: &Arc<Self>) -> Result<(), MigrationError> {
        {
            let mut state = self.state.write().await;
            if state.phase != MigrationPhase::Prompt {
                return Err(MigrationError::InvalidAction {
                    phase: state.phase.as_str(),
                    action: "confirm_and_install",
                });
            }
            state.phase = MigrationPhase::BackingUp;
        }
        self.spawn_drive(MigrationPhase::BackingUp, false);
        Ok(())
    }

    /// Cancel the session: clears the persisted record and stops
    /// further polling on the next scheduled tick. In-flight calls are
    /// not aborted; their results are ignored.
    pub async fn cancel(&self) {
        self.cancel.cancel();
        {
            let mut state = self.state.write().await;
            state.phase = MigrationPhase::Idle;
        }
        if let Err(e) = self.store.clear(&self.config.device_id).await {
            tracing::error!(
                device_id = %self.config.device_id,
                error = %e,
                "Failed to clear migration state on cancel",
            );
        }
        tracing::info!(device_id = %self.config.device_id, "Migration cancelled");
    }

    /// Short-circuit the resync wait ("start now").
    pub async fn force_resync_now(&self) -> Result<(), MigrationError> {
        let phase = self.state.read().await.phase;
        if phase != MigrationPhase::ResyncWait {
            return Err(MigrationError::InvalidAction {
                phase: phase.as_str(),
                action: "force_resync_now",
            });
        }
        self.resync_now.notify_one();
        Ok(())
    }

    /// Retry a failed resync in place, without repeating earlier phases.
    pub async fn retry_resync(self: &Arc<Self>) -> Result<(), MigrationError> {
        self.retry(MigrationStep::Resync, MigrationPhase::ResyncWait)
            .await
    }

    /// Retry a failed restore in place, without repeating earlier phases.
    pub async fn retry_restore(self: &Arc<Self>) -> Result<(), MigrationError> {
        self.retry(MigrationStep::Restore, MigrationPhase::Restoring)
            .await
    }

    async fn retry(
        self: &Arc<Self>,
        step: MigrationStep,
        reenter: MigrationPhase,
    ) -> Result<(), MigrationError> {
        {
            let mut state = self.state.write().await;
            if state.phase != MigrationPhase::Error || state.error_step != Some(step) {
                return Err(MigrationError::InvalidAction {
                    phase: state.phase.as_str(),
                    action: match step {
                        MigrationStep::Resync => "retry_resync",
                        _ => "retry_restore",
                    },
                });
            }
            state.phase = reenter;
            state.error_step = None;
            state.last_error = None;
        }
        self.spawn_drive(reenter, false);
        Ok(())
    }

    /// Stop polling without touching the persisted record. Used when a
    /// newer session replaces this one.
    fn halt(&self) {
        self.cancel.cancel();
    }

    // -- phase driver -------------------------------------------------------

    fn spawn_drive(self: &Arc<Self>, first: MigrationPhase, resumed: bool) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.drive(first, resumed).await;
        });
    }

    async fn drive(self: Arc<Self>, first: MigrationPhase, resumed: bool) {
        match self.run_phases(first, resumed).await {
            Ok(()) => {}
            Err(MigrationError::Cancelled) => {
                tracing::info!(
                    device_id = %self.config.device_id,
                    "Phase driver stopped by cancellation",
                );
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn run_phases(
        &self,
        first: MigrationPhase,
        resumed: bool,
    ) -> Result<(), MigrationError> {
        let mut phase = first;
        loop {
            self.enter_phase(phase).await;
            let step_started = Instant::now();

            match phase {
                MigrationPhase::BackingUp => self.do_backup().await?,
                MigrationPhase::Installing => {
                    // A session resumed mid-install must not trigger a
                    // second flash; the monitor alone picks back up.
                    let skip_trigger = resumed && first == MigrationPhase::Installing;
                    self.do_install(skip_trigger).await?;
                }
                MigrationPhase::ResyncWait => self.do_resync_wait().await?,
                MigrationPhase::Resyncing => self.do_resync().await?,
                MigrationPhase::Restoring => self.do_restore().await?,
                MigrationPhase::Verifying => self.do_verify().await?,
                other => {
                    tracing::error!(phase = %other, "Phase driver entered a non-running phase");
                    return Ok(());
                }
            }

            if self.cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }
            pace(step_started).await;

            phase = match phase.next() {
                Some(MigrationPhase::Complete) => {
                    self.complete().await;
                    return Ok(());
                }
                Some(next) => next,
                None => return Ok(()),
            };
        }
    }

    /// Plain firmware update: trigger + monitor, nothing persisted,
    /// no zone handling. Lives outside the migration phase machine, so
    /// the phase is set directly rather than through `enter_phase`.
    async fn drive_plain(self: Arc<Self>) {
        {
            let mut state = self.state.write().await;
            state.phase = MigrationPhase::Installing;
            state.details.insert(
                MigrationStep::Install,
                default_detail(MigrationPhase::Installing).to_string(),
            );
        }
        let step_started = Instant::now();
        match self.do_install(false).await {
            Ok(()) => {
                pace(step_started).await;
                let mut state = self.state.write().await;
                state.phase = MigrationPhase::Complete;
            }
            Err(MigrationError::Cancelled) => {}
            Err(e) => self.fail(e).await,
        }
    }

    /// Record the new phase and persist it (non-terminal contract).
    async fn enter_phase(&self, phase: MigrationPhase) {
        {
            let mut state = self.state.write().await;
            if state.phase != phase && !can_transition(state.phase, phase) {
                tracing::warn!(
                    device_id = %self.config.device_id,
                    from = %state.phase,
                    to = %phase,
                    "Unexpected phase transition",
                );
            }
            state.phase = phase;
            if let Some(step) = phase.step() {
                state
                    .details
                    .insert(step, default_detail(phase).to_string());
            }
        }
        tracing::info!(device_id = %self.config.device_id, phase = %phase, "Entering phase");
        self.persist().await;
    }

    /// Mirror the current state into the store. Plain updates skip
    /// this entirely; store failures degrade resume but never stop a
    /// running migration.
    async fn persist(&self) {
        let (migrate, input) = {
            let state = self.state.read().await;
            let input = UpsertMigrationState {
                phase: state.phase.as_str().to_string(),
                backup_id: state.backup_id,
                prepared_version: state.prepared_version.clone(),
                last_error: state.last_error.clone(),
                error_step: state.error_step.map(|s| s.as_str().to_string()),
            };
            (state.migrate, input)
        };
        if !migrate {
            return;
        }
        if let Err(e) = self.store.save(&self.config.device_id, &input).await {
            tracing::error!(
                device_id = %self.config.device_id,
                error = %e,
                "Failed to persist migration state",
            );
        }
    }

    /// Classify a phase failure into the error state.
    async fn fail(&self, error: MigrationError) {
        let step = {
            let state = self.state.read().await;
            error.step_tag().or_else(|| state.phase.step())
        };
        tracing::warn!(
            device_id = %self.config.device_id,
            step = step.map(|s| s.as_str()).unwrap_or("unknown"),
            error = %error,
            "Migration step failed",
        );
        {
            let mut state = self.state.write().await;
            state.phase = MigrationPhase::Error;
            state.error_step = step;
            state.last_error = Some(error.to_string());
            if let Some(step) = step {
                state.details.insert(step, error.to_string());
            }
        }
        self.persist().await;
    }

    /// Terminal success: the record is cleared, warnings are retained
    /// in memory for display.
    async fn complete(&self) {
        {
            let mut state = self.state.write().await;
            state.phase = MigrationPhase::Complete;
        }
        if let Err(e) = self.store.clear(&self.config.device_id).await {
            tracing::error!(
                device_id = %self.config.device_id,
                error = %e,
                "Failed to clear migration state on completion",
            );
        }
        tracing::info!(device_id = %self.config.device_id, "Migration complete");
    }

    // -- individual phases --------------------------------------------------

    async fn do_backup(&self) -> Result<(), MigrationError> {
        let backup = self
            .snapshot
            .create_backup(
                &self.config.device_id,
                &self.config.profile_id,
                &self.config.entity_prefix,
                BACKUP_SOURCE_MIGRATION,
            )
            .await
            .map_err(|e| MigrationError::Step {
                step: MigrationStep::Backup,
                message: e.to_string(),
            })?;

        let count = backup.zone_list().map(|z| z.len()).unwrap_or(0);
        {
            let mut state = self.state.write().await;
            state.backup_id = Some(backup.id);
            state
                .details
                .insert(MigrationStep::Backup, format!("Backed up {count} zones"));
        }
        self.persist().await;
        Ok(())
    }

    async fn do_install(&self, skip_trigger: bool) -> Result<(), MigrationError> {
        if !skip_trigger {
            let token = match self.state.read().await.prepare_token.clone() {
                Some(token) => token,
                // Token lost across a restart; re-stage the manifest.
                None => {
                    let prepared = self
                        .update
                        .prepare(&self.config.device_id, &self.config.manifest_source)
                        .await
                        .map_err(|e| MigrationError::Step {
                            step: MigrationStep::Install,
                            message: e.to_string(),
                        })?;
                    let mut state = self.state.write().await;
                    state.prepare_token = Some(prepared.token.clone());
                    state.prepared_version = Some(prepared.version);
                    prepared.token
                }
            };

            self.update
                .trigger(&self.config.device_id, &token)
                .await
                .map_err(|e| MigrationError::Step {
                    step: MigrationStep::Install,
                    message: e.to_string(),
                })?;
        }

        monitor_install(
            &self.update,
            self.platform.as_ref(),
            &self.config.device_id,
            self.config.availability_entity.as_deref(),
            &MonitorConfig::default(),
            &self.cancel,
        )
        .await?;

        let version = self.state.read().await.prepared_version.clone();
        let detail = match version {
            Some(version) => format!("Firmware {version} installed"),
            None => "Firmware installed".to_string(),
        };
        self.state
            .write()
            .await
            .details
            .insert(MigrationStep::Install, detail);
        Ok(())
    }

    async fn do_resync_wait(&self) -> Result<(), MigrationError> {
        let query = ReadinessQuery {
            requirement: ReadinessRequirement::Discovery,
            profile_id: self.config.profile_id.clone(),
            entity_prefix: self.config.entity_prefix.clone(),
        };
        let outcome = wait_until_ready(
            self.platform.as_ref(),
            &self.config.device_id,
            &query,
            &ReadinessPoll::discovery(),
            &self.cancel,
            Some(&self.resync_now),
        )
        .await?;

        let detail = match outcome {
            ReadyOutcome::Ready(readiness) => {
                format!("{} entities available", readiness.available_entity_count)
            }
            ReadyOutcome::Skipped => "Re-sync started manually".to_string(),
            ReadyOutcome::TimedOut => {
                return Err(MigrationError::Timeout {
                    step: MigrationStep::Resync,
                    condition: "device entities",
                });
            }
        };
        self.state
            .write()
            .await
            .details
            .insert(MigrationStep::Resync, detail);
        Ok(())
    }

    async fn do_resync(&self) -> Result<(), MigrationError> {
        let mapping = resync_entities(
            self.platform.as_ref(),
            &self.config.device_id,
            &self.config.profile_id,
            &self.config.device_name,
        )
        .await?;
        if mapping.is_none() {
            return Err(MigrationError::Step {
                step: MigrationStep::Resync,
                message: "Entity discovery produced no mapping".to_string(),
            });
        }

        // Entity sync itself succeeded; now wait for the polygon zone
        // entities the restore will need. A timeout here tags `restore`.
        let counts = {
            let backup_id = self.backup_id().await?;
            let plan = self
                .snapshot
                .planned_polygons(backup_id, &self.config.limits)
                .await
                .map_err(|e| MigrationError::Step {
                    step: MigrationStep::Restore,
                    message: e.to_string(),
                })?;
            plan_counts(&plan)
        };
        let query = ReadinessQuery {
            requirement: ReadinessRequirement::Polygon {
                regular: counts.regular,
                exclusion: counts.exclusion,
                entry: counts.entry,
            },
            profile_id: self.config.profile_id.clone(),
            entity_prefix: self.config.entity_prefix.clone(),
        };
        let outcome = wait_until_ready(
            self.platform.as_ref(),
            &self.config.device_id,
            &query,
            &ReadinessPoll::polygon(),
            &self.cancel,
            None,
        )
        .await?;
        if matches!(outcome, ReadyOutcome::TimedOut) {
            return Err(MigrationError::Timeout {
                step: MigrationStep::Restore,
                condition: "polygon entities",
            });
        }

        self.state
            .write()
            .await
            .details
            .insert(MigrationStep::Resync, "Entities re-synced".to_string());
        Ok(())
    }

    async fn do_restore(&self) -> Result<(), MigrationError> {
        let backup_id = self.backup_id().await?;
        let report = self
            .snapshot
            .restore(
                backup_id,
                &self.config.device_id,
                &self.config.profile_id,
                &self.config.entity_prefix,
                &self.config.limits,
            )
            .await
            .map_err(|e| MigrationError::Step {
                step: MigrationStep::Restore,
                message: e.to_string(),
            })?;

        let detail = if report.warnings.is_empty() {
            format!("Restored {} zones", report.written)
        } else {
            format!(
                "Restored {} zones, {} failed",
                report.written,
                report.warnings.len()
            )
        };
        {
            let mut state = self.state.write().await;
            for warning in &report.warnings {
                state
                    .warnings
                    .push(format!("{}: {}", warning.description, warning.error));
            }
            if !report.warnings.is_empty() {
                state.warning_steps.push(MigrationStep::Restore);
            }
            state.details.insert(MigrationStep::Restore, detail);
        }
        Ok(())
    }

    async fn do_verify(&self) -> Result<(), MigrationError> {
        let backup_id = self.backup_id().await?;
        let outcome = self
            .snapshot
            .verify(
                backup_id,
                &self.config.device_id,
                &self.config.profile_id,
                &self.config.entity_prefix,
                &self.config.limits,
            )
            .await
            .map_err(|e| MigrationError::Step {
                step: MigrationStep::Verify,
                message: e.to_string(),
            })?;

        match outcome.status {
            VerifyStatus::Error => Err(MigrationError::Step {
                step: MigrationStep::Verify,
                message: outcome.message,
            }),
            VerifyStatus::Warning => {
                let mut state = self.state.write().await;
                state.warnings.push(outcome.message.clone());
                state.warning_steps.push(MigrationStep::Verify);
                state.details.insert(MigrationStep::Verify, outcome.message);
                Ok(())
            }
            VerifyStatus::Success => {
                self.state
                    .write()
                    .await
                    .details
                    .insert(MigrationStep::Verify, outcome.message);
                Ok(())
            }
        }
    }

    async fn backup_id(&self) -> Result<Uuid, MigrationError> {
        self.state
            .read()
            .await
            .backup_id
            .ok_or_else(|| MigrationError::Step {
                step: MigrationStep::Restore,
                message: "No backup recorded for this migration".to_string(),
            })
    }
}

/// Hold the step on screen for its minimum visible duration.
async fn pace(started: Instant) {
    let elapsed = started.elapsed();
    if elapsed < MIN_STEP_VISIBLE {
        tokio::time::sleep(MIN_STEP_VISIBLE - elapsed).await;
    }
}

/// Placeholder detail shown while a phase is running.
fn default_detail(phase: MigrationPhase) -> &'static str {
    match phase {
        MigrationPhase::BackingUp => "Backing up current zones",
        MigrationPhase::Installing => "Installing firmware",
        MigrationPhase::ResyncWait => "Waiting for device entities",
        MigrationPhase::Resyncing => "Re-syncing entities",
        MigrationPhase::Restoring => "Restoring zones",
        MigrationPhase::Verifying => "Verifying zones",
        _ => "",
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds the live session per device.
///
/// Created once at startup; safe to clone into request handlers via
/// `Arc`.
pub struct SessionRegistry {
    platform: Arc<dyn PlatformClient>,
    store: Arc<dyn MigrationStateStore>,
    backups: Arc<dyn ZoneBackupStore>,
    sessions: RwLock<HashMap<String, Arc<MigrationSession>>>,
}

impl SessionRegistry {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        store: Arc<dyn MigrationStateStore>,
        backups: Arc<dyn ZoneBackupStore>,
    ) -> Self {
        Self {
            platform,
            store,
            backups,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start (or resume) an update for a device.
    ///
    /// Resumes when a live record exists in a resumable or error phase;
    /// otherwise gates on the device config, stages the firmware, and
    /// either prompts (migration) or triggers immediately (plain).
    pub async fn start(
        &self,
        config: MigrationConfig,
    ) -> Result<StartOutcome, MigrationError> {
        // Resume path: pick up where the persisted record left off.
        match self.store.load(&config.device_id).await {
            Ok(Some(record)) => {
                if let Some(phase) = record.migration_phase() {
                    if phase.is_resumable() || phase == MigrationPhase::Error {
                        return Ok(self.resume(config, &record, phase).await);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    device_id = %config.device_id,
                    error = %e,
                    "Failed to load migration state; starting fresh",
                );
            }
        }

        // Gate: inferred configuration schemas cannot be updated.
        let device_config = self
            .platform
            .get_device_config(&config.model, &config.firmware_version, &config.device_id)
            .await
            .map_err(|e| MigrationError::Prepare(e.to_string()))?;
        if device_config.config_source != ConfigSource::Entities {
            return Err(MigrationError::UpdatesUnsupported {
                device_id: config.device_id.clone(),
            });
        }

        // Stage the manifest and decide whether this crosses the
        // zone-schema threshold.
        let update = DeviceUpdateClient::new(Arc::clone(&self.platform));
        let prepared = update
            .prepare(&config.device_id, &config.manifest_source)
            .await
            .map_err(|e| MigrationError::Prepare(e.to_string()))?;

        let updates = self
            .platform
            .get_available_updates(&config.model, &config.firmware_version, &config.device_id)
            .await
            .map_err(|e| MigrationError::Prepare(e.to_string()))?;
        let manifest_flag = updates
            .iter()
            .find(|u| u.new_version == prepared.version)
            .and_then(|u| u.migration);

        let migrate = migration_required(
            &config.model,
            &config.firmware_version,
            &prepared.version,
            manifest_flag,
        );
        let version = prepared.version.clone();

        let session = MigrationSession::new(
            config,
            Arc::clone(&self.platform),
            Arc::clone(&self.store),
            Arc::clone(&self.backups),
            migrate,
        );
        {
            let mut state = session.state.write().await;
            state.prepared_version = Some(prepared.version);
            state.prepare_token = Some(prepared.token);
        }

        if migrate {
            {
                let mut state = session.state.write().await;
                state.phase = MigrationPhase::Prompt;
            }
            session.persist().await;
            self.install_session(session).await;
            Ok(StartOutcome::PromptRequired { version })
        } else {
            let plain = Arc::clone(&session);
            tokio::spawn(async move {
                plain.drive_plain().await;
            });
            self.install_session(session).await;
            Ok(StartOutcome::UpdateStarted { version })
        }
    }

    /// Rebuild a session from its persisted record and, for resumable
    /// phases, restart the in-flight phase. Completed steps never
    /// re-run; an error phase waits for a targeted retry.
    async fn resume(
        &self,
        config: MigrationConfig,
        record: &MigrationStateRecord,
        phase: MigrationPhase,
    ) -> StartOutcome {
        tracing::info!(
            device_id = %config.device_id,
            phase = %phase,
            "Resuming migration from persisted state",
        );
        let session = MigrationSession::new(
            config,
            Arc::clone(&self.platform),
            Arc::clone(&self.store),
            Arc::clone(&self.backups),
            true,
        );
        {
            let mut state = session.state.write().await;
            state.phase = phase;
            state.backup_id = record.backup_id;
            state.prepared_version = record.prepared_version.clone();
            state.error_step = record.failing_step();
            state.last_error = record.last_error.clone();
        }
        if phase.is_resumable() {
            session.spawn_drive(phase, true);
        }
        self.install_session(session).await;
        StartOutcome::Resumed { phase }
    }

    /// Insert the session, replacing (and halting) any prior one for
    /// the same device.
    async fn install_session(&self, session: Arc<MigrationSession>) {
        let device_id = session.config.device_id.clone();
        let replaced = self
            .sessions
            .write()
            .await
            .insert(device_id.clone(), session);
        if let Some(old) = replaced {
            tracing::warn!(device_id = %device_id, "Replacing live migration session");
            old.halt();
        }
    }

    /// The live session for a device, if any.
    pub async fn get(&self, device_id: &str) -> Option<Arc<MigrationSession>> {
        self.sessions.read().await.get(device_id).cloned()
    }

    /// Display status for a device: the live session's state, or a
    /// view synthesized from the persisted record when no session is
    /// in memory (e.g. right after a process restart).
    pub async fn status(&self, device_id: &str) -> Option<MigrationStatus> {
        if let Some(session) = self.get(device_id).await {
            return Some(session.status().await);
        }

        match self.store.load(device_id).await {
            Ok(Some(record)) => {
                let phase = record.migration_phase()?;
                let error_step = record.failing_step();
                let steps = step_list(phase, error_step, &[])
                    .into_iter()
                    .map(|(step, status)| StepDisplay {
                        step,
                        status,
                        detail: String::new(),
                    })
                    .collect();
                Some(MigrationStatus {
                    device_id: record.device_id.clone(),
                    phase,
                    prepared_version: record.prepared_version.clone(),
                    backup_id: record.backup_id,
                    error_step,
                    last_error: record.last_error.clone(),
                    warnings: Vec::new(),
                    steps,
                })
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!(device_id, error = %e, "Failed to load migration state");
                None
            }
        }
    }

    /// Cancel and forget a device's session, clearing its record.
    pub async fn cancel(&self, device_id: &str) -> bool {
        let session = self.sessions.write().await.remove(device_id);
        match session {
            Some(session) => {
                session.cancel().await;
                true
            }
            None => {
                // No in-memory session; still clear any stale record.
                match self.store.clear(device_id).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(device_id, error = %e, "Failed to clear migration state");
                        false
                    }
                }
            }
        }
    }
}
