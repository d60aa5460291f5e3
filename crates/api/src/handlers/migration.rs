//! Handlers for the firmware update / zone-migration endpoints.
//!
//! These are thin: validate, hand off to the session registry, map
//! errors. The step list and action semantics live in
//! `presman_migration::coordinator`.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use presman_core::zones::ZoneLimits;
use presman_migration::{MigrationConfig, MigrationSession};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body for `POST /devices/{device_id}/migration`.
#[derive(Debug, Deserialize, Validate)]
pub struct StartMigrationRequest {
    #[validate(length(min = 1, max = 256))]
    pub device_name: String,
    #[validate(length(min = 1, max = 64))]
    pub model: String,
    #[validate(length(min = 1, max = 32))]
    pub firmware_version: String,
    #[validate(length(min = 1, max = 128))]
    pub profile_id: String,
    #[validate(length(min = 1, max = 128))]
    pub entity_prefix: String,
    #[validate(length(min = 1, max = 1024))]
    pub manifest_source: String,
    pub availability_entity: Option<String>,
    #[serde(default)]
    pub limits: Option<ZoneLimits>,
}

impl StartMigrationRequest {
    fn into_config(self, device_id: String) -> MigrationConfig {
        MigrationConfig {
            device_id,
            device_name: self.device_name,
            model: self.model,
            firmware_version: self.firmware_version,
            profile_id: self.profile_id,
            entity_prefix: self.entity_prefix,
            manifest_source: self.manifest_source,
            availability_entity: self.availability_entity,
            limits: self.limits.unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Start (or resume) an update for a device.
pub async fn start(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(body): Json<StartMigrationRequest>,
) -> AppResult<impl IntoResponse> {
    body.validate()?;
    let outcome = state.sessions.start(body.into_config(device_id)).await?;
    Ok(Json(DataResponse { data: outcome }))
}

/// Step list and phase for a device's migration, if one exists.
pub async fn status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let status = state
        .sessions
        .status(&device_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No migration for device {device_id}")))?;
    Ok(Json(DataResponse { data: status }))
}

/// Confirm the migration prompt and begin.
pub async fn confirm(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let session = live_session(&state, &device_id).await?;
    session.confirm_and_install().await?;
    Ok(Json(DataResponse { data: session.status().await }))
}

/// Cancel a device's migration (also used to decline the prompt).
pub async fn cancel(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    state.sessions.cancel(&device_id).await;
    Ok(Json(DataResponse { data: "cancelled" }))
}

/// Short-circuit the resync wait.
pub async fn resync_now(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let session = live_session(&state, &device_id).await?;
    session.force_resync_now().await?;
    Ok(Json(DataResponse { data: session.status().await }))
}

/// Retry a failed resync in place.
pub async fn retry_resync(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let session = live_session(&state, &device_id).await?;
    session.retry_resync().await?;
    Ok(Json(DataResponse { data: session.status().await }))
}

/// Retry a failed restore in place.
pub async fn retry_restore(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let session = live_session(&state, &device_id).await?;
    session.retry_restore().await?;
    Ok(Json(DataResponse { data: session.status().await }))
}

async fn live_session(
    state: &AppState,
    device_id: &str,
) -> AppResult<std::sync::Arc<MigrationSession>> {
    state
        .sessions
        .get(device_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No live migration session for {device_id}")))
}
