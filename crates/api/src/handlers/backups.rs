//! Handlers for zone backup listing and deletion.
//!
//! Backups outlive migrations on purpose: a manual restore is always
//! possible after a failed or completed migration, so deletion is the
//! only mutation offered here.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use presman_db::repositories::ZoneBackupRepo;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// List a device's backups, newest first.
pub async fn list(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let backups = ZoneBackupRepo::list_by_device(&state.pool, &device_id).await?;
    Ok(Json(DataResponse { data: backups }))
}

/// Delete a single backup.
pub async fn remove(
    State(state): State<AppState>,
    Path(backup_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let deleted = ZoneBackupRepo::delete(&state.pool, backup_id).await?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("Backup {backup_id} not found")));
    }
    Ok(Json(DataResponse { data: "deleted" }))
}
