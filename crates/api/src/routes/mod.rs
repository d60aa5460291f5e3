//! Route table.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::{backups, migration};
use crate::state::AppState;

pub mod health;

/// All `/api/v1` routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/devices/{device_id}/migration",
            post(migration::start).get(migration::status),
        )
        .route(
            "/devices/{device_id}/migration/confirm",
            post(migration::confirm),
        )
        .route(
            "/devices/{device_id}/migration/cancel",
            post(migration::cancel),
        )
        .route(
            "/devices/{device_id}/migration/resync-now",
            post(migration::resync_now),
        )
        .route(
            "/devices/{device_id}/migration/retry-resync",
            post(migration::retry_resync),
        )
        .route(
            "/devices/{device_id}/migration/retry-restore",
            post(migration::retry_restore),
        )
        .route("/devices/{device_id}/backups", get(backups::list))
        .route("/backups/{backup_id}", delete(backups::remove))
}
