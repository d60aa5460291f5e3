//! Error taxonomy for the migration orchestrator.
//!
//! Nothing here escapes the coordinator boundary: every failure is
//! caught, classified, and turned into an error phase with a tagged
//! step and a displayable message.

use presman_core::phase::MigrationStep;

/// Errors raised inside migration phases.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// An awaited call threw or returned a failure payload.
    #[error("{step} failed: {message}")]
    Step {
        step: MigrationStep,
        message: String,
    },

    /// A polling loop exceeded its budget. `condition` names what was
    /// being waited on (device reboot, device entities, polygon
    /// entities, entity re-sync).
    #[error("Timed out waiting for {condition}")]
    Timeout {
        step: MigrationStep,
        condition: &'static str,
    },

    /// The session was cancelled; no error is recorded.
    #[error("Migration cancelled")]
    Cancelled,

    /// Update preparation failed before any phase began (device config
    /// gate, manifest staging, or the available-updates lookup).
    #[error("Update preparation failed: {0}")]
    Prepare(String),

    /// The device's configuration schema is inferred, which blocks
    /// firmware updates entirely.
    #[error("Firmware updates are not available for device {device_id}: configuration schema is inferred")]
    UpdatesUnsupported { device_id: String },

    /// An action was invoked in a phase that does not permit it.
    #[error("Action not allowed in phase {phase}: {action}")]
    InvalidAction {
        phase: &'static str,
        action: &'static str,
    },
}

impl MigrationError {
    /// The failing step this error is tagged with, if any.
    pub fn step_tag(&self) -> Option<MigrationStep> {
        match self {
            Self::Step { step, .. } | Self::Timeout { step, .. } => Some(*step),
            _ => None,
        }
    }
}
