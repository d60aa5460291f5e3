//! Migration phase machine and step-list derivation.
//!
//! The coordinator's control flow is expressed here as data: the phase
//! enum, the legal-transition predicate, and the pure derivation of the
//! five-step display list. Keeping this free of I/O makes the sequencing
//! rules testable without a runtime; the coordinator crate owns timers,
//! polling, and persistence.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Phase of a zone-preserving firmware migration, in required order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Idle,
    Prompt,
    BackingUp,
    Installing,
    ResyncWait,
    Resyncing,
    Restoring,
    Verifying,
    Complete,
    Error,
}

impl MigrationPhase {
    /// Return the phase name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Prompt => "prompt",
            Self::BackingUp => "backing_up",
            Self::Installing => "installing",
            Self::ResyncWait => "resync_wait",
            Self::Resyncing => "resyncing",
            Self::Restoring => "restoring",
            Self::Verifying => "verifying",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Parse a phase string. Returns `None` for unknown values.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "prompt" => Some(Self::Prompt),
            "backing_up" => Some(Self::BackingUp),
            "installing" => Some(Self::Installing),
            "resync_wait" => Some(Self::ResyncWait),
            "resyncing" => Some(Self::Resyncing),
            "restoring" => Some(Self::Restoring),
            "verifying" => Some(Self::Verifying),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// All valid phase values.
    pub const ALL: &'static [&'static str] = &[
        "idle",
        "prompt",
        "backing_up",
        "installing",
        "resync_wait",
        "resyncing",
        "restoring",
        "verifying",
        "complete",
        "error",
    ];

    /// Terminal phases clear the persisted record.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Complete)
    }

    /// Phases an interrupted session picks back up from. The in-flight
    /// phase re-runs; already-completed phases never do.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::BackingUp | Self::Installing | Self::ResyncWait | Self::Resyncing
                | Self::Restoring | Self::Verifying
        )
    }

    /// The forward successor in the happy path, if any.
    pub fn next(&self) -> Option<MigrationPhase> {
        match self {
            Self::Idle => Some(Self::Prompt),
            Self::Prompt => Some(Self::BackingUp),
            Self::BackingUp => Some(Self::Installing),
            Self::Installing => Some(Self::ResyncWait),
            Self::ResyncWait => Some(Self::Resyncing),
            Self::Resyncing => Some(Self::Restoring),
            Self::Restoring => Some(Self::Verifying),
            Self::Verifying => Some(Self::Complete),
            Self::Complete | Self::Error => None,
        }
    }

    /// The display step a phase maps onto, if any.
    pub fn step(&self) -> Option<MigrationStep> {
        match self {
            Self::BackingUp => Some(MigrationStep::Backup),
            Self::Installing => Some(MigrationStep::Install),
            Self::ResyncWait | Self::Resyncing => Some(MigrationStep::Resync),
            Self::Restoring => Some(MigrationStep::Restore),
            Self::Verifying => Some(MigrationStep::Verify),
            _ => None,
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `from -> to` is a legal transition.
///
/// Forward transitions follow the happy path with no skipping; any
/// non-idle, non-prompt phase may fail into `Error`; from `Error` only
/// the two retryable phases (`ResyncWait`, `Restoring`) may be
/// re-entered in place.
pub fn can_transition(from: MigrationPhase, to: MigrationPhase) -> bool {
    use MigrationPhase as P;

    if from.next() == Some(to) {
        return true;
    }
    match (from, to) {
        (P::Idle | P::Prompt | P::Complete | P::Error, P::Error) => false,
        (_, P::Error) => true,
        (P::Error, P::ResyncWait | P::Restoring) => true,
        // Cancellation / user decline resets to idle from anywhere.
        (_, P::Idle) => true,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// The five user-visible migration steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    Backup,
    Install,
    Resync,
    Restore,
    Verify,
}

impl MigrationStep {
    /// All steps in display order.
    pub const ALL: [MigrationStep; 5] = [
        MigrationStep::Backup,
        MigrationStep::Install,
        MigrationStep::Resync,
        MigrationStep::Restore,
        MigrationStep::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Install => "install",
            Self::Resync => "resync",
            Self::Restore => "restore",
            Self::Verify => "verify",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "backup" => Some(Self::Backup),
            "install" => Some(Self::Install),
            "resync" => Some(Self::Resync),
            "restore" => Some(Self::Restore),
            "verify" => Some(Self::Verify),
            _ => None,
        }
    }

    /// Zero-based position in display order.
    pub fn order(&self) -> usize {
        match self {
            Self::Backup => 0,
            Self::Install => 1,
            Self::Resync => 2,
            Self::Restore => 3,
            Self::Verify => 4,
        }
    }
}

impl std::fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Done,
    Warning,
    Error,
}

/// Derive the status of every step from the current phase.
///
/// `error_step` is the failing step tag when `phase` is `Error`;
/// `warning_steps` are steps that finished with retained warnings
/// (partial restore, verify mismatches) and surface as `Warning` once
/// they are no longer active.
pub fn step_list(
    phase: MigrationPhase,
    error_step: Option<MigrationStep>,
    warning_steps: &[MigrationStep],
) -> Vec<(MigrationStep, StepStatus)> {
    // The boundary below which steps are finished, and the step that is
    // currently running, as (finished_before, active).
    let (finished_before, active) = match phase {
        MigrationPhase::Idle | MigrationPhase::Prompt => (0, None),
        MigrationPhase::Complete => (MigrationStep::ALL.len(), None),
        MigrationPhase::Error => {
            let failed = error_step.map(|s| s.order()).unwrap_or(0);
            (failed, None)
        }
        other => {
            // Unwrap is fine: every remaining phase maps onto a step.
            let step = other.step().expect("non-terminal phase has a step");
            (step.order(), Some(step))
        }
    };

    MigrationStep::ALL
        .iter()
        .map(|&step| {
            let status = if phase == MigrationPhase::Error && error_step == Some(step) {
                StepStatus::Error
            } else if Some(step) == active {
                StepStatus::Active
            } else if step.order() < finished_before {
                if warning_steps.contains(&step) {
                    StepStatus::Warning
                } else {
                    StepStatus::Done
                }
            } else {
                StepStatus::Pending
            };
            (step, status)
        })
        .collect()
}
