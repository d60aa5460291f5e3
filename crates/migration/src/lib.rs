//! Firmware update and zone-migration orchestrator.
//!
//! Drives a device through firmware installation and, when the target
//! release replaces rectangular zones with polygon zones, through the
//! full backup -> install -> resync -> restore -> verify migration.
//! Progress is persisted per device so an interrupted session resumes
//! where it left off.

pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod readiness;
pub mod resync;
pub mod snapshot;
pub mod store;
pub mod update;

pub use coordinator::{MigrationConfig, MigrationSession, SessionRegistry, StartOutcome};
pub use error::MigrationError;
