//! Pure domain logic for the presence-sensor manager.
//!
//! This crate contains no database dependencies and no I/O; everything
//! here is evaluated against pre-loaded data passed in by the caller.

pub mod firmware;
pub mod phase;
pub mod progress;
pub mod types;
pub mod zones;
