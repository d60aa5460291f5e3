//! Collaborator boundary to the home-automation platform.
//!
//! Everything outside the migration core -- entity state, device
//! readiness, zone entities, firmware endpoints, entity discovery -- is
//! reached through the [`PlatformClient`] trait. The orchestrator and
//! its tests program against the trait; [`http::HttpPlatformClient`] is
//! the production implementation.

pub mod client;
pub mod http;
pub mod types;

pub use client::{PlatformClient, PlatformError};
pub use http::HttpPlatformClient;
