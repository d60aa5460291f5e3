//! HTTP surface for the presence-sensor manager's migration core.
//!
//! Thin axum layer: request validation, error mapping, and the session
//! registry's action hooks. All domain behaviour lives in the
//! `presman-migration` crate.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod state;
