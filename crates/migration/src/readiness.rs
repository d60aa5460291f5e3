//! Parameterized readiness polling.
//!
//! Two waits in the migration share this loop: the post-reboot wait for
//! the profile's full entity set, and the post-resync wait for exactly
//! the polygon zone entities a restore needs. Each probe is a pure read
//! via the platform, safe on a tight interval; the requirement, budget,
//! and interval are the only things that differ.

use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use presman_platform::types::{DeviceReadiness, ReadinessQuery};
use presman_platform::PlatformClient;

use crate::error::MigrationError;

/// Tunable parameters for one readiness wait.
pub struct ReadinessPoll {
    /// Fixed delay between probes.
    pub interval: Duration,
    /// Overall budget before the wait gives up.
    pub timeout: Duration,
}

impl ReadinessPoll {
    /// Post-reboot discovery wait: the profile's full entity set.
    pub fn discovery() -> Self {
        Self {
            interval: Duration::from_millis(2500),
            timeout: Duration::from_secs(120),
        }
    }

    /// Post-resync polygon wait: the zone entities a restore needs.
    pub fn polygon() -> Self {
        Self {
            interval: Duration::from_millis(2500),
            timeout: Duration::from_secs(90),
        }
    }
}

/// How a readiness wait ended, short of cancellation.
#[derive(Debug, Clone)]
pub enum ReadyOutcome {
    /// Every checked entity reported an available state.
    Ready(DeviceReadiness),
    /// A manual short-circuit skipped the rest of the wait.
    Skipped,
    /// The budget elapsed without the device becoming ready.
    TimedOut,
}

/// Poll `fetch_device_readiness` until ready, skipped, timed out, or
/// cancelled.
///
/// `skip` is an optional manual short-circuit (the "start now" action
/// during the resync wait). Probe transport errors are tolerated -- the
/// device may still be rebooting -- and only the budget ends the loop.
pub async fn wait_until_ready(
    platform: &dyn PlatformClient,
    device_id: &str,
    query: &ReadinessQuery,
    poll: &ReadinessPoll,
    cancel: &CancellationToken,
    skip: Option<&Notify>,
) -> Result<ReadyOutcome, MigrationError> {
    let started = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        if started.elapsed() >= poll.timeout {
            tracing::warn!(device_id, ?query, "Readiness wait timed out");
            return Ok(ReadyOutcome::TimedOut);
        }

        match platform.fetch_device_readiness(device_id, query).await {
            Ok(readiness) => {
                tracing::debug!(
                    device_id,
                    ready = readiness.ready,
                    available = readiness.available_entity_count,
                    checked = readiness.checked_entity_ids.len(),
                    "Readiness probe",
                );
                if readiness.ready {
                    return Ok(ReadyOutcome::Ready(readiness));
                }
            }
            Err(e) => {
                tracing::debug!(device_id, error = %e, "Readiness probe failed");
            }
        }

        match skip {
            Some(notify) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
                    _ = notify.notified() => {
                        tracing::info!(device_id, "Readiness wait skipped manually");
                        return Ok(ReadyOutcome::Skipped);
                    }
                    _ = tokio::time::sleep(poll.interval) => {}
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
                    _ = tokio::time::sleep(poll.interval) => {}
                }
            }
        }
    }
}
