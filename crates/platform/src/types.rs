//! DTOs exchanged with the home-automation platform.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use presman_core::firmware::ConfigSource;

/// Entity states the platform reports when an entity is not usable.
pub const STATE_UNAVAILABLE: &str = "unavailable";
pub const STATE_UNKNOWN: &str = "unknown";

/// A single entity's state and attribute map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    /// Readiness: a concrete state, neither "unavailable" nor "unknown".
    pub fn is_available(&self) -> bool {
        self.state != STATE_UNAVAILABLE && self.state != STATE_UNKNOWN
    }
}

/// Transient snapshot of a device's firmware update entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEntityStatus {
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// How a device's configuration schema was obtained.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfigInfo {
    pub config_source: ConfigSource,
}

/// One installable firmware update offered for a device.
#[derive(Debug, Clone, Deserialize)]
pub struct AvailableUpdate {
    pub current_version: String,
    pub new_version: String,
    /// Explicit migration flag from the update manifest; absent means
    /// the model/version threshold table decides.
    #[serde(default)]
    pub migration: Option<bool>,
}

/// Result of preparing a firmware manifest for a device.
#[derive(Debug, Clone, Deserialize)]
pub struct PreparedFirmware {
    /// Opaque token passed back when triggering the installation.
    pub token: String,
    /// The firmware version the manifest resolves to.
    pub version: String,
}

/// Which entity subset a readiness probe checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "require")]
pub enum ReadinessRequirement {
    /// All entities the profile expects (post-reboot discovery).
    Discovery,
    /// Exactly the polygon zone entities a restore will need.
    Polygon {
        regular: usize,
        exclusion: usize,
        entry: usize,
    },
}

/// Parameters for a single readiness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessQuery {
    #[serde(flatten)]
    pub requirement: ReadinessRequirement,
    pub profile_id: String,
    pub entity_prefix: String,
}

/// Result of a readiness probe. A pure read; safe on a tight interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceReadiness {
    /// True iff every checked entity reports an available state.
    pub ready: bool,
    pub checked_entity_ids: Vec<String>,
    pub available_entity_count: usize,
}

/// A persisted device-to-entity mapping produced by entity discovery.
///
/// Discovery itself is a platform concern; the orchestrator only needs
/// the fact that a mapping exists and was saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMapping {
    pub device_id: String,
    pub profile_id: String,
    /// Matched entity ids keyed by template slot.
    pub entities: Map<String, Value>,
}
