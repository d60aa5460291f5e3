//! Firmware version parsing and zone-schema migration gating.
//!
//! Certain firmware releases replace rectangular zone entities with
//! polygon zone entities. Crossing that release requires the full
//! backup/restore migration; staying on the same side of it is a plain
//! update. The threshold is model-specific and can be overridden by an
//! explicit flag on the update manifest.

use serde::{Deserialize, Serialize};

/// Per-model firmware versions at which rectangular-zone support is
/// removed. Updating from below to at-or-above one of these requires
/// the zone migration.
const ZONE_SCHEMA_THRESHOLDS: &[(&str, &str)] = &[
    ("presence-lite", "1.2.0"),
    ("presence-one", "2.4.0"),
];

/// Where a device's configuration schema came from.
///
/// `Inferred` means the schema was guessed from observed entities rather
/// than declared by the device; firmware updates are blocked entirely in
/// that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Entities,
    Inferred,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entities => "entities",
            Self::Inferred => "inferred",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "entities" => Some(Self::Entities),
            "inferred" => Some(Self::Inferred),
            _ => None,
        }
    }

    /// Updates are allowed only for declared (entity-backed) schemas.
    pub fn allows_updates(&self) -> bool {
        matches!(self, Self::Entities)
    }
}

/// A dotted-numeric firmware version, compared componentwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    parts: [u32; 3],
}

impl FirmwareVersion {
    /// Parse a version string leniently: an optional leading `v`,
    /// up to three dotted numeric components (missing components are 0),
    /// and any pre-release suffix after `-` or `+` ignored.
    ///
    /// Returns `None` when the first component is not numeric.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix(|c| c == 'v' || c == 'V').unwrap_or(s);
        let numeric = s.split(['-', '+']).next().unwrap_or(s);

        let mut parts = [0u32; 3];
        for (i, component) in numeric.split('.').take(3).enumerate() {
            match component.parse() {
                Ok(n) => parts[i] = n,
                Err(_) if i == 0 => return None,
                // A trailing junk component ("1.2.x") reads as 0.
                Err(_) => parts[i] = 0,
            }
        }
        Some(Self { parts })
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.parts[0], self.parts[1], self.parts[2])
    }
}

/// The zone-schema threshold for a model, if it has one.
pub fn zone_schema_threshold(model: &str) -> Option<FirmwareVersion> {
    ZONE_SCHEMA_THRESHOLDS
        .iter()
        .find(|(m, _)| *m == model)
        .and_then(|(_, v)| FirmwareVersion::parse(v))
}

/// Whether updating `model` from `current` to `target` crosses the
/// zone-schema threshold and therefore needs the full migration.
///
/// `manifest_flag` is the update manifest's explicit `migration` field;
/// when present it overrides the threshold table. Unparseable versions
/// never trigger a migration.
pub fn migration_required(
    model: &str,
    current: &str,
    target: &str,
    manifest_flag: Option<bool>,
) -> bool {
    if let Some(flag) = manifest_flag {
        return flag;
    }

    let Some(threshold) = zone_schema_threshold(model) else {
        return false;
    };
    let (Some(current), Some(target)) =
        (FirmwareVersion::parse(current), FirmwareVersion::parse(target))
    else {
        return false;
    };

    current < threshold && target >= threshold
}
