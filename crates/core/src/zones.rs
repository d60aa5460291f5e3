//! Detection zone geometry, slot renumbering, and restore planning.
//!
//! Sensor firmware exposes detection zones either as axis-aligned
//! rectangles (legacy) or as polygons (current). This module holds the
//! conversion between the two and the slot-renumbering rules applied when
//! a rectangular backup is restored onto polygon firmware. Evaluation is
//! pure; fetching zones from a device is the caller's job.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default per-profile cap on regular detection zones.
pub const DEFAULT_MAX_ZONES: usize = 4;

/// Default per-profile cap on exclusion zones.
pub const DEFAULT_MAX_EXCLUSION_ZONES: usize = 2;

/// Default per-profile cap on entry zones.
pub const DEFAULT_MAX_ENTRY_ZONES: usize = 2;

/// Coordinate tolerance (device length units) when comparing restored
/// polygons against the expected set.
pub const VERTEX_TOLERANCE: i32 = 1;

// ---------------------------------------------------------------------------
// Zone type
// ---------------------------------------------------------------------------

/// The three kinds of detection zone a sensor profile can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Regular,
    Exclusion,
    Entry,
}

impl ZoneType {
    /// All zone types, in the order restore writes them.
    pub const ALL: [ZoneType; 3] = [ZoneType::Regular, ZoneType::Exclusion, ZoneType::Entry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Exclusion => "exclusion",
            Self::Entry => "entry",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "regular" => Some(Self::Regular),
            "exclusion" => Some(Self::Exclusion),
            "entry" => Some(Self::Entry),
            _ => None,
        }
    }

    /// The word used in slot ids: "Zone 1", "Exclusion 2", "Entry 1".
    pub fn slot_label(&self) -> &'static str {
        match self {
            Self::Regular => "Zone",
            Self::Exclusion => "Exclusion",
            Self::Entry => "Entry",
        }
    }

    /// Render the slot id for a 1-based slot index.
    pub fn slot_id(&self, slot: usize) -> String {
        format!("{} {slot}", self.slot_label())
    }
}

impl std::fmt::Display for ZoneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

/// A single polygon vertex in device length units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: i32,
    pub y: i32,
}

/// A legacy rectangular zone as read from a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRect {
    /// Slot-encoded id, e.g. "Zone 1" or "Exclusion 2".
    pub id: String,
    pub zone_type: ZoneType,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ZoneRect {
    /// A rect is usable only with strictly positive extent. Degenerate
    /// rects are dropped silently before any migration step.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// The 1-based slot index embedded in the id, or 0 if none.
    pub fn slot(&self) -> usize {
        slot_index(&self.id)
    }
}

/// A polygon zone as written to (and read back from) current firmware.
///
/// Vertices are an ordered ring, closed implicitly -- the last point is
/// not repeated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonePolygon {
    /// Slot-encoded id, same scheme as [`ZoneRect::id`].
    pub id: String,
    pub zone_type: ZoneType,
    pub vertices: Vec<Vertex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ZonePolygon {
    /// Key used to match expected polygons against device polygons.
    pub fn type_slot_key(&self) -> String {
        format!("{}:{}", self.zone_type.as_str(), self.id)
    }
}

/// Per-profile caps on how many zones of each type a restore or
/// verification step considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneLimits {
    pub max_zones: usize,
    pub max_exclusion_zones: usize,
    pub max_entry_zones: usize,
}

impl Default for ZoneLimits {
    fn default() -> Self {
        Self {
            max_zones: DEFAULT_MAX_ZONES,
            max_exclusion_zones: DEFAULT_MAX_EXCLUSION_ZONES,
            max_entry_zones: DEFAULT_MAX_ENTRY_ZONES,
        }
    }
}

impl ZoneLimits {
    pub fn limit_for(&self, zone_type: ZoneType) -> usize {
        match zone_type {
            ZoneType::Regular => self.max_zones,
            ZoneType::Exclusion => self.max_exclusion_zones,
            ZoneType::Entry => self.max_entry_zones,
        }
    }
}

/// Expected zone counts per type, used to wait for exactly the polygon
/// entities a restore will need.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneCounts {
    pub regular: usize,
    pub exclusion: usize,
    pub entry: usize,
}

// ---------------------------------------------------------------------------
// Slot parsing
// ---------------------------------------------------------------------------

fn slot_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

/// Extract the first numeral embedded in a slot id ("Exclusion 2" -> 2).
///
/// Ids without a numeral sort first within their type group (slot 0).
pub fn slot_index(id: &str) -> usize {
    slot_regex()
        .find(id)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Rect -> polygon conversion
// ---------------------------------------------------------------------------

/// Convert a rectangular zone into its polygon successor.
///
/// Vertices run clockwise in device coordinates starting at the top-left
/// corner: (x,y), (x+w,y), (x+w,y+h), (x,y+h).
pub fn rect_to_polygon(rect: &ZoneRect) -> ZonePolygon {
    ZonePolygon {
        id: rect.id.clone(),
        zone_type: rect.zone_type,
        vertices: vec![
            Vertex { x: rect.x, y: rect.y },
            Vertex { x: rect.x + rect.width, y: rect.y },
            Vertex { x: rect.x + rect.width, y: rect.y + rect.height },
            Vertex { x: rect.x, y: rect.y + rect.height },
        ],
        enabled: rect.enabled,
        label: rect.label.clone(),
    }
}

// ---------------------------------------------------------------------------
// Restore planning
// ---------------------------------------------------------------------------

/// Compute the polygon set a backup restores to, with slots renumbered.
///
/// Backup rects are grouped by type, sorted by the numeral embedded in
/// their original id, truncated to the profile limit for that type, and
/// re-indexed sequentially from 1 regardless of original slot numbers --
/// a backup containing only "Exclusion 2" restores into "Exclusion 1".
/// Invalid rects are dropped before planning. Verification recomputes
/// this same plan, so both sides agree on the final slot ids.
pub fn plan_restore(zones: &[ZoneRect], limits: &ZoneLimits) -> Vec<ZonePolygon> {
    let mut plan = Vec::new();

    for zone_type in ZoneType::ALL {
        let mut group: Vec<&ZoneRect> = zones
            .iter()
            .filter(|z| z.zone_type == zone_type && z.is_valid())
            .collect();
        group.sort_by_key(|z| z.slot());
        group.truncate(limits.limit_for(zone_type));

        for (i, rect) in group.iter().enumerate() {
            let mut polygon = rect_to_polygon(rect);
            polygon.id = zone_type.slot_id(i + 1);
            plan.push(polygon);
        }
    }

    plan
}

/// Count planned zones per type (caps already applied by [`plan_restore`]).
pub fn plan_counts(plan: &[ZonePolygon]) -> ZoneCounts {
    let mut counts = ZoneCounts::default();
    for polygon in plan {
        match polygon.zone_type {
            ZoneType::Regular => counts.regular += 1,
            ZoneType::Exclusion => counts.exclusion += 1,
            ZoneType::Entry => counts.entry += 1,
        }
    }
    counts
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Whether two polygons agree within [`VERTEX_TOLERANCE`] per coordinate.
///
/// Vertex order matters: restored polygons are written in a fixed winding,
/// so an order mismatch is a real mismatch.
pub fn polygons_match(expected: &ZonePolygon, actual: &ZonePolygon) -> bool {
    if expected.vertices.len() != actual.vertices.len() {
        return false;
    }
    expected
        .vertices
        .iter()
        .zip(actual.vertices.iter())
        .all(|(e, a)| {
            (e.x - a.x).abs() <= VERTEX_TOLERANCE && (e.y - a.y).abs() <= VERTEX_TOLERANCE
        })
}

/// Count expected polygons that are missing from, or mismatched on, the
/// device. `actual` is keyed by `type:id` (see
/// [`ZonePolygon::type_slot_key`]).
pub fn count_mismatches(expected: &[ZonePolygon], actual: &[ZonePolygon]) -> usize {
    let by_key: HashMap<String, &ZonePolygon> = actual
        .iter()
        .map(|p| (p.type_slot_key(), p))
        .collect();

    expected
        .iter()
        .filter(|e| match by_key.get(&e.type_slot_key()) {
            Some(a) => !polygons_match(e, a),
            None => true,
        })
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
