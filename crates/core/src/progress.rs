//! Normalization of firmware update-entity state.
//!
//! The platform's update entities report progress in whatever shape the
//! underlying integration chose: a fraction in [0,1] or a percentage in
//! [0,100], as a JSON number or as a numeral embedded in a string.
//! Getting this wrong produces false completion signals, so the rules
//! here are deliberately exact and covered by tests.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Attribute keys checked for a progress value, in order.
const PROGRESS_KEYS: [&str; 2] = ["progress", "percentage"];

/// Attribute key carrying an explicit in-progress flag.
const IN_PROGRESS_KEY: &str = "in_progress";

/// Attribute key carrying the installed firmware version.
const INSTALLED_VERSION_KEY: &str = "installed_version";

/// Update-entity states that mean a flash is underway.
const ACTIVE_STATES: [&str; 2] = ["installing", "updating"];

fn numeral_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").unwrap())
}

/// Normalize a raw progress value to a percentage in [0,100].
///
/// Numbers are taken as-is; strings contribute their first embedded
/// numeral ("45%" -> 45). A value <= 1 is treated as a fraction and
/// scaled by 100, anything larger is already a percentage:
/// `0.45`, `45`, and `"45%"` all normalize to 45.
pub fn parse_progress(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => numeral_regex().find(s)?.as_str().parse().ok()?,
        _ => return None,
    };

    if raw <= 1.0 {
        Some(raw * 100.0)
    } else {
        Some(raw)
    }
}

/// Read the normalized progress percentage from update-entity attributes.
pub fn progress_percent(attributes: &Map<String, Value>) -> Option<f64> {
    PROGRESS_KEYS
        .iter()
        .find_map(|key| attributes.get(*key).and_then(parse_progress))
}

/// Whether the update entity reports a flash in progress.
///
/// True when the `in_progress` attribute is boolean true or the string
/// "true", or when the state itself (case-insensitive) is an active one.
pub fn is_in_progress(state: &str, attributes: &Map<String, Value>) -> bool {
    let explicit = match attributes.get(IN_PROGRESS_KEY) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    let state = state.to_ascii_lowercase();
    explicit || ACTIVE_STATES.contains(&state.as_str())
}

/// The installed firmware version, read from the one attribute that
/// carries it. Absent means unknown, never a guess from another field.
pub fn installed_version(attributes: &Map<String, Value>) -> Option<String> {
    attributes
        .get(INSTALLED_VERSION_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn fraction_number_string_all_normalize_to_45() {
        assert_eq!(parse_progress(&json!(0.45)), Some(45.0));
        assert_eq!(parse_progress(&json!(45)), Some(45.0));
        assert_eq!(parse_progress(&json!("45%")), Some(45.0));
    }

    #[test]
    fn one_is_a_fraction_and_zero_stays_zero() {
        assert_eq!(parse_progress(&json!(1)), Some(100.0));
        assert_eq!(parse_progress(&json!(0)), Some(0.0));
        assert_eq!(parse_progress(&json!(100)), Some(100.0));
    }

    #[test]
    fn string_numeral_embedded_in_text() {
        assert_eq!(parse_progress(&json!("progress: 72.5 of 100")), Some(72.5));
        assert_eq!(parse_progress(&json!("0.3")), Some(30.0));
        assert_eq!(parse_progress(&json!("no digits here")), None);
    }

    #[test]
    fn non_numeric_values_are_unknown() {
        assert_eq!(parse_progress(&json!(null)), None);
        assert_eq!(parse_progress(&json!(true)), None);
        assert_eq!(parse_progress(&json!({"pct": 5})), None);
    }

    #[test]
    fn progress_percent_prefers_progress_key() {
        let a = attrs(json!({"progress": 0.5, "percentage": 80}));
        assert_eq!(progress_percent(&a), Some(50.0));
        let a = attrs(json!({"percentage": 80}));
        assert_eq!(progress_percent(&a), Some(80.0));
    }

    #[test]
    fn explicit_in_progress_attribute_counts() {
        let a = attrs(json!({"in_progress": true}));
        assert!(is_in_progress("idle", &a));
        let a = attrs(json!({"in_progress": "True"}));
        assert!(is_in_progress("idle", &a));
        // Explicit false does not suppress an active state.
        let a = attrs(json!({"in_progress": false}));
        assert!(is_in_progress("Installing", &a));
        assert!(!is_in_progress("idle", &a));
    }

    #[test]
    fn active_state_implies_in_progress() {
        let empty = Map::new();
        assert!(is_in_progress("Installing", &empty));
        assert!(is_in_progress("UPDATING", &empty));
        assert!(!is_in_progress("idle", &empty));
        assert!(!is_in_progress("off", &empty));
    }

    #[test]
    fn installed_version_from_named_attribute_only() {
        let a = attrs(json!({"installed_version": "1.3.0", "latest_version": "9.9.9"}));
        assert_eq!(installed_version(&a), Some("1.3.0".to_string()));
        let a = attrs(json!({"version": "1.3.0"}));
        assert_eq!(installed_version(&a), None);
    }
}
