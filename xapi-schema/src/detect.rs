//! Detection rules: infer a concrete field type from an undeclared scalar
//! value, applied only when the schema has detection enabled for that
//! category and no explicit type was declared.

use crate::field_spec::ConcreteType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use xapi_uuid::Uuid;

// `YYYY-MM-DD` with an optional `THH:MM:SS[.fff][Z|±HH:MM]` tail.
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?$").unwrap()
});

static TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?$").unwrap());

static TIMEDELTA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?$").unwrap());

/// A "text" character forbidden from falling through to `keyword`: any
/// uppercase letter, or any of the reserved DSL/range punctuation.
fn is_keyword_like(s: &str) -> bool {
    s.chars().any(|c| c.is_uppercase()) || s.contains(['{', '}', '[', ']', '<', '>', '@', '#', '$', '%', '^', '&', '*'])
}

/// Detection flags toggled per schema/field; each gates one detection rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectionFlags {
    pub date: bool,
    pub time: bool,
    pub numeric: bool,
    pub geo: bool,
    pub bool_: bool,
    pub text: bool,
    pub term: bool,
    pub uuid: bool,
}

impl Default for DetectionFlags {
    fn default() -> Self {
        DetectionFlags {
            date: true,
            time: true,
            numeric: true,
            geo: true,
            bool_: true,
            text: true,
            term: true,
            uuid: true,
        }
    }
}

/// Detects the concrete type of an undeclared scalar, returning `None`
/// when nothing in `flags` matches (the caller then falls back to
/// `keyword`/`text` per the string-shape rule, or errors in strict mode).
pub fn detect_scalar(value: &Value, flags: &DetectionFlags) -> Option<ConcreteType> {
    match value {
        Value::Bool(_) if flags.bool_ => Some(ConcreteType::Boolean),
        Value::Number(n) if flags.numeric => {
            if n.is_u64() {
                Some(ConcreteType::Positive)
            } else if n.is_i64() {
                Some(ConcreteType::Integer)
            } else {
                Some(ConcreteType::Float)
            }
        }
        Value::String(s) => detect_string(s, flags),
        _ => None,
    }
}

fn detect_string(s: &str, flags: &DetectionFlags) -> Option<ConcreteType> {
    if flags.date && DATE_RE.is_match(s) {
        return Some(ConcreteType::Date);
    }
    if flags.time && TIME_RE.is_match(s) {
        return Some(ConcreteType::Time);
    }
    if flags.time && TIMEDELTA_RE.is_match(s) {
        return Some(ConcreteType::TimeDelta);
    }
    if flags.uuid && Uuid::is_valid(s) {
        return Some(ConcreteType::Uuid);
    }
    if flags.term && is_keyword_like(s) {
        return Some(ConcreteType::Keyword);
    }
    if flags.text {
        Some(ConcreteType::Text)
    } else {
        Some(ConcreteType::Keyword)
    }
}

/// Recognises a map carrying the reserved geometry tags (`_point`,
/// `_circle`, `_polygon`, `_chull`, `_multipoint`, ...) as a geo field.
pub fn is_geo_object(map: &serde_json::Map<String, Value>) -> bool {
    const GEO_TAGS: &[&str] =
        &["_point", "_circle", "_polygon", "_chull", "_multipoint", "_multicircle", "_multipolygon", "_multichull", "_geo_collection", "_geo_intersection"];
    map.keys().any(|k| GEO_TAGS.contains(&k.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_date_and_time() {
        let flags = DetectionFlags::default();
        assert_eq!(detect_string("2020-05-01", &flags), Some(ConcreteType::Date));
        assert_eq!(detect_string("2020-05-01T10:20:30", &flags), Some(ConcreteType::Date));
        assert_eq!(detect_string("10:20:30", &flags), Some(ConcreteType::Time));
        assert_eq!(detect_string("+02:00", &flags), Some(ConcreteType::TimeDelta));
    }

    #[test]
    fn detects_uuid() {
        let flags = DetectionFlags::default();
        assert_eq!(
            detect_string("550e8400-e29b-11d4-a716-446655440000", &flags),
            Some(ConcreteType::Uuid)
        );
    }

    #[test]
    fn uppercase_or_symbol_strings_are_keyword() {
        let flags = DetectionFlags::default();
        assert_eq!(detect_string("Alice", &flags), Some(ConcreteType::Keyword));
        assert_eq!(detect_string("plain lowercase text", &flags), Some(ConcreteType::Text));
    }

    #[test]
    fn detects_numeric_kind() {
        let flags = DetectionFlags::default();
        assert_eq!(detect_scalar(&serde_json::json!(5u64), &flags), Some(ConcreteType::Positive));
        assert_eq!(detect_scalar(&serde_json::json!(-5i64), &flags), Some(ConcreteType::Integer));
        assert_eq!(detect_scalar(&serde_json::json!(5.5), &flags), Some(ConcreteType::Float));
    }
}
