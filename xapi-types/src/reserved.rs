//! Reserved field names. Any leaf key starting with `_` that
//! is not in one of these lists is rejected by the schema service.

/// Reserved words recognised on a field spec object (`_type`, `_index`,
/// detection toggles, etc).
pub const SCHEMA_WORDS: &[&str] = &[
    "weight",
    "position",
    "spelling",
    "positions",
    "language",
    "accuracy",
    "accuracy_prefix",
    "store",
    "type",
    "dynamic",
    "strict",
    "bool_term",
    "value",
    "slot",
    "index",
    "prefix",
    "chai",
    "script",
    "name",
    "body",
    "hash",
    "body_hash",
    "params",
    "recurse",
    "namespace",
    "partial_paths",
    "index_uuid_field",
    "schema",
    "endpoint",
    // detection toggles
    "date_detection",
    "time_detection",
    "timedelta_detection",
    "numeric_detection",
    "geo_detection",
    "bool_detection",
    "text_detection",
    "term_detection",
    "uuid_detection",
    // text-only
    "stop_strategy",
    "stem_strategy",
    "stem_language",
    // geo-only
    "partials",
    "error",
];

/// Reserved words only meaningful at the schema root.
pub const ROOT_WORDS: &[&str] = &["values", "terms", "data", "blob", "content_type"];

/// Explicit-cast type names recognised in `_type`.
pub const CAST_WORDS: &[&str] = &[
    "float",
    "positive",
    "integer",
    "boolean",
    "term",
    "keyword",
    "text",
    "string",
    "date",
    "time",
    "timedelta",
    "uuid",
    "ewkt",
    "point",
    "circle",
    "convex",
    "polygon",
    "chull",
    "multipoint",
    "multicircle",
    "multiconvex",
    "multipolygon",
    "multichull",
    "geometrycollection",
    "geometryintersection",
];

pub const ID_FIELD_NAME: &str = "_id";
pub const VERSION_FIELD_NAME: &str = "_version";
pub const SCHEMA_FIELD_NAME: &str = "schema";

/// True if `name` is a recognised reserved underscore-prefixed word.
/// Unknown underscore-prefixed names outside of this set are rejected
/// by the schema service.
pub fn is_reserved(name: &str) -> bool {
    let Some(stripped) = name.strip_prefix('_') else {
        return false;
    };
    if stripped == "id" || stripped == "version" {
        return true;
    }
    SCHEMA_WORDS.contains(&stripped) || ROOT_WORDS.contains(&stripped) || CAST_WORDS.contains(&stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_known_words() {
        assert!(is_reserved("_id"));
        assert!(is_reserved("_type"));
        assert!(is_reserved("_date_detection"));
        assert!(is_reserved("_uuid"));
    }

    #[test]
    fn rejects_unknown_underscore_words() {
        assert!(!is_reserved("_bogus"));
        assert!(!is_reserved("name"));
    }
}
