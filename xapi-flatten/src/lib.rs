//! Flattens a nested JSON object into a map from dotted path to either a
//! scalar or an array of scalars collected from that path, the way the
//! schema service walks a document to resolve each leaf's [`FieldSpec`]
//! by its full dotted path.
//!
//! [`FieldSpec`]: https://docs.rs/xapi-schema

use serde_json::{Map, Value};

pub fn flatten(json: &Map<String, Value>) -> Map<String, Value> {
    flatten_with_leaf(json, |_| false)
}

/// Like [`flatten`], but `is_leaf` marks nested objects (e.g. a geo
/// field's reserved-tag map) that must be kept intact at their path
/// rather than recursed into.
pub fn flatten_with_leaf(
    json: &Map<String, Value>,
    is_leaf: impl Fn(&Map<String, Value>) -> bool + Copy,
) -> Map<String, Value> {
    let mut obj = Map::new();
    let mut all_keys = vec![];
    insert_object(&mut obj, None, json, &mut all_keys, is_leaf);
    for key in all_keys {
        obj.entry(key).or_insert(Value::Array(vec![]));
    }
    obj
}

fn insert_object(
    base_json: &mut Map<String, Value>,
    base_key: Option<&str>,
    object: &Map<String, Value>,
    all_keys: &mut Vec<String>,
    is_leaf: impl Fn(&Map<String, Value>) -> bool + Copy,
) {
    for (key, value) in object {
        let new_key = base_key.map_or_else(|| key.clone(), |base_key| format!("{base_key}.{key}"));
        all_keys.push(new_key.clone());
        if let Some(object) = value.as_object().filter(|m| is_leaf(m)) {
            insert_value(base_json, &new_key, Value::Object(object.clone()));
        } else if let Some(array) = value.as_array() {
            insert_array(base_json, &new_key, array, all_keys, is_leaf);
        } else if let Some(object) = value.as_object() {
            insert_object(base_json, Some(&new_key), object, all_keys, is_leaf);
        } else {
            insert_value(base_json, &new_key, value.clone());
        }
    }
}

fn insert_array(
    base_json: &mut Map<String, Value>,
    base_key: &str,
    array: &[Value],
    all_keys: &mut Vec<String>,
    is_leaf: impl Fn(&Map<String, Value>) -> bool + Copy,
) {
    for value in array {
        if let Some(object) = value.as_object().filter(|m| is_leaf(m)) {
            insert_value(base_json, base_key, Value::Object(object.clone()));
        } else if let Some(object) = value.as_object() {
            insert_object(base_json, Some(base_key), object, all_keys, is_leaf);
        } else if let Some(sub_array) = value.as_array() {
            insert_array(base_json, base_key, sub_array, all_keys, is_leaf);
        } else {
            insert_value(base_json, base_key, value.clone());
        }
    }
}

fn insert_value(base_json: &mut Map<String, Value>, key: &str, to_insert: Value) {
    if let Some(value) = base_json.get_mut(key) {
        if let Some(array) = value.as_array_mut() {
            array.push(to_insert);
        } else {
            let value = std::mem::take(value);
            base_json[key] = Value::Array(vec![value, to_insert]);
        }
    } else {
        base_json.insert(key.to_string(), to_insert);
    }
}

/// Dotted path segments, in root-to-leaf order, for a flattened key.
pub fn path_segments(key: &str) -> impl Iterator<Item = &str> {
    key.split('.')
}

/// The final dotted-path segment (the field's own name).
pub fn leaf_segment(key: &str) -> &str {
    key.rsplit('.').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_object() {
        let mut base: Value = json!({
          "a": {
            "b": "c",
            "d": "e",
          }
        });
        let json = std::mem::take(base.as_object_mut().unwrap());
        let flat = flatten(&json);

        assert_eq!(
            &flat,
            json!({
                "a": [],
                "a.b": "c",
                "a.d": "e",
            })
            .as_object()
            .unwrap()
        );
    }

    #[test]
    fn flatten_array_of_scalars() {
        let mut base: Value = json!({ "tags": ["a", "b", "c"] });
        let json = std::mem::take(base.as_object_mut().unwrap());
        let flat = flatten(&json);
        assert_eq!(flat["tags"], json!(["a", "b", "c"]));
    }

    #[test]
    fn path_segments_splits_on_dot() {
        let segs: Vec<&str> = path_segments("a.b.c").collect();
        assert_eq!(segs, vec!["a", "b", "c"]);
    }

    #[test]
    fn leaf_objects_are_not_recursed_into() {
        let mut base: Value = json!({ "location": { "_point": { "_latitude": 1.0, "_longitude": 2.0 } } });
        let json = std::mem::take(base.as_object_mut().unwrap());
        let flat = flatten_with_leaf(&json, |m| m.contains_key("_point"));
        assert!(flat["location"].is_object());
        assert!(!flat.contains_key("location._point"));
    }

    #[test]
    fn leaf_segment_returns_last_component() {
        assert_eq!(leaf_segment("a.b.c"), "c");
        assert_eq!(leaf_segment("a"), "a");
    }
}
