//! An RFC 6902-style patch processor (`add`/`remove`/`replace`/`move`/
//! `copy`/`test`) extended with numeric `incr`/`decr` operations bounded by
//! an optional limit, operating over RFC 6901 JSON-pointer paths.

use serde::Deserialize;
use serde_json::Value;
use xapi_types::{Error, Result};

/// One entry of a patch document: `{op, path, from?, value?, limit?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub limit: Option<f64>,
}

/// Applies `ops` to `doc` in order, mutating it in place. On the first
/// failing operation, `doc` may be left partially mutated — callers that
/// need atomicity should clone `doc` first.
pub fn apply(doc: &mut Value, ops: &[PatchOp]) -> Result<()> {
    for op in ops {
        apply_one(doc, op)?;
    }
    Ok(())
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<()> {
    match op.op.as_str() {
        "add" => {
            let value = op
                .value
                .clone()
                .ok_or_else(|| Error::client("add requires a value"))?;
            add(doc, &tokens(&op.path)?, value)
        }
        "remove" => {
            remove(doc, &tokens(&op.path)?)?;
            Ok(())
        }
        "replace" => {
            let value = op
                .value
                .clone()
                .ok_or_else(|| Error::client("replace requires a value"))?;
            replace(doc, &tokens(&op.path)?, value)
        }
        "move" => {
            let from = op.from.as_deref().ok_or_else(|| Error::client("move requires from"))?;
            let from_tokens = tokens(from)?;
            let path_tokens = tokens(&op.path)?;
            let moved = remove(doc, &from_tokens)?;
            add(doc, &path_tokens, moved)
        }
        "copy" => {
            let from = op.from.as_deref().ok_or_else(|| Error::client("copy requires from"))?;
            let value = get(doc, &tokens(from)?)?.clone();
            add(doc, &tokens(&op.path)?, value)
        }
        "test" => {
            let expected = op
                .value
                .clone()
                .ok_or_else(|| Error::client("test requires a value"))?;
            let actual = get(doc, &tokens(&op.path)?)?;
            if *actual == expected {
                Ok(())
            } else {
                Err(Error::client("patch test operation failed"))
            }
        }
        "incr" => apply_delta(doc, op, 1.0),
        "decr" => apply_delta(doc, op, -1.0),
        other => Err(Error::client(format!("unknown patch operation: {other}"))),
    }
}

fn apply_delta(doc: &mut Value, op: &PatchOp, sign: f64) -> Result<()> {
    let delta = op
        .value
        .as_ref()
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::client("incr/decr requires a numeric value"))? * sign;
    let tokens = tokens(&op.path)?;
    let current = get(doc, &tokens)?
        .as_f64()
        .ok_or_else(|| Error::client("incr/decr target is not numeric"))?;
    let updated = current + delta;
    if let Some(limit) = op.limit {
        let crossed = if delta >= 0.0 { updated > limit } else { updated < limit };
        if crossed {
            return Err(Error::Limit(format!(
                "incr/decr would cross limit {limit} (from {current} by {delta})"
            )));
        }
    }
    replace(doc, &tokens, json_number(updated))
}

fn json_number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (1i64 << 53) as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Splits and unescapes an RFC 6901 pointer. The empty pointer denotes the
/// whole document, which every operation here rejects.
fn tokens(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Err(Error::client("patch path must not be empty"));
    }
    if !path.starts_with('/') {
        return Err(Error::client("patch path must start with '/'"));
    }
    Ok(path[1..].split('/').map(unescape_token).collect())
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn get<'a>(doc: &'a Value, tokens: &[String]) -> Result<&'a Value> {
    let mut current = doc;
    for token in tokens {
        current = index(current, token)?;
    }
    Ok(current)
}

fn index<'a>(value: &'a Value, token: &str) -> Result<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(token)
            .ok_or_else(|| Error::NotFound(format!("no member '{token}' at this path"))),
        Value::Array(arr) => {
            let idx: usize = token
                .parse()
                .map_err(|_| Error::client(format!("'{token}' is not a valid array index")))?;
            arr.get(idx)
                .ok_or_else(|| Error::NotFound(format!("index {idx} out of bounds")))
        }
        _ => Err(Error::client("cannot descend into a scalar value")),
    }
}

fn add(doc: &mut Value, tokens: &[String], value: Value) -> Result<()> {
    let (parent_tokens, last) = tokens.split_at(tokens.len() - 1);
    let last = &last[0];
    let parent = navigate_mut(doc, parent_tokens)?;
    match parent {
        Value::Object(map) => {
            map.insert(unescape_token(last), value);
            Ok(())
        }
        Value::Array(arr) => {
            if last == "-" {
                arr.push(value);
            } else {
                let idx: usize = last
                    .parse()
                    .map_err(|_| Error::client(format!("'{last}' is not a valid array index")))?;
                if idx > arr.len() {
                    return Err(Error::client("array index out of bounds for add"));
                }
                arr.insert(idx, value);
            }
            Ok(())
        }
        _ => Err(Error::client("cannot add into a scalar value")),
    }
}

fn replace(doc: &mut Value, tokens: &[String], value: Value) -> Result<()> {
    let (parent_tokens, last) = tokens.split_at(tokens.len() - 1);
    let last = &last[0];
    let parent = navigate_mut(doc, parent_tokens)?;
    match parent {
        Value::Object(map) => {
            if !map.contains_key(last) {
                return Err(Error::NotFound(format!("no member '{last}' at this path")));
            }
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(arr) => {
            let idx: usize = last
                .parse()
                .map_err(|_| Error::client(format!("'{last}' is not a valid array index")))?;
            let slot = arr
                .get_mut(idx)
                .ok_or_else(|| Error::NotFound(format!("index {idx} out of bounds")))?;
            *slot = value;
            Ok(())
        }
        _ => Err(Error::client("cannot replace into a scalar value")),
    }
}

fn remove(doc: &mut Value, tokens: &[String]) -> Result<Value> {
    let (parent_tokens, last) = tokens.split_at(tokens.len() - 1);
    let last = &last[0];
    let parent = navigate_mut(doc, parent_tokens)?;
    match parent {
        Value::Object(map) => map
            .remove(last)
            .ok_or_else(|| Error::NotFound(format!("no member '{last}' at this path"))),
        Value::Array(arr) => {
            let idx: usize = last
                .parse()
                .map_err(|_| Error::client(format!("'{last}' is not a valid array index")))?;
            if idx >= arr.len() {
                return Err(Error::NotFound(format!("index {idx} out of bounds")));
            }
            Ok(arr.remove(idx))
        }
        _ => Err(Error::client("cannot remove from a scalar value")),
    }
}

fn navigate_mut<'a>(doc: &'a mut Value, tokens: &[String]) -> Result<&'a mut Value> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| Error::NotFound(format!("no member '{token}' at this path")))?,
            Value::Array(arr) => {
                let idx: usize = token
                    .parse()
                    .map_err(|_| Error::client(format!("'{token}' is not a valid array index")))?;
                arr.get_mut(idx)
                    .ok_or_else(|| Error::NotFound(format!("index {idx} out of bounds")))?
            }
            _ => return Err(Error::client("cannot descend into a scalar value")),
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn ops(json_ops: Value) -> Vec<PatchOp> {
        serde_json::from_value(json_ops).unwrap()
    }

    #[test]
    fn add_replace_remove_round_trip() {
        let mut doc = json!({"x": [1, 2, 3]});
        apply(
            &mut doc,
            &ops(json!([
                {"op": "add", "path": "/x/-", "value": 4},
                {"op": "incr", "path": "/x/0", "value": 10, "limit": 100}
            ])),
        )
        .unwrap();
        assert_eq!(doc, json!({"x": [11, 2, 3, 4]}));
    }

    #[test]
    fn move_is_self_inverse() {
        let original = json!({"a": 1, "b": {}});
        let mut doc = original.clone();
        apply(&mut doc, &ops(json!([{"op": "move", "from": "/a", "path": "/b/a"}]))).unwrap();
        assert_eq!(doc, json!({"b": {"a": 1}}));
        apply(&mut doc, &ops(json!([{"op": "move", "from": "/b/a", "path": "/a"}]))).unwrap();
        assert_eq!(doc, json!({"a": 1, "b": {}}));
    }

    #[test]
    fn incr_then_decr_restores_value() {
        let mut doc = json!({"n": 5});
        apply(&mut doc, &ops(json!([{"op": "incr", "path": "/n", "value": 3}]))).unwrap();
        apply(&mut doc, &ops(json!([{"op": "decr", "path": "/n", "value": 3}]))).unwrap();
        assert_eq!(doc["n"], json!(5));
    }

    #[test]
    fn incr_rejects_crossing_limit() {
        let mut doc = json!({"n": 95});
        let err = apply(&mut doc, &ops(json!([{"op": "incr", "path": "/n", "value": 10, "limit": 100}])));
        assert!(err.is_err());
    }

    #[test]
    fn test_operation_fails_on_mismatch() {
        let mut doc = json!({"a": 1});
        let err = apply(&mut doc, &ops(json!([{"op": "test", "path": "/a", "value": 2}])));
        assert!(err.is_err());
    }

    #[test]
    fn rejects_empty_path() {
        let mut doc = json!({"a": 1});
        let err = apply(&mut doc, &ops(json!([{"op": "replace", "path": "", "value": 2}])));
        assert!(err.is_err());
    }

    #[test]
    fn unescapes_tilde_and_slash_in_pointer() {
        let mut doc = json!({"a/b": 1, "c~d": 2});
        apply(&mut doc, &ops(json!([{"op": "replace", "path": "/a~1b", "value": 9}]))).unwrap();
        apply(&mut doc, &ops(json!([{"op": "replace", "path": "/c~0d", "value": 10}]))).unwrap();
        assert_eq!(doc, json!({"a/b": 9, "c~d": 10}));
    }

    proptest::proptest! {
        /// Replacing `/n` is idempotent: applying it twice leaves the
        /// document exactly where applying it once did.
        #[test]
        fn replace_is_idempotent(start in -1_000_000i64..1_000_000, replacement in -1_000_000i64..1_000_000) {
            let mut doc = json!({"n": start});
            let op = ops(json!([{"op": "replace", "path": "/n", "value": replacement}]));
            apply(&mut doc, &op).unwrap();
            let once = doc.clone();
            apply(&mut doc, &op).unwrap();
            prop_assert_eq!(doc, once);
        }

        /// `incr` by `d` then `decr` by `d` restores the original value,
        /// for any unbounded (no `limit`) amount.
        #[test]
        fn incr_decr_round_trips(start in -1_000_000i64..1_000_000, delta in -1_000i64..1_000) {
            let mut doc = json!({"n": start});
            apply(&mut doc, &ops(json!([{"op": "incr", "path": "/n", "value": delta}]))).unwrap();
            apply(&mut doc, &ops(json!([{"op": "decr", "path": "/n", "value": delta}]))).unwrap();
            prop_assert_eq!(doc["n"].as_i64().unwrap(), start);
        }
    }
}
