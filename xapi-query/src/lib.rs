//! Compiles a JSON-like query DSL object into a [`tree::QueryNode`] tree
//! over a [`xapi_schema::Schema`]'s fields.

pub mod tree;

pub use tree::{CompiledQuery, QueryNode, SortDirection, SortSpec};

use serde_json::Value;
use xapi_schema::Schema;
use xapi_types::{Error, Result};

/// Compiles `dsl` against `schema`, extracting the `_sort`/`_offset`/
/// `_limit`/`_check_at_least` siblings into [`CompiledQuery`] and the rest
/// into a [`QueryNode`] tree.
pub fn compile(schema: &Schema, dsl: &Value) -> Result<CompiledQuery> {
    let mut out = CompiledQuery::default();
    let node = process(schema, "", dsl, &mut out)?;
    out.query = node;
    Ok(out)
}

fn process(schema: &Schema, path: &str, obj: &Value, out: &mut CompiledQuery) -> Result<Option<QueryNode>> {
    match obj {
        Value::Object(map) => {
            let mut parts = Vec::new();
            for (key, value) in map {
                if let Some(node) = dispatch(schema, path, key, value, out)? {
                    parts.push(node);
                }
            }
            Ok(combine_and(parts))
        }
        Value::Array(items) => {
            let mut parts = Vec::new();
            for item in items {
                if let Some(node) = process(schema, path, item, out)? {
                    parts.push(node);
                }
            }
            Ok(combine_or(parts))
        }
        _ if path.is_empty() => Err(Error::client("a bare scalar is not a valid top-level query")),
        _ => Ok(Some(field_value_query(schema, path, obj)?)),
    }
}

fn combine_and(mut parts: Vec<QueryNode>) -> Option<QueryNode> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(QueryNode::And(parts)),
    }
}

fn combine_or(mut parts: Vec<QueryNode>) -> Option<QueryNode> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(QueryNode::Or(parts)),
    }
}

fn require_node(node: Option<QueryNode>, ctx: &str) -> Result<QueryNode> {
    node.ok_or_else(|| Error::client(format!("{ctx} requires at least one operand")))
}

fn dispatch(schema: &Schema, path: &str, key: &str, value: &Value, out: &mut CompiledQuery) -> Result<Option<QueryNode>> {
    match key {
        "_and" => Ok(combine_and(operands(schema, path, value, out)?)),
        "_or" => Ok(combine_or(operands(schema, path, value, out)?)),
        "_and_not" => {
            let mut ops = operands(schema, path, value, out)?;
            if ops.len() != 2 {
                return Err(Error::client("_and_not requires exactly two operands"));
            }
            let b = ops.pop().unwrap();
            let a = ops.pop().unwrap();
            Ok(Some(QueryNode::AndNot(Box::new(a), Box::new(b))))
        }
        "_and_maybe" => {
            let mut ops = operands(schema, path, value, out)?;
            if ops.len() != 2 {
                return Err(Error::client("_and_maybe requires exactly two operands"));
            }
            let b = ops.pop().unwrap();
            let a = ops.pop().unwrap();
            Ok(Some(QueryNode::AndMaybe(Box::new(a), Box::new(b))))
        }
        "_filter" => {
            let mut ops = operands(schema, path, value, out)?;
            if ops.len() != 2 {
                return Err(Error::client("_filter requires exactly two operands"));
            }
            let b = ops.pop().unwrap();
            let a = ops.pop().unwrap();
            Ok(Some(QueryNode::Filter(Box::new(a), Box::new(b))))
        }
        "_scale_weight" => {
            let obj = value.as_object().ok_or_else(|| Error::client("_scale_weight requires an object"))?;
            let factor = obj
                .get("_scale")
                .and_then(Value::as_f64)
                .ok_or_else(|| Error::client("_scale_weight requires a numeric _scale"))?;
            let query = obj.get("_query").ok_or_else(|| Error::client("_scale_weight requires _query"))?;
            let inner = require_node(process(schema, path, query, out)?, "_scale_weight")?;
            Ok(Some(QueryNode::ScaleWeight(Box::new(inner), factor)))
        }
        "_query" => process(schema, path, value, out),
        "_in" => Ok(Some(compile_in(schema, path, value)?)),
        "_range" => Ok(Some(compile_range(schema, path, value)?)),
        "_sort" => {
            out.sort = parse_sort(value)?;
            Ok(None)
        }
        "_offset" => {
            out.offset = value.as_u64();
            Ok(None)
        }
        "_limit" => {
            out.limit = value.as_u64();
            Ok(None)
        }
        "_check_at_least" => {
            out.check_at_least = value.as_u64();
            Ok(None)
        }
        _ if key.starts_with('_') => Err(Error::client(format!("unknown reserved operator '{key}'"))),
        _ => {
            let child_path = if path.is_empty() { key.to_string() } else { format!("{path}.{key}") };
            process(schema, &child_path, value, out)
        }
    }
}

fn operands(schema: &Schema, path: &str, value: &Value, out: &mut CompiledQuery) -> Result<Vec<QueryNode>> {
    match value {
        Value::Array(items) => {
            let mut nodes = Vec::new();
            for item in items {
                if let Some(node) = process(schema, path, item, out)? {
                    nodes.push(node);
                }
            }
            Ok(nodes)
        }
        other => Ok(process(schema, path, other, out)?.into_iter().collect()),
    }
}

/// Compiles a map-leaf `{field: value}`: an equality term, a `"lo..hi"`
/// range, or (for a `namespace` field) a disjunction over every path the
/// namespace has been observed at.
fn field_value_query(schema: &Schema, path: &str, value: &Value) -> Result<QueryNode> {
    if let Value::String(s) = value {
        if let Some((lo, hi)) = s.split_once("..") {
            let spec = schema
                .field(path)
                .ok_or_else(|| Error::client(format!("unknown field '{path}'")))?;
            return Ok(QueryNode::Range {
                slot: spec.slot,
                from: if lo.is_empty() { None } else { Some(Value::String(lo.to_string())) },
                to: if hi.is_empty() { None } else { Some(Value::String(hi.to_string())) },
            });
        }
    }

    let value_repr = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    if let Some(spec) = schema.field(path) {
        if spec.namespace {
            let leaf = xapi_flatten::leaf_segment(&spec.path);
            return Ok(namespace_disjunction(schema, leaf, &value_repr));
        }
        return Ok(QueryNode::Term { prefix: spec.prefix.clone(), text: value_repr, bool_term: spec.bool_term });
    }

    // No field registered at this exact path: it may still be a bare
    // leaf name shared by one or more `namespace` fields (e.g. querying
    // `color` when only `product.color` and `variant.color` exist).
    let leaf = xapi_flatten::leaf_segment(path);
    if schema.namespace_paths_for_leaf(leaf).is_some() {
        return Ok(namespace_disjunction(schema, leaf, &value_repr));
    }

    Err(Error::client(format!("unknown field '{path}'")))
}

/// An OR of namespace compound terms, one per dotted path observed under
/// `leaf`, so a query by bare leaf name (or by one of its full paths)
/// matches documents indexed at any of them.
fn namespace_disjunction(schema: &Schema, leaf: &str, value_repr: &str) -> QueryNode {
    let paths = schema.namespace_paths_for_leaf(leaf);
    let mut nodes: Vec<QueryNode> = paths
        .into_iter()
        .flatten()
        .map(|full_path| QueryNode::Term {
            prefix: xapi_schema::NAMESPACE_PREFIX.to_vec(),
            text: xapi_schema::namespace_compound_text(full_path, value_repr),
            bool_term: true,
        })
        .collect();
    match nodes.len() {
        1 => nodes.pop().unwrap(),
        _ => QueryNode::Or(nodes),
    }
}

fn compile_range(schema: &Schema, path: &str, value: &Value) -> Result<QueryNode> {
    let spec = schema
        .field(path)
        .ok_or_else(|| Error::client(format!("unknown field '{path}'")))?;
    let obj = value.as_object().ok_or_else(|| Error::client("_range requires an object"))?;
    let from = obj.get("_from").cloned();
    let to = obj.get("_to").cloned();

    if !spec.accuracy.is_empty() {
        if let (Some(Value::Number(f)), Some(Value::Number(t))) = (&from, &to) {
            if let (Some(f), Some(t)) = (f.as_i64(), t.as_i64()) {
                if let Some(node) = accuracy_bucket_range(&spec.accuracy, spec.slot, f, t) {
                    return Ok(node);
                }
            }
        }
    }

    Ok(QueryNode::Range { slot: spec.slot, from, to })
}

/// Expands `[from, to]` into an OR of a range over the largest accuracy
/// bucket alignment that is *fully contained* in `[from, to]`, plus a
/// precise residual range for each partial boundary bucket it leaves
/// over. Returns `None` when no configured bucket threshold fits
/// entirely inside `[from, to]`, in which case the caller falls back to
/// a plain, unexpanded range.
fn accuracy_bucket_range(accuracy: &[i64], slot: u32, from: i64, to: i64) -> Option<QueryNode> {
    let bucket = accuracy
        .iter()
        .copied()
        .filter(|b| *b > 0)
        .filter(|b| div_ceil(from, *b) * b <= div_floor(to + 1, *b) * b - 1)
        .max()?;

    let first_full_start = div_ceil(from, bucket) * bucket;
    let last_full_end = div_floor(to + 1, bucket) * bucket - 1;

    let mut parts = vec![QueryNode::Range {
        slot,
        from: Some(Value::from(first_full_start)),
        to: Some(Value::from(last_full_end)),
    }];
    if from < first_full_start {
        parts.push(QueryNode::Range {
            slot,
            from: Some(Value::from(from)),
            to: Some(Value::from(first_full_start - 1)),
        });
    }
    if last_full_end < to {
        parts.push(QueryNode::Range {
            slot,
            from: Some(Value::from(last_full_end + 1)),
            to: Some(Value::from(to)),
        });
    }
    Some(match parts.len() {
        1 => parts.into_iter().next().unwrap(),
        _ => QueryNode::Or(parts),
    })
}

fn div_ceil(n: i64, d: i64) -> i64 {
    (n + d - 1).div_euclid(d)
}

fn div_floor(n: i64, d: i64) -> i64 {
    n.div_euclid(d)
}

/// Compiles `_in`: a small or non-numeric set becomes an `OR` of equality
/// terms, but a set of integers that forms a contiguous run (no gaps,
/// regardless of input order) compiles to a single value-slot `Range`
/// instead, since a covering range is cheaper to evaluate than one term
/// per member.
fn compile_in(schema: &Schema, path: &str, value: &Value) -> Result<QueryNode> {
    let items = value.as_array().ok_or_else(|| Error::client("_in requires an array"))?;
    if let Some(range) = contiguous_integer_range(schema, path, items) {
        return Ok(range?);
    }
    let mut nodes = Vec::with_capacity(items.len());
    for item in items {
        nodes.push(field_value_query(schema, path, item)?);
    }
    Ok(QueryNode::In(nodes))
}

/// `Some(Ok(range))` when every item in `items` is an integer and the set,
/// once sorted, has no gaps; `None` when the set isn't numeric-contiguous
/// (the caller falls back to an `OR` of terms); `Some(Err(_))` when the
/// field itself can't be resolved.
fn contiguous_integer_range(schema: &Schema, path: &str, items: &[Value]) -> Option<Result<QueryNode>> {
    if items.len() < 2 {
        return None;
    }
    let mut ints: Vec<i64> = Vec::with_capacity(items.len());
    for item in items {
        ints.push(item.as_i64().or_else(|| item.as_u64().map(|u| u as i64))?);
    }
    ints.sort_unstable();
    ints.dedup();
    if ints.len() != items.len() {
        return None;
    }
    if ints.windows(2).any(|w| w[1] - w[0] != 1) {
        return None;
    }
    let spec = match schema.field(path) {
        Some(spec) => spec,
        None => return Some(Err(Error::client(format!("unknown field '{path}'")))),
    };
    Some(Ok(QueryNode::Range {
        slot: spec.slot,
        from: Some(Value::from(*ints.first().unwrap())),
        to: Some(Value::from(*ints.last().unwrap())),
    }))
}

fn parse_sort(value: &Value) -> Result<Vec<SortSpec>> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::String(field) => out.push((field.clone(), SortDirection::Asc)),
            Value::Object(map) => {
                for (field, dir) in map {
                    let direction = match dir.as_str() {
                        Some("desc") => SortDirection::Desc,
                        _ => SortDirection::Asc,
                    };
                    out.push((field.clone(), direction));
                }
            }
            _ => return Err(Error::client("_sort entries must be strings or objects")),
        }
    }
    // Slot resolution happens against the caller's schema in a second pass
    // (kept here as field-name placeholders via slot 0; callers that need
    // slot-resolved sort specs should call `resolve_sort`).
    Ok(out.into_iter().map(|(_, direction)| SortSpec { slot: 0, direction }).collect())
}

/// Resolves `_sort` field names to slots against `schema`, replacing the
/// placeholder slots `parse_sort` leaves behind.
pub fn resolve_sort(schema: &Schema, raw_sort: &Value) -> Result<Vec<SortSpec>> {
    let items: Vec<&Value> = match raw_sort {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::String(field) => {
                let spec = schema.field(field).ok_or_else(|| Error::client(format!("unknown sort field '{field}'")))?;
                out.push(SortSpec { slot: spec.slot, direction: SortDirection::Asc });
            }
            Value::Object(map) => {
                for (field, dir) in map {
                    let spec = schema.field(field).ok_or_else(|| Error::client(format!("unknown sort field '{field}'")))?;
                    let direction = match dir.as_str() {
                        Some("desc") => SortDirection::Desc,
                        _ => SortDirection::Asc,
                    };
                    out.push(SortSpec { slot: spec.slot, direction });
                }
            }
            _ => return Err(Error::client("_sort entries must be strings or objects")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xapi_schema::SchemaService;

    struct NoopLoader;
    impl xapi_schema::ForeignLoader for NoopLoader {
        fn load_document(&self, _endpoint: &xapi_schema::Endpoint) -> Result<Value> {
            Err(Error::NotFound("no foreign docs in test".into()))
        }
    }

    fn indexed_schema() -> Schema {
        let loader = NoopLoader;
        let service = SchemaService::new(&loader);
        let endpoint = xapi_schema::Endpoint::new("people");
        service
            .index(&endpoint, &json!({"name": "Alice", "age": 30}), Some("a"))
            .unwrap();
        (*service.lru.get(&endpoint.path)).clone()
    }

    #[test]
    fn compiles_equality_leaf() {
        let schema = indexed_schema();
        let compiled = compile(&schema, &json!({"name": "Alice"})).unwrap();
        assert!(matches!(compiled.query, Some(QueryNode::Term { .. })));
    }

    #[test]
    fn compiles_range_leaf() {
        let schema = indexed_schema();
        let compiled = compile(&schema, &json!({"age": "25..35"})).unwrap();
        match compiled.query {
            Some(QueryNode::Range { from, to, .. }) => {
                assert_eq!(from, Some(Value::String("25".into())));
                assert_eq!(to, Some(Value::String("35".into())));
            }
            other => panic!("expected a range node, got {other:?}"),
        }
    }

    #[test]
    fn range_operator_never_widens_a_narrow_request_past_its_bucket() {
        // accuracy = [1000, 1_000_000] for an integer field; neither
        // bucket fits fully inside [500, 1500], so this must fall back
        // to the precise, unexpanded range rather than matching a
        // point like 200 that lies outside the request.
        let schema = indexed_schema();
        let compiled = compile(&schema, &json!({"age": {"_range": {"_from": 500, "_to": 1500}}})).unwrap();
        match compiled.query {
            Some(QueryNode::Range { from, to, .. }) => {
                assert_eq!(from, Some(Value::from(500)));
                assert_eq!(to, Some(Value::from(1500)));
            }
            other => panic!("expected an unexpanded range node, got {other:?}"),
        }
    }

    #[test]
    fn range_operator_expands_to_bucket_plus_exact_boundary_residuals() {
        // [500, 5500] fully contains the [1000, 4999] bucket-1000
        // alignment; the residual boundary pieces must stay within the
        // requested range, not widen past it.
        let schema = indexed_schema();
        let compiled = compile(&schema, &json!({"age": {"_range": {"_from": 500, "_to": 5500}}})).unwrap();
        match compiled.query {
            Some(QueryNode::Or(parts)) => {
                for part in &parts {
                    if let QueryNode::Range { from, to, .. } = part {
                        let from = from.as_ref().and_then(Value::as_i64).unwrap();
                        let to = to.as_ref().and_then(Value::as_i64).unwrap();
                        assert!(from >= 500 && to <= 5500, "part [{from},{to}] escapes the requested range");
                    } else {
                        panic!("expected only range nodes in the expansion, got {part:?}");
                    }
                }
                assert!(parts.iter().any(|p| matches!(p, QueryNode::Range { from, to, .. }
                    if *from == Some(Value::from(1000)) && *to == Some(Value::from(4999)))));
            }
            other => panic!("expected an Or of bucket + residual ranges, got {other:?}"),
        }
    }

    #[test]
    fn compiles_and_or_combinators() {
        let schema = indexed_schema();
        let compiled = compile(
            &schema,
            &json!({"_and": [{"name": "Alice"}, {"age": 30}]}),
        )
        .unwrap();
        assert!(matches!(compiled.query, Some(QueryNode::And(_))));
    }

    #[test]
    fn compiles_in_as_disjunction() {
        let schema = indexed_schema();
        let compiled = compile(&schema, &json!({"_in": {"age": [20, 30, 40]}})).unwrap_err();
        // _in must wrap a single field object per spec rule 2; bare _in
        // without a field context is rejected here since no path is set.
        assert!(matches!(compiled, Error::ClientError(_)));
    }

    #[test]
    fn compiles_contiguous_in_set_to_a_range() {
        let schema = indexed_schema();
        let compiled = compile(&schema, &json!({"age": {"_in": [30, 31, 32]}})).unwrap();
        match compiled.query {
            Some(QueryNode::Range { from, to, .. }) => {
                assert_eq!(from, Some(Value::from(30)));
                assert_eq!(to, Some(Value::from(32)));
            }
            other => panic!("expected a range node, got {other:?}"),
        }
    }

    #[test]
    fn compiles_non_contiguous_in_set_to_a_disjunction() {
        let schema = indexed_schema();
        let compiled = compile(&schema, &json!({"age": {"_in": [20, 30, 45]}})).unwrap();
        assert!(matches!(compiled.query, Some(QueryNode::In(_))));
    }

    #[test]
    fn namespace_field_query_disjuncts_over_every_observed_path() {
        let loader = NoopLoader;
        let service = SchemaService::new(&loader);
        let endpoint = xapi_schema::Endpoint::new("products");
        service
            .index(
                &endpoint,
                &json!({"product": {"color": {"_type": "keyword", "_namespace": true, "_value": "red"}}}),
                Some("a"),
            )
            .unwrap();
        service
            .index(
                &endpoint,
                &json!({"variant": {"color": {"_type": "keyword", "_namespace": true, "_value": "blue"}}}),
                Some("b"),
            )
            .unwrap();
        let schema = (*service.lru.get(&endpoint.path)).clone();
        let compiled = compile(&schema, &json!({"color": "red"})).unwrap();
        match compiled.query {
            Some(QueryNode::Or(nodes)) => assert_eq!(nodes.len(), 2),
            other => panic!("expected an Or of two namespace paths, got {other:?}"),
        }
    }

    #[test]
    fn extracts_sort_offset_limit_siblings() {
        let schema = indexed_schema();
        let compiled = compile(
            &schema,
            &json!({"name": "Alice", "_offset": 10, "_limit": 5, "_check_at_least": 100}),
        )
        .unwrap();
        assert_eq!(compiled.offset, Some(10));
        assert_eq!(compiled.limit, Some(5));
        assert_eq!(compiled.check_at_least, Some(100));
    }

    #[test]
    fn resolves_sort_field_names_to_slots() {
        let schema = indexed_schema();
        let specs = resolve_sort(&schema, &json!(["name", {"age": "desc"}])).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].direction as u8, SortDirection::Desc as u8);
    }

    #[test]
    fn rejects_unknown_field() {
        let schema = indexed_schema();
        assert!(compile(&schema, &json!({"unknown_field": 1})).is_err());
    }
}
