//! The [`Schema`] tree itself, its copy-on-write `index()` write path, and
//! the process-wide [`SchemasLru`] of current snapshots.

use crate::alloc::{allocate_prefix, allocate_slot};
use crate::detect::{detect_scalar, is_geo_object, DetectionFlags};
use crate::field_spec::{ConcreteType, FieldKind, FieldSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use xapi_types::reserved::is_reserved;
use xapi_types::{Error, Result};

/// Maximum depth a foreign schema resolution may recurse before the
/// lookup is rejected, bounded by `MAX_SCHEMA_RECURSION`.
pub const MAX_SCHEMA_RECURSION: usize = 10;

/// Shared term prefix for every field declared `namespace=true`: each
/// such field's posting is namespaced under this single prefix instead
/// of its own per-path prefix, plus a per-path compound term (see
/// [`emit_leaf`]) so a query can still disambiguate by path when needed.
pub const NAMESPACE_PREFIX: &[u8] = b"\x01NS";

/// The literal compound-term text a namespace leaf emits: shared across
/// the write path ([`emit_leaf`]) and the query compiler so both sides
/// agree on the term's shape.
pub fn namespace_compound_text(path: &str, value_repr: &str) -> String {
    format!("{path}:{value_repr}")
}

/// `(path, id?)` — a reference to a document, used both for the document
/// being indexed and for a foreign schema's `endpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub path: String,
    pub id: Option<String>,
}

impl Endpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Endpoint { path: path.into(), id: None }
    }

    pub fn with_id(path: impl Into<String>, id: impl Into<String>) -> Self {
        Endpoint { path: path.into(), id: Some(id.into()) }
    }

    pub fn to_string_repr(&self) -> String {
        match &self.id {
            Some(id) => format!("{}/{}", self.path, id),
            None => self.path.clone(),
        }
    }

    /// Parses the `"<path>/<id>"` form stored in a foreign stub's
    /// `_endpoint` attribute.
    pub fn parse(s: &str) -> Result<Self> {
        match s.rsplit_once('/') {
            Some((path, id)) if !path.is_empty() && !id.is_empty() => {
                Ok(Endpoint::with_id(path, id))
            }
            _ => Err(Error::client(format!("'{s}' must contain an index and a document id"))),
        }
    }
}

fn default_foreign_endpoint(path: &str) -> String {
    format!("/.xapiand/index/{}", urlencode(path))
}

fn urlencode(s: &str) -> String {
    s.chars()
        .flat_map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                vec![c]
            } else {
                format!("%{:02X}", c as u32).chars().collect()
            }
        })
        .collect()
}

/// Either a local schema (stored as `fields`) or a stub pointing at a
/// foreign document's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchemaBody {
    Local {
        fields: BTreeMap<String, FieldSpec>,
        strict: bool,
        detection: DetectionFlags,
        /// Leaf field name -> set of dotted paths declared
        /// `namespace=true` sharing that name, so the query compiler can
        /// fan a bare leaf-name lookup out over every path it might mean.
        #[serde(default)]
        namespace_paths: BTreeMap<String, BTreeSet<String>>,
    },
    Foreign {
        endpoint: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub body: SchemaBody,
}

impl Default for Schema {
    fn default() -> Self {
        Schema {
            body: SchemaBody::Local {
                fields: BTreeMap::new(),
                strict: false,
                detection: DetectionFlags::default(),
                namespace_paths: BTreeMap::new(),
            },
        }
    }
}

impl Schema {
    pub fn foreign(endpoint: impl Into<String>) -> Self {
        Schema { body: SchemaBody::Foreign { endpoint: endpoint.into() } }
    }

    pub fn is_foreign(&self) -> bool {
        matches!(self.body, SchemaBody::Foreign { .. })
    }

    pub fn field(&self, path: &str) -> Option<&FieldSpec> {
        match &self.body {
            SchemaBody::Local { fields, .. } => fields.get(path),
            SchemaBody::Foreign { .. } => None,
        }
    }

    pub fn field_count(&self) -> usize {
        match &self.body {
            SchemaBody::Local { fields, .. } => fields.len(),
            SchemaBody::Foreign { .. } => 0,
        }
    }

    /// Every dotted path declared `namespace=true` under the leaf name
    /// `leaf` (e.g. querying `color` when both `product.color` and
    /// `variant.color` are namespace fields), used to compile the
    /// disjunction rule 1 describes.
    pub fn namespace_paths_for_leaf(&self, leaf: &str) -> Option<&BTreeSet<String>> {
        match &self.body {
            SchemaBody::Local { namespace_paths, .. } => namespace_paths.get(leaf),
            SchemaBody::Foreign { .. } => None,
        }
    }
}

/// One posting-list term produced for an indexed leaf: a field-prefixed
/// token, optionally boolean (unweighted, not tokenised further).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub prefix: Vec<u8>,
    pub text: String,
    pub bool_term: bool,
}

/// The result of compiling one document object against a schema.
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub term_id: String,
    pub terms: Vec<Term>,
    pub values: BTreeMap<u32, Vec<u8>>,
    pub data: Value,
}

fn value_slot_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Bool(b) => vec![*b as u8],
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_be_bytes().to_vec()
            } else if let Some(u) = n.as_u64() {
                u.to_be_bytes().to_vec()
            } else {
                n.as_f64().unwrap_or(0.0).to_be_bytes().to_vec()
            }
        }
        other => other.to_string().into_bytes(),
    }
}

/// Numeric accuracy bucketing: truncation to the nearest power of ten at
/// or below `value.abs()`, for each configured threshold.
fn numeric_bucket(value: i64, threshold: i64) -> i64 {
    if threshold <= 0 {
        return value;
    }
    (value / threshold) * threshold
}

/// Date accuracy bucketing: truncates an ISO date string to its leading
/// `threshold`-digit year-like component (e.g. threshold 4 -> the year).
fn date_bucket(date_str: &str, threshold: usize) -> String {
    date_str.chars().take(threshold).collect()
}

/// `(latitude, longitude)` in degrees, extracted from a reserved-tag geo
/// object (`_point`/`_circle`, the only shapes this indexer understands
/// a centroid for; the rest of the GEO_TAGS grammar compiles to the
/// `Geo` type but without a centroid, no terms/values are emitted for
/// it — see `DESIGN.md`).
fn geo_centroid(map: &Map<String, Value>) -> Option<(f64, f64)> {
    for tag in ["_point", "_circle"] {
        if let Some(obj) = map.get(tag).and_then(Value::as_object) {
            let lat = obj.get("_latitude").and_then(Value::as_f64)?;
            let lon = obj.get("_longitude").and_then(Value::as_f64)?;
            return Some((lat, lon));
        }
    }
    None
}

/// A simplified HTM-analog: a quad-tree trixel id of `depth` digits
/// (each `0..=3`) over the `[-90,90] x [-180,180]` lat/lon rectangle.
/// This is a deliberately simplified stand-in for the source's HTM
/// trixel id (the exact spherical-triangle subdivision is out of scope
/// here; see `DESIGN.md`), but it has the same bucketing property: a
/// shorter prefix covers a larger area, so equal-prefix trixels are
/// near one another.
fn geo_trixel(lat: f64, lon: f64, depth: usize) -> String {
    let (mut lat_lo, mut lat_hi) = (-90.0f64, 90.0f64);
    let (mut lon_lo, mut lon_hi) = (-180.0f64, 180.0f64);
    let mut code = String::with_capacity(depth);
    for _ in 0..depth {
        let lat_mid = (lat_lo + lat_hi) / 2.0;
        let lon_mid = (lon_lo + lon_hi) / 2.0;
        let lat_half = lat >= lat_mid;
        let lon_half = lon >= lon_mid;
        let digit = match (lat_half, lon_half) {
            (false, false) => b'0',
            (false, true) => b'1',
            (true, false) => b'2',
            (true, true) => b'3',
        };
        code.push(digit as char);
        if lat_half { lat_lo = lat_mid } else { lat_hi = lat_mid }
        if lon_half { lon_lo = lon_mid } else { lon_hi = lon_mid }
    }
    code
}

/// Maps a `_type` cast word (from `xapi_types::reserved::CAST_WORDS`) to
/// the concrete type it declares.
fn cast_word_to_concrete(word: &str) -> Option<ConcreteType> {
    Some(match word {
        "float" => ConcreteType::Float,
        "positive" => ConcreteType::Positive,
        "integer" => ConcreteType::Integer,
        "boolean" => ConcreteType::Boolean,
        "term" | "keyword" => ConcreteType::Keyword,
        "text" => ConcreteType::Text,
        "string" => ConcreteType::StringLegacy,
        "date" => ConcreteType::Date,
        "time" => ConcreteType::Time,
        "timedelta" => ConcreteType::TimeDelta,
        "uuid" => ConcreteType::Uuid,
        "ewkt" | "point" | "circle" | "convex" | "polygon" | "chull" | "multipoint" | "multicircle" | "multiconvex"
        | "multipolygon" | "multichull" | "geometrycollection" | "geometryintersection" => ConcreteType::Geo,
        _ => return None,
    })
}

/// A user-supplied field-spec declaration (`{"_type": ..., "_value": ...,
/// ...}`), extracted from the raw document tree before the ordinary
/// leaf walk, so a declared type is honoured even in `strict` mode and a
/// declared `_namespace`/`_bool_term`/`_index` overrides the detected
/// default.
#[derive(Debug, Clone, Default)]
struct FieldOverride {
    concrete: Option<ConcreteType>,
    namespace: Option<bool>,
    bool_term: Option<bool>,
    index_terms: Option<bool>,
    index_values: Option<bool>,
}

fn extract_declaration(map: &Map<String, Value>) -> Option<FieldOverride> {
    let mut over = FieldOverride::default();
    let mut found = false;

    if let Some(Value::String(t)) = map.get("_type") {
        if let Some(c) = cast_word_to_concrete(t) {
            over.concrete = Some(c);
            found = true;
        }
    }
    if let Some(Value::Bool(b)) = map.get("_namespace") {
        over.namespace = Some(*b);
        found = true;
    }
    if let Some(Value::Bool(b)) = map.get("_bool_term") {
        over.bool_term = Some(*b);
        found = true;
    }
    if let Some(Value::Bool(b)) = map.get("_index") {
        over.index_terms = Some(*b);
        over.index_values = Some(*b);
        found = true;
    }

    found.then_some(over)
}

/// Walks `value` looking for field-spec declaration objects (a map
/// carrying `_type`/`_namespace`/`_bool_term`/`_index`), recording each
/// as a [`FieldOverride`] keyed by its dotted path and replacing it with
/// its `_value` (or `Null` if absent) so the ordinary flatten + leaf walk
/// sees only plain data. Geo objects (recognised by `is_geo_object`) are
/// never mistaken for declarations.
fn strip_declarations(value: &Value, path: &str, overrides: &mut BTreeMap<String, FieldOverride>) -> Value {
    match value {
        Value::Object(map) if !is_geo_object(map) => {
            if let Some(over) = extract_declaration(map) {
                overrides.insert(path.to_string(), over);
                match map.get("_value") {
                    Some(v) => strip_declarations(v, path, overrides),
                    None => Value::Null,
                }
            } else {
                let mut out = Map::new();
                for (k, v) in map {
                    let child_path = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                    out.insert(k.clone(), strip_declarations(v, &child_path, overrides));
                }
                Value::Object(out)
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| strip_declarations(v, path, overrides)).collect()),
        other => other.clone(),
    }
}

/// Resolves (creating if absent, subject to strict mode) the [`FieldSpec`]
/// for `path` given the sample `value`, returning the spec to use. The
/// schema's `fields` map is mutated in place; callers clone-on-write the
/// whole `Schema` before calling this so the mutation lands on the new
/// snapshot only.
#[allow(clippy::too_many_arguments)]
fn resolve_field(
    fields: &mut BTreeMap<String, FieldSpec>,
    detection: &DetectionFlags,
    strict: bool,
    path: &str,
    value: &Value,
    over: Option<&FieldOverride>,
    namespace_paths: &mut BTreeMap<String, BTreeSet<String>>,
) -> Result<FieldSpec> {
    if let Some(existing) = fields.get(path) {
        return Ok(existing.clone());
    }

    let last_segment = xapi_flatten::leaf_segment(path);
    if last_segment.starts_with('_') && !is_reserved(last_segment) {
        return Err(Error::client(format!("'{last_segment}' is not a recognised reserved field")));
    }

    let declared = over.and_then(|o| o.concrete);
    let concrete = if let Some(c) = declared {
        c
    } else if strict {
        return Err(Error::MissingType(format!("field '{path}' has no declared type in strict mode")));
    } else {
        match value {
            Value::Object(map) if is_geo_object(map) => ConcreteType::Geo,
            Value::Object(_) => {
                let mut spec = FieldSpec::new(path);
                spec.kind = FieldKind::Object;
                fields.insert(path.to_string(), spec.clone());
                return Ok(spec);
            }
            Value::Null => ConcreteType::Empty,
            other => detect_scalar(other, detection).unwrap_or(ConcreteType::Text),
        }
    };

    let mut spec = FieldSpec::new(path);
    spec.concrete = Some(concrete);

    let taken_slots: HashSet<u32> = fields.values().map(|f| f.slot).collect();
    spec.slot = allocate_slot(path, |s| taken_slots.contains(&s));

    let taken_prefixes: HashSet<Vec<u8>> = fields.values().map(|f| f.prefix.clone()).collect();
    spec.prefix = allocate_prefix(path, |p| taken_prefixes.contains(p));

    if matches!(concrete, ConcreteType::Keyword | ConcreteType::Uuid | ConcreteType::Boolean) {
        spec.bool_term = true;
    }

    match concrete {
        ConcreteType::Date => {
            spec.accuracy = vec![4, 6, 8]; // year, year+month, year+month+day digit-width buckets
        }
        ConcreteType::Integer | ConcreteType::Positive | ConcreteType::Float => {
            spec.accuracy = vec![1000, 1_000_000];
        }
        ConcreteType::Geo => {
            spec.accuracy = vec![3, 6, 9]; // coarse -> fine quad-trixel depths
        }
        _ => {}
    }
    if !spec.accuracy.is_empty() {
        spec.accuracy_prefixes = spec
            .accuracy
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let mut p = spec.prefix.clone();
                p.push(b'A');
                p.push(b'0' + i as u8);
                p
            })
            .collect();
    }

    if let Some(o) = over {
        if let Some(ns) = o.namespace {
            spec.namespace = ns;
        }
        if let Some(bt) = o.bool_term {
            spec.bool_term = bt;
        }
        if let Some(it) = o.index_terms {
            spec.index.terms = it;
        }
        if let Some(iv) = o.index_values {
            spec.index.values = iv;
        }
    }

    if spec.namespace {
        namespace_paths.entry(last_segment.to_string()).or_default().insert(path.to_string());
    }

    fields.insert(path.to_string(), spec.clone());
    Ok(spec)
}

/// The main write path: walks `object`'s flattened leaves, resolving or
/// creating a [`FieldSpec`] for each, and compiles terms/values/accuracy
/// terms, returning the new schema snapshot (copy-on-write) alongside the
/// compiled document.
pub fn index(schema: &Schema, object: &Value, doc_id: Option<&str>) -> Result<(Schema, IndexedDocument)> {
    let (mut fields, strict, detection, mut namespace_paths) = match &schema.body {
        SchemaBody::Local { fields, strict, detection, namespace_paths } => {
            (fields.clone(), *strict, *detection, namespace_paths.clone())
        }
        SchemaBody::Foreign { .. } => {
            return Err(Error::ForeignSchema("cannot index directly against a foreign schema stub".into()))
        }
    };

    let top = object.as_object().ok_or_else(|| Error::client("document to index must be a JSON object"))?;
    let mut overrides = BTreeMap::new();
    let clean = strip_declarations(&Value::Object(top.clone()), "", &mut overrides);
    let map = clean.as_object().ok_or_else(|| Error::client("document to index must be a JSON object"))?;
    let flat = xapi_flatten::flatten_with_leaf(map, is_geo_object);

    let mut terms = Vec::new();
    let mut values = BTreeMap::new();

    for (path, value) in &flat {
        if value.is_array() && value.as_array().map(|a| a.is_empty()).unwrap_or(false) {
            continue; // intermediate container marker, not a leaf
        }
        let leaves: Vec<&Value> = match value.as_array() {
            Some(arr) => arr.iter().collect(),
            None => vec![value],
        };
        for leaf in leaves {
            let over = overrides.get(path);
            let spec = resolve_field(&mut fields, &detection, strict, path, leaf, over, &mut namespace_paths)?;
            if !spec.is_concrete() {
                continue;
            }
            emit_leaf(&spec, leaf, &mut terms, &mut values);
        }
    }

    let term_id = doc_id.map(|id| format!("Q{id}")).unwrap_or_default();
    let doc = IndexedDocument { term_id, terms, values, data: object.clone() };
    let new_schema = Schema { body: SchemaBody::Local { fields, strict, detection, namespace_paths } };
    Ok((new_schema, doc))
}

/// The plain-scalar textual form used for equality terms, matching the
/// query compiler's own `field_value_query` casting so a namespace
/// compound term written here is found by the same term compiled there.
fn scalar_repr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn emit_leaf(spec: &FieldSpec, value: &Value, terms: &mut Vec<Term>, values: &mut BTreeMap<u32, Vec<u8>>) {
    if spec.concrete == Some(ConcreteType::Geo) {
        emit_geo_leaf(spec, value, terms, values);
        return;
    }

    if spec.index.values {
        values.insert(spec.slot, value_slot_bytes(value));
    }
    if !spec.index.terms {
        return;
    }
    if spec.namespace {
        emit_namespace_term(spec, &scalar_repr(value), terms);
    }
    match spec.concrete {
        Some(ConcreteType::Text) => {
            if let Value::String(s) = value {
                let tokens = crate::text::tokenise(s, spec.stop_strategy, spec.stem_strategy, spec.stem_language.as_deref());
                for token in tokens {
                    terms.push(Term { prefix: spec.prefix.clone(), text: token, bool_term: false });
                }
            }
        }
        Some(ConcreteType::Date) => {
            if let Value::String(s) = value {
                terms.push(Term { prefix: spec.prefix.clone(), text: s.clone(), bool_term: true });
                for (threshold, prefix) in spec.accuracy.iter().zip(&spec.accuracy_prefixes) {
                    let bucket = date_bucket(s, *threshold as usize);
                    terms.push(Term { prefix: prefix.clone(), text: bucket, bool_term: true });
                }
            }
        }
        Some(ConcreteType::Integer) | Some(ConcreteType::Positive) => {
            if let Some(n) = value.as_i64().or_else(|| value.as_u64().map(|u| u as i64)) {
                terms.push(Term { prefix: spec.prefix.clone(), text: n.to_string(), bool_term: true });
                for (threshold, prefix) in spec.accuracy.iter().zip(&spec.accuracy_prefixes) {
                    let bucket = numeric_bucket(n, *threshold);
                    terms.push(Term { prefix: prefix.clone(), text: bucket.to_string(), bool_term: true });
                }
            }
        }
        _ => {
            terms.push(Term { prefix: spec.prefix.clone(), text: scalar_repr(value), bool_term: true });
        }
    }
}

/// Fields marked `namespace=true` additionally emit a compound term
/// under the shared [`NAMESPACE_PREFIX`], so a bare-leaf-name query can
/// OR across every path that shares the name (see
/// `Schema::namespace_paths_for_leaf`).
fn emit_namespace_term(spec: &FieldSpec, value_repr: &str, terms: &mut Vec<Term>) {
    terms.push(Term {
        prefix: NAMESPACE_PREFIX.to_vec(),
        text: namespace_compound_text(&spec.path, value_repr),
        bool_term: true,
    });
}

fn emit_geo_leaf(spec: &FieldSpec, value: &Value, terms: &mut Vec<Term>, values: &mut BTreeMap<u32, Vec<u8>>) {
    let Value::Object(map) = value else { return };
    let Some((lat, lon)) = geo_centroid(map) else { return };

    if spec.index.values {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&lat.to_be_bytes());
        bytes.extend_from_slice(&lon.to_be_bytes());
        values.insert(spec.slot, bytes);
    }
    if !spec.index.terms {
        return;
    }

    let full_depth = spec.accuracy.last().copied().unwrap_or(9).max(1) as usize;
    terms.push(Term { prefix: spec.prefix.clone(), text: geo_trixel(lat, lon, full_depth), bool_term: true });
    for (depth, prefix) in spec.accuracy.iter().zip(&spec.accuracy_prefixes) {
        terms.push(Term { prefix: prefix.clone(), text: geo_trixel(lat, lon, *depth as usize), bool_term: true });
    }
    if spec.namespace {
        emit_namespace_term(spec, &geo_trixel(lat, lon, full_depth), terms);
    }
}

/// Fetches the current local schema at `path`, if present, synthesising a
/// foreign default reference when `require_foreign` and none is declared.
pub fn resolve_default_endpoint(path: &str, require_foreign: bool, current: Option<&str>) -> Option<String> {
    match current {
        Some(existing) => Some(existing.to_string()),
        None if require_foreign => Some(default_foreign_endpoint(path)),
        None => None,
    }
}

/// Shared, atomically-swapped snapshot table keyed by (unsharded) index
/// path, matching the source's `SchemasLRU`.
pub struct SchemasLru {
    map: parking_lot::Mutex<std::collections::HashMap<String, Arc<Schema>>>,
}

impl Default for SchemasLru {
    fn default() -> Self {
        SchemasLru { map: parking_lot::Mutex::new(std::collections::HashMap::new()) }
    }
}

pub enum CasOutcome {
    Accepted,
    Rejected(Arc<Schema>),
}

impl SchemasLru {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialises the current snapshot for `path`, inserting a fresh
    /// default schema if absent.
    pub fn get(&self, path: &str) -> Arc<Schema> {
        let mut map = self.map.lock();
        map.entry(path.to_string()).or_insert_with(|| Arc::new(Schema::default())).clone()
    }

    /// CAS: replaces the snapshot at `path` with `new` iff the currently
    /// stored snapshot is pointer-identical to `expected`.
    pub fn set(&self, path: &str, expected: &Arc<Schema>, new: Arc<Schema>) -> CasOutcome {
        let mut map = self.map.lock();
        let current = map.entry(path.to_string()).or_insert_with(|| Arc::new(Schema::default()));
        if Arc::ptr_eq(current, expected) {
            *current = new;
            CasOutcome::Accepted
        } else {
            CasOutcome::Rejected(current.clone())
        }
    }

    /// CAS-removes the snapshot at `path`, restoring the default empty
    /// schema, iff the stored snapshot matches `expected`.
    pub fn drop(&self, path: &str, expected: &Arc<Schema>) -> bool {
        let mut map = self.map.lock();
        match map.get(path) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                map.insert(path.to_string(), Arc::new(Schema::default()));
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn index_creates_fields_and_slots_uniquely() {
        let schema = Schema::default();
        let (schema, doc) = index(&schema, &json!({"name": "Alice", "age": 30}), Some("a")).unwrap();
        assert_eq!(doc.term_id, "Qa");
        assert_eq!(schema.field_count(), 2);
        let name = schema.field("name").unwrap();
        let age = schema.field("age").unwrap();
        assert_ne!(name.slot, age.slot);
        assert_ne!(name.prefix, age.prefix);
    }

    #[test]
    fn schema_monotonicity_across_two_indexes() {
        let schema = Schema::default();
        let (schema, _) = index(&schema, &json!({"name": "Alice"}), Some("a")).unwrap();
        let before = schema.field_count();
        let (schema2, _) = index(&schema, &json!({"name": "Bob", "age": 40}), Some("b")).unwrap();
        assert!(schema2.field_count() >= before);
        assert!(schema2.field("name").is_some());
        assert!(schema2.field("age").is_some());
    }

    #[test]
    fn strict_mode_rejects_undeclared_fields() {
        let schema = Schema {
            body: SchemaBody::Local {
                fields: BTreeMap::new(),
                strict: true,
                detection: DetectionFlags::default(),
                namespace_paths: BTreeMap::new(),
            },
        };
        let result = index(&schema, &json!({"age": 30}), Some("a"));
        assert!(result.is_err());
    }

    #[test]
    fn strict_mode_honours_an_explicit_type_declaration() {
        let schema = Schema {
            body: SchemaBody::Local {
                fields: BTreeMap::new(),
                strict: true,
                detection: DetectionFlags::default(),
                namespace_paths: BTreeMap::new(),
            },
        };
        let result = index(&schema, &json!({"age": {"_type": "integer", "_value": 30}}), Some("a"));
        let (schema, _) = result.unwrap();
        assert_eq!(schema.field("age").unwrap().concrete, Some(ConcreteType::Integer));
    }

    #[test]
    fn rejects_unknown_reserved_field() {
        let schema = Schema::default();
        let result = index(&schema, &json!({"_bogus": 1}), Some("a"));
        assert!(result.is_err());
    }

    #[test]
    fn date_field_emits_accuracy_terms() {
        let schema = Schema::default();
        let (_, doc) = index(&schema, &json!({"created": "2020-05-01"}), Some("a")).unwrap();
        let bucket_terms: Vec<&Term> = doc.terms.iter().filter(|t| t.text == "2020").collect();
        assert!(!bucket_terms.is_empty());
    }

    #[test]
    fn namespace_declaration_emits_compound_term_and_is_tracked() {
        let schema = Schema::default();
        let (schema, doc) =
            index(&schema, &json!({"color": {"_type": "keyword", "_namespace": true, "_value": "red"}}), Some("a")).unwrap();
        assert!(schema.namespace_paths_for_leaf("color").unwrap().contains("color"));
        assert!(doc.terms.iter().any(|t| t.prefix == NAMESPACE_PREFIX && t.text == "color:red"));
    }

    #[test]
    fn geo_field_emits_trixel_terms_at_each_accuracy_depth() {
        let schema = Schema::default();
        let (schema, doc) =
            index(&schema, &json!({"location": {"_point": {"_latitude": 40.0, "_longitude": -3.0}}}), Some("a")).unwrap();
        let spec = schema.field("location").unwrap();
        assert_eq!(spec.concrete, Some(ConcreteType::Geo));
        assert_eq!(doc.terms.iter().filter(|t| t.prefix == spec.prefix || spec.accuracy_prefixes.contains(&t.prefix)).count(), 4);
    }

    #[test]
    fn lru_cas_rejects_stale_expected() {
        let lru = SchemasLru::new();
        let current = lru.get("idx");
        let stale = Arc::new(Schema::default());
        match lru.set("idx", &stale, Arc::new(Schema::default())) {
            CasOutcome::Rejected(returned) => assert!(Arc::ptr_eq(&returned, &current)),
            CasOutcome::Accepted => panic!("expected CAS to reject a stale snapshot"),
        }
    }

    #[test]
    fn lru_cas_accepts_matching_expected() {
        let lru = SchemasLru::new();
        let current = lru.get("idx");
        let updated = Arc::new(Schema::default());
        assert!(matches!(lru.set("idx", &current, updated), CasOutcome::Accepted));
    }

    #[test]
    fn default_foreign_endpoint_is_synthesised() {
        let synthesised = resolve_default_endpoint("my/index path", true, None).unwrap();
        assert!(synthesised.starts_with("/.xapiand/index/"));
        assert!(!synthesised.contains(' '));
    }
}
