//! A composable tree of metric and bucket aggregators, observed document
//! by document the way the original plugs an `AggregationMatchSpy` into a
//! search enquiry.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use xapi_types::{Error, Result};

/// A matched document's field values, as a multi-value map (one or more
/// values per dotted path), the shape the schema's flattened leaves take.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub values: BTreeMap<String, Vec<Value>>,
}

impl Document {
    pub fn new() -> Self {
        Document::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.entry(field.into()).or_default().push(value.into());
        self
    }

    fn numeric_values(&self, field: &str) -> Vec<f64> {
        self.values
            .get(field)
            .into_iter()
            .flatten()
            .filter_map(Value::as_f64)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Variance,
    StdDev,
    Median,
    Mode,
    Stats,
    ExtendedStats,
}

/// The static shape of one aggregation node, as parsed from a DSL
/// `_aggs` object — recursive, since bucket nodes own sub-aggregations.
#[derive(Debug, Clone)]
pub enum AggSpec {
    Metric { kind: MetricKind, field: String },
    Filter { field: String, equals: Value, sub_aggs: Vec<(String, AggSpec)> },
    Values { field: String, sub_aggs: Vec<(String, AggSpec)> },
    Terms { field: String, sub_aggs: Vec<(String, AggSpec)> },
    Histogram { field: String, interval: f64, offset: f64, sub_aggs: Vec<(String, AggSpec)> },
    Range { field: String, ranges: Vec<(Option<f64>, Option<f64>)>, sub_aggs: Vec<(String, AggSpec)> },
}

#[derive(Debug, Clone, Default)]
struct MetricState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    sum_sq: f64,
    samples: Vec<f64>,
}

impl MetricState {
    fn observe(&mut self, v: f64) {
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.count += 1;
        self.sum += v;
        self.sum_sq += v * v;
        self.samples.push(v);
    }

    fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }

    fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_sq / self.count as f64 - self.mean() * self.mean()
        }
    }

    /// Ties on the median index resolve to the lower of the two middle
    /// samples (a deliberate, documented policy).
    fn median(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            sorted[mid - 1]
        } else {
            sorted[mid]
        }
    }

    /// Ties resolve to the smallest value among the modes (documented
    /// policy).
    fn mode(&self) -> f64 {
        let mut counts: BTreeMap<u64, u64> = BTreeMap::new();
        for v in &self.samples {
            *counts.entry(v.to_bits()).or_default() += 1;
        }
        counts
            .into_iter()
            .max_by_key(|(_, c)| *c)
            .map(|(bits, _)| f64::from_bits(bits))
            .unwrap_or(0.0)
    }
}

/// One live aggregation instance, growing a map of children as buckets
/// are discovered during observation.
#[derive(Debug, Clone)]
pub enum AggNode {
    Metric { kind: MetricKind, field: String, state: MetricState },
    Filter { field: String, equals: Value, doc_count: u64, sub_specs: Vec<(String, AggSpec)>, children: BTreeMap<String, AggNode> },
    Values { field: String, doc_count: u64, sub_specs: Vec<(String, AggSpec)>, buckets: BTreeMap<String, Bucket> },
    Terms { field: String, doc_count: u64, sub_specs: Vec<(String, AggSpec)>, buckets: BTreeMap<String, Bucket> },
    Histogram { field: String, interval: f64, offset: f64, doc_count: u64, sub_specs: Vec<(String, AggSpec)>, buckets: BTreeMap<i64, Bucket> },
    Range { field: String, ranges: Vec<(Option<f64>, Option<f64>)>, doc_count: u64, sub_specs: Vec<(String, AggSpec)>, buckets: Vec<Bucket> },
}

#[derive(Debug, Clone, Default)]
pub struct Bucket {
    pub doc_count: u64,
    pub children: BTreeMap<String, AggNode>,
}

fn instantiate(spec: &AggSpec) -> AggNode {
    match spec {
        AggSpec::Metric { kind, field } => AggNode::Metric { kind: *kind, field: field.clone(), state: MetricState::default() },
        AggSpec::Filter { field, equals, sub_aggs } => AggNode::Filter {
            field: field.clone(),
            equals: equals.clone(),
            doc_count: 0,
            sub_specs: sub_aggs.clone(),
            children: BTreeMap::new(),
        },
        AggSpec::Values { field, sub_aggs } => AggNode::Values { field: field.clone(), doc_count: 0, sub_specs: sub_aggs.clone(), buckets: BTreeMap::new() },
        AggSpec::Terms { field, sub_aggs } => AggNode::Terms { field: field.clone(), doc_count: 0, sub_specs: sub_aggs.clone(), buckets: BTreeMap::new() },
        AggSpec::Histogram { field, interval, offset, sub_aggs } => AggNode::Histogram {
            field: field.clone(),
            interval: *interval,
            offset: *offset,
            doc_count: 0,
            sub_specs: sub_aggs.clone(),
            buckets: BTreeMap::new(),
        },
        AggSpec::Range { field, ranges, sub_aggs } => AggNode::Range {
            field: field.clone(),
            ranges: ranges.clone(),
            doc_count: 0,
            sub_specs: sub_aggs.clone(),
            buckets: vec![Bucket::default(); ranges.len()],
        },
    }
}

fn observe_children(children: &mut BTreeMap<String, AggNode>, sub_specs: &[(String, AggSpec)], doc: &Document) {
    for (name, spec) in sub_specs {
        children.entry(name.clone()).or_insert_with(|| instantiate(spec)).observe(doc);
    }
}

impl AggNode {
    pub fn new(spec: &AggSpec) -> Self {
        instantiate(spec)
    }

    pub fn observe(&mut self, doc: &Document) {
        match self {
            AggNode::Metric { kind, field, state } => {
                for v in doc.numeric_values(field) {
                    state.observe(v);
                }
                let _ = kind;
            }
            AggNode::Filter { field, equals, doc_count, sub_specs, children } => {
                let matches = doc.values.get(field).map(|vs| vs.contains(equals)).unwrap_or(false);
                if matches {
                    *doc_count += 1;
                    observe_children(children, sub_specs, doc);
                }
            }
            AggNode::Values { field, doc_count, sub_specs, buckets } => {
                for v in doc.values.get(field).into_iter().flatten() {
                    *doc_count += 1;
                    let key = value_key(v);
                    let bucket = buckets.entry(key).or_default();
                    bucket.doc_count += 1;
                    observe_children(&mut bucket.children, sub_specs, doc);
                }
            }
            AggNode::Terms { field, doc_count, sub_specs, buckets } => {
                for v in doc.values.get(field).into_iter().flatten() {
                    if let Value::String(s) = v {
                        *doc_count += 1;
                        let bucket = buckets.entry(s.clone()).or_default();
                        bucket.doc_count += 1;
                        observe_children(&mut bucket.children, sub_specs, doc);
                    }
                }
            }
            AggNode::Histogram { field, interval, offset, doc_count, sub_specs, buckets } => {
                if *interval <= 0.0 {
                    return;
                }
                for v in doc.numeric_values(field) {
                    *doc_count += 1;
                    let bucket_index = ((v - *offset) / *interval).floor() as i64;
                    let bucket = buckets.entry(bucket_index).or_default();
                    bucket.doc_count += 1;
                    observe_children(&mut bucket.children, sub_specs, doc);
                }
            }
            AggNode::Range { field, ranges, doc_count, sub_specs, buckets } => {
                for v in doc.numeric_values(field) {
                    for (i, (from, to)) in ranges.iter().enumerate() {
                        let above_from = from.map(|f| v >= f).unwrap_or(true);
                        let below_to = to.map(|t| v < t).unwrap_or(true);
                        if above_from && below_to {
                            *doc_count += 1;
                            buckets[i].doc_count += 1;
                            observe_children(&mut buckets[i].children, sub_specs, doc);
                        }
                    }
                }
            }
        }
    }

    /// Finalises post-pass-only state (median/mode are already eager here
    /// since no histogram-approximation is used; kept for parity with the
    /// `update()` contract).
    pub fn update(&mut self) {
        match self {
            AggNode::Filter { children, .. } => {
                for child in children.values_mut() {
                    child.update();
                }
            }
            AggNode::Values { buckets, .. } | AggNode::Terms { buckets, .. } => {
                for bucket in buckets.values_mut() {
                    for child in bucket.children.values_mut() {
                        child.update();
                    }
                }
            }
            AggNode::Histogram { buckets, .. } => {
                for bucket in buckets.values_mut() {
                    for child in bucket.children.values_mut() {
                        child.update();
                    }
                }
            }
            AggNode::Range { buckets, .. } => {
                for bucket in buckets.iter_mut() {
                    for child in bucket.children.values_mut() {
                        child.update();
                    }
                }
            }
            AggNode::Metric { .. } => {}
        }
    }

    pub fn get_result(&self) -> Value {
        match self {
            AggNode::Metric { kind, state, .. } => metric_result(*kind, state),
            AggNode::Filter { doc_count, children, .. } => {
                let mut map = Map::new();
                map.insert("doc_count".into(), Value::from(*doc_count));
                for (name, child) in children {
                    map.insert(name.clone(), child.get_result());
                }
                Value::Object(map)
            }
            AggNode::Values { doc_count, buckets, .. } | AggNode::Terms { doc_count, buckets, .. } => {
                let mut map = Map::new();
                map.insert("doc_count".into(), Value::from(*doc_count));
                let mut items = Vec::new();
                for (key, bucket) in buckets {
                    let mut entry = Map::new();
                    entry.insert("key".into(), Value::String(key.clone()));
                    entry.insert("doc_count".into(), Value::from(bucket.doc_count));
                    for (name, child) in &bucket.children {
                        entry.insert(name.clone(), child.get_result());
                    }
                    items.push(Value::Object(entry));
                }
                map.insert("buckets".into(), Value::Array(items));
                Value::Object(map)
            }
            AggNode::Histogram { doc_count, buckets, .. } => {
                let mut map = Map::new();
                map.insert("doc_count".into(), Value::from(*doc_count));
                let mut items = Vec::new();
                for (key, bucket) in buckets {
                    let mut entry = Map::new();
                    entry.insert("key".into(), Value::from(*key));
                    entry.insert("doc_count".into(), Value::from(bucket.doc_count));
                    for (name, child) in &bucket.children {
                        entry.insert(name.clone(), child.get_result());
                    }
                    items.push(Value::Object(entry));
                }
                map.insert("buckets".into(), Value::Array(items));
                Value::Object(map)
            }
            AggNode::Range { doc_count, ranges, buckets, .. } => {
                let mut map = Map::new();
                map.insert("doc_count".into(), Value::from(*doc_count));
                let mut items = Vec::new();
                for ((from, to), bucket) in ranges.iter().zip(buckets) {
                    let mut entry = Map::new();
                    if let Some(f) = from {
                        entry.insert("from".into(), Value::from(*f));
                    }
                    if let Some(t) = to {
                        entry.insert("to".into(), Value::from(*t));
                    }
                    entry.insert("doc_count".into(), Value::from(bucket.doc_count));
                    for (name, child) in &bucket.children {
                        entry.insert(name.clone(), child.get_result());
                    }
                    items.push(Value::Object(entry));
                }
                map.insert("buckets".into(), Value::Array(items));
                Value::Object(map)
            }
        }
    }

    pub fn get_agg(&self, name: &str) -> Option<&AggNode> {
        match self {
            AggNode::Filter { children, .. } => children.get(name),
            _ => None,
        }
    }
}

fn value_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn metric_result(kind: MetricKind, state: &MetricState) -> Value {
    let mut stats = |extended: bool| {
        let mut map = Map::new();
        map.insert("count".into(), Value::from(state.count));
        map.insert("min".into(), Value::from(state.min));
        map.insert("max".into(), Value::from(state.max));
        map.insert("avg".into(), Value::from(state.mean()));
        map.insert("sum".into(), Value::from(state.sum));
        if extended {
            map.insert("variance".into(), Value::from(state.variance()));
            map.insert("std_deviation".into(), Value::from(state.variance().sqrt()));
        }
        Value::Object(map)
    };
    match kind {
        MetricKind::Count => Value::from(state.count),
        MetricKind::Sum => Value::from(state.sum),
        MetricKind::Avg => Value::from(state.mean()),
        MetricKind::Min => Value::from(state.min),
        MetricKind::Max => Value::from(state.max),
        MetricKind::Variance => Value::from(state.variance()),
        MetricKind::StdDev => Value::from(state.variance().sqrt()),
        MetricKind::Median => Value::from(state.median()),
        MetricKind::Mode => Value::from(state.mode()),
        MetricKind::Stats => stats(false),
        MetricKind::ExtendedStats => stats(true),
    }
}

/// The root match-spy: observes each matched document, tracking a total
/// count alongside the named top-level aggregations.
pub struct AggregationMatchSpy {
    total: u64,
    roots: BTreeMap<String, AggNode>,
}

impl AggregationMatchSpy {
    pub fn new(specs: &[(String, AggSpec)]) -> Self {
        let roots = specs.iter().map(|(name, spec)| (name.clone(), AggNode::new(spec))).collect();
        AggregationMatchSpy { total: 0, roots }
    }

    pub fn observe(&mut self, doc: &Document) {
        self.total += 1;
        for agg in self.roots.values_mut() {
            agg.observe(doc);
        }
    }

    pub fn finish(&mut self) {
        for agg in self.roots.values_mut() {
            agg.update();
        }
    }

    pub fn get_result(&self) -> Value {
        let mut map = Map::new();
        map.insert("_total".into(), Value::from(self.total));
        for (name, agg) in &self.roots {
            map.insert(name.clone(), agg.get_result());
        }
        Value::Object(map)
    }
}

/// Parses a DSL `{name: {_count: {...}}, ...}`-shaped `_aggs` object into
/// `AggSpec`s. Unknown aggregation kinds are rejected with `ClientError`.
pub fn parse_aggs(obj: &Value) -> Result<Vec<(String, AggSpec)>> {
    let map = obj.as_object().ok_or_else(|| Error::client("_aggs must be an object"))?;
    map.iter().map(|(name, body)| Ok((name.clone(), parse_one(body)?))).collect()
}

fn parse_one(body: &Value) -> Result<AggSpec> {
    let map = body.as_object().ok_or_else(|| Error::client("aggregation body must be an object"))?;
    let mut sub_aggs = Vec::new();
    if let Some(nested) = map.get("_aggs") {
        sub_aggs = parse_aggs(nested)?;
    }
    for (key, params) in map {
        let field = |p: &Value| -> Result<String> {
            p.get("_field")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::client(format!("{key} requires _field")))
        };
        let kind = match key.as_str() {
            "_count" => Some(MetricKind::Count),
            "_sum" => Some(MetricKind::Sum),
            "_avg" => Some(MetricKind::Avg),
            "_min" => Some(MetricKind::Min),
            "_max" => Some(MetricKind::Max),
            "_variance" => Some(MetricKind::Variance),
            "_std_deviation" => Some(MetricKind::StdDev),
            "_median" => Some(MetricKind::Median),
            "_mode" => Some(MetricKind::Mode),
            "_stats" => Some(MetricKind::Stats),
            "_extended_stats" => Some(MetricKind::ExtendedStats),
            _ => None,
        };
        if let Some(kind) = kind {
            return Ok(AggSpec::Metric { kind, field: field(params)? });
        }
        match key.as_str() {
            "_filter" => {
                let f = field(params)?;
                let equals = params.get("_value").cloned().unwrap_or(Value::Null);
                return Ok(AggSpec::Filter { field: f, equals, sub_aggs });
            }
            "_values" | "_value" => {
                return Ok(AggSpec::Values { field: field(params)?, sub_aggs });
            }
            "_terms" | "_term" => {
                return Ok(AggSpec::Terms { field: field(params)?, sub_aggs });
            }
            "_histogram" => {
                let f = field(params)?;
                let interval = params.get("_interval").and_then(Value::as_f64).ok_or_else(|| Error::client("_histogram requires _interval"))?;
                if interval <= 0.0 {
                    return Err(Error::client("_histogram requires interval > 0"));
                }
                let offset = params.get("_offset").and_then(Value::as_f64).unwrap_or(0.0);
                return Ok(AggSpec::Histogram { field: f, interval, offset, sub_aggs });
            }
            "_range" => {
                let f = field(params)?;
                let ranges = params
                    .get("_ranges")
                    .and_then(Value::as_array)
                    .ok_or_else(|| Error::client("_range requires _ranges"))?
                    .iter()
                    .map(|r| {
                        let from = r.get("_from").and_then(Value::as_f64);
                        let to = r.get("_to").and_then(Value::as_f64);
                        (from, to)
                    })
                    .collect();
                return Ok(AggSpec::Range { field: f, ranges, sub_aggs });
            }
            "_aggs" => continue,
            _ => {}
        }
    }
    Err(Error::client("unrecognised aggregation body"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(ages: &[i64]) -> Vec<Document> {
        ages.iter().map(|a| Document::new().with("age", *a)).collect()
    }

    #[test]
    fn avg_metric_matches_s3_scenario() {
        let spec = AggSpec::Metric { kind: MetricKind::Avg, field: "age".into() };
        let mut node = AggNode::new(&spec);
        for doc in docs(&[20, 30, 40]) {
            node.observe(&doc);
        }
        assert_eq!(node.get_result(), json!(30.0));
    }

    #[test]
    fn count_sum_min_max_are_consistent() {
        let mut spy = AggregationMatchSpy::new(&[
            ("c".into(), AggSpec::Metric { kind: MetricKind::Count, field: "age".into() }),
            ("s".into(), AggSpec::Metric { kind: MetricKind::Sum, field: "age".into() }),
            ("mn".into(), AggSpec::Metric { kind: MetricKind::Min, field: "age".into() }),
            ("mx".into(), AggSpec::Metric { kind: MetricKind::Max, field: "age".into() }),
        ]);
        for doc in docs(&[20, 30, 40]) {
            spy.observe(&doc);
        }
        let result = spy.get_result();
        assert_eq!(result["_total"], json!(3));
        assert_eq!(result["c"], json!(3));
        assert_eq!(result["s"], json!(90.0));
        assert_eq!(result["mn"], json!(20.0));
        assert_eq!(result["mx"], json!(40.0));
    }

    #[test]
    fn histogram_partitions_observations() {
        let spec = AggSpec::Histogram { field: "age".into(), interval: 10.0, offset: 0.0, sub_aggs: vec![] };
        let mut node = AggNode::new(&spec);
        for doc in docs(&[20, 21, 30, 45]) {
            node.observe(&doc);
        }
        let result = node.get_result();
        let buckets = result["buckets"].as_array().unwrap();
        let total: u64 = buckets.iter().map(|b| b["doc_count"].as_u64().unwrap()).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn range_buckets_cover_union_of_intervals() {
        let spec = AggSpec::Range {
            field: "age".into(),
            ranges: vec![(None, Some(30.0)), (Some(30.0), None)],
            sub_aggs: vec![],
        };
        let mut node = AggNode::new(&spec);
        for doc in docs(&[20, 30, 40]) {
            node.observe(&doc);
        }
        let result = node.get_result();
        let buckets = result["buckets"].as_array().unwrap();
        assert_eq!(buckets[0]["doc_count"], json!(1));
        assert_eq!(buckets[1]["doc_count"], json!(2));
    }

    #[test]
    fn parses_dsl_aggs_object() {
        let parsed = parse_aggs(&json!({"a": {"_avg": {"_field": "age"}}})).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(matches!(parsed[0].1, AggSpec::Metric { kind: MetricKind::Avg, .. }));
    }

    #[test]
    fn histogram_rejects_non_positive_interval() {
        let err = parse_aggs(&json!({"h": {"_histogram": {"_field": "age", "_interval": 0}}}));
        assert!(err.is_err());
    }
}
