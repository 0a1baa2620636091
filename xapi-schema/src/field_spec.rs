//! [`FieldSpec`]: the effective specification of one field, reachable from
//! the schema root by a dotted path.

use serde::{Deserialize, Serialize};

/// The two-level type of a field: the outer shape, then (for `Concrete`)
/// which scalar/compound kind it resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Foreign,
    Object,
    Array,
    Concrete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcreteType {
    Empty,
    Keyword,
    Text,
    StringLegacy,
    Integer,
    Positive,
    Float,
    Boolean,
    Date,
    Time,
    TimeDelta,
    Uuid,
    Script,
    Geo,
    Array,
    Object,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFlags {
    pub terms: bool,
    pub values: bool,
    pub positions: bool,
    pub spelling: bool,
}

impl IndexFlags {
    pub fn all() -> Self {
        IndexFlags { terms: true, values: true, positions: false, spelling: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopStrategy {
    None,
    StopOnly,
    StemAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StemStrategy {
    None,
    Stemmed,
    StemmedWords,
}

/// The effective specification of a field: its shape, storage coordinates
/// (prefix/slot), indexing behaviour and accuracy buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub path: String,
    pub kind: FieldKind,
    pub concrete: Option<ConcreteType>,
    pub prefix: Vec<u8>,
    pub slot: u32,
    pub bool_term: bool,
    pub index: IndexFlags,
    pub stop_strategy: StopStrategy,
    pub stem_strategy: StemStrategy,
    pub stem_language: Option<String>,
    /// Sorted ascending accuracy bucket thresholds (years for dates,
    /// powers of ten for numerics, HTM levels for geo).
    pub accuracy: Vec<i64>,
    pub accuracy_prefixes: Vec<Vec<u8>>,
    pub partials: Option<f64>,
    pub error: Option<f64>,
    pub namespace: bool,
    pub partial_paths: bool,
}

impl FieldSpec {
    pub fn new(path: impl Into<String>) -> Self {
        FieldSpec {
            path: path.into(),
            kind: FieldKind::Concrete,
            concrete: None,
            prefix: Vec::new(),
            slot: 0,
            bool_term: false,
            index: IndexFlags::all(),
            stop_strategy: StopStrategy::StopOnly,
            stem_strategy: StemStrategy::Stemmed,
            stem_language: None,
            accuracy: Vec::new(),
            accuracy_prefixes: Vec::new(),
            partials: None,
            error: None,
            namespace: false,
            partial_paths: false,
        }
    }

    pub fn is_concrete(&self) -> bool {
        self.kind == FieldKind::Concrete
    }
}
