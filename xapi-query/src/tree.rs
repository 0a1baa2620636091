//! The compiled query tree: a Xapian-style boolean query over terms,
//! value-slot ranges and "in" sets.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// A field-prefixed equality term.
    Term { prefix: Vec<u8>, text: String, bool_term: bool },
    /// A value-slot range `[from, to]`, either bound optional.
    Range { slot: u32, from: Option<Value>, to: Option<Value> },
    /// `OR` of terms/ranges compiled from an `_in` value set.
    In(Vec<QueryNode>),
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
    AndNot(Box<QueryNode>, Box<QueryNode>),
    AndMaybe(Box<QueryNode>, Box<QueryNode>),
    Filter(Box<QueryNode>, Box<QueryNode>),
    ScaleWeight(Box<QueryNode>, f64),
    MatchAll,
    MatchNothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct SortSpec {
    pub slot: u32,
    pub direction: SortDirection,
}

/// The query plus the siblings the DSL carries alongside it (`_sort`,
/// `_offset`, `_limit`, `_check_at_least`).
#[derive(Debug, Clone, Default)]
pub struct CompiledQuery {
    pub query: Option<QueryNode>,
    pub sort: Vec<SortSpec>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub check_at_least: Option<u64>,
}
