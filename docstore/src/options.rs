use serde::{Deserialize, Serialize};

use crate::record::RecordRoot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub direction: Direction,
}

impl SortField {
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

/// Per-call configuration bag. A caller's `Options` value is never mutated
/// by the store; derived flags are injected into internal clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    /// Overrides the store-wide authorization toggle for this call.
    pub authorization: Option<bool>,
    /// Overrides the store-wide schema validation toggle for this call.
    pub schema_validation: Option<bool>,
    /// Overrides the store-wide previous-record fetch toggle for this call.
    /// Only honored while validation or authorization is active.
    pub fetch_prev_record: Option<bool>,
    pub skip: Option<usize>,
    /// Page size. Defaults to the store's configured page size.
    pub limit: Option<usize>,
    pub sort: Vec<SortField>,
    /// Fields to return. `None` returns the full record.
    pub projection: Option<Vec<String>>,
    /// Also run a count query and populate `ListResult::total`.
    pub count: bool,
    /// Treat write payloads as raw backend operator documents.
    pub raw_query: bool,
    /// Marks the collection-level read permission as already checked, so
    /// repeated paged calls within one logical request skip the re-check.
    /// Set internally, once per logical request.
    pub pre_authorized: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResult {
    pub records: Vec<RecordRoot>,
    /// Matching-record count as of the count query. Stays 0 unless
    /// `Options::count` was set.
    pub total: usize,
    /// Set when a drain collected a different number of records than the
    /// first-observed total, i.e. the collection mutated mid-drain.
    pub is_record_changed: bool,
}
