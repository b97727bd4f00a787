//! Reading normalization
//!
//! A sensor's history node has been written in three shapes over time: a
//! single flat record, a map of generated push keys to records, and a plain
//! list. [`HistoryShape`] names the shape once so that every consumer reads
//! history through the same code path.

mod timestamp;
mod values;

pub use timestamp::{resolve_timestamp, try_resolve_timestamp, OLDEST};
pub use values::{value_to_bool, value_to_float, value_to_string};

use crate::models::Record;
use crate::storage::paths::SENSOR_TOKEN_CHILDREN;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Reverse;
use std::str::FromStr;

/// Fields that only a flat reading record carries at its top level
const RECORD_IDENTITY_FIELDS: [&str; 2] = ["timestamp", "sensor_id"];

/// The storage shape of a history node
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryShape {
    /// Nothing stored, or a scalar where a record was expected
    Absent,
    /// One flat record
    Single(Record),
    /// Generated key → record, in key order; token children are skipped
    Keyed(Vec<(String, Record)>),
    /// Plain list of records
    Sequence(Vec<Record>),
}

impl HistoryShape {
    /// Classify a raw node as read from the tree store
    pub fn classify(node: Option<&Value>) -> Self {
        match node {
            Some(Value::Array(items)) => HistoryShape::Sequence(
                items.iter().filter_map(|v| v.as_object().cloned()).collect(),
            ),
            Some(Value::Object(map)) if is_keyed(map) => HistoryShape::Keyed(
                map.iter()
                    .filter(|(k, _)| !SENSOR_TOKEN_CHILDREN.contains(&k.as_str()))
                    .filter_map(|(k, v)| v.as_object().map(|r| (k.clone(), r.clone())))
                    .collect(),
            ),
            Some(Value::Object(map)) => HistoryShape::Single(map.clone()),
            _ => HistoryShape::Absent,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            HistoryShape::Absent => Vec::new(),
            HistoryShape::Single(record) => vec![record],
            HistoryShape::Keyed(entries) => entries.into_iter().map(|(_, r)| r).collect(),
            HistoryShape::Sequence(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HistoryShape::Absent => 0,
            HistoryShape::Single(_) => 1,
            HistoryShape::Keyed(entries) => entries.len(),
            HistoryShape::Sequence(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A map is a keyed collection when it nests records and has no
/// top-level identity of its own
fn is_keyed(map: &Record) -> bool {
    let nests_records = map.values().any(Value::is_object);
    let has_identity = RECORD_IDENTITY_FIELDS
        .iter()
        .any(|field| map.get(*field).is_some_and(|v| !v.is_null() && !v.is_object()));
    nests_records && !has_identity
}

/// Sort direction for timestamp ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "desc" | "newest" => Ok(SortOrder::NewestFirst),
            "asc" | "oldest" => Ok(SortOrder::OldestFirst),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// Flatten any history node into its records, in storage order
pub fn normalize(node: Option<&Value>) -> Vec<Record> {
    HistoryShape::classify(node).into_records()
}

/// The most recent record of a history node
pub fn latest(node: Option<&Value>) -> Option<Record> {
    latest_of(normalize(node))
}

/// The most recent of already-normalized records
///
/// Equal timestamps keep input order, so the first of the tied records wins.
pub fn latest_of(mut records: Vec<Record>) -> Option<Record> {
    sort_by_timestamp(&mut records, SortOrder::NewestFirst);
    records.into_iter().next()
}

/// Stable sort by resolved timestamp
pub fn sort_by_timestamp(records: &mut [Record], order: SortOrder) {
    match order {
        SortOrder::NewestFirst => records.sort_by_cached_key(|r| Reverse(record_timestamp(r))),
        SortOrder::OldestFirst => records.sort_by_cached_key(record_timestamp),
    }
}

/// Ordered, optionally truncated history of a node
pub fn history(node: Option<&Value>, order: SortOrder, limit: Option<usize>) -> Vec<Record> {
    let mut records = normalize(node);
    sort_by_timestamp(&mut records, order);
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    records
}

/// Resolved timestamp of a record, [`OLDEST`] when missing or unreadable
pub fn record_timestamp(record: &Record) -> DateTime<Utc> {
    resolve_timestamp(record.get("timestamp"))
}
