//! Response normalizer: any recognized payload shape → uniformly-keyed rows.
//!
//! Shapes are classified once into [`Shape`] and each tag has its own mapping
//! function. Nested containers are followed at most [`MAX_DEPTH`] levels.

use crate::models::{RawResultSet, Row};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Keys searched, in order, when the payload is a container object.
pub const CONTAINER_KEYS: &[&str] = &["data", "stocks", "results", "rows"];

/// Upper bound on container nesting before giving up.
pub const MAX_DEPTH: usize = 4;

/// Recognized payload shapes.
#[derive(Debug)]
pub enum Shape<'a> {
    /// Sequence whose items are objects (already row-shaped).
    RowList(&'a [Value]),
    /// Sequence of positional value lists.
    ValueList(&'a [Value]),
    /// Object wrapping the rows somewhere inside.
    NestedContainer(&'a Map<String, Value>),
    Unrecognized(&'a Value),
}

impl<'a> Shape<'a> {
    pub fn classify(raw: &'a Value) -> Self {
        match raw {
            Value::Array(items) if items.iter().all(Value::is_array) && !items.is_empty() => {
                Shape::ValueList(items)
            }
            Value::Array(items) => Shape::RowList(items),
            Value::Object(map) => Shape::NestedContainer(map),
            other => Shape::Unrecognized(other),
        }
    }
}

/// Normalize either a JSON payload or already-scraped table rows.
pub fn normalize_raw(raw: RawResultSet) -> Vec<Row> {
    match raw {
        RawResultSet::Json(value) => normalize(&value),
        RawResultSet::Table(rows) => rows,
    }
}

/// Convert a JSON payload into rows. Never fails: unrecognized input yields
/// whatever rows can be salvaged, possibly none.
pub fn normalize(raw: &Value) -> Vec<Row> {
    normalize_at(raw, 0)
}

fn normalize_at(raw: &Value, depth: usize) -> Vec<Row> {
    match Shape::classify(raw) {
        Shape::RowList(items) => rows_from_items(items),
        Shape::ValueList(items) => rows_from_value_lists(items),
        Shape::NestedContainer(map) => rows_from_container(map, depth),
        Shape::Unrecognized(v) => {
            debug!("Unrecognized payload ({}), no rows", kind(v));
            Vec::new()
        }
    }
}

/// The first object or list fixes the row shape. Objects pass through
/// untouched, positional lists get `Column_N` keys, and items of any other
/// kind are dropped.
fn rows_from_items(items: &[Value]) -> Vec<Row> {
    let Some(objects) = items.iter().find_map(|item| match item {
        Value::Object(_) => Some(true),
        Value::Array(_) => Some(false),
        _ => None,
    }) else {
        debug!("No object or list items among {}", items.len());
        return Vec::new();
    };

    let rows: Vec<Row> = items
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) if objects => Some(map.clone()),
            Value::Array(values) if !objects => Some(positional_row(values)),
            _ => None,
        })
        .collect();
    if rows.len() < items.len() {
        debug!(
            "Dropped {} items not shaped like the first row",
            items.len() - rows.len()
        );
    }
    rows
}

fn rows_from_value_lists(items: &[Value]) -> Vec<Row> {
    items
        .iter()
        .filter_map(Value::as_array)
        .map(|values| positional_row(values))
        .collect()
}

fn positional_row(values: &[Value]) -> Row {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("Column_{}", i + 1), v.clone()))
        .collect()
}

fn rows_from_container(map: &Map<String, Value>, depth: usize) -> Vec<Row> {
    if depth >= MAX_DEPTH {
        warn!("Container nesting deeper than {}, giving up", MAX_DEPTH);
        return Vec::new();
    }

    if let Some((key, inner)) = CONTAINER_KEYS
        .iter()
        .find_map(|k| map.get(*k).map(|v| (*k, v)))
    {
        debug!("Descending into {:?}", key);
        return normalize_at(inner, depth + 1);
    }

    // {"0": {...}, "1": {...}} is an index-keyed row collection
    let mut indexed: Vec<(usize, &Value)> = Vec::with_capacity(map.len());
    for (k, v) in map {
        match k.trim().parse::<usize>() {
            Ok(i) => indexed.push((i, v)),
            Err(_) => {
                indexed.clear();
                break;
            }
        }
    }
    if !indexed.is_empty() {
        indexed.sort_by_key(|(i, _)| *i);
        let values: Vec<Value> = indexed.into_iter().map(|(_, v)| v.clone()).collect();
        return rows_from_items(&values);
    }

    // Best effort: treat the values themselves as the row sequence
    let values: Vec<Value> = map.values().cloned().collect();
    rows_from_items(&values)
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
