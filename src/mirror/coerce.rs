//! Row normalization from SQLite values to JSON scalars.
//!
//! SQLite has no boolean type and the snapshot stores flags as integers,
//! so a fixed set of known flag columns is mapped to `bool`. Every other
//! column keeps its storage class: integers stay integers, text stays
//! text, blobs are read as UTF-8 text.

use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value};

/// One normalized result row, keyed by column name.
pub type Row = Map<String, Value>;

/// Canonical scalar kind a column is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Passthrough,
}

/// Flag columns of the word table.
pub const BOOLEAN_COLUMNS: &[&str] = &["hasCard", "tracked", "isModern", "isPendingEnqueue", "isPendingApply"];

/// Column name to kind mapping applied to every fetched row.
#[derive(Debug, Clone)]
pub struct RowShape {
    booleans: &'static [&'static str],
}

impl RowShape {
    pub const fn new(booleans: &'static [&'static str]) -> Self {
        Self { booleans }
    }

    pub fn kind_of(&self, column: &str) -> ColumnKind {
        if self.booleans.contains(&column) {
            ColumnKind::Bool
        } else {
            ColumnKind::Passthrough
        }
    }

    pub fn coerce(&self, column: &str, raw: ValueRef<'_>) -> Value {
        let value = scalar(raw);
        match self.kind_of(column) {
            ColumnKind::Bool => to_bool(value),
            ColumnKind::Passthrough => value,
        }
    }
}

impl Default for RowShape {
    fn default() -> Self {
        Self::new(BOOLEAN_COLUMNS)
    }
}

fn scalar(raw: ValueRef<'_>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

fn to_bool(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => Value::Bool(s == "1" || s.eq_ignore_ascii_case("true")),
        other => other,
    }
}
