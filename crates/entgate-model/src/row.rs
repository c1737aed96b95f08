//! Materialized rows.

use crate::error::ModelError;
use crate::value::Value;
use crate::ID_FIELD;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A row read back from the store, with any edges the query plan loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    edges: BTreeMap<String, Vec<Row>>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a row from column values.
    pub fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        Self {
            fields,
            edges: BTreeMap::new(),
        }
    }

    /// The row's identifier, if it was selected.
    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Get a column value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a column value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// All column values.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Consume the row, returning its column values.
    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    /// Keep only the named columns.
    pub fn retain_fields(&mut self, keep: &BTreeSet<String>) {
        self.fields.retain(|name, _| keep.contains(name));
    }

    /// Attach the rows loaded for an edge.
    pub fn set_edge(&mut self, name: impl Into<String>, rows: Vec<Row>) {
        self.edges.insert(name.into(), rows);
    }

    /// Rows loaded for an edge.
    ///
    /// Returns `NotLoaded` if the edge was not part of the query plan, which
    /// is distinct from an edge that was loaded and found empty.
    pub fn edge(&self, name: &str) -> Result<&[Row], ModelError> {
        self.edges
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ModelError::NotLoaded(name.to_string()))
    }

    /// Names of the columns whose values differ between `self` and `other`.
    pub fn diff(&self, other: &Row) -> Vec<String> {
        let mut names: BTreeSet<&String> = self.fields.keys().collect();
        names.extend(other.fields.keys());
        names
            .into_iter()
            .filter(|name| self.fields.get(*name) != other.fields.get(*name))
            .cloned()
            .collect()
    }
}
