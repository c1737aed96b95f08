//! Create builders.

use super::EntityClient;
use crate::error::{Error, Result};
use crate::pipeline::{Context, Operation};
use entgate_model::{FieldChanges, Row, Value};

/// Builds a single-row create.
pub struct CreateBuilder<'p> {
    client: EntityClient<'p>,
    changes: FieldChanges,
}

impl<'p> CreateBuilder<'p> {
    pub(super) fn new(client: EntityClient<'p>) -> Self {
        Self {
            client,
            changes: FieldChanges::new(),
        }
    }

    /// Assign a field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.set(field, value);
        self
    }

    /// Assign several fields at once.
    pub fn set_all(mut self, changes: FieldChanges) -> Self {
        for (field, value) in changes.iter() {
            self.changes.set(field, value.clone());
        }
        self
    }

    /// Insert the row and return it as stored.
    pub fn save(self, cx: &Context<'_>) -> Result<Row> {
        let kind = self.client.kind();
        let mut changes = self.changes;
        self.client.prepare_create(&mut changes, &cx.actor);

        let op = Operation::create(kind, cx.actor.clone(), vec![changes]).with_options(cx.options);
        let output = self.client.execute(op, cx)?;
        output
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(kind))
    }
}

/// Builds a multi-row create. Every row is validated before any is
/// written, and the rows are inserted by a single statement, so either all
/// are created or none.
pub struct CreateBulkBuilder<'p> {
    client: EntityClient<'p>,
    rows: Vec<FieldChanges>,
}

impl<'p> CreateBulkBuilder<'p> {
    pub(super) fn new(client: EntityClient<'p>, rows: Vec<FieldChanges>) -> Self {
        Self { client, rows }
    }

    /// Add another row.
    pub fn add(mut self, row: FieldChanges) -> Self {
        self.rows.push(row);
        self
    }

    /// Insert the rows, returned in input order.
    pub fn save(self, cx: &Context<'_>) -> Result<Vec<Row>> {
        let mut rows = self.rows;
        for row in &mut rows {
            self.client.prepare_create(row, &cx.actor);
        }
        let op = Operation::create(self.client.kind(), cx.actor.clone(), rows).with_options(cx.options);
        Ok(self.client.execute(op, cx)?.rows)
    }
}
