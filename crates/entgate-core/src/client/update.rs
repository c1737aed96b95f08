//! Update builders.

use super::EntityClient;
use crate::catalog::FIELD_ID;
use crate::error::{Error, Result};
use crate::pipeline::{Context, Operation};
use entgate_model::{FieldChanges, Predicate, Row, Value};

/// Updates one row by id.
pub struct UpdateOneBuilder<'p> {
    client: EntityClient<'p>,
    id: String,
    changes: FieldChanges,
}

impl<'p> UpdateOneBuilder<'p> {
    pub(super) fn new(client: EntityClient<'p>, id: String) -> Self {
        Self {
            client,
            id,
            changes: FieldChanges::new(),
        }
    }

    /// Assign a field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.set(field, value);
        self
    }

    /// Set a field to NULL.
    pub fn clear(mut self, field: impl Into<String>) -> Self {
        self.changes.set(field, Value::Null);
        self
    }

    /// Apply the update and return the row as stored.
    ///
    /// Returns `NotFound` when the row does not exist, is soft-deleted, or
    /// is outside the actor's scope.
    pub fn save(self, cx: &Context<'_>) -> Result<Row> {
        let kind = self.client.kind();
        let mut changes = self.changes;
        if changes.is_empty() {
            return Err(Error::validation(kind, None, "update assigns no fields"));
        }
        self.client.prepare_update(&mut changes, &cx.actor);

        let op = Operation::update(kind, cx.actor.clone(), changes)
            .with_predicate(Predicate::eq(FIELD_ID, self.id))
            .with_options(cx.options)
            .single();
        let output = self.client.execute(op, cx)?;
        output
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(kind))
    }
}

/// Updates every matching row.
pub struct UpdateBuilder<'p> {
    client: EntityClient<'p>,
    predicates: Vec<Predicate>,
    changes: FieldChanges,
}

impl<'p> UpdateBuilder<'p> {
    pub(super) fn new(client: EntityClient<'p>) -> Self {
        Self {
            client,
            predicates: Vec::new(),
            changes: FieldChanges::new(),
        }
    }

    /// Add a filter; filters are AND-ed.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Assign a field.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.set(field, value);
        self
    }

    /// Set a field to NULL.
    pub fn clear(mut self, field: impl Into<String>) -> Self {
        self.changes.set(field, Value::Null);
        self
    }

    /// Apply the update, returning the number of rows changed.
    pub fn exec(self, cx: &Context<'_>) -> Result<u64> {
        let kind = self.client.kind();
        let mut changes = self.changes;
        if changes.is_empty() {
            return Err(Error::validation(kind, None, "update assigns no fields"));
        }
        self.client.prepare_update(&mut changes, &cx.actor);

        let mut op = Operation::update(kind, cx.actor.clone(), changes).with_options(cx.options);
        op.predicates = self.predicates;
        Ok(self.client.execute(op, cx)?.affected)
    }
}
