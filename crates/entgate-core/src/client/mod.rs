//! Entity clients.
//!
//! Each client builds an [`Operation`](crate::pipeline::Operation) and hands
//! it to its entity's hook chain. Errors always come back as values; there
//! are no panicking variants.

mod create;
mod delete;
mod history;
mod query;
mod update;

pub use create::{CreateBuilder, CreateBulkBuilder};
pub use delete::{DeleteBuilder, DeleteOneBuilder};
pub use query::QueryBuilder;
pub use update::{UpdateBuilder, UpdateOneBuilder};

use crate::catalog::{
    EntitySchema, FIELD_CREATED_AT, FIELD_CREATED_BY, FIELD_ID, FIELD_UPDATED_AT, FIELD_UPDATED_BY,
};
use crate::ids::{new_id, now_micros};
use crate::error::Result;
use crate::pipeline::{Context, OpOutput, Operation, Pipeline};
use crate::security::Actor;
use entgate_model::{FieldChanges, Value};
use std::sync::Arc;

/// Entry point for operations on one entity kind.
#[derive(Clone, Copy)]
pub struct EntityClient<'p> {
    pipeline: &'p Pipeline,
    schema: &'p Arc<EntitySchema>,
}

impl<'p> EntityClient<'p> {
    pub(crate) fn new(pipeline: &'p Pipeline, schema: &'p Arc<EntitySchema>) -> Self {
        Self { pipeline, schema }
    }

    pub fn schema(&self) -> &EntitySchema {
        self.schema
    }

    /// Create one row.
    pub fn create(&self) -> CreateBuilder<'p> {
        CreateBuilder::new(*self)
    }

    /// Create several rows in one statement.
    pub fn create_bulk(&self, rows: Vec<FieldChanges>) -> CreateBulkBuilder<'p> {
        CreateBulkBuilder::new(*self, rows)
    }

    /// Update the row with `id`.
    pub fn update_one(&self, id: impl Into<String>) -> UpdateOneBuilder<'p> {
        UpdateOneBuilder::new(*self, id.into())
    }

    /// Update every matching row.
    pub fn update(&self) -> UpdateBuilder<'p> {
        UpdateBuilder::new(*self)
    }

    /// Delete the row with `id`.
    pub fn delete_one(&self, id: impl Into<String>) -> DeleteOneBuilder<'p> {
        DeleteOneBuilder::new(*self, id.into())
    }

    /// Delete every matching row.
    pub fn delete(&self) -> DeleteBuilder<'p> {
        DeleteBuilder::new(*self)
    }

    /// Query rows.
    pub fn query(&self) -> QueryBuilder<'p> {
        QueryBuilder::new(*self)
    }

    fn kind(&self) -> &'p str {
        let schema: &'p EntitySchema = self.schema;
        &schema.kind
    }

    fn execute(&self, op: Operation, cx: &Context<'_>) -> Result<OpOutput> {
        self.pipeline.execute(op, cx)
    }

    /// Fill identity, audit and owner defaults for a new row.
    fn prepare_create(&self, changes: &mut FieldChanges, actor: &Actor) {
        let now = Value::Timestamp(now_micros());
        changes.set_default(FIELD_ID, new_id());
        changes.set_default(FIELD_CREATED_AT, now.clone());
        changes.set_default(FIELD_UPDATED_AT, now);
        changes.set_default(FIELD_CREATED_BY, actor.subject_id());
        changes.set_default(FIELD_UPDATED_BY, actor.subject_id());
        if let Some(owner) = &self.schema.owner_field {
            changes.set_default(owner, actor.tenant_id());
        }
    }

    /// Stamp update audit columns.
    fn prepare_update(&self, changes: &mut FieldChanges, actor: &Actor) {
        changes.set(FIELD_UPDATED_AT, Value::Timestamp(now_micros()));
        changes.set(FIELD_UPDATED_BY, actor.subject_id());
    }
}
