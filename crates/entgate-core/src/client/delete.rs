//! Delete builders.

use super::EntityClient;
use crate::catalog::FIELD_ID;
use crate::error::Result;
use crate::pipeline::{Context, Operation};
use entgate_model::Predicate;

/// Deletes one row by id.
pub struct DeleteOneBuilder<'p> {
    client: EntityClient<'p>,
    id: String,
}

impl<'p> DeleteOneBuilder<'p> {
    pub(super) fn new(client: EntityClient<'p>, id: String) -> Self {
        Self { client, id }
    }

    /// Delete the row.
    ///
    /// Returns `NotFound` when the row does not exist, is already
    /// soft-deleted, or is outside the actor's scope.
    pub fn exec(self, cx: &Context<'_>) -> Result<()> {
        let op = Operation::delete(self.client.kind(), cx.actor.clone())
            .with_predicate(Predicate::eq(FIELD_ID, self.id))
            .with_options(cx.options)
            .single();
        self.client.execute(op, cx)?;
        Ok(())
    }
}

/// Deletes every matching row.
pub struct DeleteBuilder<'p> {
    client: EntityClient<'p>,
    predicates: Vec<Predicate>,
}

impl<'p> DeleteBuilder<'p> {
    pub(super) fn new(client: EntityClient<'p>) -> Self {
        Self {
            client,
            predicates: Vec::new(),
        }
    }

    /// Add a filter; filters are AND-ed.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Delete, returning the number of rows removed or soft-deleted.
    pub fn exec(self, cx: &Context<'_>) -> Result<u64> {
        let mut op = Operation::delete(self.client.kind(), cx.actor.clone()).with_options(cx.options);
        op.predicates = self.predicates;
        Ok(self.client.execute(op, cx)?.affected)
    }
}
