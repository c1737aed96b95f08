//! History reads scoped by policy.

use super::EntityClient;
use crate::catalog::FIELD_ID;
use crate::error::{Error, Result};
use crate::pipeline::{AuditRecord, Context, HistoryScope};
use entgate_model::Predicate;

impl<'p> EntityClient<'p> {
    /// History of one row, oldest first.
    ///
    /// The row must be visible to the actor under the entity's query policy,
    /// soft-deleted rows included; otherwise the result is empty. A policy
    /// that refuses the actor any read fails with `Authorization`.
    pub fn history_of(&self, id: &str, cx: &Context<'_>) -> Result<Vec<AuditRecord>> {
        self.read_history(cx, Some(id), None)
    }

    /// The newest `limit` history records of rows the actor can see, oldest
    /// first.
    pub fn recent_history(&self, limit: u64, cx: &Context<'_>) -> Result<Vec<AuditRecord>> {
        self.read_history(cx, None, Some(limit))
    }

    fn read_history(
        &self,
        cx: &Context<'_>,
        id: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<AuditRecord>> {
        let schema = self.schema;
        if !schema.audited {
            return Err(Error::validation(
                &schema.kind,
                None,
                format!("entity '{}' is not audited", schema.kind),
            ));
        }
        cx.cancel.check("history read")?;

        let store = self.pipeline.history();
        // Internal actors read their own tenant's records directly, which
        // also covers rows that were hard deleted.
        if cx.actor.is_internal() {
            let scope = HistoryScope::Tenant {
                tenant_id: cx.actor.tenant_id(),
                entity_id: id,
            };
            return store.read(schema, scope, limit);
        }

        let mut visible = self.query().include_deleted();
        if let Some(id) = id {
            visible = visible.filter(Predicate::eq(FIELD_ID, id));
        }
        let refs = visible.ids(cx)?;
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(entity = %schema.kind, rows = refs.len(), "reading history");
        store.read(schema, HistoryScope::Refs(&refs), limit)
    }
}
