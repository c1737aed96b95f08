//! Soft-delete hook.

use super::context::Context;
use super::hook::{Hook, Next};
use super::operation::{OpKind, OpOutput, Operation};
use crate::catalog::{FIELD_DELETED_AT, FIELD_DELETED_BY};
use crate::error::Result;
use crate::ids::now_micros;
use entgate_model::{FieldChanges, Predicate, Value};

/// Turns deletes into updates stamping `deleted_at`/`deleted_by`, and hides
/// soft-deleted rows from queries and updates.
///
/// `skip_soft_delete` widens queries and updates to deleted rows. Deletes
/// always target live rows, so deleting a row twice finds nothing.
/// Installed only for soft-delete entities.
pub struct SoftDeleteHook;

impl Hook for SoftDeleteHook {
    fn name(&self) -> &'static str {
        "soft_delete"
    }

    fn handle(&self, mut op: Operation, cx: &Context<'_>, next: Next<'_>) -> Result<OpOutput> {
        match op.kind {
            OpKind::Create => {}
            OpKind::Query | OpKind::Update => {
                if !op.options.skip_soft_delete {
                    op.predicates.push(Predicate::is_null(FIELD_DELETED_AT));
                }
            }
            OpKind::Delete => {
                op.predicates.push(Predicate::is_null(FIELD_DELETED_AT));
                op.kind = OpKind::Update;
                op.rows = vec![FieldChanges::new()
                    .with(FIELD_DELETED_AT, Value::Timestamp(now_micros()))
                    .with(FIELD_DELETED_BY, op.actor.subject_id())];
                op.annotations.soft_delete = true;
                tracing::debug!(entity = %op.entity, "delete rewritten as soft delete");
            }
        }
        next.run(op, cx)
    }
}
