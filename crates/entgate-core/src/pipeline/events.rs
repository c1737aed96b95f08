//! Change events.
//!
//! Listeners registered for an entity kind receive one [`ChangeEvent`] per
//! committed mutation that changed at least one row. Events of operations
//! running inside a caller-owned transaction are held until it commits and
//! dropped if it rolls back.

use super::context::Context;
use super::hook::{Hook, Next};
use super::operation::{OpKind, OpOutput, Operation};
use crate::error::{Error, EventDeliveryError, Result};
use crate::ids::now_micros;
use crate::storage::DeferredEvent;
use std::sync::Arc;

/// A committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub entity: String,
    /// Soft deletes are reported as `Delete`.
    pub operation: OpKind,
    /// Ids of the changed rows, in statement order.
    pub entity_ids: Vec<String>,
    /// Fields the mutation assigned; empty for deletes.
    pub changed_fields: Vec<String>,
    pub actor_id: String,
    pub tenant_id: String,
    /// Microseconds since the Unix epoch.
    pub occurred_at: i64,
}

/// Receives change events.
pub trait ChangeListener: Send + Sync {
    /// Name used in logs and delivery errors.
    fn name(&self) -> &'static str;

    fn on_change(&self, event: &ChangeEvent) -> Result<()>;
}

/// Hand `event` to every listener in registration order.
///
/// A failing listener does not stop the others; the first failure is
/// returned.
pub(crate) fn deliver(
    listeners: &[Arc<dyn ChangeListener>],
    event: &ChangeEvent,
) -> Option<(&'static str, Error)> {
    let mut first_failure = None;
    for listener in listeners {
        if let Err(e) = listener.on_change(event) {
            tracing::warn!(
                listener = listener.name(),
                entity = %event.entity,
                operation = %event.operation,
                error = %e,
                "change listener failed"
            );
            first_failure.get_or_insert((listener.name(), e));
        }
    }
    first_failure
}

/// Emits a [`ChangeEvent`] once the wrapped mutation has committed.
///
/// Sits after custom hooks and before history, so the event describes the
/// operation as finally executed.
pub struct EventHook {
    listeners: Arc<[Arc<dyn ChangeListener>]>,
}

impl EventHook {
    pub fn new(listeners: Vec<Arc<dyn ChangeListener>>) -> Self {
        Self {
            listeners: listeners.into(),
        }
    }
}

impl Hook for EventHook {
    fn name(&self) -> &'static str {
        "events"
    }

    fn handle(&self, mut op: Operation, cx: &Context<'_>, next: Next<'_>) -> Result<OpOutput> {
        if op.kind == OpKind::Query {
            return next.run(op, cx);
        }

        let operation = if op.annotations.soft_delete {
            OpKind::Delete
        } else {
            op.kind
        };
        let changed_fields = match operation {
            OpKind::Delete | OpKind::Query => Vec::new(),
            OpKind::Create | OpKind::Update => op
                .field_changes()
                .map(|changes| changes.field_names().map(str::to_string).collect())
                .unwrap_or_default(),
        };
        let entity = op.entity.clone();
        let actor = op.actor.clone();
        op.annotations.capture_snapshots = true;

        let result = next.run(op, cx);
        let event = {
            // A failed audit write still committed the data.
            let committed = match &result {
                Ok(output) => Some(output),
                Err(e) => e.committed_output(),
            };
            committed
                .filter(|output| !output.changes.is_empty())
                .map(|output| ChangeEvent {
                    entity,
                    operation,
                    entity_ids: output.changes.iter().map(|c| c.id.clone()).collect(),
                    changed_fields,
                    actor_id: actor.subject_id().to_string(),
                    tenant_id: actor.tenant_id().to_string(),
                    occurred_at: now_micros(),
                })
        };
        let event = match event {
            Some(event) => event,
            None => return result,
        };

        if let Some(tx) = cx.tx() {
            tracing::debug!(entity = %event.entity, operation = %operation, "change event deferred until commit");
            tx.defer_event(DeferredEvent {
                listeners: self.listeners.clone(),
                event,
            });
            return result;
        }

        let failure = deliver(&self.listeners, &event);
        match (result, failure) {
            (Ok(output), Some((listener, e))) => Err(EventDeliveryError {
                entity: event.entity,
                operation,
                listener,
                reason: e.to_string(),
                committed: Some(output),
            }
            .into()),
            (result, _) => {
                tracing::trace!(entity = %event.entity, operation = %operation, "change event delivered");
                result
            }
        }
    }
}
