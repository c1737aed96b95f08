//! Caller-owned transactions.

use super::pool::PooledConnection;
use crate::catalog::EntitySchema;
use crate::error::{AuditWriteError, Error, EventDeliveryError, Result};
use crate::pipeline::{deliver, AuditRecord, AuditSink, ChangeEvent, ChangeListener, OpKind};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;

/// Audit records held back until the owning transaction commits.
pub(crate) struct DeferredAudit {
    pub sink: Arc<dyn AuditSink>,
    pub schema: Arc<EntitySchema>,
    pub operation: OpKind,
    pub records: Vec<AuditRecord>,
}

/// A change event held back until the owning transaction commits.
pub(crate) struct DeferredEvent {
    pub listeners: Arc<[Arc<dyn ChangeListener>]>,
    pub event: ChangeEvent,
}

/// A write transaction spanning several operations.
///
/// Operations run with a [`Context`](crate::pipeline::Context) that borrows
/// the transaction share its connection. History records and change events
/// produced inside the transaction are written and delivered only after
/// `commit` succeeds; rollback, or dropping the transaction without
/// committing, discards them.
pub struct Transaction {
    conn: Mutex<PooledConnection>,
    deferred: Mutex<Vec<DeferredAudit>>,
    events: Mutex<Vec<DeferredEvent>>,
    finished: bool,
}

impl Transaction {
    /// Start an immediate (write-locking) transaction on `conn`.
    pub(crate) fn begin(conn: PooledConnection) -> Result<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        tracing::debug!("transaction started");
        Ok(Self {
            conn: Mutex::new(conn),
            deferred: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            finished: false,
        })
    }

    /// Run `f` on the transaction's connection.
    pub(crate) fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Hold audit records until commit.
    pub(crate) fn defer_audit(&self, audit: DeferredAudit) {
        self.deferred.lock().push(audit);
    }

    /// Hold a change event until commit.
    pub(crate) fn defer_event(&self, event: DeferredEvent) {
        self.events.lock().push(event);
    }

    /// Number of change events waiting for commit.
    pub fn pending_events(&self) -> usize {
        self.events.lock().len()
    }

    /// Number of audit records waiting for commit.
    pub fn pending_audit_records(&self) -> usize {
        self.deferred.lock().iter().map(|d| d.records.len()).sum()
    }

    /// Commit, then write the deferred audit records and deliver the deferred
    /// change events, in the order the operations ran.
    ///
    /// If the commit succeeds but an audit write fails the data stays
    /// committed and `AuditWrite` is returned; remaining batches and events
    /// are still attempted. A listener failure alone returns
    /// `EventDelivery`.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let conn = self.conn.lock();
        if let Err(e) = conn.execute_batch("COMMIT") {
            tracing::warn!(error = %e, "commit failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK");
            return Err(Error::Storage(e));
        }

        let deferred = std::mem::take(&mut *self.deferred.lock());
        let mut first_failure: Option<AuditWriteError> = None;
        for audit in deferred {
            if let Err(e) = audit.sink.append(&conn, &audit.schema, &audit.records) {
                tracing::warn!(
                    entity = %audit.schema.kind,
                    operation = %audit.operation,
                    records = audit.records.len(),
                    error = %e,
                    "audit write failed after commit"
                );
                first_failure.get_or_insert(AuditWriteError {
                    entity: audit.schema.kind.clone(),
                    operation: audit.operation,
                    records: audit.records.len(),
                    reason: e.to_string(),
                    committed: None,
                });
            }
        }

        let events = std::mem::take(&mut *self.events.lock());
        let mut event_failure: Option<EventDeliveryError> = None;
        for deferred in events {
            if let Some((listener, e)) = deliver(&deferred.listeners, &deferred.event) {
                event_failure.get_or_insert(EventDeliveryError {
                    entity: deferred.event.entity.clone(),
                    operation: deferred.event.operation,
                    listener,
                    reason: e.to_string(),
                    committed: None,
                });
            }
        }
        tracing::debug!("transaction committed");
        match (first_failure, event_failure) {
            (Some(failure), _) => Err(failure.into()),
            (None, Some(failure)) => Err(failure.into()),
            (None, None) => Ok(()),
        }
    }

    /// Roll back, discarding deferred audit records.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.deferred.lock().clear();
        self.events.lock().clear();
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        tracing::debug!("transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            let dropped = self.pending_audit_records();
            let dropped_events = self.pending_events();
            let conn = self.conn.get_mut();
            if conn.is_autocommit() {
                return;
            }
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "rollback on drop failed");
            }
            tracing::debug!(
                dropped_audit_records = dropped,
                dropped_events,
                "transaction rolled back on drop"
            );
        }
    }
}
