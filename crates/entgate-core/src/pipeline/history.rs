//! Audit history.
//!
//! Audited entities get a `<table>_history` table with one append-only row
//! per changed entity row. The [`HistoryHook`] requests before/after
//! snapshots from the terminal and writes records only after the statement
//! has committed: immediately for implicit transactions, or when a
//! caller-owned [`Transaction`](crate::storage::Transaction) commits.

use super::context::Context;
use super::hook::{Hook, Next};
use super::operation::{Change, OpKind, OpOutput, Operation};
use crate::catalog::EntitySchema;
use crate::error::{AuditWriteError, Error, Result};
use crate::ids::{new_id, now_micros};
use crate::security::Actor;
use crate::storage::sql::{max_params, quote_ident};
use crate::storage::{Database, DeferredAudit, SqlValue};
use entgate_model::{Row, Value};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Column values captured for a history record.
pub type Snapshot = BTreeMap<String, Value>;

/// Operation recorded in history. Soft deletes are recorded as `Delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryOp {
    Insert,
    Update,
    Delete,
}

impl HistoryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryOp::Insert => "INSERT",
            HistoryOp::Update => "UPDATE",
            HistoryOp::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HistoryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(HistoryOp::Insert),
            "UPDATE" => Ok(HistoryOp::Update),
            "DELETE" => Ok(HistoryOp::Delete),
            other => Err(Error::InvalidData(format!("unknown history operation '{}'", other))),
        }
    }
}

/// One immutable history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub operation: HistoryOp,
    /// Empty for inserts.
    pub before: Snapshot,
    /// Empty for hard deletes.
    pub after: Snapshot,
    pub actor_id: String,
    pub tenant_id: Option<String>,
    /// Microseconds since the Unix epoch.
    pub occurred_at: i64,
}

impl AuditRecord {
    /// Names of the fields whose values differ between the snapshots.
    pub fn changed_fields(&self) -> Vec<String> {
        Row::from_fields(self.before.clone()).diff(&Row::from_fields(self.after.clone()))
    }

    fn from_change(
        schema: &EntitySchema,
        operation: HistoryOp,
        actor: &Actor,
        change: &Change,
        occurred_at: i64,
    ) -> Self {
        let before = change.before.clone().map(Row::into_fields).unwrap_or_default();
        let after = change.after.clone().map(Row::into_fields).unwrap_or_default();
        let tenant_id = schema
            .owner_field
            .as_deref()
            .and_then(|owner| after.get(owner).or_else(|| before.get(owner)))
            .and_then(Value::as_str)
            .unwrap_or(actor.tenant_id())
            .to_string();
        Self {
            id: new_id(),
            entity_kind: schema.kind.clone(),
            entity_id: change.id.clone(),
            operation,
            before,
            after,
            actor_id: actor.subject_id().to_string(),
            tenant_id: Some(tenant_id),
            occurred_at,
        }
    }
}

/// Destination for history records.
pub trait AuditSink: Send + Sync {
    /// Append records for one entity. All records are written or none.
    fn append(&self, conn: &Connection, schema: &EntitySchema, records: &[AuditRecord]) -> Result<()>;
}

/// Writes records to the entity's history table.
///
/// Large batches are split across several statements inside one savepoint,
/// so either every record lands or none does.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlAuditSink;

const RECORD_PARAMS: usize = 8;

impl AuditSink for SqlAuditSink {
    fn append(&self, conn: &Connection, schema: &EntitySchema, records: &[AuditRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let per_statement = (max_params(conn) / RECORD_PARAMS).max(1);
        conn.execute_batch("SAVEPOINT audit_append")?;
        let written = records
            .chunks(per_statement)
            .try_for_each(|chunk| insert_records(conn, schema, chunk));
        match written {
            Ok(()) => {
                conn.execute_batch("RELEASE audit_append")?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK TO audit_append; RELEASE audit_append") {
                    tracing::warn!(error = %rollback, "audit savepoint rollback failed");
                }
                Err(e)
            }
        }
    }
}

fn insert_records(conn: &Connection, schema: &EntitySchema, records: &[AuditRecord]) -> Result<()> {
    let mut sql = format!(
        "INSERT INTO {} (\"id\", \"history_time\", \"ref\", \"operation\", \"tenant_id\", \
         \"actor_id\", \"before_snapshot\", \"after_snapshot\") VALUES ",
        quote_ident(&schema.history_table())
    );
    let mut params: Vec<Value> = Vec::with_capacity(records.len() * RECORD_PARAMS);
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let base = params.len();
        let placeholders: Vec<String> = (1..=RECORD_PARAMS).map(|n| format!("?{}", base + n)).collect();
        sql.push('(');
        sql.push_str(&placeholders.join(", "));
        sql.push(')');
        params.extend([
            Value::String(record.id.clone()),
            Value::Int64(record.occurred_at),
            Value::String(record.entity_id.clone()),
            Value::String(record.operation.as_str().to_string()),
            Value::from(record.tenant_id.clone()),
            Value::String(record.actor_id.clone()),
            Value::String(serde_json::to_string(&record.before)?),
            Value::String(serde_json::to_string(&record.after)?),
        ]);
    }
    conn.execute(&sql, rusqlite::params_from_iter(params.iter().map(SqlValue)))?;
    Ok(())
}

/// Innermost hook of audited entities.
pub struct HistoryHook {
    schema: Arc<EntitySchema>,
    db: Database,
    sink: Arc<dyn AuditSink>,
}

impl HistoryHook {
    pub fn new(schema: Arc<EntitySchema>, db: Database, sink: Arc<dyn AuditSink>) -> Self {
        Self { schema, db, sink }
    }

    fn write_now(&self, records: &[AuditRecord]) -> Result<()> {
        let conn = self.db.acquire()?;
        self.sink.append(&conn, &self.schema, records)
    }
}

impl Hook for HistoryHook {
    fn name(&self) -> &'static str {
        "history"
    }

    fn handle(&self, mut op: Operation, cx: &Context<'_>, next: Next<'_>) -> Result<OpOutput> {
        if op.kind == OpKind::Query || op.options.skip_history {
            return next.run(op, cx);
        }

        let history_op = match op.kind {
            OpKind::Create => HistoryOp::Insert,
            OpKind::Update if op.annotations.soft_delete => HistoryOp::Delete,
            OpKind::Update => HistoryOp::Update,
            OpKind::Delete | OpKind::Query => HistoryOp::Delete,
        };
        let kind = if op.annotations.soft_delete {
            OpKind::Delete
        } else {
            op.kind
        };
        let actor = op.actor.clone();
        op.annotations.capture_snapshots = true;

        let output = next.run(op, cx)?;

        let occurred_at = now_micros();
        let records: Vec<AuditRecord> = output
            .changes
            .iter()
            .map(|change| AuditRecord::from_change(&self.schema, history_op, &actor, change, occurred_at))
            .collect();
        if records.is_empty() {
            return Ok(output);
        }

        if let Some(tx) = cx.tx() {
            tracing::debug!(
                entity = %self.schema.kind,
                records = records.len(),
                "history deferred until commit"
            );
            tx.defer_audit(DeferredAudit {
                sink: self.sink.clone(),
                schema: self.schema.clone(),
                operation: kind,
                records,
            });
            return Ok(output);
        }

        match self.write_now(&records) {
            Ok(()) => {
                tracing::debug!(
                    entity = %self.schema.kind,
                    operation = %history_op,
                    records = records.len(),
                    "history recorded"
                );
                Ok(output)
            }
            Err(e) => {
                tracing::warn!(
                    entity = %self.schema.kind,
                    operation = %history_op,
                    records = records.len(),
                    error = %e,
                    "history write failed after commit"
                );
                Err(AuditWriteError {
                    entity: self.schema.kind.clone(),
                    operation: kind,
                    records: records.len(),
                    reason: e.to_string(),
                    committed: Some(output),
                }
                .into())
            }
        }
    }
}

/// Which history rows a read may return.
pub(crate) enum HistoryScope<'a> {
    /// Every record of one tenant, optionally for a single row.
    Tenant {
        tenant_id: &'a str,
        entity_id: Option<&'a str>,
    },
    /// Records of the listed rows only.
    Refs(&'a [String]),
}

/// Unscoped read access to history tables.
///
/// Callers decide the scope; entity clients derive it from the actor's
/// policy before reading.
#[derive(Clone)]
pub(crate) struct HistoryStore {
    db: Database,
}

impl HistoryStore {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// The newest `limit` records in scope (all when `None`), oldest first.
    pub(crate) fn read(
        &self,
        schema: &EntitySchema,
        scope: HistoryScope<'_>,
        limit: Option<u64>,
    ) -> Result<Vec<AuditRecord>> {
        let conn = self.db.acquire()?;
        let mut records = match scope {
            HistoryScope::Tenant { tenant_id, entity_id } => {
                let mut params = vec![tenant_id.to_string()];
                let mut filter = "\"tenant_id\" = ?1".to_string();
                if let Some(entity_id) = entity_id {
                    params.push(entity_id.to_string());
                    filter.push_str(" AND \"ref\" = ?2");
                }
                load(&conn, schema, &filter, &params, limit)?
            }
            HistoryScope::Refs(refs) => {
                let mut records = Vec::new();
                for chunk in refs.chunks(max_params(&conn)) {
                    let placeholders: Vec<String> = (1..=chunk.len()).map(|n| format!("?{}", n)).collect();
                    let filter = format!("\"ref\" IN ({})", placeholders.join(", "));
                    records.extend(load(&conn, schema, &filter, chunk, limit)?);
                }
                records
            }
        };

        records.sort_by(|a, b| (b.occurred_at, &b.id).cmp(&(a.occurred_at, &a.id)));
        if let Some(limit) = limit {
            records.truncate(limit as usize);
        }
        records.reverse();
        Ok(records)
    }
}

/// Records matching `filter`, newest first.
fn load(
    conn: &Connection,
    schema: &EntitySchema,
    filter: &str,
    params: &[String],
    limit: Option<u64>,
) -> Result<Vec<AuditRecord>> {
    let mut sql = format!(
        "{} WHERE {} ORDER BY \"history_time\" DESC, \"id\" DESC",
        select_history(schema),
        filter
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    let mut stmt = conn.prepare(&sql)?;
    let raw: Vec<RawRecord> = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    raw.into_iter()
        .map(|raw| decode_record(schema, raw))
        .collect()
}

type RawRecord = (String, i64, String, String, Option<String>, String, String, String);

fn decode_record(schema: &EntitySchema, raw: RawRecord) -> Result<AuditRecord> {
    let (id, occurred_at, entity_id, operation, tenant_id, actor_id, before, after) = raw;
    Ok(AuditRecord {
        id,
        entity_kind: schema.kind.clone(),
        entity_id,
        operation: operation.parse()?,
        before: serde_json::from_str(&before)?,
        after: serde_json::from_str(&after)?,
        actor_id,
        tenant_id,
        occurred_at,
    })
}

fn select_history(schema: &EntitySchema) -> String {
    format!(
        "SELECT \"id\", \"history_time\", \"ref\", \"operation\", \"tenant_id\", \"actor_id\", \
         \"before_snapshot\", \"after_snapshot\" FROM {}",
        quote_ident(&schema.history_table())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ColumnDef, ColumnType};

    fn schema() -> EntitySchema {
        EntitySchema::new("risk", "risks")
            .owned_by("owner_id")
            .with_column(ColumnDef::new("name", ColumnType::Text))
            .audited()
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        Row::from_fields(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn test_record_from_change() {
        let actor = Actor::new("org_9", "u1").unwrap();
        let change = Change {
            id: "r1".into(),
            before: Some(row(&[("name", "A".into()), ("owner_id", "org_1".into())])),
            after: Some(row(&[("name", "B".into()), ("owner_id", "org_1".into())])),
        };
        let record = AuditRecord::from_change(&schema(), HistoryOp::Update, &actor, &change, 7);
        assert_eq!(record.entity_id, "r1");
        assert_eq!(record.tenant_id.as_deref(), Some("org_1"));
        assert_eq!(record.actor_id, "u1");
        assert_eq!(record.changed_fields(), vec!["name"]);

        let created = Change {
            id: "r2".into(),
            before: None,
            after: Some(row(&[("name", "C".into())])),
        };
        let record = AuditRecord::from_change(&schema(), HistoryOp::Insert, &actor, &created, 7);
        assert!(record.before.is_empty());
        assert_eq!(record.tenant_id.as_deref(), Some("org_9"));
    }

    #[test]
    fn test_history_op_parse() {
        assert_eq!("DELETE".parse::<HistoryOp>().unwrap(), HistoryOp::Delete);
        assert!("TRUNCATE".parse::<HistoryOp>().is_err());
        assert_eq!(serde_json::to_string(&HistoryOp::Insert).unwrap(), "\"INSERT\"");
    }

    #[test]
    fn test_sql_sink_appends() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = schema();
        let catalog = Catalog::new([schema.clone()]).unwrap();
        for stmt in crate::catalog::create_statements(&catalog) {
            conn.execute_batch(&stmt).unwrap();
        }
        let actor = Actor::new("org_1", "u1").unwrap();
        let records: Vec<_> = ["r1", "r2"]
            .iter()
            .map(|id| {
                AuditRecord::from_change(
                    &schema,
                    HistoryOp::Insert,
                    &actor,
                    &Change {
                        id: id.to_string(),
                        before: None,
                        after: Some(row(&[("name", "A".into())])),
                    },
                    1,
                )
            })
            .collect();
        SqlAuditSink.append(&conn, &schema, &records).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM risks_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    fn history_conn(schema: &EntitySchema) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let catalog = Catalog::new([schema.clone()]).unwrap();
        for stmt in crate::catalog::create_statements(&catalog) {
            conn.execute_batch(&stmt).unwrap();
        }
        conn
    }

    fn inserts(schema: &EntitySchema, count: usize) -> Vec<AuditRecord> {
        let actor = Actor::new("org_1", "u1").unwrap();
        (0..count)
            .map(|i| {
                AuditRecord::from_change(
                    schema,
                    HistoryOp::Insert,
                    &actor,
                    &Change {
                        id: format!("r{}", i),
                        before: None,
                        after: Some(row(&[("name", "A".into())])),
                    },
                    1,
                )
            })
            .collect()
    }

    #[test]
    fn test_sql_sink_splits_large_batches() {
        let schema = schema();
        let conn = history_conn(&schema);
        conn.set_limit(rusqlite::limits::Limit::SQLITE_LIMIT_VARIABLE_NUMBER, 16);

        SqlAuditSink.append(&conn, &schema, &inserts(&schema, 5)).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM risks_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 5);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_sql_sink_is_all_or_nothing() {
        let schema = schema();
        let conn = history_conn(&schema);
        conn.set_limit(rusqlite::limits::Limit::SQLITE_LIMIT_VARIABLE_NUMBER, 16);

        let mut records = inserts(&schema, 5);
        // The last chunk collides with the first on the primary key.
        records[4].id = records[0].id.clone();
        assert!(SqlAuditSink.append(&conn, &schema, &records).is_err());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM risks_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(conn.is_autocommit());
    }
}
