//! The terminal executor.

use super::context::Context;
use super::hook::Terminal;
use super::operation::{Change, OpKind, OpOutput, Operation};
use crate::catalog::{ColumnDef, EntitySchema, FIELD_ID};
use crate::error::{ConstraintKind, Error, Result};
use crate::storage::sql::{self, Statement, Window};
use crate::storage::Database;
use entgate_model::{Predicate, Row};
use rusqlite::{ffi, params_from_iter, Connection};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds and runs the statement for a finished operation.
///
/// Mutations outside a caller transaction run in their own `BEGIN
/// IMMEDIATE` transaction; snapshots are read inside the same transaction.
/// Statements touching many rows are split so none binds more parameters
/// than the connection allows.
pub struct TerminalExecutor {
    schema: Arc<EntitySchema>,
    db: Database,
}

impl TerminalExecutor {
    pub fn new(schema: Arc<EntitySchema>, db: Database) -> Self {
        Self { schema, db }
    }

    fn validate(&self, op: &Operation) -> Result<()> {
        let schema = &self.schema;
        schema.validate_predicates(&op.predicates)?;
        match op.kind {
            OpKind::Create => {
                for row in &op.rows {
                    schema.validate_create(row)?;
                }
            }
            OpKind::Update => {
                if let Some(changes) = op.field_changes() {
                    schema.validate_update(changes)?;
                }
            }
            OpKind::Delete => {}
            OpKind::Query => {
                if let Some(select) = &op.query.select {
                    schema.validate_fields(select.iter().map(String::as_str))?;
                }
                schema.validate_fields(op.query.order_by.iter().map(|o| o.field.as_str()))?;
            }
        }
        Ok(())
    }

    fn run(&self, conn: &Connection, op: &Operation) -> Result<OpOutput> {
        match op.kind {
            OpKind::Create => self.create(conn, op),
            OpKind::Update => self.update(conn, op),
            OpKind::Delete => self.delete(conn, op),
            OpKind::Query => self.query(conn, op),
        }
    }

    fn create(&self, conn: &Connection, op: &Operation) -> Result<OpOutput> {
        let mut affected = 0;
        for stmt in sql::insert_batches(&self.schema, &op.rows, sql::max_params(conn)) {
            affected += self.execute_stmt(conn, &stmt)?;
        }

        let ids: Vec<String> = op
            .rows
            .iter()
            .filter_map(|r| r.get(FIELD_ID).and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        let rows = self.rows_by_id(conn, &ids)?;
        let changes = if op.annotations.capture_snapshots {
            rows.iter()
                .map(|row| Change {
                    id: row.id().unwrap_or_default().to_string(),
                    before: None,
                    after: Some(row.clone()),
                })
                .collect()
        } else {
            Vec::new()
        };
        tracing::debug!(entity = %self.schema.kind, rows = affected, "rows created");
        Ok(OpOutput {
            rows,
            affected,
            count: None,
            changes,
        })
    }

    fn update(&self, conn: &Connection, op: &Operation) -> Result<OpOutput> {
        let ids = self.matching_ids(conn, op)?;
        if ids.is_empty() {
            return self.nothing_matched(op);
        }
        let before = if op.annotations.capture_snapshots {
            self.rows_by_id(conn, &ids)?
        } else {
            Vec::new()
        };

        let changes = op
            .field_changes()
            .ok_or_else(|| Error::validation(&op.entity, None, "update assigns no fields"))?;
        let batch = sql::max_params(conn).saturating_sub(changes.len()).max(1);
        let mut affected = 0;
        for chunk in ids.chunks(batch) {
            let stmt = sql::update(&self.schema, changes, &[Predicate::in_values(FIELD_ID, chunk)]);
            affected += self.execute_stmt(conn, &stmt)?;
        }

        let after = self.rows_by_id(conn, &ids)?;
        let changes = if op.annotations.capture_snapshots {
            pair_changes(before, after.clone(), true)
        } else {
            Vec::new()
        };
        tracing::debug!(entity = %self.schema.kind, rows = affected, "rows updated");
        Ok(OpOutput {
            rows: after,
            affected,
            count: None,
            changes,
        })
    }

    fn delete(&self, conn: &Connection, op: &Operation) -> Result<OpOutput> {
        let ids = self.matching_ids(conn, op)?;
        if ids.is_empty() {
            return self.nothing_matched(op);
        }
        let before = if op.annotations.capture_snapshots {
            self.rows_by_id(conn, &ids)?
        } else {
            Vec::new()
        };
        let mut affected = 0;
        for chunk in ids.chunks(sql::max_params(conn)) {
            let stmt = sql::delete(&self.schema, &[Predicate::in_values(FIELD_ID, chunk)]);
            affected += self.execute_stmt(conn, &stmt)?;
        }
        tracing::debug!(entity = %self.schema.kind, rows = affected, "rows deleted");
        Ok(OpOutput {
            rows: Vec::new(),
            affected,
            count: None,
            changes: pair_changes(before, Vec::new(), false),
        })
    }

    fn query(&self, conn: &Connection, op: &Operation) -> Result<OpOutput> {
        if op.query.count_only {
            let stmt = sql::count(&self.schema, &op.predicates);
            let count: i64 = conn
                .query_row(&stmt.sql, params_from_iter(stmt.bind()), |row| row.get(0))
                .map_err(|e| self.map_error(e))?;
            return Ok(OpOutput {
                count: Some(count as u64),
                ..OpOutput::default()
            });
        }

        let columns = self.projection(op);
        let stmt = sql::select(
            &self.schema,
            &columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            &op.predicates,
            &Window {
                order_by: &op.query.order_by,
                limit: op.query.limit,
                offset: op.query.offset,
            },
        );
        let rows = self.fetch(conn, &stmt, &columns)?;
        Ok(OpOutput {
            rows,
            ..OpOutput::default()
        })
    }

    /// Columns a query returns: requested ∩ visible, always with `id`.
    fn projection(&self, op: &Operation) -> Vec<&ColumnDef> {
        let visible = op.annotations.visible_fields.as_ref();
        let requested = op.query.select.as_ref();
        self.schema
            .columns()
            .iter()
            .filter(|c| {
                c.name == FIELD_ID
                    || (visible.map(|v| v.contains(&c.name)).unwrap_or(true)
                        && requested.map(|r| r.contains(&c.name)).unwrap_or(true))
            })
            .collect()
    }

    fn matching_ids(&self, conn: &Connection, op: &Operation) -> Result<Vec<String>> {
        let id_col: Vec<&ColumnDef> = self.schema.column(FIELD_ID).into_iter().collect();
        let stmt = sql::select(&self.schema, &[FIELD_ID], &op.predicates, &Window::default());
        Ok(self
            .fetch(conn, &stmt, &id_col)?
            .iter()
            .filter_map(|row| row.id().map(str::to_string))
            .collect())
    }

    fn rows_by_id(&self, conn: &Connection, ids: &[String]) -> Result<Vec<Row>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let columns: Vec<&ColumnDef> = self.schema.columns().iter().collect();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let mut by_id: HashMap<String, Row> = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(sql::max_params(conn)) {
            let stmt = sql::select(
                &self.schema,
                &names,
                &[Predicate::in_values(FIELD_ID, chunk)],
                &Window::default(),
            );
            for row in self.fetch(conn, &stmt, &columns)? {
                if let Some(id) = row.id().map(str::to_string) {
                    by_id.insert(id, row);
                }
            }
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn nothing_matched(&self, op: &Operation) -> Result<OpOutput> {
        if op.expect_single {
            return Err(Error::not_found(&op.entity));
        }
        Ok(OpOutput::default())
    }

    fn fetch(&self, conn: &Connection, stmt: &Statement, columns: &[&ColumnDef]) -> Result<Vec<Row>> {
        let mut prepared = conn.prepare(&stmt.sql).map_err(|e| self.map_error(e))?;
        let rows = prepared
            .query_map(params_from_iter(stmt.bind()), |raw| {
                let mut row = Row::new();
                for (i, col) in columns.iter().enumerate() {
                    let value = raw.get_ref(i)?;
                    let decoded = col.decode(value).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(i, value.data_type(), Box::new(e))
                    })?;
                    row.insert(col.name.clone(), decoded);
                }
                Ok(row)
            })
            .map_err(|e| self.map_error(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| self.map_error(e))?;
        Ok(rows)
    }

    fn execute_stmt(&self, conn: &Connection, stmt: &Statement) -> Result<u64> {
        tracing::trace!(sql = %stmt.sql, params = stmt.params.len(), "execute");
        conn.execute(&stmt.sql, params_from_iter(stmt.bind()))
            .map(|n| n as u64)
            .map_err(|e| self.map_error(e))
    }

    fn map_error(&self, err: rusqlite::Error) -> Error {
        map_sql_error(&self.schema.kind, err)
    }
}

impl Terminal for TerminalExecutor {
    fn execute(&self, op: Operation, cx: &Context<'_>) -> Result<OpOutput> {
        cx.cancel.check("statement")?;
        self.validate(&op)?;

        if let Some(tx) = cx.tx() {
            return tx.with_conn(|conn| self.run(conn, &op));
        }

        let conn = self.db.acquire()?;
        if op.kind == OpKind::Query {
            return self.run(&conn, &op);
        }

        conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = self
            .run(&conn, &op)
            .and_then(|out| cx.cancel.check("commit").map(|()| out));
        match result {
            Ok(out) => match conn.execute_batch("COMMIT") {
                Ok(()) => Ok(out),
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(self.map_error(e))
                }
            },
            Err(e) => {
                if !conn.is_autocommit() {
                    let _ = conn.execute_batch("ROLLBACK");
                }
                tracing::debug!(entity = %op.entity, operation = %op.kind, error = %e, "statement rolled back");
                Err(e)
            }
        }
    }
}

/// Pair before/after rows by id. With `keep_after` the after rows drive
/// the pairing; otherwise every before row maps to a removal.
fn pair_changes(before: Vec<Row>, after: Vec<Row>, keep_after: bool) -> Vec<Change> {
    if !keep_after {
        return before
            .into_iter()
            .map(|row| Change {
                id: row.id().unwrap_or_default().to_string(),
                before: Some(row),
                after: None,
            })
            .collect();
    }
    let mut before_by_id: HashMap<String, Row> = before
        .into_iter()
        .filter_map(|row| row.id().map(str::to_string).map(|id| (id, row)))
        .collect();
    after
        .into_iter()
        .map(|row| {
            let id = row.id().unwrap_or_default().to_string();
            Change {
                before: before_by_id.remove(&id),
                after: Some(row),
                id,
            }
        })
        .collect()
}

/// Translate store errors into pipeline errors.
pub(crate) fn map_sql_error(entity: &str, err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            let kind = match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    ConstraintKind::Unique
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
                ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
                ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
                _ => ConstraintKind::Other,
            };
            return Error::Constraint {
                entity: entity.to_string(),
                kind,
                message: message.clone().unwrap_or_else(|| failure.to_string()),
            };
        }
    }
    Error::Storage(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_unique_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY, name TEXT UNIQUE NOT NULL)")
            .unwrap();
        conn.execute("INSERT INTO t VALUES ('a', 'x')", []).unwrap();

        let err = conn
            .execute("INSERT INTO t VALUES ('b', 'x')", [])
            .unwrap_err();
        match map_sql_error("thing", err) {
            Error::Constraint { kind, entity, .. } => {
                assert_eq!(kind, ConstraintKind::Unique);
                assert_eq!(entity, "thing");
            }
            other => panic!("expected constraint error, got {:?}", other),
        }

        let err = conn
            .execute("INSERT INTO t VALUES ('c', NULL)", [])
            .unwrap_err();
        assert!(matches!(
            map_sql_error("thing", err),
            Error::Constraint {
                kind: ConstraintKind::NotNull,
                ..
            }
        ));
    }

    #[test]
    fn test_other_errors_stay_storage() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute("SELECT * FROM missing", []).unwrap_err();
        assert!(matches!(map_sql_error("thing", err), Error::Storage(_)));
    }

    #[test]
    fn test_pair_changes() {
        let mut a = Row::new();
        a.insert("id", "a".into());
        let mut a2 = a.clone();
        a2.insert("name", "new".into());

        let changes = pair_changes(vec![a.clone()], vec![a2.clone()], true);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].before.as_ref(), Some(&a));
        assert_eq!(changes[0].after.as_ref(), Some(&a2));

        let removed = pair_changes(vec![a], Vec::new(), false);
        assert!(removed[0].after.is_none());
    }
}
