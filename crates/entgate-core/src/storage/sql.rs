//! SQL statement building.
//!
//! Statements use numbered `?N` placeholders; identifiers are quoted and come
//! from the catalog, which only admits plain identifiers.

use crate::catalog::{EntitySchema, FIELD_ID};
use crate::pipeline::{OrderBy, SortOrder};
use entgate_model::{FieldChanges, Predicate, Value};
use rusqlite::limits::Limit;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};

/// Most parameters a single statement may bind on `conn`.
pub fn max_params(conn: &Connection) -> usize {
    conn.limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER).max(1) as usize
}

/// Borrowed [`Value`] bound as a statement parameter.
pub struct SqlValue<'a>(pub &'a Value);

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(b) => ToSqlOutput::from(*b),
            Value::Int64(i) | Value::Timestamp(i) => ToSqlOutput::from(*i),
            Value::Float64(f) => ToSqlOutput::from(*f),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::StringArray(items) => ToSqlOutput::from(
                serde_json::to_string(items)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            ),
        })
    }
}

/// A parameterized statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    /// Parameters in bindable form.
    pub fn bind(&self) -> Vec<SqlValue<'_>> {
        self.params.iter().map(SqlValue).collect()
    }
}

/// Quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Default)]
struct Builder {
    sql: String,
    params: Vec<Value>,
}

impl Builder {
    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: &Value) {
        self.params.push(value.clone());
        self.sql.push_str(&format!("?{}", self.params.len()));
    }

    fn where_clause(&mut self, predicates: &[Predicate]) {
        let combined = Predicate::and(predicates.to_vec());
        if combined != Predicate::True {
            self.push(" WHERE ");
            self.predicate(&combined);
        }
    }

    fn compare(&mut self, field: &str, op: &str, value: &Value) {
        self.push(&quote_ident(field));
        self.push(op);
        self.bind(value);
    }

    fn list(&mut self, field: &str, op: &str, values: &[Value]) {
        self.push(&quote_ident(field));
        self.push(op);
        self.push("(");
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.bind(value);
        }
        self.push(")");
    }

    fn joined(&mut self, preds: &[Predicate], sep: &str, empty: &str) {
        if preds.is_empty() {
            self.push(empty);
            return;
        }
        self.push("(");
        for (i, p) in preds.iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            self.predicate(p);
        }
        self.push(")");
    }

    fn predicate(&mut self, pred: &Predicate) {
        match pred {
            Predicate::Eq { field, value } if value.is_null() => {
                self.push(&format!("{} IS NULL", quote_ident(field)))
            }
            Predicate::Ne { field, value } if value.is_null() => {
                self.push(&format!("{} IS NOT NULL", quote_ident(field)))
            }
            Predicate::Eq { field, value } => self.compare(field, " = ", value),
            // NULL columns count as different from any non-null value.
            Predicate::Ne { field, value } => self.compare(field, " IS NOT ", value),
            Predicate::Lt { field, value } => self.compare(field, " < ", value),
            Predicate::Le { field, value } => self.compare(field, " <= ", value),
            Predicate::Gt { field, value } => self.compare(field, " > ", value),
            Predicate::Ge { field, value } => self.compare(field, " >= ", value),
            Predicate::In { values, .. } if values.is_empty() => self.push("0"),
            Predicate::NotIn { values, .. } if values.is_empty() => self.push("1"),
            Predicate::In { field, values } => self.list(field, " IN ", values),
            Predicate::NotIn { field, values } => self.list(field, " NOT IN ", values),
            Predicate::IsNull { field } => self.push(&format!("{} IS NULL", quote_ident(field))),
            Predicate::IsNotNull { field } => {
                self.push(&format!("{} IS NOT NULL", quote_ident(field)))
            }
            Predicate::Like { field, pattern } => {
                self.compare(field, " LIKE ", &Value::String(pattern.clone()))
            }
            Predicate::And(preds) => self.joined(preds, " AND ", "1"),
            Predicate::Or(preds) => self.joined(preds, " OR ", "0"),
            Predicate::Not(inner) => {
                self.push("NOT (");
                self.predicate(inner);
                self.push(")");
            }
            Predicate::True => self.push("1"),
            Predicate::False => self.push("0"),
        }
    }

    fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

fn column_list<'a>(columns: impl IntoIterator<Item = &'a str>) -> String {
    columns
        .into_iter()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Paging and ordering for a select.
#[derive(Debug, Clone, Default)]
pub struct Window<'a> {
    pub order_by: &'a [OrderBy],
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// `SELECT columns FROM table WHERE ... ORDER BY ... LIMIT ... OFFSET ...`.
///
/// Rows are ordered by id after any requested ordering so results are
/// deterministic.
pub fn select(
    schema: &EntitySchema,
    columns: &[&str],
    predicates: &[Predicate],
    window: &Window<'_>,
) -> Statement {
    let mut b = Builder::default();
    b.push(&format!(
        "SELECT {} FROM {}",
        column_list(columns.iter().copied()),
        quote_ident(&schema.table)
    ));
    b.where_clause(predicates);

    let mut order: Vec<String> = window
        .order_by
        .iter()
        .map(|o| {
            let dir = match o.order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            format!("{} {}", quote_ident(&o.field), dir)
        })
        .collect();
    if !window.order_by.iter().any(|o| o.field == FIELD_ID) {
        order.push(format!("{} ASC", quote_ident(FIELD_ID)));
    }
    b.push(&format!(" ORDER BY {}", order.join(", ")));

    match (window.limit, window.offset) {
        (Some(limit), Some(offset)) => b.push(&format!(" LIMIT {} OFFSET {}", limit, offset)),
        (Some(limit), None) => b.push(&format!(" LIMIT {}", limit)),
        (None, Some(offset)) => b.push(&format!(" LIMIT -1 OFFSET {}", offset)),
        (None, None) => {}
    }
    b.finish()
}

/// `SELECT COUNT(*) FROM table WHERE ...`.
pub fn count(schema: &EntitySchema, predicates: &[Predicate]) -> Statement {
    let mut b = Builder::default();
    b.push(&format!("SELECT COUNT(*) FROM {}", quote_ident(&schema.table)));
    b.where_clause(predicates);
    b.finish()
}

/// Multi-row `INSERT`. Columns are the union of assigned fields; rows that
/// leave a column unassigned insert NULL.
pub fn insert(schema: &EntitySchema, rows: &[FieldChanges]) -> Statement {
    insert_rows(schema, &insert_columns(rows), rows)
}

/// Multi-row `INSERT`s binding at most `max_params` values each.
pub fn insert_batches(schema: &EntitySchema, rows: &[FieldChanges], max_params: usize) -> Vec<Statement> {
    let columns = insert_columns(rows);
    let per_statement = (max_params / columns.len().max(1)).max(1);
    rows.chunks(per_statement)
        .map(|chunk| insert_rows(schema, &columns, chunk))
        .collect()
}

fn insert_columns(rows: &[FieldChanges]) -> Vec<&str> {
    let mut columns: Vec<&str> = rows.iter().flat_map(|r| r.field_names()).collect();
    columns.sort_unstable();
    columns.dedup();
    columns
}

fn insert_rows(schema: &EntitySchema, columns: &[&str], rows: &[FieldChanges]) -> Statement {
    let mut b = Builder::default();
    b.push(&format!(
        "INSERT INTO {} ({}) VALUES ",
        quote_ident(&schema.table),
        column_list(columns.iter().copied())
    ));
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            b.push(", ");
        }
        b.push("(");
        for (j, col) in columns.iter().enumerate() {
            if j > 0 {
                b.push(", ");
            }
            b.bind(row.get(col).unwrap_or(&Value::Null));
        }
        b.push(")");
    }
    b.finish()
}

/// `UPDATE table SET ... WHERE ...`.
pub fn update(schema: &EntitySchema, changes: &FieldChanges, predicates: &[Predicate]) -> Statement {
    let mut b = Builder::default();
    b.push(&format!("UPDATE {} SET ", quote_ident(&schema.table)));
    for (i, (field, value)) in changes.iter().enumerate() {
        if i > 0 {
            b.push(", ");
        }
        b.compare(field, " = ", value);
    }
    b.where_clause(predicates);
    b.finish()
}

/// `DELETE FROM table WHERE ...`.
pub fn delete(schema: &EntitySchema, predicates: &[Predicate]) -> Statement {
    let mut b = Builder::default();
    b.push(&format!("DELETE FROM {}", quote_ident(&schema.table)));
    b.where_clause(predicates);
    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType};

    fn schema() -> EntitySchema {
        EntitySchema::new("risk", "risks")
            .owned_by("owner_id")
            .with_column(ColumnDef::new("name", ColumnType::Text))
    }

    #[test]
    fn test_select() {
        let order = [OrderBy::desc("name")];
        let stmt = select(
            &schema(),
            &["id", "name"],
            &[
                Predicate::eq("owner_id", "org_1"),
                Predicate::is_null("deleted_at"),
            ],
            &Window {
                order_by: &order,
                limit: Some(10),
                offset: Some(5),
            },
        );
        assert_eq!(
            stmt.sql,
            "SELECT \"id\", \"name\" FROM \"risks\" WHERE (\"owner_id\" = ?1 AND \"deleted_at\" IS NULL) \
             ORDER BY \"name\" DESC, \"id\" ASC LIMIT 10 OFFSET 5"
        );
        assert_eq!(stmt.params, vec![Value::String("org_1".into())]);
    }

    #[test]
    fn test_predicates() {
        let stmt = count(
            &schema(),
            &[Predicate::or(vec![
                Predicate::in_values("id", ["a", "b"]),
                Predicate::not(Predicate::like("name", "x%")),
                Predicate::In {
                    field: "id".into(),
                    values: vec![],
                },
                Predicate::ne("name", Value::Null),
            ])],
        );
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM \"risks\" WHERE (\"id\" IN (?1, ?2) OR NOT (\"name\" LIKE ?3) OR 0 OR \"name\" IS NOT NULL)"
        );
        assert_eq!(stmt.params.len(), 3);

        let stmt = count(&schema(), &[Predicate::False]);
        assert_eq!(stmt.sql, "SELECT COUNT(*) FROM \"risks\" WHERE 0");
        let stmt = count(&schema(), &[]);
        assert_eq!(stmt.sql, "SELECT COUNT(*) FROM \"risks\"");
    }

    #[test]
    fn test_insert_fills_missing_columns() {
        let rows = vec![
            FieldChanges::new().with("id", "a").with("name", "A"),
            FieldChanges::new().with("id", "b"),
        ];
        let stmt = insert(&schema(), &rows);
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"risks\" (\"id\", \"name\") VALUES (?1, ?2), (?3, ?4)"
        );
        assert_eq!(stmt.params[3], Value::Null);
    }

    #[test]
    fn test_insert_batches_respect_param_limit() {
        let rows: Vec<_> = (0..5)
            .map(|i| FieldChanges::new().with("id", format!("r{}", i)).with("name", "A"))
            .collect();
        let batches = insert_batches(&schema(), &rows, 4);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|stmt| stmt.params.len() <= 4));
        assert_eq!(batches[2].sql, "INSERT INTO \"risks\" (\"id\", \"name\") VALUES (?1, ?2)");

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        assert!(max_params(&conn) >= 999);
    }

    #[test]
    fn test_update_and_delete() {
        let changes = FieldChanges::new().with("name", "B");
        let stmt = update(&schema(), &changes, &[Predicate::eq("id", "a")]);
        assert_eq!(stmt.sql, "UPDATE \"risks\" SET \"name\" = ?1 WHERE \"id\" = ?2");

        let stmt = delete(&schema(), &[Predicate::eq("id", "a")]);
        assert_eq!(stmt.sql, "DELETE FROM \"risks\" WHERE \"id\" = ?1");
    }

    #[test]
    fn test_sql_value_binding() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let tags = Value::StringArray(vec!["a".into()]);
        let text: String = conn
            .query_row("SELECT ?1", [SqlValue(&tags)], |row| row.get(0))
            .unwrap();
        assert_eq!(text, r#"["a"]"#);
        let flag: i64 = conn
            .query_row("SELECT ?1", [SqlValue(&Value::Bool(true))], |row| row.get(0))
            .unwrap();
        assert_eq!(flag, 1);
    }
}
