//! Table definitions for the catalog.

use super::edge::EdgeJoin;
use super::entity::EntitySchema;
use super::registry::Catalog;
use super::{FIELD_DELETED_AT, FIELD_ID};
use crate::storage::sql::quote_ident;

/// DDL creating every entity table, index, history table and append-only
/// trigger in the catalog. Statements are idempotent.
pub fn create_statements(catalog: &Catalog) -> Vec<String> {
    let mut out = Vec::new();
    for schema in catalog.entities() {
        out.push(entity_table(schema, catalog));
        out.extend(entity_indexes(schema));
        if schema.audited {
            out.extend(history_table(schema));
        }
    }
    out
}

fn entity_table(schema: &EntitySchema, catalog: &Catalog) -> String {
    let mut parts: Vec<String> = schema
        .columns()
        .iter()
        .map(|col| {
            let mut def = format!("{} {}", quote_ident(&col.name), col.ty.sql_type());
            if col.name == FIELD_ID {
                def.push_str(" PRIMARY KEY");
            }
            if !col.nullable {
                def.push_str(" NOT NULL");
            }
            if col.unique {
                def.push_str(" UNIQUE");
            }
            def
        })
        .collect();

    for edge in schema.edges() {
        if let EdgeJoin::Owned { local_column } = &edge.join {
            if let Ok(target) = catalog.get(&edge.target) {
                parts.push(format!(
                    "FOREIGN KEY ({}) REFERENCES {}({})",
                    quote_ident(local_column),
                    quote_ident(&target.table),
                    quote_ident(FIELD_ID)
                ));
            }
        }
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(&schema.table),
        parts.join(", ")
    )
}

fn entity_indexes(schema: &EntitySchema) -> Vec<String> {
    let mut indexed: Vec<&str> = Vec::new();
    if let Some(owner) = &schema.owner_field {
        indexed.push(owner);
    }
    if schema.is_soft_delete() {
        indexed.push(FIELD_DELETED_AT);
    }
    for edge in schema.edges() {
        if let EdgeJoin::Owned { local_column } = &edge.join {
            indexed.push(local_column);
        }
    }
    indexed.dedup();
    indexed
        .into_iter()
        .map(|col| {
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("{}_{}_idx", schema.table, col)),
                quote_ident(&schema.table),
                quote_ident(col)
            )
        })
        .collect()
}

fn history_table(schema: &EntitySchema) -> Vec<String> {
    let table = schema.history_table();
    let quoted = quote_ident(&table);
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {quoted} (\
             \"id\" TEXT PRIMARY KEY, \
             \"history_time\" INTEGER NOT NULL, \
             \"ref\" TEXT NOT NULL, \
             \"operation\" TEXT NOT NULL CHECK (\"operation\" IN ('INSERT', 'UPDATE', 'DELETE')), \
             \"tenant_id\" TEXT, \
             \"actor_id\" TEXT NOT NULL, \
             \"before_snapshot\" TEXT NOT NULL, \
             \"after_snapshot\" TEXT NOT NULL)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {quoted} (\"ref\", \"history_time\")",
            quote_ident(&format!("{}_ref_idx", table))
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {quoted} (\"tenant_id\", \"history_time\")",
            quote_ident(&format!("{}_tenant_idx", table))
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS {} BEFORE UPDATE ON {quoted} \
             BEGIN SELECT RAISE(ABORT, 'history records are append-only'); END",
            quote_ident(&format!("{}_no_update", table))
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS {} BEFORE DELETE ON {quoted} \
             BEGIN SELECT RAISE(ABORT, 'history records are append-only'); END",
            quote_ident(&format!("{}_no_delete", table))
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, EdgeDef};

    fn catalog() -> Catalog {
        Catalog::new([
            EntitySchema::new("risk", "risks")
                .owned_by("owner_id")
                .with_column(ColumnDef::new("name", ColumnType::Text).required().unique())
                .audited(),
            EntitySchema::new("control", "controls")
                .hard_delete()
                .with_column(ColumnDef::new("risk_id", ColumnType::Text))
                .with_edge(EdgeDef::owned("risk", "risk", "risk_id")),
        ])
        .unwrap()
    }

    #[test]
    fn test_statements_execute() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        for stmt in create_statements(&catalog()) {
            conn.execute_batch(&stmt).unwrap();
        }
        // Idempotent.
        for stmt in create_statements(&catalog()) {
            conn.execute_batch(&stmt).unwrap();
        }
    }

    #[test]
    fn test_entity_table_shape() {
        let statements = create_statements(&catalog());
        let risks = statements
            .iter()
            .find(|s| s.starts_with("CREATE TABLE IF NOT EXISTS \"risks\""))
            .unwrap();
        assert!(risks.contains("\"id\" TEXT PRIMARY KEY NOT NULL"));
        assert!(risks.contains("\"name\" TEXT NOT NULL UNIQUE"));
        assert!(risks.contains("\"deleted_at\" INTEGER"));

        let controls = statements
            .iter()
            .find(|s| s.starts_with("CREATE TABLE IF NOT EXISTS \"controls\""))
            .unwrap();
        assert!(controls.contains("FOREIGN KEY (\"risk_id\") REFERENCES \"risks\"(\"id\")"));
        assert!(!controls.contains("deleted_at"));

        assert!(statements.iter().any(|s| s.contains("risks_history_no_update")));
        assert!(!statements.iter().any(|s| s.contains("controls_history")));
    }

    #[test]
    fn test_history_is_append_only() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        for stmt in create_statements(&catalog()) {
            conn.execute_batch(&stmt).unwrap();
        }
        conn.execute(
            "INSERT INTO risks_history VALUES ('h1', 1, 'r1', 'INSERT', 'org_1', 'u1', '{}', '{}')",
            [],
        )
        .unwrap();
        assert!(conn
            .execute("UPDATE risks_history SET actor_id = 'x'", [])
            .is_err());
        assert!(conn.execute("DELETE FROM risks_history", []).is_err());
    }
}
