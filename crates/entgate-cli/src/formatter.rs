//! Output formatters.

use chrono::DateTime;
use clap::ValueEnum;
use comfy_table::{Cell, Table};
use entgate_core::{AuditRecord, Catalog};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Renders command results.
pub trait Formatter {
    /// Table names with row counts.
    fn format_tables(&self, tables: &[(String, u64)]) -> String;

    /// History records, oldest first.
    fn format_history(&self, records: &[AuditRecord]) -> String;

    /// Entities of a catalog.
    fn format_catalog(&self, catalog: &Catalog) -> String;

    /// A one-line message.
    fn format_message(&self, message: &str) -> String;
}

pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Render microseconds since the epoch as UTC.
pub fn format_micros(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string())
        .unwrap_or_else(|| micros.to_string())
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_tables(&self, tables: &[(String, u64)]) -> String {
        if tables.is_empty() {
            return "No tables".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["Table", "Rows"]);
        for (name, rows) in tables {
            table.add_row(vec![Cell::new(name), Cell::new(rows)]);
        }
        table.to_string()
    }

    fn format_history(&self, records: &[AuditRecord]) -> String {
        if records.is_empty() {
            return "No history".to_string();
        }
        let mut table = Table::new();
        table.set_header(vec!["Time", "Operation", "Ref", "Actor", "Tenant", "Changed"]);
        for record in records {
            table.add_row(vec![
                Cell::new(format_micros(record.occurred_at)),
                Cell::new(record.operation),
                Cell::new(&record.entity_id),
                Cell::new(&record.actor_id),
                Cell::new(record.tenant_id.as_deref().unwrap_or("")),
                Cell::new(record.changed_fields().join(", ")),
            ]);
        }
        let mut output = table.to_string();
        output.push_str(&format!("\n({} record(s))", records.len()));
        output
    }

    fn format_catalog(&self, catalog: &Catalog) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Entity", "Table", "Delete", "Audited", "Owner", "Columns", "Edges"]);
        for schema in catalog.entities() {
            let edges: Vec<String> = schema
                .edges()
                .iter()
                .map(|e| format!("{} -> {}", e.name, e.target))
                .collect();
            table.add_row(vec![
                Cell::new(&schema.kind),
                Cell::new(&schema.table),
                Cell::new(if schema.is_soft_delete() { "soft" } else { "hard" }),
                Cell::new(if schema.audited { "yes" } else { "no" }),
                Cell::new(schema.owner_field.as_deref().unwrap_or("-")),
                Cell::new(schema.columns().len()),
                Cell::new(edges.join(", ")),
            ]);
        }
        table.to_string()
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_tables(&self, tables: &[(String, u64)]) -> String {
        let rows: Vec<serde_json::Value> = tables
            .iter()
            .map(|(name, rows)| serde_json::json!({ "table": name, "rows": rows }))
            .collect();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_history(&self, records: &[AuditRecord]) -> String {
        let rows: Vec<serde_json::Value> = records
            .iter()
            .map(|record| {
                serde_json::json!({
                    "id": record.id,
                    "time": format_micros(record.occurred_at),
                    "operation": record.operation,
                    "entity": record.entity_kind,
                    "ref": record.entity_id,
                    "actor_id": record.actor_id,
                    "tenant_id": record.tenant_id,
                    "changed": record.changed_fields(),
                    "before": record.before,
                    "after": record.after,
                })
            })
            .collect();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_catalog(&self, catalog: &Catalog) -> String {
        let entities: Vec<serde_json::Value> = catalog
            .entities()
            .map(|schema| {
                serde_json::json!({
                    "kind": schema.kind,
                    "table": schema.table,
                    "soft_delete": schema.is_soft_delete(),
                    "audited": schema.audited,
                    "owner_field": schema.owner_field,
                    "columns": schema.column_names().collect::<Vec<_>>(),
                    "edges": schema.edges().iter().map(|e| &e.name).collect::<Vec<_>>(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&entities).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entgate_core::{HistoryOp, Value};
    use std::collections::BTreeMap;

    fn record() -> AuditRecord {
        let mut before: BTreeMap<String, Value> = BTreeMap::new();
        before.insert("name".to_string(), "Alpha".into());
        let mut after = before.clone();
        after.insert("name".to_string(), "Beta".into());
        AuditRecord {
            id: "h1".into(),
            entity_kind: "risk".into(),
            entity_id: "r1".into(),
            operation: HistoryOp::Update,
            before,
            after,
            actor_id: "bob".into(),
            tenant_id: Some("org_1".into()),
            occurred_at: 0,
        }
    }

    #[test]
    fn test_format_micros() {
        assert_eq!(format_micros(0), "1970-01-01 00:00:00.000000 UTC");
        assert_eq!(format_micros(1_500_000), "1970-01-01 00:00:01.500000 UTC");
    }

    #[test]
    fn test_table_history() {
        let output = TableFormatter.format_history(&[record()]);
        assert!(output.contains("UPDATE"));
        assert!(output.contains("bob"));
        assert!(output.contains("(1 record(s))"));
        assert_eq!(TableFormatter.format_history(&[]), "No history");
    }

    #[test]
    fn test_json_history() {
        let output = JsonFormatter.format_history(&[record()]);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0]["operation"], "UPDATE");
        assert_eq!(parsed[0]["changed"][0], "name");
        assert_eq!(parsed[0]["tenant_id"], "org_1");
    }

    #[test]
    fn test_json_tables() {
        let output = JsonFormatter.format_tables(&[("risks".into(), 3)]);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0]["rows"], 3);
    }
}
