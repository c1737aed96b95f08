//! JSON schema files.
//!
//! The CLI and tests describe catalogs as JSON:
//!
//! ```json
//! {
//!   "entities": [
//!     {
//!       "kind": "risk",
//!       "table": "risks",
//!       "audited": true,
//!       "owner_field": "owner_id",
//!       "columns": [{ "name": "name", "type": "text", "nullable": false }],
//!       "edges": [{ "name": "controls", "target": "control", "remote_column": "risk_id" }]
//!     }
//!   ]
//! }
//! ```

use super::column::{ColumnDef, ColumnType};
use super::edge::EdgeDef;
use super::entity::EntitySchema;
use super::registry::Catalog;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaFile {
    pub entities: Vec<EntityFile>,
}

/// One entity in a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityFile {
    pub kind: String,
    pub table: String,
    #[serde(default)]
    pub hard_delete: bool,
    #[serde(default)]
    pub audited: bool,
    #[serde(default)]
    pub owner_field: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnFile>,
    #[serde(default)]
    pub edges: Vec<EdgeFile>,
}

/// One column in a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnFile {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub immutable: bool,
}

/// One edge in a schema file. Exactly one of the join columns is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeFile {
    pub name: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_column: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl SchemaFile {
    /// Parse a schema file from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a schema file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Build the catalog described by this file.
    pub fn into_catalog(self) -> Result<Catalog> {
        let schemas = self
            .entities
            .into_iter()
            .map(EntityFile::into_schema)
            .collect::<Result<Vec<_>>>()?;
        Catalog::new(schemas)
    }
}

impl EntityFile {
    fn into_schema(self) -> Result<EntitySchema> {
        let mut schema = EntitySchema::new(self.kind, self.table);
        if self.hard_delete {
            schema = schema.hard_delete();
        }
        if self.audited {
            schema = schema.audited();
        }
        for col in self.columns {
            let mut def = ColumnDef::new(col.name, col.ty);
            def.nullable = col.nullable;
            def.unique = col.unique;
            def.immutable = col.immutable;
            schema = schema.with_column(def);
        }
        if let Some(owner) = self.owner_field {
            schema = schema.owned_by(owner);
        }
        for edge in self.edges {
            let def = match (edge.local_column, edge.remote_column) {
                (Some(local), None) => EdgeDef::owned(edge.name, edge.target, local),
                (None, Some(remote)) => EdgeDef::inverse(edge.name, edge.target, remote),
                _ => {
                    return Err(Error::Config(format!(
                        "edge '{}.{}' needs exactly one of local_column or remote_column",
                        schema.kind, edge.name
                    )))
                }
            };
            schema = schema.with_edge(def);
        }
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DeleteMode, EdgeJoin};

    const SCHEMA: &str = r#"{
        "entities": [
            {
                "kind": "risk",
                "table": "risks",
                "audited": true,
                "owner_field": "owner_id",
                "columns": [
                    { "name": "name", "type": "text", "nullable": false },
                    { "name": "tags", "type": "text_array" }
                ],
                "edges": [
                    { "name": "controls", "target": "control", "remote_column": "risk_id" }
                ]
            },
            {
                "kind": "control",
                "table": "controls",
                "hard_delete": true,
                "columns": [{ "name": "risk_id", "type": "text" }],
                "edges": [{ "name": "risk", "target": "risk", "local_column": "risk_id" }]
            }
        ]
    }"#;

    #[test]
    fn test_parse_schema_file() {
        let catalog = SchemaFile::from_json(SCHEMA).unwrap().into_catalog().unwrap();

        let risk = catalog.get("risk").unwrap();
        assert!(risk.audited);
        assert_eq!(risk.owner_field.as_deref(), Some("owner_id"));
        assert!(!risk.column("name").unwrap().nullable);
        assert_eq!(risk.column("tags").unwrap().ty, ColumnType::TextArray);
        assert!(matches!(
            risk.edge("controls").unwrap().join,
            EdgeJoin::Inverse { .. }
        ));

        let control = catalog.get("control").unwrap();
        assert_eq!(control.delete_mode, DeleteMode::Hard);
        assert!(!control.audited);
    }

    #[test]
    fn test_edge_needs_one_join_column() {
        let text = r#"{"entities": [{"kind": "a", "table": "a",
            "edges": [{"name": "b", "target": "a"}]}]}"#;
        let err = SchemaFile::from_json(text).unwrap().into_catalog().unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn test_malformed_json() {
        assert!(SchemaFile::from_json("{").is_err());
    }
}
