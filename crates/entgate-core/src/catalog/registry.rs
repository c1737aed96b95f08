//! The entity registry.

use super::entity::EntitySchema;
use super::edge::EdgeJoin;
use super::is_identifier;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Immutable registry of entity schemas keyed by kind.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entities: BTreeMap<String, Arc<EntitySchema>>,
}

impl Catalog {
    /// Build a catalog, checking names, owner columns and edge targets.
    pub fn new(schemas: impl IntoIterator<Item = EntitySchema>) -> Result<Self> {
        let mut entities = BTreeMap::new();
        let mut tables = HashSet::new();
        for schema in schemas {
            if !is_identifier(&schema.table) {
                return Err(Error::Config(format!(
                    "entity '{}' has invalid table name '{}'",
                    schema.kind, schema.table
                )));
            }
            if let Some(bad) = schema.column_names().find(|c| !is_identifier(c)) {
                return Err(Error::Config(format!(
                    "entity '{}' has invalid column name '{}'",
                    schema.kind, bad
                )));
            }
            if !tables.insert(schema.table.clone()) {
                return Err(Error::Config(format!(
                    "table '{}' is used by more than one entity",
                    schema.table
                )));
            }
            if let Some(owner) = &schema.owner_field {
                if schema.column(owner).is_none() {
                    return Err(Error::Config(format!(
                        "entity '{}' owner field '{}' is not a column",
                        schema.kind, owner
                    )));
                }
            }
            let kind = schema.kind.clone();
            if entities.insert(kind.clone(), Arc::new(schema)).is_some() {
                return Err(Error::Config(format!("entity '{}' registered twice", kind)));
            }
        }

        let catalog = Self { entities };
        catalog.check_edges()?;
        Ok(catalog)
    }

    fn check_edges(&self) -> Result<()> {
        for schema in self.entities.values() {
            for edge in schema.edges() {
                let target = self.entities.get(&edge.target).ok_or_else(|| {
                    Error::Config(format!(
                        "edge '{}.{}' targets unknown entity '{}'",
                        schema.kind, edge.name, edge.target
                    ))
                })?;
                let (owner, column) = match &edge.join {
                    EdgeJoin::Owned { local_column } => (schema, local_column),
                    EdgeJoin::Inverse { remote_column } => (target, remote_column),
                };
                if owner.column(column).is_none() {
                    return Err(Error::Config(format!(
                        "edge '{}.{}' joins on unknown column '{}.{}'",
                        schema.kind, edge.name, owner.kind, column
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a schema by entity kind.
    pub fn get(&self, kind: &str) -> Result<&Arc<EntitySchema>> {
        self.entities
            .get(kind)
            .ok_or_else(|| Error::validation(kind, None, format!("unknown entity '{}'", kind)))
    }

    /// Check if an entity kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.entities.contains_key(kind)
    }

    /// All schemas ordered by kind.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.entities.values()
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, EdgeDef};
    use crate::error::ErrorKind;

    fn risk() -> EntitySchema {
        EntitySchema::new("risk", "risks")
            .owned_by("owner_id")
            .with_column(ColumnDef::new("name", ColumnType::Text).required())
            .with_edge(EdgeDef::inverse("controls", "control", "risk_id"))
    }

    fn control() -> EntitySchema {
        EntitySchema::new("control", "controls")
            .owned_by("owner_id")
            .with_column(ColumnDef::new("risk_id", ColumnType::Text))
            .with_edge(EdgeDef::owned("risk", "risk", "risk_id"))
    }

    #[test]
    fn test_lookup() {
        let catalog = Catalog::new([risk(), control()]).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("risk").unwrap().table, "risks");
        let err = catalog.get("vendor").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_rejects_unknown_edge_target() {
        let err = Catalog::new([risk()]).unwrap_err();
        assert!(err.to_string().contains("unknown entity 'control'"));
    }

    #[test]
    fn test_rejects_bad_join_column() {
        let bad = EntitySchema::new("control", "controls")
            .with_edge(EdgeDef::owned("risk", "risk", "risk_id"));
        let err = Catalog::new([risk(), bad]).unwrap_err();
        assert!(err.to_string().contains("unknown column"));
    }

    #[test]
    fn test_rejects_duplicates_and_bad_names() {
        assert!(Catalog::new([control(), control()]).is_err());
        assert!(Catalog::new([EntitySchema::new("x", "bad table")]).is_err());
    }
}
