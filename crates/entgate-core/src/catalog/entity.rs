//! Entity schemas.

use super::column::{ColumnDef, ColumnType};
use super::edge::EdgeDef;
use super::{
    FIELD_CREATED_AT, FIELD_CREATED_BY, FIELD_DELETED_AT, FIELD_DELETED_BY, FIELD_ID,
    FIELD_UPDATED_AT, FIELD_UPDATED_BY,
};
use crate::error::{Error, Result};
use entgate_model::{FieldChanges, Predicate};

/// How deletes of an entity are carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Deletes stamp `deleted_at`/`deleted_by`; rows stay in the table.
    #[default]
    Soft,
    /// Deletes remove the row.
    Hard,
}

/// Static description of one entity kind.
///
/// Every schema carries the audit columns (`id`, `created_at`, `updated_at`,
/// `created_by`, `updated_by`); soft-delete schemas also carry `deleted_at`
/// and `deleted_by`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    pub kind: String,
    pub table: String,
    pub delete_mode: DeleteMode,
    /// Whether mutations write history records.
    pub audited: bool,
    /// Column holding the owning tenant id.
    pub owner_field: Option<String>,
    columns: Vec<ColumnDef>,
    edges: Vec<EdgeDef>,
}

impl EntitySchema {
    /// Create a soft-delete schema with the standard columns.
    pub fn new(kind: impl Into<String>, table: impl Into<String>) -> Self {
        let columns = vec![
            ColumnDef::new(FIELD_ID, ColumnType::Text).required().immutable(),
            ColumnDef::new(FIELD_CREATED_AT, ColumnType::Timestamp)
                .required()
                .immutable(),
            ColumnDef::new(FIELD_UPDATED_AT, ColumnType::Timestamp).required(),
            ColumnDef::new(FIELD_CREATED_BY, ColumnType::Text).immutable(),
            ColumnDef::new(FIELD_UPDATED_BY, ColumnType::Text),
            ColumnDef::new(FIELD_DELETED_AT, ColumnType::Timestamp),
            ColumnDef::new(FIELD_DELETED_BY, ColumnType::Text),
        ];
        Self {
            kind: kind.into(),
            table: table.into(),
            delete_mode: DeleteMode::Soft,
            audited: false,
            owner_field: None,
            columns,
            edges: Vec::new(),
        }
    }

    /// Switch to hard deletes, dropping the soft-delete columns.
    pub fn hard_delete(mut self) -> Self {
        self.delete_mode = DeleteMode::Hard;
        self.columns
            .retain(|c| c.name != FIELD_DELETED_AT && c.name != FIELD_DELETED_BY);
        self
    }

    /// Record history for mutations.
    pub fn audited(mut self) -> Self {
        self.audited = true;
        self
    }

    /// Set the tenant owner column, adding it as a required text column if
    /// it was not declared.
    pub fn owned_by(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if self.column(&field).is_none() {
            self.columns
                .push(ColumnDef::new(field.clone(), ColumnType::Text).required());
        }
        self.owner_field = Some(field);
        self
    }

    /// Add a column, replacing a column of the same name.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        self
    }

    /// Add an edge.
    pub fn with_edge(mut self, edge: EdgeDef) -> Self {
        self.edges.push(edge);
        self
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// All columns in declaration order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// All column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Get an edge by name.
    pub fn edge(&self, name: &str) -> Option<&EdgeDef> {
        self.edges.iter().find(|e| e.name == name)
    }

    /// All edges.
    pub fn edges(&self) -> &[EdgeDef] {
        &self.edges
    }

    /// Check if deletes are soft.
    pub fn is_soft_delete(&self) -> bool {
        self.delete_mode == DeleteMode::Soft
    }

    /// Name of the history table.
    pub fn history_table(&self) -> String {
        format!("{}_history", self.table)
    }

    /// Validate the assignments of a new row.
    ///
    /// Every required column must be present; defaults are filled in by the
    /// entity client before this runs.
    pub fn validate_create(&self, changes: &FieldChanges) -> Result<()> {
        self.validate_assignments(changes)?;
        for col in self.columns.iter().filter(|c| !c.nullable) {
            if !changes.contains(&col.name) {
                return Err(Error::validation(
                    &self.kind,
                    Some(col.name.as_str()),
                    format!("missing required field '{}'", col.name),
                ));
            }
        }
        Ok(())
    }

    /// Validate the assignments of an update.
    pub fn validate_update(&self, changes: &FieldChanges) -> Result<()> {
        if changes.is_empty() {
            return Err(Error::validation(&self.kind, None, "update assigns no fields"));
        }
        self.validate_assignments(changes)?;
        if let Some(col) = changes
            .field_names()
            .filter_map(|name| self.column(name))
            .find(|c| c.immutable)
        {
            return Err(Error::validation(
                &self.kind,
                Some(col.name.as_str()),
                format!("field '{}' is immutable", col.name),
            ));
        }
        Ok(())
    }

    /// Check that every named field is a column of this entity.
    pub fn validate_fields<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in fields {
            if self.column(name).is_none() {
                return Err(Error::validation(
                    &self.kind,
                    Some(name),
                    format!("unknown field '{}'", name),
                ));
            }
        }
        Ok(())
    }

    /// Check that predicates only reference columns of this entity.
    pub fn validate_predicates(&self, predicates: &[Predicate]) -> Result<()> {
        for pred in predicates {
            self.validate_fields(pred.fields())?;
        }
        Ok(())
    }

    fn validate_assignments(&self, changes: &FieldChanges) -> Result<()> {
        for (name, value) in changes.iter() {
            let col = self.column(name).ok_or_else(|| {
                Error::validation(&self.kind, Some(name), format!("unknown field '{}'", name))
            })?;
            col.check(value)
                .map_err(|msg| Error::validation(&self.kind, Some(name), msg))?;
        }
        Ok(())
    }
}
