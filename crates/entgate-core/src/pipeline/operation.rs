//! Operation descriptors and outputs.

use crate::error::{Error, Result};
use crate::security::Actor;
use entgate_model::{FieldChanges, Predicate, Row};
use std::collections::BTreeSet;
use std::fmt;

/// The four operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Create,
    Update,
    Delete,
    Query,
}

impl OpKind {
    /// Check if this kind writes.
    pub fn is_mutation(self) -> bool {
        self != OpKind::Query
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
            OpKind::Query => "query",
        };
        f.write_str(name)
    }
}

/// Per-operation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpOptions {
    /// Include soft-deleted rows in queries and updates.
    pub skip_soft_delete: bool,
    /// Do not write history records.
    pub skip_history: bool,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// An edge to load alongside query results.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeLoad {
    pub edge: String,
    /// Extra filters on the edge's rows.
    pub predicates: Vec<Predicate>,
}

/// Projection, ordering and paging of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    /// Columns to return; `None` returns every visible column.
    pub select: Option<Vec<String>>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Return only the number of matching rows.
    pub count_only: bool,
    pub includes: Vec<EdgeLoad>,
}

/// Facts hooks attach to an operation for hooks further down the chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    /// The terminal must capture before/after rows for each changed row.
    pub capture_snapshots: bool,
    /// This update was produced by rewriting a delete.
    pub soft_delete: bool,
    /// Columns the actor may read, set by the policy hook for queries.
    pub visible_fields: Option<BTreeSet<String>>,
}

/// A request to create, update, delete or query one entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub entity: String,
    pub kind: OpKind,
    /// New rows for a create; exactly one assignment set for an update.
    pub rows: Vec<FieldChanges>,
    /// AND-ed row filters.
    pub predicates: Vec<Predicate>,
    pub actor: Actor,
    pub options: OpOptions,
    pub query: QuerySpec,
    /// Fail with `NotFound` when no row matches.
    pub expect_single: bool,
    pub annotations: Annotations,
}

impl Operation {
    fn new(entity: impl Into<String>, kind: OpKind, actor: Actor) -> Self {
        Self {
            entity: entity.into(),
            kind,
            rows: Vec::new(),
            predicates: Vec::new(),
            actor,
            options: OpOptions::default(),
            query: QuerySpec::default(),
            expect_single: false,
            annotations: Annotations::default(),
        }
    }

    /// Create one or more rows.
    pub fn create(entity: impl Into<String>, actor: Actor, rows: Vec<FieldChanges>) -> Self {
        let mut op = Self::new(entity, OpKind::Create, actor);
        op.rows = rows;
        op
    }

    /// Update matching rows.
    pub fn update(entity: impl Into<String>, actor: Actor, changes: FieldChanges) -> Self {
        let mut op = Self::new(entity, OpKind::Update, actor);
        op.rows = vec![changes];
        op
    }

    /// Delete matching rows.
    pub fn delete(entity: impl Into<String>, actor: Actor) -> Self {
        Self::new(entity, OpKind::Delete, actor)
    }

    /// Query matching rows.
    pub fn query(entity: impl Into<String>, actor: Actor) -> Self {
        Self::new(entity, OpKind::Query, actor)
    }

    /// Add a filter.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Set options.
    pub fn with_options(mut self, options: OpOptions) -> Self {
        self.options = options;
        self
    }

    /// Require a matching row.
    pub fn single(mut self) -> Self {
        self.expect_single = true;
        self
    }

    /// Assignments of a create (first row) or update.
    pub fn field_changes(&self) -> Option<&FieldChanges> {
        match self.kind {
            OpKind::Create | OpKind::Update => self.rows.first(),
            OpKind::Delete | OpKind::Query => None,
        }
    }

    /// Mutable assignments of a create (first row) or update.
    pub fn field_changes_mut(&mut self) -> Option<&mut FieldChanges> {
        match self.kind {
            OpKind::Create | OpKind::Update => self.rows.first_mut(),
            OpKind::Delete | OpKind::Query => None,
        }
    }

    /// Check the rows carried match the kind.
    pub fn validate_shape(&self) -> Result<()> {
        let problem = match self.kind {
            OpKind::Create if self.rows.is_empty() => Some("create needs at least one row"),
            OpKind::Update if self.rows.len() != 1 => Some("update needs exactly one assignment set"),
            OpKind::Delete | OpKind::Query if !self.rows.is_empty() => {
                Some("delete and query carry no assignments")
            }
            _ => None,
        };
        match problem {
            Some(message) => Err(Error::validation(&self.entity, None, message)),
            None => Ok(()),
        }
    }
}

/// Before and after images of one changed row.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub id: String,
    /// `None` for creates.
    pub before: Option<Row>,
    /// `None` for hard deletes.
    pub after: Option<Row>,
}

/// What a hook chain returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpOutput {
    /// Rows read by a query, or the affected rows after a create or update.
    pub rows: Vec<Row>,
    /// Rows written.
    pub affected: u64,
    /// Set by count-only queries.
    pub count: Option<u64>,
    /// Populated when snapshots were requested.
    pub changes: Vec<Change>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> Actor {
        Actor::new("org_1", "u1").unwrap()
    }

    #[test]
    fn test_shape() {
        assert!(Operation::create("risk", actor(), vec![]).validate_shape().is_err());
        assert!(Operation::create("risk", actor(), vec![FieldChanges::new()])
            .validate_shape()
            .is_ok());
        let mut update = Operation::update("risk", actor(), FieldChanges::new());
        assert!(update.validate_shape().is_ok());
        update.rows.push(FieldChanges::new());
        assert!(update.validate_shape().is_err());
        assert!(Operation::query("risk", actor()).validate_shape().is_ok());
    }

    #[test]
    fn test_field_changes() {
        let mut op = Operation::update("risk", actor(), FieldChanges::new().with("name", "a"));
        op.field_changes_mut().unwrap().set("score", 3);
        assert_eq!(op.field_changes().unwrap().len(), 2);
        assert!(Operation::delete("risk", actor()).field_changes().is_none());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(OpKind::Delete.to_string(), "delete");
        assert!(OpKind::Create.is_mutation());
        assert!(!OpKind::Query.is_mutation());
    }
}
