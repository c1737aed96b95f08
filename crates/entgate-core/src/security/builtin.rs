//! Built-in rules.

use super::actor::Actor;
use super::rules::{MutationRule, MutationVerdict, QueryRule, QueryVerdict};
use crate::catalog::EntitySchema;
use crate::pipeline::{OpKind, Operation};
use entgate_model::{Predicate, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Rows belong to the tenant named in the entity's owner field.
///
/// Queries see their own tenant's rows; updates and deletes are scoped to
/// them; creates may not write rows owned by another tenant, and updates may
/// not move a row to another tenant. Entities without an owner field are
/// skipped.
#[derive(Debug, Clone, Default)]
pub struct TenantIsolation {
    owner_field: Option<String>,
    bypass_claim: Option<String>,
}

impl TenantIsolation {
    /// Isolate on the entity's declared owner field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Isolate on a specific column.
    pub fn on_field(field: impl Into<String>) -> Self {
        Self {
            owner_field: Some(field.into()),
            bypass_claim: None,
        }
    }

    /// Actors holding `claim` see and change every tenant's rows.
    pub fn with_bypass(mut self, claim: impl Into<String>) -> Self {
        self.bypass_claim = Some(claim.into());
        self
    }

    fn owner<'a>(&'a self, schema: &'a EntitySchema) -> Option<&'a str> {
        self.owner_field
            .as_deref()
            .or(schema.owner_field.as_deref())
    }

    fn bypassed(&self, actor: &Actor) -> bool {
        self.bypass_claim
            .as_deref()
            .map(|c| actor.has_claim(c))
            .unwrap_or(false)
    }
}

impl QueryRule for TenantIsolation {
    fn name(&self) -> &str {
        "tenant_isolation"
    }

    fn eval_query(&self, actor: &Actor, schema: &EntitySchema) -> QueryVerdict {
        if self.bypassed(actor) {
            return QueryVerdict::Grant {
                rows: None,
                fields: None,
            };
        }
        match self.owner(schema) {
            Some(owner) => QueryVerdict::Grant {
                rows: Some(Predicate::eq(owner, actor.tenant_id())),
                fields: None,
            },
            None => QueryVerdict::Skip,
        }
    }
}

impl MutationRule for TenantIsolation {
    fn name(&self) -> &str {
        "tenant_isolation"
    }

    fn eval_mutation(&self, actor: &Actor, op: &Operation, schema: &EntitySchema) -> MutationVerdict {
        if self.bypassed(actor) {
            return MutationVerdict::Allow;
        }
        let Some(owner) = self.owner(schema) else {
            return MutationVerdict::Skip;
        };
        let foreign = |value: &Value| value.as_str() != Some(actor.tenant_id());

        match op.kind {
            OpKind::Create => {
                for row in &op.rows {
                    match row.get(owner) {
                        None => {
                            return MutationVerdict::Deny(format!("row has no '{}'", owner))
                        }
                        Some(value) if foreign(value) => {
                            return MutationVerdict::Deny(format!(
                                "row is owned by another tenant ({} = {})",
                                owner, value
                            ))
                        }
                        Some(_) => {}
                    }
                }
                MutationVerdict::Allow
            }
            OpKind::Update | OpKind::Delete => {
                if let Some(value) = op.field_changes().and_then(|c| c.get(owner)) {
                    if foreign(value) {
                        return MutationVerdict::Deny(format!(
                            "cannot move row to another tenant ({} = {})",
                            owner, value
                        ));
                    }
                }
                MutationVerdict::Scope(Predicate::eq(owner, actor.tenant_id()))
            }
            OpKind::Query => MutationVerdict::Skip,
        }
    }
}

/// Members of a group see rows whose `field` names that group.
///
/// Group membership comes from claims carrying `claim_prefix` (by default
/// `group:`). The grant can be limited to a subset of fields.
#[derive(Debug, Clone)]
pub struct GroupDelegate {
    field: String,
    claim_prefix: String,
    fields: Option<BTreeSet<String>>,
}

impl GroupDelegate {
    /// Delegate read access through `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            claim_prefix: "group:".to_string(),
            fields: None,
        }
    }

    /// Use a different claim prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.claim_prefix = prefix.into();
        self
    }

    /// Limit delegated access to these fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

impl QueryRule for GroupDelegate {
    fn name(&self) -> &str {
        "group_delegate"
    }

    fn eval_query(&self, actor: &Actor, _schema: &EntitySchema) -> QueryVerdict {
        let groups: Vec<&str> = actor.claims_with_prefix(&self.claim_prefix).collect();
        if groups.is_empty() {
            return QueryVerdict::Skip;
        }
        QueryVerdict::Grant {
            rows: Some(Predicate::in_values(self.field.as_str(), groups)),
            fields: self.fields.clone(),
        }
    }
}

type RowFilter = dyn Fn(&Actor) -> Option<Predicate> + Send + Sync;

/// Explicitly denies rows matching a predicate built from the actor.
///
/// Applies to queries (rows are removed even when granted by another rule)
/// and to updates and deletes (rows are excluded from the target set).
#[derive(Clone)]
pub struct DenyRows {
    name: String,
    build: Arc<RowFilter>,
}

impl DenyRows {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Actor) -> Option<Predicate> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Arc::new(build),
        }
    }
}

impl fmt::Debug for DenyRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenyRows").field("name", &self.name).finish()
    }
}

impl QueryRule for DenyRows {
    fn name(&self) -> &str {
        &self.name
    }

    fn eval_query(&self, actor: &Actor, _schema: &EntitySchema) -> QueryVerdict {
        match (self.build)(actor) {
            Some(pred) => QueryVerdict::Block(pred),
            None => QueryVerdict::Skip,
        }
    }
}

impl MutationRule for DenyRows {
    fn name(&self) -> &str {
        &self.name
    }

    fn eval_mutation(&self, actor: &Actor, op: &Operation, _schema: &EntitySchema) -> MutationVerdict {
        if op.kind == OpKind::Create {
            return MutationVerdict::Skip;
        }
        match (self.build)(actor) {
            Some(pred) => MutationVerdict::Restrict(Predicate::not(pred)),
            None => MutationVerdict::Skip,
        }
    }
}

/// Operations of the listed kinds require a claim.
#[derive(Debug, Clone)]
pub struct RequireClaim {
    claim: String,
    kinds: Vec<OpKind>,
}

impl RequireClaim {
    pub fn new(claim: impl Into<String>, kinds: impl IntoIterator<Item = OpKind>) -> Self {
        Self {
            claim: claim.into(),
            kinds: kinds.into_iter().collect(),
        }
    }

    fn check(&self, actor: &Actor, kind: OpKind) -> Option<String> {
        (self.kinds.contains(&kind) && !actor.has_claim(&self.claim))
            .then(|| format!("{} requires claim '{}'", kind, self.claim))
    }
}

impl QueryRule for RequireClaim {
    fn name(&self) -> &str {
        "require_claim"
    }

    fn eval_query(&self, actor: &Actor, _schema: &EntitySchema) -> QueryVerdict {
        match self.check(actor, OpKind::Query) {
            Some(reason) => QueryVerdict::Deny(reason),
            None => QueryVerdict::Skip,
        }
    }
}

impl MutationRule for RequireClaim {
    fn name(&self) -> &str {
        "require_claim"
    }

    fn eval_mutation(&self, actor: &Actor, op: &Operation, _schema: &EntitySchema) -> MutationVerdict {
        match self.check(actor, op.kind) {
            Some(reason) => MutationVerdict::Deny(reason),
            None => MutationVerdict::Skip,
        }
    }
}

/// Fields that only actors holding a claim may write.
#[derive(Debug, Clone)]
pub struct ProtectedFields {
    fields: BTreeSet<String>,
    unless_claim: Option<String>,
}

impl ProtectedFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            unless_claim: None,
        }
    }

    /// Actors holding `claim` may write the fields.
    pub fn unless(mut self, claim: impl Into<String>) -> Self {
        self.unless_claim = Some(claim.into());
        self
    }
}

impl MutationRule for ProtectedFields {
    fn name(&self) -> &str {
        "protected_fields"
    }

    fn eval_mutation(&self, actor: &Actor, op: &Operation, _schema: &EntitySchema) -> MutationVerdict {
        if let Some(claim) = &self.unless_claim {
            if actor.has_claim(claim) {
                return MutationVerdict::Skip;
            }
        }
        let touched = op
            .rows
            .iter()
            .flat_map(|row| row.field_names())
            .find(|name| self.fields.contains(*name));
        match touched {
            Some(field) => MutationVerdict::Deny(format!("field '{}' is protected", field)),
            None => MutationVerdict::Skip,
        }
    }
}

/// Fields removed from query results unless the actor holds a claim.
#[derive(Debug, Clone)]
pub struct HiddenFields {
    fields: BTreeSet<String>,
    unless_claim: Option<String>,
}

impl HiddenFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            unless_claim: None,
        }
    }

    /// Actors holding `claim` see the fields.
    pub fn unless(mut self, claim: impl Into<String>) -> Self {
        self.unless_claim = Some(claim.into());
        self
    }
}

impl QueryRule for HiddenFields {
    fn name(&self) -> &str {
        "hidden_fields"
    }

    fn eval_query(&self, actor: &Actor, _schema: &EntitySchema) -> QueryVerdict {
        match &self.unless_claim {
            Some(claim) if actor.has_claim(claim) => QueryVerdict::Skip,
            _ => QueryVerdict::HideFields(self.fields.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType};
    use entgate_model::FieldChanges;

    fn schema() -> EntitySchema {
        EntitySchema::new("risk", "risks")
            .owned_by("owner_id")
            .with_column(ColumnDef::new("name", ColumnType::Text))
            .with_column(ColumnDef::new("group_id", ColumnType::Text))
    }

    fn actor() -> Actor {
        Actor::new("org_1", "u1").unwrap()
    }

    #[test]
    fn test_tenant_isolation_query() {
        let rule = TenantIsolation::new();
        assert_eq!(
            rule.eval_query(&actor(), &schema()),
            QueryVerdict::Grant {
                rows: Some(Predicate::eq("owner_id", "org_1")),
                fields: None
            }
        );
        let unowned = EntitySchema::new("tag", "tags");
        assert_eq!(rule.eval_query(&actor(), &unowned), QueryVerdict::Skip);

        let rule = TenantIsolation::new().with_bypass("support");
        let support = actor().with_claim("support");
        assert_eq!(
            rule.eval_query(&support, &schema()),
            QueryVerdict::Grant {
                rows: None,
                fields: None
            }
        );
    }

    #[test]
    fn test_tenant_isolation_create() {
        let rule = TenantIsolation::new();
        let own = Operation::create(
            "risk",
            actor(),
            vec![FieldChanges::new().with("owner_id", "org_1")],
        );
        assert_eq!(
            rule.eval_mutation(&actor(), &own, &schema()),
            MutationVerdict::Allow
        );

        let foreign = Operation::create(
            "risk",
            actor(),
            vec![
                FieldChanges::new().with("owner_id", "org_1"),
                FieldChanges::new().with("owner_id", "org_2"),
            ],
        );
        assert!(matches!(
            rule.eval_mutation(&actor(), &foreign, &schema()),
            MutationVerdict::Deny(_)
        ));
    }

    #[test]
    fn test_tenant_isolation_update() {
        let rule = TenantIsolation::new();
        let op = Operation::update("risk", actor(), FieldChanges::new().with("name", "x"));
        assert_eq!(
            rule.eval_mutation(&actor(), &op, &schema()),
            MutationVerdict::Scope(Predicate::eq("owner_id", "org_1"))
        );

        let steal = Operation::update("risk", actor(), FieldChanges::new().with("owner_id", "org_2"));
        assert!(matches!(
            rule.eval_mutation(&actor(), &steal, &schema()),
            MutationVerdict::Deny(_)
        ));
    }

    #[test]
    fn test_group_delegate() {
        let rule = GroupDelegate::new("group_id").with_fields(["id", "name"]);
        assert_eq!(rule.eval_query(&actor(), &schema()), QueryVerdict::Skip);

        let member = actor().with_claim("group:g1");
        match rule.eval_query(&member, &schema()) {
            QueryVerdict::Grant { rows, fields } => {
                assert_eq!(rows, Some(Predicate::in_values("group_id", ["g1"])));
                assert_eq!(fields.unwrap().len(), 2);
            }
            other => panic!("expected grant, got {:?}", other),
        }
    }

    #[test]
    fn test_deny_rows() {
        let rule = DenyRows::new("no_archived", |_| Some(Predicate::eq("name", "archived")));
        assert_eq!(
            rule.eval_query(&actor(), &schema()),
            QueryVerdict::Block(Predicate::eq("name", "archived"))
        );
        let op = Operation::delete("risk", actor());
        assert_eq!(
            rule.eval_mutation(&actor(), &op, &schema()),
            MutationVerdict::Restrict(Predicate::not(Predicate::eq("name", "archived")))
        );
    }

    #[test]
    fn test_require_claim() {
        let rule = RequireClaim::new("risk:delete", [OpKind::Delete]);
        let op = Operation::delete("risk", actor());
        assert!(matches!(
            rule.eval_mutation(&actor(), &op, &schema()),
            MutationVerdict::Deny(_)
        ));
        let holder = actor().with_claim("risk:delete");
        assert_eq!(
            rule.eval_mutation(&holder, &op, &schema()),
            MutationVerdict::Skip
        );
        assert_eq!(rule.eval_query(&actor(), &schema()), QueryVerdict::Skip);
    }

    #[test]
    fn test_field_rules() {
        let protected = ProtectedFields::new(["owner_id"]).unless("admin");
        let op = Operation::update("risk", actor(), FieldChanges::new().with("owner_id", "org_1"));
        assert!(matches!(
            protected.eval_mutation(&actor(), &op, &schema()),
            MutationVerdict::Deny(_)
        ));
        assert_eq!(
            protected.eval_mutation(&actor().with_claim("admin"), &op, &schema()),
            MutationVerdict::Skip
        );

        let hidden = HiddenFields::new(["name"]).unless("admin");
        assert!(matches!(
            hidden.eval_query(&actor(), &schema()),
            QueryVerdict::HideFields(_)
        ));
        assert_eq!(
            hidden.eval_query(&actor().with_claim("admin"), &schema()),
            QueryVerdict::Skip
        );
    }
}
