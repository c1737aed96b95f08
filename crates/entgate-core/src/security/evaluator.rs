//! Policy evaluation.

use super::rules::{EntityPolicy, MutationVerdict, QueryVerdict};
use crate::catalog::{EntitySchema, FIELD_ID};
use crate::pipeline::{OpKind, Operation};
use entgate_model::Predicate;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Why a decision came out the way it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionReason {
    /// The actor is internal; rules were not evaluated.
    Internal,
    /// Allowed by the named rules.
    Granted { rules: Vec<String> },
    /// A rule denied the operation.
    Denied { rule: String, reason: String },
    /// No rule granted access.
    NoGrant,
    /// The operation filters, orders or selects a field hidden from the actor.
    HiddenField { field: String },
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::Internal => write!(f, "internal actor"),
            DecisionReason::Granted { rules } => write!(f, "granted by {}", rules.join(", ")),
            DecisionReason::Denied { rule, reason } => write!(f, "{} ({})", reason, rule),
            DecisionReason::NoGrant => write!(f, "no rule grants access"),
            DecisionReason::HiddenField { field } => {
                write!(f, "field '{}' is not visible", field)
            }
        }
    }
}

/// Result of evaluating an entity's policy for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: DecisionReason,
    /// Columns the actor may read. Always includes `id` when allowed.
    pub visible_fields: BTreeSet<String>,
    /// Predicate to AND into the operation; `None` means unrestricted.
    pub row_filter: Option<Predicate>,
}

impl PolicyDecision {
    fn allow(reason: DecisionReason, visible_fields: BTreeSet<String>, filter: Predicate) -> Self {
        Self {
            allowed: true,
            reason,
            visible_fields,
            row_filter: (filter != Predicate::True).then_some(filter),
        }
    }

    fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            reason,
            visible_fields: BTreeSet::new(),
            row_filter: None,
        }
    }
}

/// Evaluates one entity's policy.
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    schema: Arc<EntitySchema>,
    policy: Arc<EntityPolicy>,
}

impl PolicyEvaluator {
    pub fn new(schema: Arc<EntitySchema>, policy: Arc<EntityPolicy>) -> Self {
        Self { schema, policy }
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Evaluate the policy for `op`.
    pub fn evaluate(&self, op: &Operation) -> PolicyDecision {
        if op.actor.is_internal() {
            return PolicyDecision::allow(DecisionReason::Internal, self.all_fields(), Predicate::True);
        }
        match op.kind {
            OpKind::Query => self.evaluate_query(op),
            OpKind::Create | OpKind::Update | OpKind::Delete => self.evaluate_mutation(op),
        }
    }

    fn all_fields(&self) -> BTreeSet<String> {
        self.schema.column_names().map(str::to_string).collect()
    }

    fn evaluate_query(&self, op: &Operation) -> PolicyDecision {
        let mut granted_by = Vec::new();
        let mut row_grants: Vec<Predicate> = Vec::new();
        let mut all_rows = false;
        let mut field_grants: BTreeSet<String> = BTreeSet::new();
        let mut all_fields = false;
        let mut blocks = Vec::new();
        let mut hidden = BTreeSet::new();

        for rule in self.policy.query_rules() {
            match rule.eval_query(&op.actor, &self.schema) {
                QueryVerdict::Skip => {}
                QueryVerdict::Grant { rows, fields } => {
                    granted_by.push(rule.name().to_string());
                    match rows {
                        Some(pred) => row_grants.push(pred),
                        None => all_rows = true,
                    }
                    match fields {
                        Some(fields) => field_grants.extend(fields),
                        None => all_fields = true,
                    }
                }
                QueryVerdict::Block(pred) => blocks.push(Predicate::not(pred)),
                QueryVerdict::HideFields(fields) => hidden.extend(fields),
                QueryVerdict::Deny(reason) => {
                    return PolicyDecision::deny(DecisionReason::Denied {
                        rule: rule.name().to_string(),
                        reason,
                    })
                }
            }
        }

        if granted_by.is_empty() {
            return PolicyDecision::deny(DecisionReason::NoGrant);
        }

        let mut visible = if all_fields {
            self.all_fields()
        } else {
            field_grants
        };
        visible.retain(|f| !hidden.contains(f) && self.schema.column(f).is_some());
        visible.insert(FIELD_ID.to_string());

        if let Some(field) = self.first_hidden_reference(op, &visible) {
            return PolicyDecision::deny(DecisionReason::HiddenField { field });
        }

        let rows = if all_rows {
            Predicate::True
        } else {
            Predicate::or(row_grants)
        };
        let mut filter = vec![rows];
        filter.extend(blocks);

        PolicyDecision::allow(
            DecisionReason::Granted { rules: granted_by },
            visible,
            Predicate::and(filter),
        )
    }

    /// First column the operation filters or orders on that the actor cannot
    /// see. Names the schema does not know are left to validation.
    fn first_hidden_reference(&self, op: &Operation, visible: &BTreeSet<String>) -> Option<String> {
        let mut referenced: BTreeSet<&str> = BTreeSet::new();
        for pred in &op.predicates {
            referenced.extend(pred.fields());
        }
        referenced.extend(op.query.order_by.iter().map(|o| o.field.as_str()));
        referenced
            .into_iter()
            .find(|f| self.schema.column(f).is_some() && !visible.contains(*f))
            .map(str::to_string)
    }

    fn evaluate_mutation(&self, op: &Operation) -> PolicyDecision {
        // Update and delete filters may not reference columns hidden from the
        // actor; the affected count would reveal their values.
        if matches!(op.kind, OpKind::Update | OpKind::Delete) {
            let read = self.evaluate_query(op);
            if let DecisionReason::HiddenField { .. } = read.reason {
                return PolicyDecision::deny(read.reason);
            }
        }

        let mut granted_by = Vec::new();
        let mut restrictions = Vec::new();

        for rule in self.policy.mutation_rules() {
            match rule.eval_mutation(&op.actor, op, &self.schema) {
                MutationVerdict::Skip => {}
                MutationVerdict::Allow => granted_by.push(rule.name().to_string()),
                MutationVerdict::Scope(pred) => {
                    granted_by.push(rule.name().to_string());
                    restrictions.push(pred);
                }
                MutationVerdict::Restrict(pred) => restrictions.push(pred),
                MutationVerdict::Deny(reason) => {
                    return PolicyDecision::deny(DecisionReason::Denied {
                        rule: rule.name().to_string(),
                        reason,
                    })
                }
            }
        }

        if granted_by.is_empty() {
            return PolicyDecision::deny(DecisionReason::NoGrant);
        }
        let filter = if op.kind == OpKind::Create {
            Predicate::True
        } else {
            Predicate::and(restrictions)
        };
        PolicyDecision::allow(
            DecisionReason::Granted { rules: granted_by },
            self.all_fields(),
            filter,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType};
    use crate::security::{
        Actor, DenyRows, GroupDelegate, HiddenFields, RequireClaim, TenantIsolation,
    };
    use entgate_model::FieldChanges;

    fn schema() -> Arc<EntitySchema> {
        Arc::new(
            EntitySchema::new("risk", "risks")
                .owned_by("owner_id")
                .with_column(ColumnDef::new("name", ColumnType::Text))
                .with_column(ColumnDef::new("score", ColumnType::Integer))
                .with_column(ColumnDef::new("group_id", ColumnType::Text)),
        )
    }

    fn evaluator(policy: EntityPolicy) -> PolicyEvaluator {
        PolicyEvaluator::new(schema(), Arc::new(policy))
    }

    fn actor() -> Actor {
        Actor::new("org_1", "u1").unwrap()
    }

    #[test]
    fn test_empty_policy_denies() {
        let eval = evaluator(EntityPolicy::new());
        let decision = eval.evaluate(&Operation::query("risk", actor()));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::NoGrant);

        let decision = eval.evaluate(&Operation::delete("risk", actor()));
        assert!(!decision.allowed);
    }

    #[test]
    fn test_internal_bypasses() {
        let eval = evaluator(EntityPolicy::new());
        let internal = Actor::internal("org_1", "system").unwrap();
        let decision = eval.evaluate(&Operation::delete("risk", internal));
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::Internal);
        assert_eq!(decision.row_filter, None);
    }

    #[test]
    fn test_grants_are_unioned() {
        let eval = evaluator(
            EntityPolicy::tenant_scoped().query_rule(GroupDelegate::new("group_id")),
        );
        let member = actor().with_claim("group:g1");
        let decision = eval.evaluate(&Operation::query("risk", member));
        assert!(decision.allowed);
        assert_eq!(
            decision.row_filter,
            Some(Predicate::Or(vec![
                Predicate::eq("owner_id", "org_1"),
                Predicate::in_values("group_id", ["g1"]),
            ]))
        );
        assert!(decision.visible_fields.contains("score"));
    }

    #[test]
    fn test_field_grants_are_unioned() {
        let eval = evaluator(
            EntityPolicy::new().query_rule(GroupDelegate::new("group_id").with_fields(["name"])),
        );
        let member = actor().with_claim("group:g1");
        let decision = eval.evaluate(&Operation::query("risk", member));
        let visible: Vec<_> = decision.visible_fields.iter().map(String::as_str).collect();
        assert_eq!(visible, vec!["id", "name"]);
    }

    #[test]
    fn test_explicit_deny_overrides_grant() {
        let eval = evaluator(
            EntityPolicy::tenant_scoped()
                .query_rule(DenyRows::new("no_low", |_| Some(Predicate::lt("score", 3))))
                .query_rule(HiddenFields::new(["score"])),
        );
        let decision = eval.evaluate(&Operation::query("risk", actor()));
        assert!(decision.allowed);
        assert_eq!(
            decision.row_filter,
            Some(Predicate::And(vec![
                Predicate::eq("owner_id", "org_1"),
                Predicate::not(Predicate::lt("score", 3)),
            ]))
        );
        assert!(!decision.visible_fields.contains("score"));
    }

    #[test]
    fn test_filter_on_hidden_field_is_denied() {
        let eval = evaluator(EntityPolicy::tenant_scoped().query_rule(HiddenFields::new(["score"])));
        let mut op = Operation::query("risk", actor());
        op.predicates.push(Predicate::gt("score", 5));
        let decision = eval.evaluate(&op);
        assert!(!decision.allowed);
        assert_eq!(
            decision.reason,
            DecisionReason::HiddenField {
                field: "score".into()
            }
        );
    }

    #[test]
    fn test_unknown_field_is_not_a_hidden_field() {
        let eval = evaluator(EntityPolicy::tenant_scoped().query_rule(HiddenFields::new(["score"])));
        let mut op = Operation::query("risk", actor());
        op.predicates.push(Predicate::eq("colour", "red"));
        op.query.order_by.push(crate::pipeline::OrderBy::asc("colour"));
        let decision = eval.evaluate(&op);
        assert!(decision.allowed);
    }

    #[test]
    fn test_mutation_filter_on_hidden_field_is_denied() {
        let eval = evaluator(
            EntityPolicy::tenant_scoped().query_rule(HiddenFields::new(["score"]).unless("risk:score")),
        );
        let op = Operation::update("risk", actor(), FieldChanges::new().with("name", "x"))
            .with_predicate(Predicate::lt("score", 3));
        let decision = eval.evaluate(&op);
        assert!(!decision.allowed);
        assert_eq!(
            decision.reason,
            DecisionReason::HiddenField {
                field: "score".into()
            }
        );

        let op = Operation::delete("risk", actor()).with_predicate(Predicate::lt("score", 3));
        assert!(!eval.evaluate(&op).allowed);

        let scorer = actor().with_claim("risk:score");
        let op = Operation::delete("risk", scorer).with_predicate(Predicate::lt("score", 3));
        assert!(eval.evaluate(&op).allowed);

        let op = Operation::delete("risk", actor()).with_predicate(Predicate::eq("name", "x"));
        assert!(eval.evaluate(&op).allowed);
    }

    #[test]
    fn test_mutation_rules_all_must_agree() {
        let eval = evaluator(
            EntityPolicy::tenant_scoped().mutation_rule(RequireClaim::new("risk:delete", [OpKind::Delete])),
        );
        let decision = eval.evaluate(&Operation::delete("risk", actor()));
        assert!(!decision.allowed);
        assert!(matches!(decision.reason, DecisionReason::Denied { .. }));

        let holder = actor().with_claim("risk:delete");
        let decision = eval.evaluate(&Operation::delete("risk", holder));
        assert!(decision.allowed);
        assert_eq!(decision.row_filter, Some(Predicate::eq("owner_id", "org_1")));
    }

    #[test]
    fn test_create_has_no_row_filter() {
        let eval = evaluator(EntityPolicy::new().rule(TenantIsolation::new()));
        let op = Operation::create(
            "risk",
            actor(),
            vec![FieldChanges::new().with("owner_id", "org_1")],
        );
        let decision = eval.evaluate(&op);
        assert!(decision.allowed);
        assert_eq!(decision.row_filter, None);
    }
}
