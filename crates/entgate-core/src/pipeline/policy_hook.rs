//! Policy enforcement hook.

use super::context::Context;
use super::hook::{Hook, Next};
use super::operation::{OpKind, OpOutput, Operation};
use crate::catalog::EntitySchema;
use crate::error::{Error, Result};
use crate::security::{DecisionReason, PolicyEvaluator};

/// Outermost hook: evaluates the entity's policy and narrows the operation.
///
/// Filters, orderings and projections naming unknown fields fail with
/// `Validation` before the policy is consulted. Denials return
/// `Authorization` before any statement runs. Allowed
/// operations get the decision's row filter appended to their predicates;
/// queries also get the visible field set.
pub struct PolicyHook {
    evaluator: PolicyEvaluator,
}

impl PolicyHook {
    pub fn new(evaluator: PolicyEvaluator) -> Self {
        Self { evaluator }
    }
}

impl Hook for PolicyHook {
    fn name(&self) -> &'static str {
        "policy"
    }

    fn handle(&self, mut op: Operation, cx: &Context<'_>, next: Next<'_>) -> Result<OpOutput> {
        check_field_names(&op, self.evaluator.schema())?;
        let decision = self.evaluator.evaluate(&op);
        if !decision.allowed {
            tracing::warn!(
                entity = %op.entity,
                operation = %op.kind,
                tenant = op.actor.tenant_id(),
                subject = op.actor.subject_id(),
                reason = %decision.reason,
                "operation denied by policy"
            );
            return Err(Error::unauthorized(
                op.entity,
                op.kind,
                decision.reason.to_string(),
            ));
        }

        if decision.reason == DecisionReason::Internal {
            tracing::info!(
                entity = %op.entity,
                operation = %op.kind,
                subject = op.actor.subject_id(),
                "internal actor bypassed policy"
            );
        } else {
            tracing::debug!(
                entity = %op.entity,
                operation = %op.kind,
                reason = %decision.reason,
                "operation allowed by policy"
            );
        }

        if let Some(filter) = decision.row_filter {
            op.predicates.push(filter);
        }
        if op.kind == OpKind::Query {
            op.annotations.visible_fields = Some(decision.visible_fields);
        }
        next.run(op, cx)
    }
}

/// Reject references to fields the schema does not define.
fn check_field_names(op: &Operation, schema: &EntitySchema) -> Result<()> {
    schema.validate_predicates(&op.predicates)?;
    if op.kind == OpKind::Query {
        schema.validate_fields(op.query.order_by.iter().map(|o| o.field.as_str()))?;
        if let Some(select) = &op.query.select {
            schema.validate_fields(select.iter().map(String::as_str))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType};
    use crate::error::ErrorKind;
    use crate::pipeline::{HookChainBuilder, OrderBy, Terminal};
    use crate::security::{Actor, EntityPolicy, HiddenFields};
    use entgate_model::Predicate;
    use std::sync::Arc;

    struct Unreachable;

    impl Terminal for Unreachable {
        fn execute(&self, _op: Operation, _cx: &Context<'_>) -> Result<OpOutput> {
            panic!("terminal reached");
        }
    }

    fn chain() -> crate::pipeline::HookChain {
        let schema = Arc::new(
            EntitySchema::new("risk", "risks")
                .owned_by("owner_id")
                .with_column(ColumnDef::new("score", ColumnType::Integer)),
        );
        let policy = EntityPolicy::tenant_scoped().query_rule(HiddenFields::new(["score"]));
        let evaluator = PolicyEvaluator::new(schema, Arc::new(policy));
        HookChainBuilder::new("risk")
            .register(Arc::new(PolicyHook::new(evaluator)))
            .build(Arc::new(Unreachable))
    }

    fn cx() -> Context<'static> {
        Context::new(Actor::new("org_1", "u1").unwrap())
    }

    #[test]
    fn test_unknown_fields_are_validation_errors() {
        let cx = cx();
        let op = Operation::query("risk", cx.actor.clone()).with_predicate(Predicate::eq("colour", "red"));
        assert_eq!(chain().execute(op, &cx).unwrap_err().kind(), ErrorKind::Validation);

        let mut op = Operation::query("risk", cx.actor.clone());
        op.query.order_by.push(OrderBy::asc("colour"));
        assert_eq!(chain().execute(op, &cx).unwrap_err().kind(), ErrorKind::Validation);

        let mut op = Operation::query("risk", cx.actor.clone());
        op.query.select = Some(vec!["colour".into()]);
        assert_eq!(chain().execute(op, &cx).unwrap_err().kind(), ErrorKind::Validation);

        let op = Operation::delete("risk", cx.actor.clone()).with_predicate(Predicate::eq("colour", "red"));
        assert_eq!(chain().execute(op, &cx).unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_hidden_field_filter_is_authorization_error() {
        let cx = cx();
        let op = Operation::query("risk", cx.actor.clone()).with_predicate(Predicate::gt("score", 1));
        assert_eq!(chain().execute(op, &cx).unwrap_err().kind(), ErrorKind::Authorization);
    }
}
