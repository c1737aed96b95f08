//! Policy rule traits and per-entity policies.

use super::actor::Actor;
use super::builtin::TenantIsolation;
use crate::catalog::EntitySchema;
use crate::pipeline::Operation;
use entgate_model::Predicate;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Outcome of a query rule.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVerdict {
    /// The rule has nothing to say about this actor.
    Skip,
    /// Grant access to rows matching `rows` (all rows when `None`) and to
    /// `fields` (all columns when `None`).
    Grant {
        rows: Option<Predicate>,
        fields: Option<BTreeSet<String>>,
    },
    /// Remove rows matching the predicate, whatever was granted.
    Block(Predicate),
    /// Remove fields, whatever was granted.
    HideFields(BTreeSet<String>),
    /// Refuse the whole query.
    Deny(String),
}

/// Outcome of a mutation rule.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationVerdict {
    /// The rule has nothing to say about this mutation.
    Skip,
    /// Allow the mutation.
    Allow,
    /// Allow the mutation on rows matching the predicate only.
    Scope(Predicate),
    /// Narrow the target rows without granting anything.
    Restrict(Predicate),
    /// Refuse the mutation.
    Deny(String),
}

/// A rule evaluated for queries.
pub trait QueryRule: Send + Sync {
    /// Rule name used in decisions and logs.
    fn name(&self) -> &str;

    fn eval_query(&self, actor: &Actor, schema: &EntitySchema) -> QueryVerdict;
}

/// A rule evaluated for creates, updates and deletes.
pub trait MutationRule: Send + Sync {
    /// Rule name used in decisions and logs.
    fn name(&self) -> &str;

    fn eval_mutation(&self, actor: &Actor, op: &Operation, schema: &EntitySchema) -> MutationVerdict;
}

/// The rules attached to one entity kind.
#[derive(Clone, Default)]
pub struct EntityPolicy {
    query_rules: Vec<Arc<dyn QueryRule>>,
    mutation_rules: Vec<Arc<dyn MutationRule>>,
}

impl EntityPolicy {
    /// An empty policy; it denies every non-internal operation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tenant isolation on the entity's owner field for queries and
    /// mutations.
    pub fn tenant_scoped() -> Self {
        Self::new().rule(TenantIsolation::new())
    }

    /// Add a query rule.
    pub fn query_rule(mut self, rule: impl QueryRule + 'static) -> Self {
        self.query_rules.push(Arc::new(rule));
        self
    }

    /// Add a mutation rule.
    pub fn mutation_rule(mut self, rule: impl MutationRule + 'static) -> Self {
        self.mutation_rules.push(Arc::new(rule));
        self
    }

    /// Add a rule that applies to both queries and mutations.
    pub fn rule<R>(mut self, rule: R) -> Self
    where
        R: QueryRule + MutationRule + 'static,
    {
        let rule = Arc::new(rule);
        self.query_rules.push(rule.clone());
        self.mutation_rules.push(rule);
        self
    }

    pub fn query_rules(&self) -> &[Arc<dyn QueryRule>] {
        &self.query_rules
    }

    pub fn mutation_rules(&self) -> &[Arc<dyn MutationRule>] {
        &self.mutation_rules
    }
}

impl fmt::Debug for EntityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityPolicy")
            .field(
                "query_rules",
                &self.query_rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field(
                "mutation_rules",
                &self.mutation_rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
