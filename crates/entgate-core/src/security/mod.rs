//! Authorization.
//!
//! Every operation carries an [`Actor`]. The [`PolicyEvaluator`] combines an
//! entity's rules into a [`PolicyDecision`]:
//!
//! - Query rules are permissive: grants are OR-ed, and an operation with no
//!   grant is denied. Blocks and hidden fields are subtracted afterwards, so
//!   an explicit deny always beats a grant.
//! - Mutation rules are restrictive: every rule must agree, and at least one
//!   must allow.
//!
//! Internal actors bypass evaluation.

mod actor;
mod builtin;
mod evaluator;
mod rules;

pub use actor::Actor;
pub use builtin::{DenyRows, GroupDelegate, HiddenFields, ProtectedFields, RequireClaim, TenantIsolation};
pub use evaluator::{DecisionReason, PolicyDecision, PolicyEvaluator};
pub use rules::{EntityPolicy, MutationRule, MutationVerdict, QueryRule, QueryVerdict};
