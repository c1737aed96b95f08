//! Filter predicates.
//!
//! Predicates form a recursive tree. Operations carry a list of predicates
//! that are AND-ed together when the statement is built; the policy
//! evaluator and the soft-delete filter append to that list.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Filter expression over entity columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field less than value.
    Lt { field: String, value: Value },
    /// Field less than or equal to value.
    Le { field: String, value: Value },
    /// Field greater than value.
    Gt { field: String, value: Value },
    /// Field greater than or equal to value.
    Ge { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is not in a set of values.
    NotIn { field: String, values: Vec<Value> },
    /// Field is null.
    IsNull { field: String },
    /// Field is not null.
    IsNotNull { field: String },
    /// Field matches a LIKE pattern.
    Like { field: String, pattern: String },
    /// All conditions must be true.
    And(Vec<Predicate>),
    /// At least one condition must be true.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
    /// Matches every row.
    True,
    /// Matches no row.
    False,
}

impl Predicate {
    /// Create an equality predicate.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal predicate.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than predicate.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than-or-equal predicate.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Le {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than predicate.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal predicate.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IN predicate.
    pub fn in_values<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a NOT IN predicate.
    pub fn not_in_values<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::NotIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Create an IS NULL predicate.
    pub fn is_null(field: impl Into<String>) -> Self {
        Predicate::IsNull { field: field.into() }
    }

    /// Create an IS NOT NULL predicate.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Predicate::IsNotNull { field: field.into() }
    }

    /// Create a LIKE predicate.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Combine predicates with AND, collapsing trivial cases.
    pub fn and(mut preds: Vec<Predicate>) -> Self {
        preds.retain(|p| *p != Predicate::True);
        if preds.iter().any(|p| *p == Predicate::False) {
            return Predicate::False;
        }
        match preds.len() {
            0 => Predicate::True,
            1 => preds.remove(0),
            _ => Predicate::And(preds),
        }
    }

    /// Combine predicates with OR, collapsing trivial cases.
    pub fn or(mut preds: Vec<Predicate>) -> Self {
        preds.retain(|p| *p != Predicate::False);
        if preds.iter().any(|p| *p == Predicate::True) {
            return Predicate::True;
        }
        match preds.len() {
            0 => Predicate::False,
            1 => preds.remove(0),
            _ => Predicate::Or(preds),
        }
    }

    /// Negate a predicate.
    #[allow(clippy::should_implement_trait)]
    pub fn not(pred: Predicate) -> Self {
        match pred {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    /// Column names referenced anywhere in this predicate.
    pub fn fields(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Predicate::Eq { field, .. }
            | Predicate::Ne { field, .. }
            | Predicate::Lt { field, .. }
            | Predicate::Le { field, .. }
            | Predicate::Gt { field, .. }
            | Predicate::Ge { field, .. }
            | Predicate::In { field, .. }
            | Predicate::NotIn { field, .. }
            | Predicate::IsNull { field }
            | Predicate::IsNotNull { field }
            | Predicate::Like { field, .. } => {
                out.insert(field.as_str());
            }
            Predicate::And(preds) | Predicate::Or(preds) => {
                for p in preds {
                    p.collect_fields(out);
                }
            }
            Predicate::Not(inner) => inner.collect_fields(out),
            Predicate::True | Predicate::False => {}
        }
    }
}
