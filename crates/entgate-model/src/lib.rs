//! entgate model types.
//!
//! This crate defines the data shapes that flow through the entgate access
//! pipeline: runtime values, filter predicates, pending field changes and
//! materialized rows.
//!
//! # Modules
//!
//! - [`value`] - Runtime value types for field changes, predicates and rows
//! - [`predicate`] - Filter expressions applied to queries and mutations
//! - [`changes`] - Ordered field assignments carried by a pending mutation
//! - [`row`] - Materialized rows with eager-loaded edges
//! - [`error`] - Model error types

pub mod changes;
pub mod error;
pub mod predicate;
pub mod row;
pub mod value;

pub use changes::FieldChanges;
pub use error::ModelError;
pub use predicate::Predicate;
pub use row::Row;
pub use value::Value;

/// Column holding the primary identifier of every entity.
pub const ID_FIELD: &str = "id";
