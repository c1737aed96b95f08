//! Model error types.

use thiserror::Error;

/// Errors raised while inspecting model values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// An edge was accessed without being part of the query plan.
    #[error("edge '{0}' was not loaded")]
    NotLoaded(String),

    /// A textual tag did not name a known variant.
    #[error("unknown {kind}: {value}")]
    UnknownVariant {
        /// What was being parsed.
        kind: &'static str,
        /// The offending input.
        value: String,
    },
}
