//! Entity catalog.
//!
//! The catalog maps entity kinds to their table, columns, delete mode,
//! audit flag and edges. It is assembled once at startup and never changes
//! afterwards.

mod column;
mod ddl;
mod edge;
mod entity;
mod registry;
mod schema_file;

pub use column::{ColumnDef, ColumnType, Decoder};
pub use ddl::create_statements;
pub use edge::{EdgeDef, EdgeJoin};
pub use entity::{DeleteMode, EntitySchema};
pub use registry::Catalog;
pub use schema_file::{ColumnFile, EdgeFile, EntityFile, SchemaFile};

/// Primary key column.
pub const FIELD_ID: &str = entgate_model::ID_FIELD;
/// Creation timestamp column.
pub const FIELD_CREATED_AT: &str = "created_at";
/// Last update timestamp column.
pub const FIELD_UPDATED_AT: &str = "updated_at";
/// Creating subject column.
pub const FIELD_CREATED_BY: &str = "created_by";
/// Last updating subject column.
pub const FIELD_UPDATED_BY: &str = "updated_by";
/// Soft-delete timestamp column.
pub const FIELD_DELETED_AT: &str = "deleted_at";
/// Soft-deleting subject column.
pub const FIELD_DELETED_BY: &str = "deleted_by";

/// Check that a name is usable as an unquoted SQL identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("risks"));
        assert!(is_identifier("_owner_id2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2risks"));
        assert!(!is_identifier("risks; DROP"));
        assert!(!is_identifier("a\"b"));
    }
}
