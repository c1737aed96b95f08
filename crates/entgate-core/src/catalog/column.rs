//! Column definitions.

use entgate_model::Value;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use serde::{Deserialize, Serialize};

/// Decodes a stored SQLite value into a runtime [`Value`].
pub type Decoder = fn(ValueRef<'_>) -> FromSqlResult<Value>;

/// Declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    /// Microseconds since the Unix epoch.
    Timestamp,
    Blob,
    /// String list stored as JSON text.
    TextArray,
}

impl ColumnType {
    /// SQLite storage type.
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::TextArray => "TEXT",
            ColumnType::Integer | ColumnType::Boolean | ColumnType::Timestamp => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
        }
    }

    /// Check whether a non-null value can be stored in this column.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ColumnType::Text, Value::String(_))
                | (ColumnType::Integer, Value::Int64(_))
                | (ColumnType::Real, Value::Float64(_) | Value::Int64(_))
                | (ColumnType::Boolean, Value::Bool(_))
                | (ColumnType::Timestamp, Value::Timestamp(_))
                | (ColumnType::Blob, Value::Bytes(_))
                | (ColumnType::TextArray, Value::StringArray(_))
        )
    }

    fn decoder(self) -> Decoder {
        match self {
            ColumnType::Text => decode_text,
            ColumnType::Integer => decode_integer,
            ColumnType::Real => decode_real,
            ColumnType::Boolean => decode_boolean,
            ColumnType::Timestamp => decode_timestamp,
            ColumnType::Blob => decode_blob,
            ColumnType::TextArray => decode_text_array,
        }
    }
}

/// A column of an entity table.
#[derive(Clone)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    /// Rejected in update assignments once the row exists.
    pub immutable: bool,
    decode: Decoder,
}

impl ColumnDef {
    /// Create a nullable column; the decoder is resolved from the type here.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            unique: false,
            immutable: false,
            decode: ty.decoder(),
        }
    }

    /// Mark the column NOT NULL.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Add a UNIQUE constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Forbid updates to this column.
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Decode a stored value.
    pub fn decode(&self, raw: ValueRef<'_>) -> FromSqlResult<Value> {
        (self.decode)(raw)
    }

    /// Check a value against the column's type and nullability.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            if self.nullable {
                return Ok(());
            }
            return Err(format!("field '{}' may not be null", self.name));
        }
        if !self.ty.accepts(value) {
            return Err(format!(
                "field '{}' expects {:?}, got {}",
                self.name,
                self.ty,
                value.type_name()
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ColumnDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnDef")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("nullable", &self.nullable)
            .field("unique", &self.unique)
            .field("immutable", &self.immutable)
            .finish()
    }
}

impl PartialEq for ColumnDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.ty == other.ty
            && self.nullable == other.nullable
            && self.unique == other.unique
            && self.immutable == other.immutable
    }
}

fn decode_text(raw: ValueRef<'_>) -> FromSqlResult<Value> {
    match raw {
        ValueRef::Null => Ok(Value::Null),
        other => String::column_result(other).map(Value::String),
    }
}

fn decode_integer(raw: ValueRef<'_>) -> FromSqlResult<Value> {
    match raw {
        ValueRef::Null => Ok(Value::Null),
        other => i64::column_result(other).map(Value::Int64),
    }
}

fn decode_real(raw: ValueRef<'_>) -> FromSqlResult<Value> {
    match raw {
        ValueRef::Null => Ok(Value::Null),
        other => f64::column_result(other).map(Value::Float64),
    }
}

fn decode_boolean(raw: ValueRef<'_>) -> FromSqlResult<Value> {
    match raw {
        ValueRef::Null => Ok(Value::Null),
        other => i64::column_result(other).map(|i| Value::Bool(i != 0)),
    }
}

fn decode_timestamp(raw: ValueRef<'_>) -> FromSqlResult<Value> {
    match raw {
        ValueRef::Null => Ok(Value::Null),
        other => i64::column_result(other).map(Value::Timestamp),
    }
}

fn decode_blob(raw: ValueRef<'_>) -> FromSqlResult<Value> {
    match raw {
        ValueRef::Null => Ok(Value::Null),
        other => Vec::<u8>::column_result(other).map(Value::Bytes),
    }
}

fn decode_text_array(raw: ValueRef<'_>) -> FromSqlResult<Value> {
    match raw {
        ValueRef::Null => Ok(Value::Null),
        other => {
            let text = String::column_result(other)?;
            serde_json::from_str::<Vec<String>>(&text)
                .map(Value::StringArray)
                .map_err(|e| FromSqlError::Other(Box::new(e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoders() {
        let col = ColumnDef::new("flag", ColumnType::Boolean);
        assert_eq!(col.decode(ValueRef::Integer(1)).unwrap(), Value::Bool(true));
        assert_eq!(col.decode(ValueRef::Null).unwrap(), Value::Null);

        let col = ColumnDef::new("tags", ColumnType::TextArray);
        assert_eq!(
            col.decode(ValueRef::Text(br#"["a","b"]"#)).unwrap(),
            Value::StringArray(vec!["a".into(), "b".into()])
        );
        assert!(col.decode(ValueRef::Text(b"not json")).is_err());

        let col = ColumnDef::new("at", ColumnType::Timestamp);
        assert_eq!(col.decode(ValueRef::Integer(42)).unwrap(), Value::Timestamp(42));
    }

    #[test]
    fn test_check() {
        let col = ColumnDef::new("name", ColumnType::Text).required();
        assert!(col.check(&Value::String("x".into())).is_ok());
        assert!(col.check(&Value::Null).unwrap_err().contains("may not be null"));
        assert!(col.check(&Value::Int64(1)).unwrap_err().contains("expects Text"));

        let col = ColumnDef::new("score", ColumnType::Real);
        assert!(col.check(&Value::Int64(3)).is_ok());
        assert!(col.check(&Value::Null).is_ok());
    }
}
