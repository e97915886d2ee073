//! Schema extraction errors.

use facet_reflect::{AllocError, ReflectError, ShapeMismatchError};
use oorm_sql::Value;

/// Errors raised while describing a record type or moving values in and out of it.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid `{key}` setting {value:?} on {owner}.{field}")]
    InvalidTag {
        owner: String,
        field: String,
        key: String,
        value: String,
    },

    #[error("duplicate column `{column}` on table `{table}`")]
    DuplicateColumn { table: String, column: String },

    #[error("table `{table}` declares more than one primary key (`{first}`, `{second}`)")]
    MultiplePrimaryKeys {
        table: String,
        first: String,
        second: String,
    },

    #[error("relation `{relation}` on `{table}` has no local key (set `localKey` or declare a primary key)")]
    MissingLocalKey { table: String, relation: String },

    #[error("column `{column}` expects {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("`{type_name}` is not a struct with named fields")]
    NotAStruct { type_name: &'static str },

    #[error("unknown field `{field}` on table `{table}`")]
    UnknownField { table: String, field: String },

    #[error("reflection error: {0}")]
    Reflect(#[from] ReflectError),

    #[error("allocation error: {0}")]
    Alloc(#[from] AllocError),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(#[from] ShapeMismatchError),

    #[error("cannot access field: {0}")]
    FieldAccess(String),

    #[error("json error: {0}")]
    Json(String),
}

impl SchemaError {
    pub(crate) fn mismatch(expected: &'static str, found: &Value) -> Self {
        SchemaError::TypeMismatch {
            column: String::new(),
            expected,
            found: found.kind(),
        }
    }

    /// Attach the column name to a conversion error.
    pub fn in_column(self, name: &str) -> Self {
        match self {
            SchemaError::TypeMismatch {
                expected, found, ..
            } => SchemaError::TypeMismatch {
                column: name.to_owned(),
                expected,
                found,
            },
            other => other,
        }
    }
}
