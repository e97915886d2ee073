//! SQL dialects.

use crate::{DataType, Field};

/// Largest length stored inline as `varchar`.
pub const VARCHAR_MAX: u32 = 65_535;
/// Largest length stored as `mediumtext`.
pub const MEDIUMTEXT_MAX: u32 = 1 << 24;
/// Length used for strings without an explicit size.
pub const DEFAULT_STRING_SIZE: u32 = 255;

/// Maps declared fields to column types.
pub trait Dialect: Send + Sync {
    /// Dialect name, part of the schema cache key.
    fn name(&self) -> &'static str;

    /// Column type text as the server reports it back, e.g. `varchar(64)` or
    /// `bigint unsigned`.
    fn column_type(&self, field: &Field) -> String;
}

/// MySQL 8.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn column_type(&self, field: &Field) -> String {
        match field.data_type {
            DataType::Bool => "tinyint".to_owned(),
            DataType::Int => int_type(field.size).to_owned(),
            DataType::Uint => format!("{} unsigned", int_type(field.size)),
            DataType::Float => match &field.decimal {
                Some(spec) => format!("decimal({spec})"),
                None if field.size <= 32 => "float".to_owned(),
                None => "double".to_owned(),
            },
            DataType::String => match field.size {
                0 => format!("varchar({DEFAULT_STRING_SIZE})"),
                n if n <= VARCHAR_MAX => format!("varchar({n})"),
                n if n <= MEDIUMTEXT_MAX => "mediumtext".to_owned(),
                _ => "longtext".to_owned(),
            },
            DataType::Time => match field.size {
                0 => "datetime".to_owned(),
                n => format!("datetime({n})"),
            },
            DataType::Json => "json".to_owned(),
        }
    }
}

fn int_type(bits: u32) -> &'static str {
    match bits {
        0..=8 => "tinyint",
        9..=16 => "smallint",
        17..=32 => "int",
        _ => "bigint",
    }
}
