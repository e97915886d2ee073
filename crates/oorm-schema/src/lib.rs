//! Record reflection and schema extraction for oorm.
//!
//! Records derive [`Facet`]; the schema is read off their shape. Each field
//! may carry a tag string in the `key[:value];...` format, embedded records
//! are flattened into their owner, and fields holding other records become
//! relations:
//!
//! ```ignore
//! use facet::Facet;
//! use oorm::Record;
//!
//! #[derive(Debug, Clone, Default, Facet)]
//! struct Contact {
//!     #[facet(oorm::tag = "autoIncrement")]
//!     id: u64,
//!     #[facet(oorm::tag = "index")]
//!     user_id: u64,
//!     #[facet(oorm::tag = "size:32;unique")]
//!     mobile: String,
//! }
//!
//! #[derive(Debug, Clone, Default, Facet)]
//! struct User {
//!     #[facet(oorm::tag = "autoIncrement")]
//!     id: u64,
//!     #[facet(oorm::tag = "comment:login name")]
//!     user_name: String,
//!     contacts: Vec<Contact>,
//! }
//!
//! impl Record for Contact {}
//! impl Record for User {}
//!
//! let registry = oorm::SchemaRegistry::new(std::sync::Arc::new(oorm::MySql), "");
//! let schema = registry.parse::<User>()?;
//! assert_eq!(schema.table, "user");
//! assert_eq!(schema.columns(), vec!["id", "user_name"]);
//! assert_eq!(schema.relation("contacts").unwrap().foreign_key, "user_id");
//! ```
//!
//! The [`SchemaRegistry`] turns a shape into a [`Schema`] (columns, primary
//! key, unique/plain/fulltext indexes, relations) and caches it per dialect
//! and table. Values move between typed records and SQL as [`Entity`]s.

use std::fmt;

mod column;
pub use column::*;

mod dialect;
pub use dialect::*;

mod entity;
pub use entity::*;

mod error;
pub use error::*;

mod record;
pub use record::*;

mod registry;
pub use registry::*;

mod schema;
pub use schema::*;

mod tag;
pub use tag::*;

pub use oorm_sql::Value;

// Define the oorm attribute grammar using facet's macro.
// This generates:
// - `Attr` enum with all attribute variants
// - `__attr!` macro for parsing attributes
// - Re-exports for use as `oorm::tag`, `oorm::embed`, etc.
facet::define_attr_grammar! {
    ns "oorm";
    crate_path ::oorm;

    /// oorm attribute types.
    pub enum Attr {
        /// Overrides the table name. Used verbatim: no prefix is applied.
        ///
        /// Usage: `#[facet(oorm::table = "people")]`
        Table(&'static str),

        /// Column settings in the `key[:value];...` format.
        ///
        /// Usage: `#[facet(oorm::tag = "size:64;unique")]`
        Tag(&'static str),

        /// Flattens a nested record's fields into the owning table.
        ///
        /// Usage: `#[facet(oorm::embed)]`
        Embed,
    }
}

/// Namespace of the attributes above.
pub(crate) const ATTR_NS: &str = "oorm";

/// Error type returned by lifecycle hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by lifecycle hooks.
pub type HookResult = Result<(), HookError>;

/// Normalized column data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int,
    Uint,
    Float,
    String,
    Time,
    Json,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Int => "int",
            DataType::Uint => "uint",
            DataType::Float => "float",
            DataType::String => "string",
            DataType::Time => "time",
            DataType::Json => "json",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests;
