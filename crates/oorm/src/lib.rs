//! MySQL ORM for Rust: record declarations, schema reconciliation and
//! concurrent eager loading.
//!
//! This crate provides:
//! - A query builder over declared records ([`Db::model`]) or bare tables
//!   ([`Db::table`])
//! - Inserts, updates and (soft) deletes with lifecycle hooks and
//!   `created_at`/`updated_at` bookkeeping
//! - Eager loading of relations, one `IN` query per relation, run
//!   concurrently ([`Query::with`])
//! - Migrations that diff a declared table against `SHOW CREATE TABLE`
//!   ([`Migrator`])
//!
//! # Naming Convention
//!
//! **Table names are the snake_case type name** (e.g. `User` → `user`,
//! `UserContact` → `user_contact`), with the configured prefix in front.
//! Foreign keys default to `{table}_{primary key}`: a `User` with an `id`
//! owns `Contact`s through `user_id`.
//!
//! # Example
//!
//! ```ignore
//! use facet::Facet;
//! use oorm::{Config, Db, Model, Record};
//!
//! #[derive(Debug, Clone, Default, Facet)]
//! struct User {
//!     #[facet(oorm::embed)]
//!     model: Model,
//!     #[facet(oorm::tag = "size:64;unique")]
//!     name: String,
//!     contacts: Vec<Contact>,
//! }
//!
//! impl Record for User {}
//!
//! oorm::register!(User, Contact);
//!
//! let db = Db::connect(Config::from_env()?).await?;
//! db.migrator().auto_all(true, false).await?;
//! let users = db.model::<User>().with("contacts").get().await?;
//! ```

// Lets the attribute grammar resolve `::oorm` from inside this crate.
extern crate self as oorm;

mod config;
mod db;
mod error;
pub mod logging;
pub mod migrate;
mod model;
mod query;
mod relation;
mod traced;
mod write;

#[cfg(feature = "mysql")]
mod mysql;

pub use config::{Config, DEFAULT_MAX_CONNECTIONS};
pub use db::Db;
pub use error::{BoxError, Error};
pub use migrate::{Change, LiveTableInfo, Migrator, TableDiff};
pub use model::Model;
pub use query::{CREATED_AT, DELETED_AT, Query, UPDATED_AT};
pub use relation::Scope;
pub use traced::{Connection, ExecResult, Row, TracedConn, Transaction};

#[cfg(feature = "mysql")]
pub use mysql::{MySqlConnection, MySqlTransaction};

pub use oorm_schema::{
    Cardinality, DataType, Dialect, Entity, Field, Hook, HookError, HookResult, IndexKind, Json,
    MySql, Record, RecordType, Relation, Schema, SchemaError, SchemaRegistry, TableDef,
};

// Attribute grammar, so `#[facet(oorm::tag = "...")]` resolves.
pub use oorm_schema::{__attr, __parse_attr, Attr};
pub use oorm_sql as sql;
pub use oorm_sql::{Expr, Value};

// Re-exported for `register!`.
#[doc(hidden)]
pub use inventory;

/// Result type for oorm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Register record types for [`Migrator::auto_all`].
///
/// ```ignore
/// oorm::register!(User, Contact);
/// ```
#[macro_export]
macro_rules! register {
    ($($ty:ty),+ $(,)?) => {
        $(
            $crate::inventory::submit! {
                $crate::TableDef::new::<$ty>()
            }
        )+
    };
}
