//! Schema migrations driven by record declarations.
//!
//! A [`Migrator`] reads a table back with `SHOW CREATE TABLE`, diffs it
//! against the declared [`Schema`] and runs the resulting statements one
//! after another. DDL is not transactional in MySQL: when a statement fails,
//! the ones before it stay applied and the rest of that table is skipped.
//!
//! ```ignore
//! let migrator = db.migrator();
//! // Dry run.
//! println!("{}", migrator.plan::<User>(true, false).await?);
//! // Add columns and indexes, rebuild changed ones, keep undeclared columns.
//! migrator.auto::<User>(true, false).await?;
//! ```

use std::sync::Arc;

use oorm_schema::{IndexKind, Record, Schema, SchemaError, registered_tables};
use oorm_sql::{Ident, Lit, Value};

use crate::error::ErrorCollector;
use crate::{Db, Error, Result};

mod ddl;
mod diff;
mod inspect;

pub use ddl::{column_fragment, create_table};
pub use diff::{Change, TableDiff, plan};
pub use inspect::LiveTableInfo;

/// Creates and reconciles tables.
#[derive(Debug, Clone)]
pub struct Migrator {
    db: Db,
}

impl Migrator {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let rows = self
            .db
            .query(&format!("SHOW TABLES LIKE {}", Lit(table)), &[])
            .await?;
        // `_` is a wildcard in LIKE, so compare names exactly.
        Ok(rows.iter().any(|row| {
            matches!(row.first(), Some((_, Value::String(name))) if name == table)
        }))
    }

    /// Read the live structure of `table`.
    pub async fn table_info(&self, table: &str) -> Result<LiveTableInfo> {
        let rows = self
            .db
            .query(&format!("SHOW CREATE TABLE {}", Ident(table)), &[])
            .await?;
        let create = rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().nth(1))
            .map(|(_, value)| value);
        match create {
            Some(Value::String(sql)) => Ok(LiveTableInfo::parse(&sql)),
            Some(Value::Bytes(bytes)) => String::from_utf8(bytes)
                .map(|sql| LiveTableInfo::parse(&sql))
                .map_err(|_| Error::LiveSchema {
                    table: table.to_owned(),
                    message: "definition is not valid UTF-8".to_owned(),
                }),
            _ => Err(Error::LiveSchema {
                table: table.to_owned(),
                message: "SHOW CREATE TABLE returned no definition".to_owned(),
            }),
        }
    }

    /// The changes [`auto`](Self::auto) would run, without running them.
    pub async fn plan<R: Record>(&self, modify: bool, drop: bool) -> Result<TableDiff> {
        let schema = self.db.parse::<R>()?;
        self.plan_schema(&schema, modify, drop).await
    }

    pub async fn plan_schema(&self, schema: &Schema, modify: bool, drop: bool) -> Result<TableDiff> {
        let live = if self.table_exists(&schema.table).await? {
            Some(self.table_info(&schema.table).await?)
        } else {
            None
        };
        Ok(plan(schema, live.as_ref(), modify, drop))
    }

    /// `CREATE TABLE` for `R`.
    pub async fn create<R: Record>(&self) -> Result<()> {
        let schema = self.db.parse::<R>()?;
        self.run(&schema.table, create_table(&schema)).await
    }

    /// Create the table of `R`, or bring it in line with the declaration.
    ///
    /// Missing columns are always added. `modify` re-declares columns whose
    /// definition changed, fixes the primary key and rebuilds changed
    /// indexes; `drop` removes undeclared columns and indexes. Returns the
    /// changes that were applied.
    pub async fn auto<R: Record>(&self, modify: bool, drop: bool) -> Result<TableDiff> {
        let schema = self.db.parse::<R>()?;
        self.auto_schema(&schema, modify, drop).await
    }

    pub async fn auto_schema(&self, schema: &Schema, modify: bool, drop: bool) -> Result<TableDiff> {
        let diff = self.plan_schema(schema, modify, drop).await?;
        if diff.is_empty() {
            tracing::debug!(table = %diff.table, "table up to date");
            return Ok(diff);
        }
        self.apply(&diff).await?;
        Ok(diff)
    }

    /// Run [`auto`](Self::auto) for every type registered with
    /// [`register!`](crate::register).
    ///
    /// A failing table does not stop the others; all failures are returned
    /// together.
    pub async fn auto_all(&self, modify: bool, drop: bool) -> Result<Vec<TableDiff>> {
        let mut diffs = Vec::new();
        let mut errors = ErrorCollector::default();
        for ty in registered_tables() {
            let schema: Arc<Schema> = match self.db.schema_of(&ty) {
                Ok(schema) => schema,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            if let Some(diff) = errors.take(self.auto_schema(&schema, modify, drop).await) {
                diffs.push(diff);
            }
        }
        errors.finish()?;
        Ok(diffs)
    }

    /// Run every change of `diff`, in order, stopping at the first failure.
    pub async fn apply(&self, diff: &TableDiff) -> Result<()> {
        for change in &diff.changes {
            tracing::info!(table = %diff.table, %change, "migrating");
            self.run(&diff.table, change.to_sql(&diff.table)).await?;
        }
        Ok(())
    }

    async fn run(&self, table: &str, statement: String) -> Result<()> {
        match self.db.execute(&statement, &[]).await {
            Ok(_) => Ok(()),
            Err(source) => Err(Error::Migration {
                table: table.to_owned(),
                statement,
                source: Box::new(source),
            }),
        }
    }

    // ========================================================================
    // Single statements
    // ========================================================================

    pub async fn add_column<R: Record>(&self, name: &str) -> Result<()> {
        let schema = self.db.parse::<R>()?;
        let field = field(&schema, name)?;
        self.run(&schema.table, ddl::add_column(&schema.table, field))
            .await
    }

    pub async fn modify_column<R: Record>(&self, name: &str) -> Result<()> {
        let schema = self.db.parse::<R>()?;
        let field = field(&schema, name)?;
        self.run(&schema.table, ddl::modify_column(&schema.table, field))
            .await
    }

    pub async fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        self.run(table, ddl::drop_column(table, column)).await
    }

    /// Add the declared index `name` (with its `_uni`/`_key`/`_full` suffix).
    pub async fn add_index<R: Record>(&self, name: &str) -> Result<()> {
        let schema = self.db.parse::<R>()?;
        let found = IndexKind::SECONDARY.into_iter().find_map(|kind| {
            ddl::declared_indexes(&schema, kind)
                .into_iter()
                .find(|(declared, _)| *declared == name)
                .map(|(_, columns)| (kind, columns))
        });
        let Some((kind, columns)) = found else {
            return Err(Error::InvalidParameter(format!(
                "`{}` declares no index `{name}`",
                schema.table
            )));
        };
        self.run(&schema.table, ddl::add_index(&schema.table, kind, name, &columns))
            .await
    }

    pub async fn drop_index(&self, table: &str, name: &str) -> Result<()> {
        self.run(table, ddl::drop_index(table, name)).await
    }

    pub async fn drop_primary_key(&self, table: &str) -> Result<()> {
        self.run(table, ddl::drop_primary_key(table)).await
    }
}

fn field<'s>(schema: &'s Schema, name: &str) -> Result<&'s oorm_schema::Field> {
    schema
        .field(name)
        .filter(|f| f.raw.is_none())
        .ok_or_else(|| {
            SchemaError::UnknownField {
                table: schema.table.clone(),
                field: name.to_owned(),
            }
            .into()
        })
}
