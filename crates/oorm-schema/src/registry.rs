//! Process-wide schema cache and record type registration.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::{Dialect, Record, RecordType, Schema, SchemaError, table_name};

/// A record type registered for automatic migration.
///
/// Submitted through `inventory`, usually by `oorm::register!`.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    /// The record type, with its facet shape and hooks.
    pub record: RecordType,
}

impl TableDef {
    pub const fn new<R: Record>() -> Self {
        Self {
            record: RecordType::of::<R>(),
        }
    }
}

inventory::collect!(TableDef);

/// Every record type registered through [`TableDef`], in link order.
pub fn registered_tables() -> Vec<RecordType> {
    inventory::iter::<TableDef>
        .into_iter()
        .map(|def| def.record)
        .collect()
}

type CacheKey = (&'static str, String);

/// Builds schemas and caches them per (dialect, table).
///
/// A schema is built on first use and never re-derived; later lookups hand
/// out the same `Arc`.
pub struct SchemaRegistry {
    dialect: Arc<dyn Dialect>,
    prefix: String,
    cache: RwLock<HashMap<CacheKey, Arc<Schema>>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("dialect", &self.dialect.name())
            .field("prefix", &self.prefix)
            .field("cached", &self.len())
            .finish()
    }
}

impl SchemaRegistry {
    pub fn new(dialect: Arc<dyn Dialect>, prefix: impl Into<String>) -> Self {
        Self {
            dialect,
            prefix: prefix.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        &*self.dialect
    }

    /// Table name prefix applied to types without an `oorm::table` attribute.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Schema of `R`.
    pub fn parse<R: Record>(&self) -> Result<Arc<Schema>, SchemaError> {
        self.schema_of(&RecordType::of::<R>())
    }

    /// Schema of a type-erased record type.
    pub fn schema_of(&self, ty: &RecordType) -> Result<Arc<Schema>, SchemaError> {
        let key = (self.dialect.name(), table_name(ty, &self.prefix));

        if let Some(schema) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            if schema.record_type() == ty {
                return Ok(Arc::clone(schema));
            }
            // Two types sharing one table name: serve the other type uncached.
            tracing::debug!(
                table = %key.1,
                cached = schema.type_name,
                requested = ty.type_name(),
                "table name shared by two record types"
            );
            return Schema::build(ty, &*self.dialect, &self.prefix).map(Arc::new);
        }

        let schema = Arc::new(Schema::build(ty, &*self.dialect, &self.prefix)?);
        tracing::debug!(
            table = %schema.table,
            columns = schema.fields.len(),
            relations = schema.relations.len(),
            "parsed schema"
        );

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have won the race; keep the first build.
        let cached = cache.entry(key).or_insert(schema);
        Ok(Arc::clone(cached))
    }

    /// Number of cached schemas.
    pub fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached schema.
    pub fn clear(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
