//! The database handle.

use std::future::Future;
use std::sync::Arc;

use oorm_schema::{Entity, Hook, MySql, Record, RecordType, Schema, SchemaRegistry};
use oorm_sql::Value;

use crate::migrate::Migrator;
use crate::{Config, Connection, Error, ExecResult, Query, Result, Row, TracedConn, Transaction};

/// A handle to the database.
///
/// Cheap to clone; clones share the schema registry and the connection. A
/// handle returned by [`begin`](Db::begin) runs every statement inside its
/// transaction.
#[derive(Clone)]
pub struct Db {
    shared: Arc<Shared>,
    exec: Executor,
}

struct Shared {
    registry: SchemaRegistry,
    config: Config,
}

#[derive(Clone)]
enum Executor {
    Pool(Arc<dyn Connection>),
    Tx(Arc<dyn Transaction>),
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("registry", &self.shared.registry)
            .field("transaction", &self.is_transaction())
            .finish()
    }
}

impl Db {
    /// Wrap a connection. Table names get `config.table_prefix`.
    pub fn new(conn: impl Connection + 'static, config: Config) -> Self {
        Self::from_arc(Arc::new(conn), config)
    }

    pub fn from_arc(conn: Arc<dyn Connection>, config: Config) -> Self {
        let registry = SchemaRegistry::new(Arc::new(MySql), config.table_prefix.clone());
        Self {
            shared: Arc::new(Shared { registry, config }),
            exec: Executor::Pool(conn),
        }
    }

    /// Open a MySQL pool.
    #[cfg(feature = "mysql")]
    pub async fn connect(config: Config) -> Result<Self> {
        let conn = crate::MySqlConnection::connect(&config).await?;
        tracing::info!(max_connections = config.max_connections, "connected");
        Ok(Self::new(conn, config))
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.shared.registry
    }

    /// Schema of `R`, built on first use.
    pub fn parse<R: Record>(&self) -> Result<Arc<Schema>> {
        Ok(self.shared.registry.parse::<R>()?)
    }

    pub(crate) fn schema_of(&self, ty: &RecordType) -> Result<Arc<Schema>> {
        Ok(self.shared.registry.schema_of(ty)?)
    }

    fn conn(&self) -> &dyn Connection {
        match &self.exec {
            Executor::Pool(conn) => &**conn,
            Executor::Tx(tx) => tx.connection(),
        }
    }

    pub(crate) fn traced(&self) -> TracedConn<'_> {
        TracedConn::new(self.conn())
    }

    /// Run a statement with `?` placeholders.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.traced().execute(sql, params).await
    }

    /// Run a query with `?` placeholders.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.traced().query(sql, params).await
    }

    /// Query builder over the table of `R`.
    pub fn model<R: Record>(&self) -> Query<R> {
        Query::for_model(self.clone())
    }

    /// Query builder over a table without a record type; rows come back as
    /// [`Row`]s.
    pub fn table(&self, name: impl Into<String>) -> Query<Row> {
        Query::for_table(self.clone(), name.into())
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::new(self.clone())
    }

    /// Insert one record. Shorthand for `model::<R>().create(record)`.
    pub async fn create<R: Record>(&self, record: &mut R) -> Result<u64> {
        self.model::<R>().create(record).await
    }

    /// Update one record by primary key.
    pub async fn update<R: Record>(&self, record: &mut R) -> Result<u64> {
        self.model::<R>().update(record).await
    }

    /// Delete one record by primary key; soft when the table has `deleted_at`.
    pub async fn delete<R: Record>(&self, record: &mut R) -> Result<u64> {
        self.model::<R>().delete(record).await
    }

    pub async fn find<R: Record>(&self, id: impl Into<Value>) -> Result<R> {
        self.model::<R>().find(id).await
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub fn is_transaction(&self) -> bool {
        matches!(self.exec, Executor::Tx(_))
    }

    /// Start a transaction. The returned handle runs every statement inside it.
    pub async fn begin(&self) -> Result<Db> {
        if self.is_transaction() {
            return Err(Error::NestedTransaction);
        }
        let tx = self.conn().begin().await.inspect_err(|e| {
            tracing::error!(error = %e, "transaction begin failed");
        })?;
        tracing::info!("transaction begin");
        Ok(Db {
            shared: Arc::clone(&self.shared),
            exec: Executor::Tx(Arc::from(tx)),
        })
    }

    pub async fn commit(&self) -> Result<()> {
        let Executor::Tx(tx) = &self.exec else {
            return Err(Error::NotInTransaction);
        };
        tracing::info!("transaction commit");
        tx.commit().await.inspect_err(|e| {
            tracing::error!(error = %e, "transaction commit failed");
        })
    }

    pub async fn rollback(&self) -> Result<()> {
        let Executor::Tx(tx) = &self.exec else {
            return Err(Error::NotInTransaction);
        };
        tracing::info!("transaction rollback");
        tx.rollback().await.inspect_err(|e| {
            tracing::error!(error = %e, "transaction rollback failed");
        })
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// Inside an open transaction `f` joins it instead.
    ///
    /// ```ignore
    /// db.transaction(|tx| async move {
    ///     tx.create(&mut order).await?;
    ///     tx.model::<Stock>().where_eq("sku", sku).update_values([("qty", 0)]).await
    /// })
    /// .await?;
    /// ```
    pub async fn transaction<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Db) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.is_transaction() {
            return f(self.clone()).await;
        }

        let tx = self.begin().await?;
        match f(tx.clone()).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                // The original error wins over a failed rollback.
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// Run a lifecycle hook on an entity, keeping the hook's changes.
pub(crate) fn run_hook(db: &Db, entity: &mut Entity, hook: Hook) -> Result<()> {
    let ty = *entity.record_type();
    ty.run_hook(db.registry(), entity, hook)?
        .map_err(|e| Error::hook(hook, e))
}
