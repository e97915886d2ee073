//! MySQL backend on a sqlx pool.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::FutureExt;
use futures::future::BoxFuture;
use oorm_sql::Value;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row as _, TypeInfo};
use tokio::sync::Mutex;

use crate::{Config, Connection, Error, ExecResult, Result, Row, Transaction};

/// A traced-ready connection pool.
///
/// # Example
///
/// ```ignore
/// let conn = MySqlConnection::connect(&Config::from_env()?).await?;
/// let db = Db::new(conn, config);
/// ```
#[derive(Debug, Clone)]
pub struct MySqlConnection {
    pool: MySqlPool,
}

impl MySqlConnection {
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get the inner pool (for cases where you need the raw pool).
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

fn bind<'q>(sql: &'q str, params: &'q [Value]) -> Query<'q, MySql, MySqlArguments> {
    params.iter().fold(sqlx::query(sql), |query, value| match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::I64(n) => query.bind(*n),
        Value::U64(n) => query.bind(*n),
        Value::F64(n) => query.bind(*n),
        Value::Decimal(d) => query.bind(*d),
        Value::String(s) | Value::Json(s) => query.bind(s.as_str()),
        Value::Bytes(b) => query.bind(b.as_slice()),
        Value::Time(t) => query.bind(*t),
    })
}

/// Convert a sqlx row to our row type.
fn decode_row(row: &MySqlRow) -> Result<Row> {
    row.columns()
        .iter()
        .map(|column| {
            let idx = column.ordinal();
            let value = decode_value(row, idx, column.type_info().name())?;
            Ok((column.name().to_owned(), value))
        })
        .collect()
}

fn decode_value(row: &MySqlRow, idx: usize, type_name: &str) -> Result<Value> {
    fn get<'r, T>(row: &'r MySqlRow, idx: usize) -> std::result::Result<Option<T>, sqlx::Error>
    where
        T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
    {
        row.try_get::<Option<T>, _>(idx)
    }

    let value = match type_name {
        "NULL" => None,
        "BOOLEAN" => get::<bool>(row, idx)?.map(Value::Bool),
        t if t.ends_with("UNSIGNED") => get::<u64>(row, idx)?.map(Value::U64),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            get::<i64>(row, idx)?.map(Value::I64)
        }
        "FLOAT" => get::<f32>(row, idx)?.map(|n| Value::F64(f64::from(n))),
        "DOUBLE" => get::<f64>(row, idx)?.map(Value::F64),
        "DECIMAL" => get::<Decimal>(row, idx)?.map(Value::Decimal),
        "DATETIME" | "TIMESTAMP" => get::<NaiveDateTime>(row, idx)?.map(Value::Time),
        "DATE" => get::<NaiveDate>(row, idx)?.map(|d| Value::Time(d.and_time(NaiveTime::MIN))),
        "JSON" => get::<serde_json::Value>(row, idx)?.map(|v| Value::Json(v.to_string())),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
            get::<Vec<u8>>(row, idx)?.map(Value::Bytes)
        }
        _ => match get::<String>(row, idx) {
            Ok(s) => s.map(Value::String),
            Err(_) => get::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

impl Connection for MySqlConnection {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<ExecResult>> {
        async move {
            let res = bind(sql, params).execute(&self.pool).await?;
            Ok(ExecResult {
                rows_affected: res.rows_affected(),
                last_insert_id: res.last_insert_id(),
            })
        }
        .boxed()
    }

    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        async move {
            let rows = bind(sql, params).fetch_all(&self.pool).await?;
            rows.iter().map(decode_row).collect()
        }
        .boxed()
    }

    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn Transaction>>> {
        async move {
            let tx = self.pool.begin().await?;
            Ok(Box::new(MySqlTransaction {
                tx: Mutex::new(Some(tx)),
            }) as Box<dyn Transaction>)
        }
        .boxed()
    }
}

/// A transaction holding one pooled connection.
///
/// Statements from concurrent tasks are serialized on the connection.
pub struct MySqlTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, MySql>>>,
}

impl Connection for MySqlTransaction {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<ExecResult>> {
        async move {
            let mut guard = self.tx.lock().await;
            let tx = guard.as_mut().ok_or(Error::TransactionFinished)?;
            let res = bind(sql, params).execute(&mut **tx).await?;
            Ok(ExecResult {
                rows_affected: res.rows_affected(),
                last_insert_id: res.last_insert_id(),
            })
        }
        .boxed()
    }

    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        async move {
            let mut guard = self.tx.lock().await;
            let tx = guard.as_mut().ok_or(Error::TransactionFinished)?;
            let rows = bind(sql, params).fetch_all(&mut **tx).await?;
            rows.iter().map(decode_row).collect()
        }
        .boxed()
    }

    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn Transaction>>> {
        async { Err(Error::NestedTransaction) }.boxed()
    }
}

impl Transaction for MySqlTransaction {
    fn connection(&self) -> &dyn Connection {
        self
    }

    fn commit(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let tx = self.tx.lock().await.take().ok_or(Error::TransactionFinished)?;
            tx.commit().await?;
            Ok(())
        }
        .boxed()
    }

    fn rollback(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let tx = self.tx.lock().await.take().ok_or(Error::TransactionFinished)?;
            tx.rollback().await?;
            Ok(())
        }
        .boxed()
    }
}
