//! Connection abstraction and query tracing.
//!
//! Every statement goes through [`TracedConn`], which wraps the call in a
//! `db.query`/`db.execute` span carrying the SQL text, the bound parameters,
//! the row count and the elapsed time.

use std::time::Instant;

use futures::future::BoxFuture;
use oorm_sql::{RenderedSql, Value};
use tracing::Instrument;

use crate::Result;

/// A row as column name and value pairs, in select-list order.
pub type Row = Vec<(String, Value)>;

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// `LAST_INSERT_ID()` after an insert; the first id of a multi-row insert.
    pub last_insert_id: u64,
}

/// Something that can run SQL with `?` placeholders.
///
/// Implemented by the bundled MySQL pool and by anything else that speaks the
/// same dialect.
pub trait Connection: Send + Sync {
    /// Execute a statement, returning the affected row count and insert id.
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value])
    -> BoxFuture<'a, Result<ExecResult>>;

    /// Execute a query, returning all rows.
    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>>;

    /// Start a transaction on a dedicated connection.
    fn begin(&self) -> BoxFuture<'_, Result<Box<dyn Transaction>>>;
}

/// An open transaction.
///
/// Statements run through its [`Connection`] methods are part of the
/// transaction until [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback).
pub trait Transaction: Send + Sync {
    fn connection(&self) -> &dyn Connection;

    fn commit(&self) -> BoxFuture<'_, Result<()>>;

    fn rollback(&self) -> BoxFuture<'_, Result<()>>;
}

/// A wrapper around a connection that logs all statements via tracing.
pub struct TracedConn<'a> {
    conn: &'a dyn Connection,
}

impl<'a> TracedConn<'a> {
    pub fn new(conn: &'a dyn Connection) -> Self {
        Self { conn }
    }

    /// Execute a statement, returning the affected row count and insert id.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            params = ?params,
            affected = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        );
        let start = Instant::now();
        let result = self
            .conn
            .execute(sql, params)
            .instrument(span.clone())
            .await;
        span.record("elapsed_ms", start.elapsed().as_secs_f64() * 1000.0);
        match &result {
            Ok(res) => {
                span.record("affected", res.rows_affected);
            }
            Err(e) => {
                tracing::error!(parent: &span, error = %e, "statement failed");
            }
        }
        result
    }

    /// Execute a query, returning all rows.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = ?params,
            rows = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        );
        let start = Instant::now();
        let result = self.conn.query(sql, params).instrument(span.clone()).await;
        span.record("elapsed_ms", start.elapsed().as_secs_f64() * 1000.0);
        match &result {
            Ok(rows) => {
                span.record("rows", rows.len());
            }
            Err(e) => {
                tracing::error!(parent: &span, error = %e, "query failed");
            }
        }
        result
    }

    pub async fn execute_rendered(&self, rendered: &RenderedSql) -> Result<ExecResult> {
        self.execute(&rendered.sql, &rendered.params).await
    }

    pub async fn query_rendered(&self, rendered: &RenderedSql) -> Result<Vec<Row>> {
        self.query(&rendered.sql, &rendered.params).await
    }
}
