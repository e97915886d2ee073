//! A scripted in-memory connection.
//!
//! Queries are answered by the first rule whose pattern occurs in the SQL;
//! statements succeed with one affected row unless a rule says otherwise.
//! Every call is logged, transactions included, so tests can assert on the
//! exact SQL that ran.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use oorm::{Config, Connection, Db, Error, ExecResult, Row, Transaction, Value};

#[derive(Clone, Default)]
pub struct Script {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    log: Vec<(String, Vec<Value>)>,
    rows: Vec<(String, Vec<Row>)>,
    results: Vec<(String, ExecResult)>,
    failures: Vec<String>,
}

pub fn row(values: &[(&str, Value)]) -> Row {
    values
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `Db` over this script with no table prefix.
    pub fn db(&self) -> Db {
        Db::new(self.clone(), Config::new("mysql://scripted"))
    }

    /// Answer queries containing `pattern` with `rows`.
    pub fn rows(&self, pattern: &str, rows: Vec<Row>) -> &Self {
        self.lock().rows.push((pattern.to_owned(), rows));
        self
    }

    /// Answer statements containing `pattern` with `result`.
    pub fn result(&self, pattern: &str, result: ExecResult) -> &Self {
        self.lock().results.push((pattern.to_owned(), result));
        self
    }

    /// Fail every call whose SQL contains `pattern`.
    pub fn fail(&self, pattern: &str) -> &Self {
        self.lock().failures.push(pattern.to_owned());
        self
    }

    /// SQL of every call so far, in order.
    pub fn sql(&self) -> Vec<String> {
        self.lock().log.iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// SQL and parameters of every call so far.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.lock().log.clone()
    }

    /// Calls whose SQL contains `pattern`.
    pub fn calls_matching(&self, pattern: &str) -> Vec<(String, Vec<Value>)> {
        self.calls()
            .into_iter()
            .filter(|(sql, _)| sql.contains(pattern))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<(), Error> {
        let mut state = self.lock();
        state.log.push((sql.to_owned(), params.to_vec()));
        if state.failures.iter().any(|p| sql.contains(p.as_str())) {
            return Err(Error::Database(format!("scripted failure: {sql}").into()));
        }
        Ok(())
    }
}

impl Connection for Script {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, oorm::Result<ExecResult>> {
        async move {
            self.record(sql, params)?;
            let state = self.lock();
            Ok(state
                .results
                .iter()
                .find(|(pattern, _)| sql.contains(pattern.as_str()))
                .map(|(_, result)| *result)
                .unwrap_or(ExecResult {
                    rows_affected: 1,
                    last_insert_id: 0,
                }))
        }
        .boxed()
    }

    fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, oorm::Result<Vec<Row>>> {
        async move {
            self.record(sql, params)?;
            let state = self.lock();
            Ok(state
                .rows
                .iter()
                .find(|(pattern, _)| sql.contains(pattern.as_str()))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default())
        }
        .boxed()
    }

    fn begin(&self) -> BoxFuture<'_, oorm::Result<Box<dyn Transaction>>> {
        async move {
            self.record("BEGIN", &[])?;
            Ok(Box::new(ScriptTx {
                script: self.clone(),
            }) as Box<dyn Transaction>)
        }
        .boxed()
    }
}

pub struct ScriptTx {
    script: Script,
}

impl Transaction for ScriptTx {
    fn connection(&self) -> &dyn Connection {
        &self.script
    }

    fn commit(&self) -> BoxFuture<'_, oorm::Result<()>> {
        async move { self.script.record("COMMIT", &[]) }.boxed()
    }

    fn rollback(&self) -> BoxFuture<'_, oorm::Result<()>> {
        async move { self.script.record("ROLLBACK", &[]) }.boxed()
    }
}
