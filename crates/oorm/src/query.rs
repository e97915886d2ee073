//! The query builder and its read operations.

use std::marker::PhantomData;
use std::sync::Arc;

use oorm_schema::{Entity, Field, Hook, Record, Schema};
use oorm_sql::{
    BinOp, Expr, FromClause, OrderBy, RenderedSql, SelectColumn, SelectStmt, Value, render,
};

use crate::db::run_hook;
use crate::relation::{self, Scope, WithTree};
use crate::{Db, Error, Result, Row};

/// Soft-delete marker column.
pub const DELETED_AT: &str = "deleted_at";
/// Filled on insert.
pub const CREATED_AT: &str = "created_at";
/// Filled on insert and update.
pub const UPDATED_AT: &str = "updated_at";

/// A query over one table.
///
/// Builder methods never fail; a problem found while building (an unknown
/// operator, a schema error) is kept and returned by the terminal operation.
///
/// ```ignore
/// let users: Vec<User> = db
///     .model::<User>()
///     .where_op("age", ">=", 18)
///     .with("contacts")
///     .order_by_desc("id")
///     .limit(20)
///     .get()
///     .await?;
/// ```
pub struct Query<R> {
    pub(crate) db: Db,
    pub(crate) table: String,
    pub(crate) schema: Option<Arc<Schema>>,
    pub(crate) select: Vec<String>,
    pub(crate) omit: Vec<String>,
    pub(crate) filter: Option<Expr>,
    order_by: Vec<OrderBy>,
    group_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    raw: Option<(String, Vec<Value>)>,
    pub(crate) with: WithTree,
    with_deleted: bool,
    pub(crate) omit_empty: bool,
    pub(crate) error: Option<Error>,
    _marker: PhantomData<fn() -> R>,
}

impl<R> std::fmt::Debug for Query<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("table", &self.table)
            .field("filter", &self.filter)
            .field("with", &self.with)
            .finish_non_exhaustive()
    }
}

impl<R: Record> Query<R> {
    pub(crate) fn for_model(db: Db) -> Self {
        match db.parse::<R>() {
            Ok(schema) => {
                let table = schema.table.clone();
                Self::new(db, table, Some(schema))
            }
            Err(e) => {
                let mut query = Self::new(db, String::new(), None);
                query.error = Some(e);
                query
            }
        }
    }
}

impl Query<Row> {
    pub(crate) fn for_table(db: Db, table: String) -> Self {
        Self::new(db, table, None)
    }
}

// ============================================================================
// Builder
// ============================================================================

impl<R> Query<R> {
    fn new(db: Db, table: String, schema: Option<Arc<Schema>>) -> Self {
        Self {
            db,
            table,
            schema,
            select: Vec::new(),
            omit: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            group_by: Vec::new(),
            limit: None,
            offset: None,
            raw: None,
            with: WithTree::default(),
            with_deleted: false,
            omit_empty: false,
            error: None,
            _marker: PhantomData,
        }
    }

    fn fail(mut self, error: Error) -> Self {
        self.error.get_or_insert(error);
        self
    }

    /// Override the table name.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = name.into();
        self
    }

    /// Restrict the selected (and written) columns. Names that are not
    /// fields are selected verbatim, e.g. `COUNT(*) AS n`.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Leave columns out of the select list and of writes.
    pub fn omit<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omit.extend(columns.into_iter().map(Into::into));
        self
    }

    /// AND a condition.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// OR a condition with everything filtered so far.
    pub fn or_filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.or(expr),
            None => expr,
        });
        self
    }

    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Expr::column(column).eq(Expr::param(value)))
    }

    /// Compare with an operator as written in SQL: `=`, `<>`, `!=`, `<`,
    /// `<=`, `>`, `>=`, `like`.
    pub fn where_op(self, column: &str, op: &str, value: impl Into<Value>) -> Self {
        let value = Expr::param(value);
        if op.trim().eq_ignore_ascii_case("like") {
            return self.filter(Expr::column(column).like(value));
        }
        match BinOp::parse(op) {
            Some(op) => self.filter(Expr::column(column).binop(op, value)),
            None => self.fail(Error::InvalidParameter(format!("unknown operator {op:?}"))),
        }
    }

    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter(Expr::column(column).in_list(values.into_iter().map(Into::into)))
    }

    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filter(Expr::column(column).not_in_list(values.into_iter().map(Into::into)))
    }

    pub fn where_null(self, column: &str) -> Self {
        self.filter(Expr::column(column).is_null())
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.filter(Expr::column(column).is_not_null())
    }

    pub fn where_between(self, column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.filter(Expr::column(column).between(Expr::param(low), Expr::param(high)))
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push(OrderBy::asc(select_expr(column)));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push(OrderBy::desc(select_expr(column)));
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// One page of `per_page` rows; pages count from 1.
    pub fn page(self, page: u64, per_page: u64) -> Self {
        self.offset(page.saturating_sub(1) * per_page).limit(per_page)
    }

    /// Eager-load a relation; `contacts.phones` loads two levels.
    pub fn with(mut self, name: &str) -> Self {
        self.with.add(name, None);
        self
    }

    /// Eager-load a relation, narrowing the related query.
    ///
    /// The scope applies to the last segment of `name`.
    pub fn with_scope<F>(mut self, name: &str, scope: F) -> Self
    where
        F: Fn(Scope) -> Scope + Send + Sync + 'static,
    {
        self.with.add(name, Some(Arc::new(scope)));
        self
    }

    /// Include soft-deleted rows.
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    /// Skip zero values on writes.
    pub fn omit_empty(mut self) -> Self {
        self.omit_empty = true;
        self
    }

    /// Replace the generated SELECT with literal SQL.
    pub fn raw(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.raw = Some((sql.into(), params));
        self
    }

    /// Surface a builder error or a missing table.
    pub(crate) fn check(&mut self) -> Result<()> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if self.table.is_empty() && self.raw.is_none() {
            return Err(Error::MissingTableName);
        }
        Ok(())
    }

    pub(crate) fn schema(&self) -> Result<&Arc<Schema>> {
        self.schema.as_ref().ok_or(Error::MissingTableName)
    }

    /// The WHERE clause of reads: the filter plus the soft-delete condition.
    fn read_filter(&self) -> Option<Expr> {
        let soft_delete = self
            .schema
            .as_deref()
            .filter(|s| !self.with_deleted && s.has_column(DELETED_AT))
            .map(|_| Expr::column(DELETED_AT).is_null());
        match (soft_delete, self.filter.clone()) {
            (Some(deleted), Some(filter)) => Some(deleted.and(filter)),
            (deleted, filter) => deleted.or_else(|| filter),
        }
    }

    fn select_stmt(&self, columns: Vec<SelectColumn>) -> SelectStmt {
        let mut stmt = SelectStmt::new()
            .columns(columns)
            .from(FromClause::table(&self.table));
        if let Some(filter) = self.read_filter() {
            stmt = stmt.where_(filter);
        }
        for column in &self.group_by {
            stmt = stmt.group_by(select_expr(column));
        }
        for order in &self.order_by {
            stmt = stmt.order_by(order.clone());
        }
        if let Some(limit) = self.limit {
            stmt = stmt.limit(limit);
        }
        if let Some(offset) = self.offset {
            stmt = stmt.offset(offset);
        }
        stmt
    }

    /// The SELECT this query runs, or the raw SQL if one was given.
    pub fn to_sql(&self) -> RenderedSql {
        if let Some((sql, params)) = &self.raw {
            return RenderedSql {
                sql: sql.clone(),
                params: params.clone(),
            };
        }
        let columns = match self.schema.as_deref() {
            Some(schema) => select_list(schema, &self.select, &self.omit)
                .into_iter()
                .map(|(column, _)| column)
                .collect(),
            None => self
                .select
                .iter()
                .map(|name| SelectColumn::expr(select_expr(name)))
                .collect(),
        };
        render(&self.select_stmt(columns))
    }

    // ========================================================================
    // Reads that need no record type
    // ========================================================================

    /// All matching rows as column/value pairs.
    pub async fn rows(mut self) -> Result<Vec<Row>> {
        self.check()?;
        let rendered = self.to_sql();
        self.db.traced().query_rendered(&rendered).await
    }

    /// First value of `column`; `NotFound` when no row matches.
    pub async fn value(mut self, column: &str) -> Result<Value> {
        self.check()?;
        let stmt = self
            .select_stmt(vec![SelectColumn::expr(select_expr(column))])
            .limit(1);
        let rows = self.db.traced().query_rendered(&render(&stmt)).await?;
        first_value(rows).ok_or(Error::NotFound)
    }

    pub async fn exists(mut self) -> Result<bool> {
        self.check()?;
        let stmt = self
            .select_stmt(vec![SelectColumn::expr(Expr::raw("1"))])
            .limit(1);
        let rows = self.db.traced().query_rendered(&render(&stmt)).await?;
        Ok(!rows.is_empty())
    }

    pub async fn count(self) -> Result<u64> {
        let value = self.aggregate(Aggregate::Count).await?;
        Ok(value.as_u64().unwrap_or(0))
    }

    /// `MAX(column)`; NULL when nothing matches.
    pub async fn max(self, column: &str) -> Result<Value> {
        self.aggregate(Aggregate::Max(column.to_owned())).await
    }

    pub async fn min(self, column: &str) -> Result<Value> {
        self.aggregate(Aggregate::Min(column.to_owned())).await
    }

    pub async fn avg(self, column: &str) -> Result<Value> {
        self.aggregate(Aggregate::Avg(column.to_owned())).await
    }

    pub async fn sum(self, column: &str) -> Result<Value> {
        self.aggregate(Aggregate::Sum(column.to_owned())).await
    }

    async fn aggregate(mut self, aggregate: Aggregate) -> Result<Value> {
        self.check()?;
        let rendered = self.aggregate_sql(&aggregate);
        let rows = self.db.traced().query_rendered(&rendered).await?;
        Ok(first_value(rows).unwrap_or(Value::Null))
    }

    /// A grouped query is aggregated over its per-group results.
    fn aggregate_sql(&self, aggregate: &Aggregate) -> RenderedSql {
        if self.group_by.is_empty() {
            let mut stmt = self.select_stmt(vec![SelectColumn::expr(aggregate.expr())]);
            stmt.order_by.clear();
            return render(&stmt);
        }

        let inner_column = match aggregate {
            Aggregate::Count => SelectColumn::expr(Expr::raw("1")),
            other => SelectColumn::aliased(other.expr(), "aggregate"),
        };
        let inner = render(&self.select_stmt(vec![inner_column]));
        let outer = match aggregate {
            Aggregate::Count => "COUNT(*)".to_owned(),
            other => format!("{}(`aggregate`)", other.function()),
        };
        RenderedSql {
            sql: format!("SELECT {outer} FROM ({}) AS `grouped`", inner.sql),
            params: inner.params,
        }
    }
}

enum Aggregate {
    Count,
    Max(String),
    Min(String),
    Avg(String),
    Sum(String),
}

impl Aggregate {
    fn function(&self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Max(_) => "MAX",
            Aggregate::Min(_) => "MIN",
            Aggregate::Avg(_) => "AVG",
            Aggregate::Sum(_) => "SUM",
        }
    }

    fn expr(&self) -> Expr {
        match self {
            Aggregate::Count => Expr::raw("COUNT(*)"),
            Aggregate::Max(c) | Aggregate::Min(c) | Aggregate::Avg(c) | Aggregate::Sum(c) => {
                Expr::FnCall {
                    name: self.function().to_owned(),
                    args: vec![select_expr(c)],
                }
            }
        }
    }
}

fn first_value(rows: Vec<Row>) -> Option<Value> {
    rows.into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .map(|(_, value)| value)
}

// ============================================================================
// Typed reads
// ============================================================================

impl<R: Record> Query<R> {
    /// All matching records, with requested relations loaded.
    pub async fn get(mut self) -> Result<Vec<R>> {
        self.check()?;
        let schema = Arc::clone(self.schema()?);

        let records = if let Some((sql, params)) = &self.raw {
            let rows = self.db.traced().query(sql, params).await?;
            decode_rows(&self.db, &schema, None, rows)?
        } else {
            let columns = select_list(&schema, &self.select, &self.omit);
            let targets: Vec<Option<&Field>> = columns.iter().map(|(_, f)| *f).collect();
            let stmt = self.select_stmt(columns.iter().map(|(c, _)| c.clone()).collect());
            let rows = self.db.traced().query_rendered(&render(&stmt)).await?;
            decode_rows(&self.db, &schema, Some(targets.as_slice()), rows)?
        };

        let mut records = records;
        relation::load(&self.db, &schema, &mut records, &self.with).await?;

        records
            .iter()
            .map(|entity| Ok(entity.to_record::<R>()?))
            .collect()
    }

    /// The first matching record; `NotFound` when there is none.
    pub async fn first(self) -> Result<R> {
        self.limit(1).get().await?.into_iter().next().ok_or(Error::NotFound)
    }

    /// The record with this primary key; `NotFound` when there is none.
    pub async fn find(mut self, id: impl Into<Value>) -> Result<R> {
        self.check()?;
        let pk = match self.schema()?.primary_key() {
            Some(pk) => pk.column.clone(),
            None => {
                return Err(Error::InvalidParameter(format!(
                    "table `{}` has no primary key",
                    self.table
                )));
            }
        };
        self.where_eq(&pk, id).first().await
    }
}

// ============================================================================
// Select lists and row decoding
// ============================================================================

/// `name` as a column reference when it looks like one, else verbatim SQL.
pub(crate) fn select_expr(name: &str) -> Expr {
    let is_ident = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if is_ident {
        Expr::column(name)
    } else {
        Expr::raw(name)
    }
}

fn field_column(field: &Field) -> SelectColumn {
    match &field.raw {
        Some(raw) => SelectColumn::aliased(Expr::raw(raw), &field.column),
        None => SelectColumn::expr(Expr::column(&field.column)),
    }
}

fn named(field: &Field, names: &[String]) -> bool {
    names.iter().any(|n| *n == field.column || *n == field.name)
}

/// Select list for `schema`, each column paired with the field it decodes into.
pub(crate) fn select_list<'s>(
    schema: &'s Schema,
    select: &[String],
    omit: &[String],
) -> Vec<(SelectColumn, Option<&'s Field>)> {
    if select.is_empty() {
        return schema
            .fields
            .iter()
            .filter(|f| !named(f, omit))
            .map(|f| (field_column(f), Some(f)))
            .collect();
    }
    select
        .iter()
        .map(|name| match schema.field(name) {
            Some(field) => (field_column(field), Some(field)),
            None => (SelectColumn::expr(select_expr(name)), None),
        })
        .collect()
}

/// Decode rows into entities of `schema`, running `after_query` on each.
///
/// With `targets`, values are matched to fields by position; without, by
/// column name.
pub(crate) fn decode_rows(
    db: &Db,
    schema: &Arc<Schema>,
    targets: Option<&[Option<&Field>]>,
    rows: Vec<Row>,
) -> Result<Vec<Entity>> {
    rows.into_iter()
        .map(|row| {
            let mut entity = Entity::new(Arc::clone(schema));
            for (i, (name, value)) in row.into_iter().enumerate() {
                let field = match targets {
                    Some(targets) => targets.get(i).copied().flatten(),
                    None => schema.field(&name),
                };
                if let Some(field) = field {
                    field.set(&mut entity, value)?;
                }
            }
            run_hook(db, &mut entity, Hook::AfterQuery)?;
            Ok(entity)
        })
        .collect()
}
