//! Inserts, updates and deletes.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use oorm_schema::{Cardinality, DataType, Entity, Field, Hook, Record, Relation, Schema};
use oorm_sql::{DeleteStmt, Expr, InsertStmt, UpdateStmt, Value, render};

use crate::db::run_hook;
use crate::error::ErrorCollector;
use crate::query::{CREATED_AT, DELETED_AT, UPDATED_AT};
use crate::relation::{WithNode, WithTree};
use crate::{Db, Error, Query, Result};

type RecordMut<'a> = &'a mut Entity;

/// Column selection and zero-value handling for one write.
#[derive(Debug, Clone, Default)]
pub(crate) struct WriteOptions {
    select: Vec<String>,
    omit: Vec<String>,
    omit_empty: bool,
    replace: bool,
}

impl WriteOptions {
    fn writes(&self, field: &Field) -> bool {
        let named = |names: &[String]| names.iter().any(|n| *n == field.column || *n == field.name);
        field.raw.is_none()
            && (self.select.is_empty() || named(&self.select))
            && !named(&self.omit)
    }

    /// Options for records nested under a relation.
    fn nested(&self) -> Self {
        Self {
            omit_empty: self.omit_empty,
            ..Self::default()
        }
    }
}

/// Value written into `created_at`/`updated_at`.
///
/// Times are stored as-is; integer columns get unix seconds (32 bits),
/// milliseconds (signed 64 bits) or microseconds (unsigned 64 bits).
pub(crate) fn timestamp(field: &Field, now: DateTime<FixedOffset>) -> Value {
    match (field.data_type, field.size) {
        (DataType::Int, 0..=32) => Value::I64(now.timestamp()),
        (DataType::Uint, 0..=32) => Value::U64(now.timestamp().max(0).unsigned_abs()),
        (DataType::Int, _) => Value::I64(now.timestamp_millis()),
        (DataType::Uint, _) => Value::U64(now.timestamp_micros().max(0).unsigned_abs()),
        (DataType::String, _) => Value::String(
            now.naive_local()
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string(),
        ),
        _ => Value::Time(now.naive_local()),
    }
}

fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

/// Insert value of one cell; `None` leaves the column to its default.
fn insert_cell(field: &Field, value: Value, omit_empty: bool) -> Option<Expr> {
    if value.is_null() {
        return Some(Expr::Null);
    }
    if !value.is_zero() {
        return Some(Expr::Param(value));
    }
    if field.settings.contains_key("default") {
        return Some(if field.default_is_null() {
            Expr::Null
        } else {
            Expr::Default
        });
    }
    if omit_empty {
        return None;
    }
    Some(Expr::Param(value))
}

fn stamp(
    schema: &Schema,
    record: &mut Entity,
    columns: &[&str],
    now: DateTime<FixedOffset>,
) -> Result<()> {
    for column in columns {
        if let Some(field) = schema.field(column).filter(|f| f.column == *column) {
            field.set(record, timestamp(field, now))?;
        }
    }
    Ok(())
}

fn primary_key_filter(schema: &Schema, record: &Entity) -> Option<Expr> {
    let pk = schema.primary_key()?;
    let value = pk.get(record);
    if value.is_zero() {
        return None;
    }
    Some(Expr::column(&pk.column).eq(Expr::Param(value.clone())))
}

// ============================================================================
// Insert
// ============================================================================

/// Insert `records`, then the related records requested in `with`.
pub(crate) fn insert<'a>(
    db: &'a Db,
    schema: &'a Schema,
    records: Vec<RecordMut<'a>>,
    opts: &'a WriteOptions,
    with: &'a WithTree,
) -> BoxFuture<'a, Result<u64>> {
    async move {
        if with.is_empty() {
            return insert_rows(db, schema, records, opts).await;
        }

        // One task per record; each fans out again per relation.
        let results = join_all(
            records
                .into_iter()
                .map(|record| insert_with(db, schema, record, opts, with)),
        )
        .await;

        let mut errors = ErrorCollector::default();
        let affected: u64 = results
            .into_iter()
            .filter_map(|r| errors.take(r))
            .sum();
        errors.finish()?;
        Ok(affected)
    }
    .boxed()
}

async fn insert_with<'a>(
    db: &'a Db,
    schema: &'a Schema,
    record: RecordMut<'a>,
    opts: &'a WriteOptions,
    with: &'a WithTree,
) -> Result<u64> {
    let affected = insert_rows(db, schema, vec![&mut *record], opts).await?;

    let requests = with.resolve(schema)?;
    let mut jobs = Vec::with_capacity(requests.len());
    for (relation, node) in requests {
        let local = local_value(schema, relation, &*record)?;
        let children = relation.take(&mut *record);
        jobs.push((relation, node, local, children));
    }

    let nested = opts.nested();
    let results = join_all(jobs.into_iter().map(|(relation, node, local, mut children)| {
        let nested = &nested;
        async move {
            let result = insert_related(db, relation, node, local, &mut children, nested).await;
            (relation, children, result)
        }
    }))
    .await;

    let mut errors = ErrorCollector::default();
    for (relation, children, result) in results {
        errors.take(result);
        relation.assign(&mut *record, children);
    }
    errors.finish()?;
    Ok(affected)
}

fn local_value(schema: &Schema, relation: &Relation, record: &Entity) -> Result<Value> {
    let field = schema.field(&relation.local_key).ok_or_else(|| Error::UnknownRelation {
        table: schema.table.clone(),
        name: relation.name.clone(),
    })?;
    Ok(field.get(record).clone())
}

/// Point `children` at their owner and insert them.
async fn insert_related(
    db: &Db,
    relation: &Relation,
    node: &WithNode,
    local: Value,
    children: &mut [Entity],
    opts: &WriteOptions,
) -> Result<()> {
    if children.is_empty() {
        return Ok(());
    }
    let related = db.schema_of(relation.related_type())?;
    let foreign = foreign_field(&related, relation)?;
    for child in children.iter_mut() {
        foreign.set(child, local.clone())?;
    }
    let children: Vec<RecordMut<'_>> = children.iter_mut().collect();
    insert(db, &related, children, opts, &node.children).await?;
    Ok(())
}

fn foreign_field<'s>(related: &'s Schema, relation: &Relation) -> Result<&'s Field> {
    related.field(&relation.foreign_key).ok_or_else(|| Error::UnknownRelation {
        table: related.table.clone(),
        name: relation.name.clone(),
    })
}

/// One multi-row INSERT (or REPLACE) for `records`.
async fn insert_rows(
    db: &Db,
    schema: &Schema,
    mut records: Vec<RecordMut<'_>>,
    opts: &WriteOptions,
) -> Result<u64> {
    if records.is_empty() {
        return Err(Error::InvalidParameter("nothing to insert".to_owned()));
    }

    let now = now();
    for record in records.iter_mut() {
        run_hook(db, &mut **record, Hook::BeforeCreate)?;
        stamp(schema, &mut **record, &[CREATED_AT, UPDATED_AT], now)?;
    }

    // The auto-increment key is left to the server when no record sets it.
    let mut generated = None;
    let mut fields = Vec::new();
    for field in schema.fields.iter().filter(|f| opts.writes(f)) {
        if field.auto_increment {
            let unset = records.iter().all(|r| field.get(&**r).is_zero());
            if unset {
                generated = Some(field);
                continue;
            }
        }
        fields.push(field);
    }

    // cells[row][column]
    let mut cells = Vec::with_capacity(records.len());
    for record in &records {
        let row: Vec<Option<Expr>> = fields
            .iter()
            .map(|f| insert_cell(f, f.get(&**record).clone(), opts.omit_empty))
            .collect();
        cells.push(row);
    }

    let kept: Vec<usize> = (0..fields.len())
        .filter(|&c| cells.iter().any(|row| row[c].is_some()))
        .collect();
    if kept.is_empty() {
        return Err(Error::InvalidParameter(format!(
            "nothing to insert into `{}`",
            schema.table
        )));
    }

    let mut stmt = if opts.replace {
        InsertStmt::replace(&schema.table)
    } else {
        InsertStmt::new(&schema.table)
    };
    stmt = stmt.columns(kept.iter().map(|&c| fields[c].column.clone()));
    for row in cells {
        let mut row: Vec<Option<Expr>> = row;
        stmt = stmt.row(
            kept.iter()
                .map(|&c| row[c].take().unwrap_or(Expr::Default))
                .collect(),
        );
    }

    let result = db.traced().execute_rendered(&render(&stmt)).await?;

    if let Some(pk) = generated
        && matches!(pk.data_type, DataType::Int | DataType::Uint)
    {
        // Ids of a multi-row insert are consecutive from LAST_INSERT_ID().
        for (i, record) in records.iter_mut().enumerate() {
            pk.set(&mut **record, Value::U64(result.last_insert_id + i as u64))?;
        }
    }

    for record in records.iter_mut() {
        run_hook(db, &mut **record, Hook::AfterCreate)?;
    }
    Ok(result.rows_affected)
}

// ============================================================================
// Update
// ============================================================================

/// Update one record. The WHERE clause is `filter`, or the primary key.
fn update_record<'a>(
    db: &'a Db,
    schema: &'a Schema,
    record: RecordMut<'a>,
    filter: Option<Expr>,
    opts: &'a WriteOptions,
    with: &'a WithTree,
) -> BoxFuture<'a, Result<u64>> {
    async move {
        let filter = match filter {
            Some(filter) => filter,
            None => primary_key_filter(schema, &*record)
                .ok_or_else(|| Error::missing_condition(&schema.table, "update"))?,
        };
        run_hook(db, &mut *record, Hook::BeforeUpdate)?;

        stamp(schema, &mut *record, &[UPDATED_AT], now())?;

        let mut stmt = UpdateStmt::new(&schema.table);
        for field in schema.fields.iter().filter(|f| opts.writes(f)) {
            if field.primary_key || field.column == CREATED_AT {
                continue;
            }
            let value = field.get(&*record).clone();
            if opts.omit_empty && value.is_zero() && !value.is_null() {
                continue;
            }
            let value = if value.is_null() {
                Expr::Null
            } else {
                Expr::Param(value)
            };
            stmt = stmt.set(field.column.clone(), value);
        }
        if stmt.assignments.is_empty() {
            return Err(Error::InvalidParameter(format!(
                "nothing to update on `{}`",
                schema.table
            )));
        }
        let rendered = render(&stmt.where_(filter));

        let affected = if with.is_empty() {
            db.traced().execute_rendered(&rendered).await?.rows_affected
        } else {
            update_with(db, schema, &mut *record, rendered, opts, with).await?
        };

        run_hook(db, &mut *record, Hook::AfterUpdate)?;
        Ok(affected)
    }
    .boxed()
}

/// Run the owner's UPDATE alongside the updates of its "one" relations,
/// each matched by foreign key.
async fn update_with(
    db: &Db,
    schema: &Schema,
    record: RecordMut<'_>,
    rendered: oorm_sql::RenderedSql,
    opts: &WriteOptions,
    with: &WithTree,
) -> Result<u64> {
    let mut jobs = Vec::new();
    for (relation, node) in with.resolve(schema)? {
        if relation.cardinality != Cardinality::One {
            tracing::debug!(relation = %relation.name, "skipping update of a many relation");
            continue;
        }
        let local = local_value(schema, relation, &*record)?;
        if local.is_zero() {
            continue;
        }
        let children = relation.take(&mut *record);
        jobs.push((relation, node, local, children));
    }

    let nested = opts.nested();
    let owner = async { db.traced().execute_rendered(&rendered).await };
    let related = join_all(jobs.into_iter().map(|(relation, node, local, mut children)| {
        let nested = &nested;
        async move {
            let result = update_related(db, relation, node, local, &mut children, nested).await;
            (relation, children, result)
        }
    }));
    let (owner, related) = futures::join!(owner, related);

    let mut errors = ErrorCollector::default();
    let affected = errors.take(owner).map(|r| r.rows_affected).unwrap_or(0);
    for (relation, children, result) in related {
        errors.take(result);
        relation.assign(&mut *record, children);
    }
    errors.finish()?;
    Ok(affected)
}

async fn update_related(
    db: &Db,
    relation: &Relation,
    node: &WithNode,
    local: Value,
    children: &mut [Entity],
    opts: &WriteOptions,
) -> Result<()> {
    let Some(child) = children.first_mut() else {
        return Ok(());
    };
    let related = db.schema_of(relation.related_type())?;
    let foreign = foreign_field(&related, relation)?;
    foreign.set(child, local.clone())?;
    let filter = Expr::column(&foreign.column).eq(Expr::Param(local));
    update_record(db, &related, child, Some(filter), opts, &node.children).await?;
    Ok(())
}

// ============================================================================
// Query entry points
// ============================================================================

impl<R: Record> Query<R> {
    fn write_options(&self, replace: bool) -> WriteOptions {
        WriteOptions {
            select: self.select.clone(),
            omit: self.omit.clone(),
            omit_empty: self.omit_empty,
            replace,
        }
    }

    /// Insert one record, writing back a generated id.
    pub async fn create(self, record: &mut R) -> Result<u64> {
        self.create_many(std::slice::from_mut(record)).await
    }

    /// Insert records in one statement; with relations requested, one
    /// statement per record and related batch, inside a transaction.
    pub async fn create_many(self, records: &mut [R]) -> Result<u64> {
        self.insert_all(records, false).await
    }

    /// `REPLACE INTO` one record.
    pub async fn replace(self, record: &mut R) -> Result<u64> {
        self.insert_all(std::slice::from_mut(record), true).await
    }

    async fn insert_all(mut self, records: &mut [R], replace: bool) -> Result<u64> {
        self.check()?;
        let schema = Arc::clone(self.schema()?);
        let opts = self.write_options(replace);
        let with = std::mem::take(&mut self.with);
        let mut entities = self.entities(&schema, records)?;
        let targets: Vec<RecordMut<'_>> = entities.iter_mut().collect();

        let result = if with.is_empty() || self.db.is_transaction() {
            insert(&self.db, &schema, targets, &opts, &with).await
        } else {
            self.db
                .transaction(|tx| async move { insert(&tx, &schema, targets, &opts, &with).await })
                .await
        };
        write_back(records, &entities, result)
    }

    /// Update a record by the query's filter, or by its primary key.
    ///
    /// Requested "one" relations are updated by foreign key.
    pub async fn update(mut self, record: &mut R) -> Result<u64> {
        self.check()?;
        let schema = Arc::clone(self.schema()?);
        let opts = self.write_options(false);
        let with = std::mem::take(&mut self.with);
        let filter = self.filter.take();
        let mut entity = Entity::from_record(self.db.registry(), Arc::clone(&schema), &*record)?;

        let result = if with.is_empty() || self.db.is_transaction() {
            update_record(&self.db, &schema, &mut entity, filter, &opts, &with).await
        } else {
            let target = &mut entity;
            self.db
                .transaction(|tx| async move {
                    update_record(&tx, &schema, target, filter, &opts, &with).await
                })
                .await
        };
        write_back(std::slice::from_mut(record), std::slice::from_ref(&entity), result)
    }

    /// Delete a record; tables with `deleted_at` are soft-deleted.
    pub async fn delete(self, record: &mut R) -> Result<u64> {
        self.remove(record, false).await
    }

    /// Delete a record even if the table is soft-deleting.
    pub async fn force_delete(self, record: &mut R) -> Result<u64> {
        self.remove(record, true).await
    }

    async fn remove(mut self, record: &mut R, force: bool) -> Result<u64> {
        self.check()?;
        let schema = Arc::clone(self.schema()?);
        let mut entity = Entity::from_record(self.db.registry(), Arc::clone(&schema), &*record)?;
        let filter = match self.filter.take() {
            Some(filter) => filter,
            None => primary_key_filter(&schema, &entity)
                .ok_or_else(|| Error::missing_condition(&self.table, "delete"))?,
        };
        let result = self.remove_entity(&schema, &mut entity, filter, force).await;
        write_back(std::slice::from_mut(record), std::slice::from_ref(&entity), result)
    }

    async fn remove_entity(
        &self,
        schema: &Schema,
        entity: &mut Entity,
        filter: Expr,
        force: bool,
    ) -> Result<u64> {
        run_hook(&self.db, entity, Hook::BeforeDelete)?;

        let soft = !force && schema.has_column(DELETED_AT);
        let rendered = if soft {
            let now = now();
            stamp(schema, entity, &[DELETED_AT], now)?;
            let deleted_at = match schema.field(DELETED_AT) {
                Some(field) => timestamp(field, now),
                None => Value::Time(now.naive_local()),
            };
            render(
                &UpdateStmt::new(&self.table)
                    .set(DELETED_AT, Expr::Param(deleted_at))
                    .where_(filter),
            )
        } else {
            render(&DeleteStmt::new(&self.table).where_(filter))
        };

        let result = self.db.traced().execute_rendered(&rendered).await?;
        run_hook(&self.db, entity, Hook::AfterDelete)?;
        Ok(result.rows_affected)
    }

    fn entities(&self, schema: &Arc<Schema>, records: &[R]) -> Result<Vec<Entity>> {
        records
            .iter()
            .map(|record| Ok(Entity::from_record(self.db.registry(), Arc::clone(schema), record)?))
            .collect()
    }
}

/// Copy entities back into the caller's records once a write has run, so
/// generated ids, timestamps and hook changes are visible. The write's own
/// error wins over a failed copy.
fn write_back<R: Record>(records: &mut [R], entities: &[Entity], result: Result<u64>) -> Result<u64> {
    let copied = records
        .iter_mut()
        .zip(entities)
        .try_for_each(|(record, entity)| -> Result<()> {
            *record = entity.to_record()?;
            Ok(())
        });
    let affected = result?;
    copied?;
    Ok(affected)
}

impl<R> Query<R> {
    /// `UPDATE ... SET` the given columns on every row the filter matches.
    ///
    /// ```ignore
    /// db.table("user").where_eq("id", 7).update_values([("age", 30)]).await?;
    /// ```
    pub async fn update_values<I, K, V>(mut self, values: I) -> Result<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        let filter = self
            .filter
            .take()
            .ok_or_else(|| Error::missing_condition(&self.table, "update"))?;
        if self.table.is_empty() {
            return Err(Error::MissingTableName);
        }

        let mut stmt = UpdateStmt::new(&self.table);
        for (column, value) in values {
            let column: String = column.into();
            let column = match self.schema.as_deref().and_then(|s| s.field(&column)) {
                Some(field) => field.column.clone(),
                None => column,
            };
            stmt = stmt.set(column, Expr::Param(value.into()));
        }
        if stmt.assignments.is_empty() {
            return Err(Error::InvalidParameter("no values to update".to_owned()));
        }

        let rendered = render(&stmt.where_(filter));
        Ok(self.db.traced().execute_rendered(&rendered).await?.rows_affected)
    }
}
