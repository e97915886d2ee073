//! Eager loading of relations.
//!
//! Relations requested with [`Query::with`](crate::Query::with) are loaded
//! one level at a time: every relation of a level is fetched concurrently
//! with a single `IN` query over the local keys of all parent records, the
//! results are grouped by foreign key and then spliced into the parents.
//! Nested relations (`contacts.phones`) are loaded inside the task that
//! fetched their parents, before those parents are grouped.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use oorm_schema::{Cardinality, Entity, Relation, Schema, SchemaError};
use oorm_sql::{Expr, FromClause, Key, OrderBy, SelectStmt, Value, render};
use tokio::task::JoinSet;

use crate::error::ErrorCollector;
use crate::query::{DELETED_AT, decode_rows, select_expr, select_list};
use crate::{Db, Error, Result};

/// Narrows the query that loads a relation.
///
/// ```ignore
/// db.model::<User>()
///     .with_scope("contacts", |s| s.where_eq("kind", "mobile").order_by_desc("id"))
///     .get()
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Scope {
    select: Vec<String>,
    filter: Option<Expr>,
    order_by: Vec<OrderBy>,
    with_deleted: bool,
}

impl Scope {
    /// Restrict the loaded columns. The foreign key is always loaded.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Expr::column(column).eq(Expr::param(value)))
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push(OrderBy::asc(select_expr(column)));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push(OrderBy::desc(select_expr(column)));
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }
}

pub(crate) type ScopeFn = Arc<dyn Fn(Scope) -> Scope + Send + Sync>;

/// Requested relations, by name, each with its own nested requests.
#[derive(Clone, Default)]
pub(crate) struct WithTree {
    nodes: IndexMap<String, WithNode>,
}

#[derive(Clone, Default)]
pub(crate) struct WithNode {
    scopes: Vec<ScopeFn>,
    pub(crate) children: WithTree,
}

impl std::fmt::Debug for WithTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.nodes.iter().map(|(name, node)| (name, &node.children)))
            .finish()
    }
}

impl WithTree {
    /// Request `path` (dot-separated); `scope` applies to its last segment.
    pub(crate) fn add(&mut self, path: &str, scope: Option<ScopeFn>) {
        let mut tree = self;
        let mut segments = path.split('.').filter(|s| !s.is_empty()).peekable();
        while let Some(segment) = segments.next() {
            let node = tree.nodes.entry(segment.to_owned()).or_default();
            if segments.peek().is_none() {
                node.scopes.extend(scope.clone());
            }
            tree = &mut node.children;
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &WithNode)> {
        self.nodes.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Resolve every requested name on `schema`.
    pub(crate) fn resolve<'s>(&self, schema: &'s Schema) -> Result<Vec<(&'s Relation, &WithNode)>> {
        self.iter()
            .map(|(name, node)| {
                let relation = schema.relation(name).ok_or_else(|| Error::UnknownRelation {
                    table: schema.table.clone(),
                    name: name.to_owned(),
                })?;
                Ok((relation, node))
            })
            .collect()
    }
}

type Groups = IndexMap<Key, Vec<Entity>>;

/// Load the relations in `tree` into `records`.
pub(crate) async fn load(
    db: &Db,
    schema: &Arc<Schema>,
    records: &mut [Entity],
    tree: &WithTree,
) -> Result<()> {
    if tree.is_empty() || records.is_empty() {
        return Ok(());
    }

    let requests = tree.resolve(schema)?;

    // Distinct, non-zero local keys per relation, in record order.
    let mut keys: Vec<IndexMap<Key, Value>> = Vec::with_capacity(requests.len());
    for (relation, _) in &requests {
        let local = local_key(schema, relation)?;
        let mut values = IndexMap::new();
        for record in records.iter() {
            let value = local.get(record);
            if value.is_zero() {
                continue;
            }
            if let Some(key) = value.key() {
                values.entry(key).or_insert_with(|| value.clone());
            }
        }
        keys.push(values);
    }

    let mut tasks = JoinSet::new();
    for (i, ((relation, node), values)) in requests.iter().zip(&keys).enumerate() {
        if values.is_empty() {
            continue;
        }
        let fetch = fetch(
            db.clone(),
            (*relation).clone(),
            (*node).clone(),
            values.values().cloned().collect(),
        );
        tasks.spawn(async move { (i, fetch.await) });
    }

    let mut groups: Vec<Groups> = requests.iter().map(|_| Groups::new()).collect();
    let mut errors = ErrorCollector::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((i, result)) => {
                if let Some(loaded) = errors.take(result) {
                    groups[i] = loaded;
                }
            }
            Err(e) => errors.push(e.into()),
        }
    }
    errors.finish()?;

    for record in records.iter_mut() {
        for ((relation, _), group) in requests.iter().zip(&groups) {
            let local = local_key(schema, relation)?.get(record);
            let matched = local.key().and_then(|key| group.get(&key));
            let related: Vec<Entity> = match matched {
                None => Vec::new(),
                Some(list) => {
                    let take = match relation.cardinality {
                        Cardinality::One => 1,
                        Cardinality::Many => list.len(),
                    };
                    list.iter().take(take).cloned().collect()
                }
            };
            relation.assign(record, related);
        }
    }

    Ok(())
}

fn local_key<'s>(schema: &'s Schema, relation: &Relation) -> Result<&'s oorm_schema::Field> {
    schema.field(&relation.local_key).ok_or_else(|| {
        SchemaError::UnknownField {
            table: schema.table.clone(),
            field: relation.local_key.clone(),
        }
        .into()
    })
}

/// Fetch the related records of one relation, grouped by foreign key.
fn fetch(
    db: Db,
    relation: Relation,
    node: WithNode,
    keys: Vec<Value>,
) -> BoxFuture<'static, Result<Groups>> {
    async move {
        let related = db.schema_of(relation.related_type())?;
        let foreign = related.field(&relation.foreign_key).ok_or_else(|| {
            Error::from(SchemaError::UnknownField {
                table: related.table.clone(),
                field: relation.foreign_key.clone(),
            })
        })?;

        let scope = node
            .scopes
            .iter()
            .fold(Scope::default(), |scope, apply| apply(scope));

        let mut select = scope.select.clone();
        if !select.is_empty() && !select.iter().any(|s| *s == foreign.column || *s == foreign.name) {
            select.push(foreign.column.clone());
        }
        let columns = select_list(&related, &select, &[]);
        let targets: Vec<_> = columns.iter().map(|(_, f)| *f).collect();

        let key_count = keys.len();
        let mut stmt = SelectStmt::new()
            .columns(columns.into_iter().map(|(c, _)| c))
            .from(FromClause::table(&related.table))
            .where_(Expr::column(&foreign.column).in_list(keys));
        if !scope.with_deleted && related.has_column(DELETED_AT) {
            stmt = stmt.and_where(Expr::column(DELETED_AT).is_null());
        }
        if let Some(filter) = scope.filter {
            stmt = stmt.and_where(filter);
        }
        for order in scope.order_by {
            stmt = stmt.order_by(order);
        }

        let rows = db.traced().query_rendered(&render(&stmt)).await?;
        let mut records = decode_rows(&db, &related, Some(targets.as_slice()), rows)?;
        load(&db, &related, &mut records, &node.children).await?;

        let mut groups = Groups::new();
        for record in records {
            let Some(key) = foreign.get(&record).key() else {
                continue;
            };
            groups.entry(key).or_default().push(record);
        }

        tracing::debug!(
            relation = %relation.name,
            table = %related.table,
            keys = key_count,
            groups = groups.len(),
            "loaded relation"
        );
        Ok(groups)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tree: &WithTree) -> Vec<String> {
        tree.iter().map(|(name, _)| name.to_owned()).collect()
    }

    #[test]
    fn test_dotted_paths_share_parents() {
        let mut tree = WithTree::default();
        tree.add("contacts.phones", None);
        tree.add("contacts", Some(Arc::new(|s: Scope| s.with_deleted())));
        tree.add("profile", None);

        assert_eq!(names(&tree), ["contacts", "profile"]);
        let (_, contacts) = tree.iter().next().unwrap();
        assert_eq!(contacts.scopes.len(), 1);
        assert_eq!(names(&contacts.children), ["phones"]);
        assert!(contacts.children.iter().next().unwrap().1.scopes.is_empty());
    }

    #[test]
    fn test_scopes_apply_in_order() {
        let mut tree = WithTree::default();
        tree.add("a", Some(Arc::new(|s: Scope| s.order_by("x"))));
        tree.add("a", Some(Arc::new(|s: Scope| s.order_by_desc("y"))));

        let (_, node) = tree.iter().next().unwrap();
        let scope = node
            .scopes
            .iter()
            .fold(Scope::default(), |scope, apply| apply(scope));
        assert_eq!(scope.order_by.len(), 2);
        assert!(!scope.order_by[0].desc);
        assert!(scope.order_by[1].desc);
    }

    #[test]
    fn test_empty_segments_are_ignored() {
        let mut tree = WithTree::default();
        tree.add("", None);
        tree.add("a..b", None);
        assert_eq!(names(&tree), ["a"]);
        assert_eq!(names(&tree.iter().next().unwrap().1.children), ["b"]);
    }
}
