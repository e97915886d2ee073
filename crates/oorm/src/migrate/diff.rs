//! Reconciliation of a declared schema against a live table.
//!
//! [`plan`] compares a [`Schema`] with the [`LiveTableInfo`] read from the
//! server and lists the statements that bring the table in line, in the order
//! they must run:
//!
//! 1. columns: add missing ones; under `modify`, re-declare any whose live
//!    definition differs; under `drop`, drop undeclared ones.
//! 2. secondary indexes per kind, only under `drop` or `modify`: drop
//!    undeclared ones, add missing ones and, under `modify`, rebuild those
//!    whose columns differ.
//! 3. the primary key, under `modify` (or dropped under `drop` when no
//!    key is declared).

use oorm_schema::{Field, IndexKind, Schema};

use super::ddl;
use super::inspect::LiveTableInfo;

/// Statements needed to reconcile one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDiff {
    pub table: String,
    pub changes: Vec<Change>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// SQL for every change, in order.
    pub fn statements(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.to_sql(&self.table)).collect()
    }
}

impl std::fmt::Display for TableDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return writeln!(f, "{}: up to date", self.table);
        }
        writeln!(f, "{}:", self.table)?;
        for change in &self.changes {
            writeln!(f, "  {change}")?;
        }
        Ok(())
    }
}

/// A single schema change.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Create the table; holds the full statement.
    CreateTable(String),
    /// Add a column; holds its definition.
    AddColumn { column: String, definition: String },
    /// Re-declare a column whose live definition differs.
    ModifyColumn {
        column: String,
        from: String,
        to: String,
    },
    DropColumn(String),
    AddIndex {
        kind: IndexKind,
        name: String,
        columns: Vec<String>,
    },
    DropIndex(String),
    AddPrimaryKey(String),
    DropPrimaryKey,
}

impl Change {
    pub(crate) fn add_column(field: &Field) -> Self {
        Change::AddColumn {
            column: field.column.clone(),
            definition: ddl::column_fragment(field),
        }
    }

    /// SQL statement for this change on `table`.
    pub fn to_sql(&self, table: &str) -> String {
        use oorm_sql::Ident;

        match self {
            Change::CreateTable(sql) => sql.clone(),
            Change::AddColumn { definition, .. } => {
                format!("ALTER TABLE {} ADD {definition}", Ident(table))
            }
            Change::ModifyColumn { to, .. } => format!("ALTER TABLE {} MODIFY {to}", Ident(table)),
            Change::DropColumn(column) => ddl::drop_column(table, column),
            Change::AddIndex {
                kind,
                name,
                columns,
            } => ddl::add_index(table, *kind, name, columns),
            Change::DropIndex(name) => ddl::drop_index(table, name),
            Change::AddPrimaryKey(column) => {
                ddl::add_index(table, IndexKind::Primary, "", std::slice::from_ref(column))
            }
            Change::DropPrimaryKey => ddl::drop_primary_key(table),
        }
    }
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::CreateTable(_) => write!(f, "+ table"),
            Change::AddColumn { definition, .. } => write!(f, "+ {definition}"),
            Change::ModifyColumn { from, to, .. } => write!(f, "~ {from} -> {to}"),
            Change::DropColumn(column) => write!(f, "- {column}"),
            Change::AddIndex {
                kind,
                name,
                columns,
            } => write!(f, "+ {}", ddl::index_clause(*kind, name, columns)),
            Change::DropIndex(name) => write!(f, "- index {name}"),
            Change::AddPrimaryKey(column) => write!(f, "+ PRIMARY KEY ({column})"),
            Change::DropPrimaryKey => write!(f, "- PRIMARY KEY"),
        }
    }
}

/// Changes that bring `live` in line with `schema`; `None` means the table
/// does not exist yet.
pub fn plan(schema: &Schema, live: Option<&LiveTableInfo>, modify: bool, drop: bool) -> TableDiff {
    let mut changes = Vec::new();

    let Some(live) = live else {
        changes.push(Change::CreateTable(ddl::create_table(schema)));
        return TableDiff {
            table: schema.table.clone(),
            changes,
        };
    };

    for field in ddl::stored_fields(schema) {
        match live.fields.get(&field.column) {
            None => changes.push(Change::add_column(field)),
            Some(current) if modify => {
                let declared = ddl::column_fragment(field);
                if *current != declared {
                    changes.push(Change::ModifyColumn {
                        column: field.column.clone(),
                        from: current.clone(),
                        to: declared,
                    });
                }
            }
            Some(_) => {}
        }
    }
    if drop {
        for column in live.fields.keys() {
            if !ddl::stored_fields(schema).any(|f| f.column == *column) {
                changes.push(Change::DropColumn(column.clone()));
            }
        }
    }

    if drop || modify {
        for kind in IndexKind::SECONDARY {
            sync_indexes(schema, live, kind, modify, drop, &mut changes);
        }
    }

    let declared_pk = schema.primary_key().map(|f| f.column.as_str());
    match (declared_pk, live.primary_key.as_deref()) {
        (Some(declared), current) if modify && current != Some(declared) => {
            if current.is_some() {
                changes.push(Change::DropPrimaryKey);
            }
            changes.push(Change::AddPrimaryKey(declared.to_owned()));
        }
        (None, Some(_)) if drop || modify => changes.push(Change::DropPrimaryKey),
        _ => {}
    }

    TableDiff {
        table: schema.table.clone(),
        changes,
    }
}

fn sync_indexes(
    schema: &Schema,
    live: &LiveTableInfo,
    kind: IndexKind,
    modify: bool,
    drop: bool,
    changes: &mut Vec<Change>,
) {
    let declared = ddl::declared_indexes(schema, kind);
    let current = live.indexes(kind);
    let current_columns = |name: &str| current.and_then(|list| list.get(name));

    if drop && let Some(current) = current {
        for name in current.keys() {
            if !declared.iter().any(|(declared, _)| *declared == name.as_str()) {
                changes.push(Change::DropIndex(name.clone()));
            }
        }
    }

    for (name, columns) in declared {
        let add = Change::AddIndex {
            kind,
            name: name.to_owned(),
            columns: columns.clone(),
        };
        match current_columns(name) {
            None => changes.push(add),
            Some(existing) if modify && *existing != columns => {
                changes.push(Change::DropIndex(name.to_owned()));
                changes.push(add);
            }
            Some(_) => {}
        }
    }
}
