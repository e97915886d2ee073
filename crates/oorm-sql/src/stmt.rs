//! SQL statements.

use crate::expr::Expr;

/// A SQL statement.
#[derive(Debug, Clone)]
pub enum Stmt {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
}

/// A SELECT statement.
#[derive(Debug, Clone, Default)]
pub struct SelectStmt {
    pub distinct: bool,
    pub columns: Vec<SelectColumn>,
    pub from: Option<FromClause>,
    pub joins: Vec<Join>,
    pub where_: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// A column in a SELECT clause.
#[derive(Debug, Clone)]
pub enum SelectColumn {
    /// An expression, optionally aliased
    Expr { expr: Expr, alias: Option<String> },

    /// All columns from a table: table.*
    AllFrom(String),
}

impl SelectColumn {
    pub fn expr(expr: Expr) -> Self {
        SelectColumn::Expr { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        SelectColumn::Expr {
            expr,
            alias: Some(alias.into()),
        }
    }

    pub fn all_from(table: impl Into<String>) -> Self {
        SelectColumn::AllFrom(table.into())
    }
}

/// A FROM clause.
#[derive(Debug, Clone)]
pub struct FromClause {
    pub table: String,
    pub alias: Option<String>,
}

impl FromClause {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            alias: None,
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            alias: Some(alias.into()),
        }
    }
}

/// A JOIN clause.
#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: Option<String>,
    pub on: Expr,
}

/// Type of JOIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

/// ORDER BY clause.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub expr: Expr,
    pub desc: bool,
}

impl OrderBy {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, desc: false }
    }

    pub fn desc(expr: Expr) -> Self {
        Self { expr, desc: true }
    }
}

// ============================================================================
// INSERT statement
// ============================================================================

/// An INSERT (or REPLACE) statement, possibly multi-row.
#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table: String,
    /// `REPLACE INTO` instead of `INSERT INTO`
    pub replace: bool,
    pub columns: Vec<String>,
    /// One entry per row, each as long as `columns`.
    pub rows: Vec<Vec<Expr>>,
    pub on_duplicate: Vec<UpdateAssignment>,
}

/// An assignment in UPDATE SET or ON DUPLICATE KEY UPDATE.
#[derive(Debug, Clone)]
pub struct UpdateAssignment {
    pub column: String,
    pub value: Expr,
}

impl UpdateAssignment {
    pub fn new(column: impl Into<String>, value: Expr) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

// ============================================================================
// UPDATE statement
// ============================================================================

/// An UPDATE statement.
#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table: String,
    pub assignments: Vec<UpdateAssignment>,
    pub where_: Option<Expr>,
    pub limit: Option<u64>,
}

// ============================================================================
// DELETE statement
// ============================================================================

/// A DELETE statement.
#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub table: String,
    pub where_: Option<Expr>,
    pub limit: Option<u64>,
}

// ============================================================================
// Builder-style constructors
// ============================================================================

impl SelectStmt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn column(mut self, col: SelectColumn) -> Self {
        self.columns.push(col);
        self
    }

    pub fn columns(mut self, cols: impl IntoIterator<Item = SelectColumn>) -> Self {
        self.columns.extend(cols);
        self
    }

    pub fn from(mut self, from: FromClause) -> Self {
        self.from = Some(from);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn having(mut self, expr: Expr) -> Self {
        self.having = Some(expr);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
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
}

impl InsertStmt {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            replace: false,
            columns: Vec::new(),
            rows: Vec::new(),
            on_duplicate: Vec::new(),
        }
    }

    /// A `REPLACE INTO` statement.
    pub fn replace(table: impl Into<String>) -> Self {
        Self {
            replace: true,
            ..Self::new(table)
        }
    }

    /// Add a column with its value in the first row.
    pub fn column(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.columns.push(name.into());
        if self.rows.is_empty() {
            self.rows.push(Vec::new());
        }
        self.rows[0].push(value);
        self
    }

    pub fn columns(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn row(mut self, values: Vec<Expr>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn on_duplicate_key_update(mut self, assignment: UpdateAssignment) -> Self {
        self.on_duplicate.push(assignment);
        self
    }
}

impl UpdateStmt {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            where_: None,
            limit: None,
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: Expr) -> Self {
        self.assignments.push(UpdateAssignment::new(column, value));
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl DeleteStmt {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_: None,
            limit: None,
        }
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}
