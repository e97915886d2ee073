//! SQL expressions.

use crate::Value;

/// A SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A bound value, rendered as `?`
    Param(Value),
    /// A column reference
    Column(ColumnRef),
    /// NULL
    Null,
    /// NOW() function
    Now,
    /// DEFAULT keyword
    Default,
    /// Binary operation (e.g., a = b, a AND b)
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },
    /// IN (...) / NOT IN (...)
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// BETWEEN low AND high
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    /// LIKE pattern match
    Like { expr: Box<Expr>, pattern: Box<Expr> },
    /// NOT expr
    Not(Box<Expr>),
    /// Parenthesized expression
    Nested(Box<Expr>),
    /// Function call
    FnCall { name: String, args: Vec<Expr> },
    /// Raw SQL (escape hatch)
    Raw(String),
}

/// A column reference, optionally qualified with table/alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }

    /// Parse `column` or `table.column`.
    pub fn parse(name: &str) -> Self {
        match name.split_once('.') {
            Some((table, column)) => Self::qualified(table, column),
            None => Self::new(name),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
        }
    }

    /// Parse a comparison operator as written in SQL.
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op.trim() {
            "=" => BinOp::Eq,
            "<>" | "!=" => BinOp::Ne,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            ">" => BinOp::Gt,
            ">=" => BinOp::Ge,
            _ => return None,
        })
    }
}

// Convenience constructors
impl Expr {
    pub fn param(value: impl Into<Value>) -> Self {
        Expr::Param(value.into())
    }

    /// Column reference; `table.column` is split into a qualified reference.
    pub fn column(name: &str) -> Self {
        Expr::Column(ColumnRef::parse(name))
    }

    pub fn qualified_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::qualified(table, column))
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    pub fn binop(self, op: BinOp, other: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    /// Create an equality expression: self = other
    pub fn eq(self, other: Expr) -> Self {
        self.binop(BinOp::Eq, other)
    }

    /// Create an AND expression: self AND other
    pub fn and(self, other: Expr) -> Self {
        self.binop(BinOp::And, other)
    }

    /// Create an OR expression, parenthesized: (self OR other)
    pub fn or(self, other: Expr) -> Self {
        Expr::Nested(Box::new(self.binop(BinOp::Or, other)))
    }

    /// Create IS NULL expression
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// Create IS NOT NULL expression
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// Create `self IN (values...)`, one placeholder per value.
    pub fn in_list(self, values: impl IntoIterator<Item = Value>) -> Self {
        Expr::In {
            expr: Box::new(self),
            list: values.into_iter().map(Expr::Param).collect(),
            negated: false,
        }
    }

    /// Create `self NOT IN (values...)`.
    pub fn not_in_list(self, values: impl IntoIterator<Item = Value>) -> Self {
        Expr::In {
            expr: Box::new(self),
            list: values.into_iter().map(Expr::Param).collect(),
            negated: true,
        }
    }

    pub fn between(self, low: Expr, high: Expr) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
        }
    }

    pub fn like(self, pattern: Expr) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern),
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// AND together a list of expressions; `None` when the list is empty.
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::and)
    }
}
