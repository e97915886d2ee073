//! Render SQL AST to string.

use std::cell::RefCell;
use std::fmt;

use crate::expr::{ColumnRef, Expr};
use crate::stmt::*;
use crate::{Ident, RenderedSql, Value};

/// Rendering context that collects bound values.
///
/// Uses interior mutability (`RefCell`) so that `Render::render` can take `&self`,
/// enabling the `Fmt` wrapper to implement `Display`. Values are pushed in the
/// order their `?` placeholders are written.
pub struct RenderContext {
    params: RefCell<Vec<Value>>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self {
            params: RefCell::new(Vec::new()),
        }
    }

    fn push_param(&self, value: &Value) {
        self.params.borrow_mut().push(value.clone());
    }

    /// Finish rendering and return the collected params.
    fn into_params(self) -> Vec<Value> {
        self.params.into_inner()
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapper for rendering a value via Display.
pub struct Fmt<'a, T: Render>(&'a RenderContext, &'a T);

impl<T: Render> fmt::Display for Fmt<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.1.render(self.0, f)
    }
}

// ============================================================================
// Render implementations
// ============================================================================

/// Trait for types that can be rendered to SQL.
pub trait Render {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

fn comma_separated<T: Render>(
    ctx: &RenderContext,
    f: &mut fmt::Formatter<'_>,
    items: &[T],
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", Fmt(ctx, item))?;
    }
    Ok(())
}

fn idents(f: &mut fmt::Formatter<'_>, names: &[String]) -> fmt::Result {
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", Ident(name))?;
    }
    Ok(())
}

impl Render for Expr {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(value) => {
                ctx.push_param(value);
                write!(f, "?")
            }
            Expr::Column(col) => col.render(ctx, f),
            Expr::Null => write!(f, "NULL"),
            Expr::Now => write!(f, "NOW()"),
            Expr::Default => write!(f, "DEFAULT"),
            Expr::BinOp { left, op, right } => {
                let left = Fmt(ctx, left.as_ref());
                let right = Fmt(ctx, right.as_ref());
                let op = op.as_str();
                write!(f, "{left} {op} {right}")
            }
            Expr::IsNull { expr, negated } => {
                let expr = Fmt(ctx, expr.as_ref());
                let suffix = if *negated { " IS NOT NULL" } else { " IS NULL" };
                write!(f, "{expr}{suffix}")
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                // `x IN ()` is a syntax error in MySQL; an empty list matches nothing.
                if list.is_empty() {
                    return write!(f, "{}", if *negated { "1 = 1" } else { "1 = 0" });
                }
                let expr = Fmt(ctx, expr.as_ref());
                let kw = if *negated { "NOT IN" } else { "IN" };
                write!(f, "{expr} {kw} (")?;
                comma_separated(ctx, f, list)?;
                write!(f, ")")
            }
            Expr::Between { expr, low, high } => {
                let expr = Fmt(ctx, expr.as_ref());
                let low = Fmt(ctx, low.as_ref());
                let high = Fmt(ctx, high.as_ref());
                write!(f, "{expr} BETWEEN {low} AND {high}")
            }
            Expr::Like { expr, pattern } => {
                let expr = Fmt(ctx, expr.as_ref());
                let pattern = Fmt(ctx, pattern.as_ref());
                write!(f, "{expr} LIKE {pattern}")
            }
            Expr::Not(expr) => {
                let expr = Fmt(ctx, expr.as_ref());
                write!(f, "NOT {expr}")
            }
            Expr::Nested(expr) => {
                let expr = Fmt(ctx, expr.as_ref());
                write!(f, "({expr})")
            }
            Expr::FnCall { name, args } => {
                write!(f, "{name}(")?;
                comma_separated(ctx, f, args)?;
                write!(f, ")")
            }
            Expr::Raw(s) => write!(f, "{s}"),
        }
    }
}

impl Render for ColumnRef {
    fn render(&self, _ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = &self.table {
            write!(f, "{}.", Ident(table))?;
        }
        if self.column == "*" {
            return write!(f, "*");
        }
        write!(f, "{}", Ident(&self.column))
    }
}

impl Render for SelectColumn {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectColumn::Expr { expr, alias } => {
                let expr = Fmt(ctx, expr);
                write!(f, "{expr}")?;
                if let Some(alias) = alias {
                    write!(f, " AS {}", Ident(alias))?;
                }
                Ok(())
            }
            SelectColumn::AllFrom(table) => write!(f, "{}.*", Ident(table)),
        }
    }
}

impl Render for OrderBy {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expr = Fmt(ctx, &self.expr);
        let dir = if self.desc { " DESC" } else { " ASC" };
        write!(f, "{expr}{dir}")
    }
}

impl Render for UpdateAssignment {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let col = Ident(&self.column);
        let val = Fmt(ctx, &self.value);
        write!(f, "{col} = {val}")
    }
}

impl Render for SelectStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }

        if self.columns.is_empty() {
            write!(f, "*")?;
        } else {
            comma_separated(ctx, f, &self.columns)?;
        }

        if let Some(from) = &self.from {
            write!(f, " FROM {}", Ident(&from.table))?;
            if let Some(alias) = &from.alias {
                write!(f, " AS {}", Ident(alias))?;
            }
        }

        for join in &self.joins {
            write!(f, " {} {}", join.kind.as_str(), Ident(&join.table))?;
            if let Some(alias) = &join.alias {
                write!(f, " AS {}", Ident(alias))?;
            }
            write!(f, " ON {}", Fmt(ctx, &join.on))?;
        }

        if let Some(where_) = &self.where_ {
            write!(f, " WHERE {}", Fmt(ctx, where_))?;
        }

        if !self.group_by.is_empty() {
            write!(f, " GROUP BY ")?;
            comma_separated(ctx, f, &self.group_by)?;
        }

        if let Some(having) = &self.having {
            write!(f, " HAVING {}", Fmt(ctx, having))?;
        }

        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            comma_separated(ctx, f, &self.order_by)?;
        }

        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }

        if let Some(offset) = self.offset {
            // MySQL has no OFFSET without LIMIT.
            if self.limit.is_none() {
                write!(f, " LIMIT {}", u64::MAX)?;
            }
            write!(f, " OFFSET {offset}")?;
        }

        Ok(())
    }
}

impl Render for InsertStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.replace { "REPLACE" } else { "INSERT" };
        write!(f, "{verb} INTO {} (", Ident(&self.table))?;
        idents(f, &self.columns)?;
        write!(f, ") VALUES ")?;

        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "(")?;
            comma_separated(ctx, f, row)?;
            write!(f, ")")?;
        }

        if !self.on_duplicate.is_empty() {
            write!(f, " ON DUPLICATE KEY UPDATE ")?;
            comma_separated(ctx, f, &self.on_duplicate)?;
        }

        Ok(())
    }
}

impl Render for UpdateStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPDATE {} SET ", Ident(&self.table))?;
        comma_separated(ctx, f, &self.assignments)?;

        if let Some(where_) = &self.where_ {
            write!(f, " WHERE {}", Fmt(ctx, where_))?;
        }

        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }

        Ok(())
    }
}

impl Render for DeleteStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {}", Ident(&self.table))?;

        if let Some(where_) = &self.where_ {
            write!(f, " WHERE {}", Fmt(ctx, where_))?;
        }

        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }

        Ok(())
    }
}

impl Render for Stmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Select(s) => s.render(ctx, f),
            Stmt::Insert(s) => s.render(ctx, f),
            Stmt::Update(s) => s.render(ctx, f),
            Stmt::Delete(s) => s.render(ctx, f),
        }
    }
}

// ============================================================================
// Convenience methods
// ============================================================================

/// Render a statement to SQL.
pub fn render(stmt: &impl Render) -> RenderedSql {
    let ctx = RenderContext::new();
    let sql = format!("{}", Fmt(&ctx, stmt));
    RenderedSql {
        sql,
        params: ctx.into_params(),
    }
}

#[cfg(test)]
mod tests;
