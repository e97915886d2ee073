//! MySQL statement AST and rendering.
//!
//! Build SQL as a typed AST, then render it to a string with `?` placeholders.
//! Bound values travel inside the AST ([`Expr::Param`]) and come back out of
//! [`render`] in placeholder order, ready to hand to the driver.

mod expr;
pub use expr::*;

mod render;
pub use render::*;

mod stmt;
pub use stmt::*;

mod value;
pub use value::*;

/// Result of rendering SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    /// The SQL string with `?` placeholders.
    pub sql: String,

    /// Bound values, in placeholder order.
    pub params: Vec<Value>,
}

/// A MySQL string literal wrapper.
///
/// Display writes the value quoted with single quotes, doubling embedded
/// quotes and backslashes the way `SHOW CREATE TABLE` prints them.
///
/// # Example
/// ```
/// use oorm_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            match c {
                '\'' => write!(f, "''")?,
                '\\' => write!(f, "\\\\")?,
                c => write!(f, "{}", c)?,
            }
        }
        write!(f, "'")
    }
}

/// A MySQL identifier wrapper.
///
/// Display writes the value quoted with backticks, doubling embedded backticks.
///
/// # Example
/// ```
/// use oorm_sql::Ident;
/// assert_eq!(format!("{}", Ident("order")), "`order`");
/// assert_eq!(format!("{}", Ident("we`ird")), "`we``ird`");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`")?;
        for c in self.0.as_ref().chars() {
            if c == '`' {
                write!(f, "``")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "`")
    }
}

/// Escape a string literal for SQL.
pub fn escape_string(s: &str) -> String {
    format!("{}", Lit(s))
}

/// Quote a MySQL identifier.
///
/// Always quotes, so reserved words like `order`, `group` or `key` are safe
/// as table and column names.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}
