//! Parsing of `SHOW CREATE TABLE` output.

use indexmap::IndexMap;
use oorm_schema::IndexKind;

/// A table as the server reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTableInfo {
    /// Column name to its definition fragment, in table order.
    pub fields: IndexMap<String, String>,
    pub primary_key: Option<String>,
    pub unique_keys: IndexMap<String, Vec<String>>,
    pub index_keys: IndexMap<String, Vec<String>>,
    pub fulltext_keys: IndexMap<String, Vec<String>>,
}

impl LiveTableInfo {
    /// Parse the statement printed by `SHOW CREATE TABLE`.
    ///
    /// Column fragments lose the table's default `CHARACTER SET` and
    /// `COLLATE` clauses so they compare equal to declared fragments.
    /// `CONSTRAINT` lines and table options are ignored.
    pub fn parse(create: &str) -> Self {
        let mut info = LiveTableInfo::default();
        let (charset, collate) = table_defaults(create);

        for line in create.lines().skip(1) {
            let line = line.trim_end();
            if line.starts_with(')') {
                break;
            }
            let body = line.strip_suffix(',').unwrap_or(line);

            if let Some(rest) = body.strip_prefix("  `") {
                let Some((name, _)) = rest.split_once("` ") else {
                    continue;
                };
                let mut fragment = body.trim_start().to_owned();
                if let Some(charset) = &charset {
                    fragment = fragment.replace(&format!(" CHARACTER SET {charset}"), "");
                }
                if let Some(collate) = &collate {
                    fragment = fragment.replace(&format!(" COLLATE {collate}"), "");
                }
                info.fields.insert(name.to_owned(), fragment);
                continue;
            }

            let body = body.trim_start();
            let (kind, rest) = if let Some(rest) = body.strip_prefix("PRIMARY KEY ") {
                (IndexKind::Primary, rest)
            } else if let Some(rest) = body.strip_prefix("UNIQUE KEY ") {
                (IndexKind::Unique, rest)
            } else if let Some(rest) = body.strip_prefix("FULLTEXT KEY ") {
                (IndexKind::Fulltext, rest)
            } else if let Some(rest) = body.strip_prefix("KEY ") {
                (IndexKind::Plain, rest)
            } else {
                tracing::trace!(line = %body, "skipping table line");
                continue;
            };

            let (name, rest) = match kind {
                IndexKind::Primary => (String::new(), rest),
                _ => match split_quoted(rest) {
                    Some(split) => split,
                    None => continue,
                },
            };
            let columns = column_list(rest);

            match kind {
                IndexKind::Primary => info.primary_key = columns.into_iter().next(),
                IndexKind::Unique => {
                    info.unique_keys.insert(name, columns);
                }
                IndexKind::Plain => {
                    info.index_keys.insert(name, columns);
                }
                IndexKind::Fulltext => {
                    info.fulltext_keys.insert(name, columns);
                }
            }
        }

        info
    }

    /// Live secondary indexes of one kind; empty for the primary key.
    pub fn indexes(&self, kind: IndexKind) -> Option<&IndexMap<String, Vec<String>>> {
        match kind {
            IndexKind::Primary => None,
            IndexKind::Unique => Some(&self.unique_keys),
            IndexKind::Plain => Some(&self.index_keys),
            IndexKind::Fulltext => Some(&self.fulltext_keys),
        }
    }
}

/// `DEFAULT CHARSET=x` and `COLLATE=y` from the table options line.
fn table_defaults(create: &str) -> (Option<String>, Option<String>) {
    let Some(options) = create.lines().rev().find(|l| l.starts_with(')')) else {
        return (None, None);
    };
    let option = |key: &str| {
        options
            .split_whitespace()
            .find_map(|word| word.strip_prefix(key))
            .map(str::to_owned)
    };
    (option("CHARSET="), option("COLLATE="))
}

/// Split `` `name` rest `` into the unquoted name and the rest.
fn split_quoted(s: &str) -> Option<(String, &str)> {
    let inner = s.strip_prefix('`')?;
    let mut name = String::new();
    let mut chars = inner.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '`' {
            name.push(c);
            continue;
        }
        if let Some((_, '`')) = chars.peek() {
            chars.next();
            name.push('`');
            continue;
        }
        return Some((name, inner[i + 1..].trim_start()));
    }
    None
}

/// Column names of `` (`a`(10),`b`) USING BTREE ``, ignoring prefix lengths
/// and anything after the closing parenthesis.
fn column_list(s: &str) -> Vec<String> {
    let Some(mut rest) = s.trim_start().strip_prefix('(') else {
        return Vec::new();
    };
    let mut columns = Vec::new();
    loop {
        rest = rest.trim_start_matches([',', ' ']);
        if rest.starts_with('`') {
            let Some((name, after)) = split_quoted(rest) else {
                break;
            };
            columns.push(name);
            rest = after;
            if let Some(after) = rest.strip_prefix('(') {
                rest = after.split_once(')').map_or("", |(_, r)| r);
            }
        } else {
            break;
        }
    }
    columns
}
