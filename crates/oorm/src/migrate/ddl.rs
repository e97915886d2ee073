//! DDL rendering in the shape `SHOW CREATE TABLE` prints it back.

use oorm_schema::{DataType, Field, IndexKind, Schema, ordered_columns};
use oorm_sql::{Ident, Lit};

/// Column definition as MySQL 8 reports it, e.g.
/// `` `name` varchar(64) NOT NULL DEFAULT '' COMMENT 'login' ``.
///
/// A declared fragment that differs from the live one byte for byte means the
/// column needs a `MODIFY`.
pub fn column_fragment(field: &Field) -> String {
    let mut sql = format!("{} {}", Ident(&field.column), field.sql_type);

    if field.auto_increment {
        sql.push_str(" NOT NULL AUTO_INCREMENT");
    } else if field.default_is_null() {
        sql.push_str(" DEFAULT NULL");
    } else if let Some(default) = &field.default {
        sql.push_str(" NOT NULL DEFAULT ");
        sql.push_str(&default_literal(default));
    } else if field.sql_type.starts_with("varchar") {
        sql.push_str(" NOT NULL DEFAULT ''");
    } else if field.sql_type.ends_with("text") {
        // Nullable; the server prints TEXT columns without a DEFAULT clause.
    } else if matches!(field.data_type, DataType::Time | DataType::Json) {
        sql.push_str(" DEFAULT NULL");
    } else {
        sql.push_str(" NOT NULL");
    }

    if let Some(comment) = field.comment.as_deref().filter(|c| !c.is_empty()) {
        sql.push_str(&format!(" COMMENT {}", Lit(comment)));
    }
    sql
}

/// Defaults are printed quoted, except quoted literals, functions and
/// parenthesized expressions, which pass through.
fn default_literal(value: &str) -> String {
    let upper = value.to_ascii_uppercase();
    let verbatim = (value.len() >= 2 && value.starts_with('\'') && value.ends_with('\''))
        || value.starts_with('(')
        || upper.starts_with("CURRENT_TIMESTAMP")
        || upper.starts_with("NOW(");
    if verbatim {
        value.to_owned()
    } else {
        Lit(value).to_string()
    }
}

/// `` KEY `name` (`a`,`b`) `` and friends; `PRIMARY KEY` takes no name.
pub fn index_clause(kind: IndexKind, name: &str, columns: &[String]) -> String {
    let columns = columns
        .iter()
        .map(|c| Ident(c).to_string())
        .collect::<Vec<_>>()
        .join(",");
    match kind {
        IndexKind::Primary => format!("{} ({columns})", kind.keyword()),
        _ => format!("{} {} ({columns})", kind.keyword(), Ident(name)),
    }
}

/// Fields that exist as columns; raw fields are select expressions only.
pub fn stored_fields(schema: &Schema) -> impl Iterator<Item = &Field> {
    schema.fields.iter().filter(|f| f.raw.is_none())
}

/// Declared secondary indexes of `kind` with their priority-ordered columns.
pub fn declared_indexes(schema: &Schema, kind: IndexKind) -> Vec<(&str, Vec<String>)> {
    schema
        .indexes(kind)
        .map(|list| {
            list.iter()
                .map(|(name, parts)| (name.as_str(), ordered_columns(parts)))
                .collect()
        })
        .unwrap_or_default()
}

/// The full `CREATE TABLE` statement for `schema`.
pub fn create_table(schema: &Schema) -> String {
    let mut lines: Vec<String> = stored_fields(schema).map(column_fragment).collect();

    if let Some(pk) = schema.primary_key() {
        lines.push(index_clause(IndexKind::Primary, "", std::slice::from_ref(&pk.column)));
    }
    for kind in IndexKind::SECONDARY {
        for (name, columns) in declared_indexes(schema, kind) {
            lines.push(index_clause(kind, name, &columns));
        }
    }

    format!(
        "CREATE TABLE {} (\n  {}\n)",
        Ident(&schema.table),
        lines.join(",\n  ")
    )
}

pub fn add_column(table: &str, field: &Field) -> String {
    format!("ALTER TABLE {} ADD {}", Ident(table), column_fragment(field))
}

pub fn modify_column(table: &str, field: &Field) -> String {
    format!("ALTER TABLE {} MODIFY {}", Ident(table), column_fragment(field))
}

pub fn drop_column(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} DROP {}", Ident(table), Ident(column))
}

pub fn add_index(table: &str, kind: IndexKind, name: &str, columns: &[String]) -> String {
    format!(
        "ALTER TABLE {} ADD {}",
        Ident(table),
        index_clause(kind, name, columns)
    )
}

pub fn drop_index(table: &str, name: &str) -> String {
    format!("DROP INDEX {} ON {}", Ident(name), Ident(table))
}

pub fn drop_primary_key(table: &str) -> String {
    format!("ALTER TABLE {} DROP PRIMARY KEY", Ident(table))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use facet::Facet;
    use oorm_schema::{MySql, Record, SchemaRegistry};

    use super::*;

    #[derive(Debug, Clone, Default, Facet)]
    struct Article {
        #[facet(oorm::tag = "autoIncrement")]
        id: u64,
        #[facet(oorm::tag = "size:200;index:title_slug.1;comment:it's shown")]
        title: String,
        #[facet(oorm::tag = "size:64;unique;index:title_slug.0")]
        slug: String,
        #[facet(oorm::tag = "default:0")]
        views: i32,
        rating: Option<f64>,
        #[facet(oorm::tag = "size:100000;full")]
        body: String,
        published_at: chrono::NaiveDateTime,
        #[facet(oorm::tag = "raw:views * 2")]
        score: i64,
    }

    impl Record for Article {}

    fn schema() -> Arc<Schema> {
        SchemaRegistry::new(Arc::new(MySql), "")
            .parse::<Article>()
            .unwrap()
    }

    #[test]
    fn test_column_fragments() {
        let schema = schema();
        let fragments: Vec<String> = stored_fields(&schema).map(column_fragment).collect();
        insta::assert_snapshot!(fragments.join("\n"), @r"
        `id` bigint unsigned NOT NULL AUTO_INCREMENT
        `title` varchar(200) NOT NULL DEFAULT '' COMMENT 'it''s shown'
        `slug` varchar(64) NOT NULL DEFAULT ''
        `views` int NOT NULL DEFAULT '0'
        `rating` double DEFAULT NULL
        `body` mediumtext
        `published_at` datetime(3) DEFAULT NULL
        ");
    }

    #[test]
    fn test_create_table() {
        insta::assert_snapshot!(create_table(&schema()), @r"
        CREATE TABLE `article` (
          `id` bigint unsigned NOT NULL AUTO_INCREMENT,
          `title` varchar(200) NOT NULL DEFAULT '' COMMENT 'it''s shown',
          `slug` varchar(64) NOT NULL DEFAULT '',
          `views` int NOT NULL DEFAULT '0',
          `rating` double DEFAULT NULL,
          `body` mediumtext,
          `published_at` datetime(3) DEFAULT NULL,
          PRIMARY KEY (`id`),
          UNIQUE KEY `slug_uni` (`slug`),
          KEY `title_slug_key` (`slug`,`title`),
          FULLTEXT KEY `body_full` (`body`)
        )
        ");
    }

    #[test]
    fn test_alter_statements() {
        let schema = schema();
        let views = schema.field("views").unwrap();
        assert_eq!(
            add_column("article", views),
            "ALTER TABLE `article` ADD `views` int NOT NULL DEFAULT '0'"
        );
        assert_eq!(
            modify_column("article", views),
            "ALTER TABLE `article` MODIFY `views` int NOT NULL DEFAULT '0'"
        );
        assert_eq!(drop_column("article", "views"), "ALTER TABLE `article` DROP `views`");
        assert_eq!(
            add_index("article", IndexKind::Unique, "slug_uni", &["slug".into()]),
            "ALTER TABLE `article` ADD UNIQUE KEY `slug_uni` (`slug`)"
        );
        assert_eq!(drop_index("article", "slug_uni"), "DROP INDEX `slug_uni` ON `article`");
        assert_eq!(drop_primary_key("article"), "ALTER TABLE `article` DROP PRIMARY KEY");
    }

    #[test]
    fn test_default_literals() {
        assert_eq!(default_literal("0"), "'0'");
        assert_eq!(default_literal("'x'"), "'x'");
        assert_eq!(default_literal("CURRENT_TIMESTAMP(3)"), "CURRENT_TIMESTAMP(3)");
        assert_eq!(default_literal("(uuid())"), "(uuid())");
        assert_eq!(default_literal("a'b"), "'a''b'");
    }
}
