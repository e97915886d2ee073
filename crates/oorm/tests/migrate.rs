//! Migrations against a scripted connection that answers `SHOW TABLES` and
//! `SHOW CREATE TABLE` with a table built from a declaration.

mod common;

use common::{Script, row};
use facet::Facet;
use oorm::migrate::create_table;
use oorm::{Change, Error, Record, Value};

#[derive(Debug, Clone, Default, Facet)]
#[facet(oorm::table = "account")]
struct AccountV1 {
    #[facet(oorm::tag = "autoIncrement")]
    id: u64,
    #[facet(oorm::tag = "size:128;unique")]
    email: String,
    #[facet(oorm::tag = "size:64;index:name_age.0")]
    name: String,
    #[facet(oorm::tag = "index:name_age.1")]
    age: u8,
}

impl Record for AccountV1 {}

/// V1 plus a column.
#[derive(Debug, Clone, Default, Facet)]
#[facet(oorm::table = "account")]
struct AccountV2 {
    #[facet(oorm::embed)]
    v1: AccountV1,
    #[facet(oorm::tag = "size:32")]
    nickname: String,
}

impl Record for AccountV2 {}

/// V1 without the composite index.
#[derive(Debug, Clone, Default, Facet)]
#[facet(oorm::table = "account")]
struct AccountV3 {
    #[facet(oorm::tag = "autoIncrement")]
    id: u64,
    #[facet(oorm::tag = "size:128;unique")]
    email: String,
    #[facet(oorm::tag = "size:64")]
    name: String,
    age: u8,
}

impl Record for AccountV3 {}

#[derive(Debug, Clone, Default, Facet)]
struct Ledger {
    #[facet(oorm::tag = "autoIncrement")]
    id: u64,
    #[facet(oorm::tag = "size:20000000")]
    memo: String,
}

impl Record for Ledger {}

oorm::register!(AccountV1, Ledger);

const TABLE_OPTIONS: &str = " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci";

/// A script whose `account` table is exactly what `R` declares, after `edit`.
fn live_account<R: Record>(edit: impl Fn(String) -> String) -> Script {
    let script = Script::new();
    let schema = script.db().parse::<R>().unwrap();
    let create = edit(format!("{}{TABLE_OPTIONS}", create_table(&schema)));
    script.rows(
        "SHOW TABLES LIKE 'account'",
        vec![row(&[("Tables_in_app (account)", Value::from("account"))])],
    );
    script.rows(
        "SHOW CREATE TABLE `account`",
        vec![row(&[
            ("Table", Value::from("account")),
            ("Create Table", Value::from(create)),
        ])],
    );
    script
}

/// Statements other than the inspection queries.
fn ddl(script: &Script) -> Vec<String> {
    script
        .sql()
        .into_iter()
        .filter(|sql| !sql.starts_with("SHOW "))
        .collect()
}

#[tokio::test]
async fn test_declared_table_is_a_fixed_point() {
    let script = live_account::<AccountV1>(|create| create);
    let migrator = script.db().migrator();

    let diff = migrator.auto::<AccountV1>(true, true).await.unwrap();
    assert!(diff.is_empty(), "{diff}");
    assert_eq!(diff.to_string(), "account: up to date\n");
    assert!(ddl(&script).is_empty());
}

#[tokio::test]
async fn test_new_field_adds_one_column() {
    let script = live_account::<AccountV1>(|create| create);
    let migrator = script.db().migrator();

    migrator.auto::<AccountV2>(true, true).await.unwrap();
    assert_eq!(
        ddl(&script),
        ["ALTER TABLE `account` ADD `nickname` varchar(32) NOT NULL DEFAULT ''"]
    );
}

#[tokio::test]
async fn test_removed_index_is_dropped() {
    let script = live_account::<AccountV1>(|create| create);
    let migrator = script.db().migrator();

    // Without drop or modify, indexes are left alone.
    assert!(migrator.auto::<AccountV3>(false, false).await.unwrap().is_empty());

    migrator.auto::<AccountV3>(false, true).await.unwrap();
    assert_eq!(ddl(&script), ["DROP INDEX `name_age_key` ON `account`"]);
}

#[tokio::test]
async fn test_changed_column_needs_modify() {
    let script = live_account::<AccountV1>(|create| {
        create.replace("`age` tinyint unsigned NOT NULL", "`age` int NOT NULL")
    });
    let migrator = script.db().migrator();

    assert!(migrator.auto::<AccountV1>(false, false).await.unwrap().is_empty());

    let diff = migrator.auto::<AccountV1>(true, false).await.unwrap();
    assert_eq!(
        diff.changes,
        [Change::ModifyColumn {
            column: "age".into(),
            from: "`age` int NOT NULL".into(),
            to: "`age` tinyint unsigned NOT NULL".into(),
        }]
    );
    assert_eq!(
        ddl(&script),
        ["ALTER TABLE `account` MODIFY `age` tinyint unsigned NOT NULL"]
    );
}

#[tokio::test]
async fn test_plan_is_a_dry_run() {
    let script = live_account::<AccountV1>(|create| create);
    let migrator = script.db().migrator();

    let diff = migrator.plan::<AccountV2>(true, true).await.unwrap();
    insta::assert_snapshot!(diff.to_string().trim_end(), @r"
    account:
      + `nickname` varchar(32) NOT NULL DEFAULT ''
    ");
    assert!(ddl(&script).is_empty());
}

#[tokio::test]
async fn test_missing_table_is_created() {
    let script = Script::new();
    let migrator = script.db().migrator();

    let diff = migrator.auto::<Ledger>(false, false).await.unwrap();
    assert_eq!(diff.changes.len(), 1);
    insta::assert_snapshot!(ddl(&script)[0], @r"
    CREATE TABLE `ledger` (
      `id` bigint unsigned NOT NULL AUTO_INCREMENT,
      `memo` longtext,
      PRIMARY KEY (`id`)
    )
    ");
    assert!(
        !script.sql().iter().any(|sql| sql.starts_with("SHOW CREATE")),
        "a missing table is not inspected"
    );
}

#[tokio::test]
async fn test_table_exists_compares_names_exactly() {
    let script = Script::new();
    script.rows(
        "SHOW TABLES LIKE 'user_log'",
        vec![row(&[("Tables_in_app (user_log)", Value::from("userxlog"))])],
    );
    let migrator = script.db().migrator();

    assert!(!migrator.table_exists("user_log").await.unwrap());
    assert_eq!(script.sql(), ["SHOW TABLES LIKE 'user_log'"]);
}

#[tokio::test]
async fn test_failed_statement_names_table_and_statement() {
    let script = live_account::<AccountV1>(|create| create);
    script.fail("ALTER TABLE");
    let migrator = script.db().migrator();

    let err = migrator.auto::<AccountV2>(false, false).await.unwrap_err();
    match err {
        Error::Migration {
            table, statement, ..
        } => {
            assert_eq!(table, "account");
            assert!(statement.contains("ADD `nickname`"), "{statement}");
        }
        other => panic!("expected a migration error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_definition_is_a_live_schema_error() {
    let script = Script::new();
    script.rows(
        "SHOW TABLES LIKE 'account'",
        vec![row(&[("Tables_in_app (account)", Value::from("account"))])],
    );
    let migrator = script.db().migrator();

    let err = migrator.auto::<AccountV1>(false, false).await.unwrap_err();
    assert!(matches!(err, Error::LiveSchema { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_auto_all_continues_past_failing_table() {
    let script = live_account::<AccountV1>(|create| create);
    script.fail("CREATE TABLE `ledger`");
    let migrator = script.db().migrator();

    let err = migrator.auto_all(true, false).await.unwrap_err();
    assert!(
        matches!(&err, Error::Migration { table, .. } if table == "ledger"),
        "got {err:?}"
    );
    // The account table was still inspected, whatever the registration order.
    assert_eq!(script.calls_matching("SHOW CREATE TABLE `account`").len(), 1);
}

#[tokio::test]
async fn test_single_statements() {
    let script = Script::new();
    let migrator = script.db().migrator();

    migrator.add_index::<AccountV1>("name_age_key").await.unwrap();
    migrator.modify_column::<AccountV2>("nickname").await.unwrap();
    migrator.add_column::<AccountV1>("email").await.unwrap();
    migrator.drop_column("account", "legacy").await.unwrap();
    migrator.drop_index("account", "email_uni").await.unwrap();
    migrator.drop_primary_key("account").await.unwrap();

    insta::assert_snapshot!(script.sql().join("\n"), @r"
    ALTER TABLE `account` ADD KEY `name_age_key` (`name`,`age`)
    ALTER TABLE `account` MODIFY `nickname` varchar(32) NOT NULL DEFAULT ''
    ALTER TABLE `account` ADD `email` varchar(128) NOT NULL DEFAULT ''
    ALTER TABLE `account` DROP `legacy`
    DROP INDEX `email_uni` ON `account`
    ALTER TABLE `account` DROP PRIMARY KEY
    ");

    let err = migrator.add_index::<AccountV1>("nope_key").await.unwrap_err();
    assert!(matches!(err, Error::InvalidParameter(_)), "got {err:?}");
    let err = migrator.add_column::<AccountV1>("nope").await.unwrap_err();
    assert!(matches!(err, Error::Schema(_)), "got {err:?}");
}
