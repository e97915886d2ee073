//! Eager loading against a scripted connection.

mod common;

use common::{Script, row};
use facet::Facet;
use oorm::{Error, Record, Row, Value};

#[derive(Debug, Clone, Default, PartialEq, Facet)]
struct Call {
    #[facet(oorm::tag = "autoIncrement")]
    id: u64,
    #[facet(oorm::tag = "index")]
    contact_id: u64,
    minutes: u32,
}

impl Record for Call {}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
struct Contact {
    #[facet(oorm::tag = "autoIncrement")]
    id: u64,
    #[facet(oorm::tag = "index")]
    user_id: u64,
    #[facet(oorm::tag = "size:32")]
    phone: String,
    calls: Vec<Call>,
}

impl Record for Contact {}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
struct Profile {
    #[facet(oorm::tag = "autoIncrement")]
    id: u64,
    #[facet(oorm::tag = "unique")]
    user_id: u64,
    #[facet(oorm::tag = "size:1024")]
    bio: String,
}

impl Record for Profile {}

#[derive(Debug, Clone, Default, PartialEq, Facet)]
struct User {
    #[facet(oorm::tag = "autoIncrement")]
    id: u64,
    #[facet(oorm::tag = "size:64")]
    name: String,
    contacts: Vec<Contact>,
    profile: Option<Profile>,
}

impl Record for User {}

fn user(id: u64, name: &str) -> Row {
    row(&[("id", Value::U64(id)), ("name", Value::from(name))])
}

fn contact(id: u64, user_id: u64) -> Row {
    row(&[
        ("id", Value::U64(id)),
        ("user_id", Value::U64(user_id)),
        ("phone", Value::from(format!("555-{id:04}"))),
    ])
}

/// Users 1 and 2; user 1 owns contacts 10 and 12, user 2 owns contact 11.
fn script() -> Script {
    let script = Script::new();
    script.rows("FROM `user`", vec![user(1, "ann"), user(2, "bob")]);
    script.rows(
        "FROM `contact`",
        vec![contact(10, 1), contact(11, 2), contact(12, 1)],
    );
    script
}

fn contact_ids(user: &User) -> Vec<u64> {
    user.contacts.iter().map(|c| c.id).collect()
}

#[tokio::test]
async fn test_many_relation_groups_by_foreign_key() {
    let script = script();
    let users = script
        .db()
        .model::<User>()
        .with("contacts")
        .get()
        .await
        .unwrap();

    assert_eq!(contact_ids(&users[0]), [10, 12]);
    assert_eq!(contact_ids(&users[1]), [11]);
    assert!(users.iter().all(|u| u.profile.is_none()));

    let calls = script.calls_matching("FROM `contact`");
    assert_eq!(calls.len(), 1, "one query per relation");
    let (sql, params) = &calls[0];
    assert_eq!(
        sql,
        "SELECT `id`, `user_id`, `phone` FROM `contact` WHERE `user_id` IN (?, ?)"
    );
    assert_eq!(params, &[Value::U64(1), Value::U64(2)]);
}

#[tokio::test]
async fn test_one_relation_takes_first_match() {
    let script = script();
    script.rows(
        "FROM `profile`",
        vec![
            row(&[
                ("id", Value::U64(30)),
                ("user_id", Value::U64(1)),
                ("bio", Value::from("first")),
            ]),
            row(&[
                ("id", Value::U64(31)),
                ("user_id", Value::U64(1)),
                ("bio", Value::from("second")),
            ]),
        ],
    );

    let users = script
        .db()
        .model::<User>()
        .with("profile")
        .with("contacts")
        .get()
        .await
        .unwrap();

    assert_eq!(users[0].profile.as_ref().map(|p| p.id), Some(30));
    assert_eq!(users[1].profile, None);
    assert_eq!(contact_ids(&users[0]), [10, 12]);
}

#[tokio::test]
async fn test_duplicate_and_zero_keys_are_not_queried() {
    let script = Script::new();
    script.rows(
        "FROM `user`",
        vec![user(1, "ann"), user(0, "draft"), user(1, "ann again")],
    );
    script.rows("FROM `contact`", vec![contact(10, 1)]);

    let users = script
        .db()
        .model::<User>()
        .with("contacts")
        .get()
        .await
        .unwrap();

    assert_eq!(contact_ids(&users[0]), [10]);
    assert!(users[1].contacts.is_empty());
    assert_eq!(contact_ids(&users[2]), [10]);
    let (_, params) = &script.calls_matching("FROM `contact`")[0];
    assert_eq!(params, &[Value::U64(1)]);
}

#[tokio::test]
async fn test_nested_path_loads_each_level_once() {
    let script = script();
    script.rows(
        "FROM `call`",
        vec![
            row(&[
                ("id", Value::U64(100)),
                ("contact_id", Value::U64(10)),
                ("minutes", Value::U64(5)),
            ]),
            row(&[
                ("id", Value::U64(101)),
                ("contact_id", Value::U64(12)),
                ("minutes", Value::U64(7)),
            ]),
        ],
    );

    let users = script
        .db()
        .model::<User>()
        .with("contacts.calls")
        .get()
        .await
        .unwrap();

    let calls_of = |user: &User| -> Vec<Vec<u64>> {
        user.contacts
            .iter()
            .map(|c| c.calls.iter().map(|call| call.id).collect())
            .collect()
    };
    assert_eq!(calls_of(&users[0]), [vec![100], vec![101]]);
    assert_eq!(calls_of(&users[1]), [Vec::<u64>::new()]);

    let (sql, params) = &script.calls_matching("FROM `call`")[0];
    assert_eq!(
        sql,
        "SELECT `id`, `contact_id`, `minutes` FROM `call` WHERE `contact_id` IN (?, ?, ?)"
    );
    assert_eq!(params, &[Value::U64(10), Value::U64(11), Value::U64(12)]);
    assert_eq!(script.sql().len(), 3);
}

#[tokio::test]
async fn test_scope_narrows_related_query() {
    let script = script();
    script
        .db()
        .model::<User>()
        .with_scope("contacts", |s| s.where_eq("phone", "555-0010").order_by_desc("id"))
        .get()
        .await
        .unwrap();

    let (sql, params) = &script.calls_matching("FROM `contact`")[0];
    insta::assert_snapshot!(
        sql,
        @"SELECT `id`, `user_id`, `phone` FROM `contact` WHERE `user_id` IN (?, ?) AND `phone` = ? ORDER BY `id` DESC"
    );
    assert_eq!(params.len(), 3);
}

#[tokio::test]
async fn test_scoped_select_keeps_foreign_key() {
    let script = Script::new();
    script.rows("FROM `user`", vec![user(1, "ann")]);
    script.rows(
        "FROM `contact`",
        vec![row(&[
            ("phone", Value::from("555-0001")),
            ("user_id", Value::U64(1)),
        ])],
    );

    let users = script
        .db()
        .model::<User>()
        .with_scope("contacts", |s| s.select(["phone"]))
        .get()
        .await
        .unwrap();

    assert_eq!(users[0].contacts[0].phone, "555-0001");
    assert_eq!(users[0].contacts[0].id, 0);
    assert_eq!(
        script.calls_matching("FROM `contact`")[0].0,
        "SELECT `phone`, `user_id` FROM `contact` WHERE `user_id` IN (?)"
    );
}

#[tokio::test]
async fn test_failures_of_concurrent_relations_accumulate() {
    let script = script();
    script.fail("FROM `contact`");
    script.fail("FROM `profile`");

    let err = script
        .db()
        .model::<User>()
        .with("contacts")
        .with("profile")
        .get()
        .await
        .unwrap_err();

    match &err {
        Error::Many(errors) => assert_eq!(errors.len(), 2),
        other => panic!("expected both failures, got {other:?}"),
    }
    assert_eq!(script.calls_matching("FROM `contact`").len(), 1);
    assert_eq!(script.calls_matching("FROM `profile`").len(), 1);
}

#[tokio::test]
async fn test_unknown_relation() {
    let script = script();
    let err = script
        .db()
        .model::<User>()
        .with("friends")
        .get()
        .await
        .unwrap_err();
    insta::assert_snapshot!(err, @"unknown relation `friends` on `user`");
}

#[tokio::test]
async fn test_no_parents_no_relation_queries() {
    let script = Script::new();
    let users = script
        .db()
        .model::<User>()
        .with("contacts.calls")
        .with("profile")
        .get()
        .await
        .unwrap();
    assert!(users.is_empty());
    assert_eq!(script.sql().len(), 1);
}
