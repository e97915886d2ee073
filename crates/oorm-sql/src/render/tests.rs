use crate::*;

#[test]
fn test_simple_select() {
    let stmt = SelectStmt::new()
        .columns([
            SelectColumn::expr(Expr::column("id")),
            SelectColumn::expr(Expr::column("name")),
        ])
        .from(FromClause::table("user"));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @"SELECT `id`, `name` FROM `user`");
    assert!(result.params.is_empty());
}

#[test]
fn test_select_with_where() {
    let stmt = SelectStmt::new()
        .columns([SelectColumn::expr(Expr::column("id"))])
        .from(FromClause::table("user"))
        .where_(Expr::column("id").eq(Expr::param(5u64)));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @"SELECT `id` FROM `user` WHERE `id` = ?");
    assert_eq!(result.params, vec![Value::U64(5)]);
}

#[test]
fn test_params_follow_placeholder_order() {
    let stmt = SelectStmt::new()
        .from(FromClause::table("order"))
        .where_(Expr::column("status").eq(Expr::param("paid")))
        .and_where(Expr::column("user_id").in_list([Value::from(1u32), Value::from(2u32)]))
        .and_where(Expr::column("total").between(Expr::param(10i64), Expr::param(20i64)));

    let result = render(&stmt);
    insta::assert_snapshot!(
        result.sql,
        @"SELECT * FROM `order` WHERE `status` = ? AND `user_id` IN (?, ?) AND `total` BETWEEN ? AND ?"
    );
    assert_eq!(
        result.params,
        vec![
            Value::from("paid"),
            Value::U64(1),
            Value::U64(2),
            Value::I64(10),
            Value::I64(20),
        ]
    );
}

#[test]
fn test_empty_in_list_matches_nothing() {
    let stmt = SelectStmt::new()
        .from(FromClause::table("user"))
        .where_(Expr::column("id").in_list(Vec::new()));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @"SELECT * FROM `user` WHERE 1 = 0");
}

#[test]
fn test_or_is_grouped() {
    let stmt = SelectStmt::new()
        .from(FromClause::table("user"))
        .where_(Expr::column("deleted_at").is_null())
        .and_where(
            Expr::column("status")
                .eq(Expr::param(1i64))
                .or(Expr::column("status").eq(Expr::param(2i64))),
        );

    let result = render(&stmt);
    insta::assert_snapshot!(
        result.sql,
        @"SELECT * FROM `user` WHERE `deleted_at` IS NULL AND (`status` = ? OR `status` = ?)"
    );
}

#[test]
fn test_qualified_columns_and_join() {
    let stmt = SelectStmt::new()
        .columns([
            SelectColumn::expr(Expr::column("u.id")),
            SelectColumn::aliased(Expr::column("c.mobile"), "phone"),
        ])
        .from(FromClause::aliased("user", "u"))
        .join(Join {
            kind: JoinKind::Left,
            table: "contact".into(),
            alias: Some("c".into()),
            on: Expr::column("c.user_id").eq(Expr::column("u.id")),
        });

    let result = render(&stmt);
    insta::assert_snapshot!(
        result.sql,
        @"SELECT `u`.`id`, `c`.`mobile` AS `phone` FROM `user` AS `u` LEFT JOIN `contact` AS `c` ON `c`.`user_id` = `u`.`id`"
    );
}

#[test]
fn test_group_order_limit_offset() {
    let stmt = SelectStmt::new()
        .columns([
            SelectColumn::expr(Expr::column("status")),
            SelectColumn::aliased(
                Expr::FnCall {
                    name: "COUNT".into(),
                    args: vec![Expr::column("*")],
                },
                "n",
            ),
        ])
        .from(FromClause::table("user"))
        .group_by(Expr::column("status"))
        .order_by(OrderBy::desc(Expr::column("n")))
        .limit(10)
        .offset(20);

    let result = render(&stmt);
    insta::assert_snapshot!(
        result.sql,
        @"SELECT `status`, COUNT(*) AS `n` FROM `user` GROUP BY `status` ORDER BY `n` DESC LIMIT 10 OFFSET 20"
    );
}

#[test]
fn test_offset_without_limit() {
    let stmt = SelectStmt::new().from(FromClause::table("user")).offset(5);

    let result = render(&stmt);
    insta::assert_snapshot!(
        result.sql,
        @"SELECT * FROM `user` LIMIT 18446744073709551615 OFFSET 5"
    );
}

#[test]
fn test_insert_multi_row() {
    let stmt = InsertStmt::new("user")
        .columns(["user_name", "status"])
        .row(vec![Expr::param("ann"), Expr::Default])
        .row(vec![Expr::param("bob"), Expr::param(1i64)]);

    let result = render(&stmt);
    insta::assert_snapshot!(
        result.sql,
        @"INSERT INTO `user` (`user_name`, `status`) VALUES (?, DEFAULT), (?, ?)"
    );
    assert_eq!(
        result.params,
        vec![Value::from("ann"), Value::from("bob"), Value::I64(1)]
    );
}

#[test]
fn test_replace_with_column_builder() {
    let stmt = InsertStmt::replace("user")
        .column("id", Expr::param(3u64))
        .column("created_at", Expr::Now);

    let result = render(&stmt);
    insta::assert_snapshot!(
        result.sql,
        @"REPLACE INTO `user` (`id`, `created_at`) VALUES (?, NOW())"
    );
}

#[test]
fn test_insert_on_duplicate_key() {
    let stmt = InsertStmt::new("counter")
        .column("name", Expr::param("hits"))
        .column("n", Expr::param(1i64))
        .on_duplicate_key_update(UpdateAssignment::new("n", Expr::raw("`n` + 1")));

    let result = render(&stmt);
    insta::assert_snapshot!(
        result.sql,
        @"INSERT INTO `counter` (`name`, `n`) VALUES (?, ?) ON DUPLICATE KEY UPDATE `n` = `n` + 1"
    );
}

#[test]
fn test_update() {
    let stmt = UpdateStmt::new("user")
        .set("status", Expr::param("active"))
        .set("updated_at", Expr::Now)
        .where_(Expr::column("id").eq(Expr::param(7u64)))
        .limit(1);

    let result = render(&stmt);
    insta::assert_snapshot!(
        result.sql,
        @"UPDATE `user` SET `status` = ?, `updated_at` = NOW() WHERE `id` = ? LIMIT 1"
    );
    assert_eq!(result.params, vec![Value::from("active"), Value::U64(7)]);
}

#[test]
fn test_delete() {
    let stmt = DeleteStmt::new("user").where_(Expr::column("id").eq(Expr::param(7u64)));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @"DELETE FROM `user` WHERE `id` = ?");
}

#[test]
fn test_not_like_and_not_in() {
    let stmt = SelectStmt::new()
        .distinct()
        .columns([SelectColumn::expr(Expr::column("email"))])
        .from(FromClause::table("user"))
        .where_(Expr::column("email").like(Expr::param("%@example.com")).not())
        .and_where(Expr::column("id").not_in_list([Value::from(1u64)]));

    let result = render(&stmt);
    insta::assert_snapshot!(
        result.sql,
        @"SELECT DISTINCT `email` FROM `user` WHERE NOT `email` LIKE ? AND `id` NOT IN (?)"
    );
}

#[test]
fn test_stmt_enum_dispatch() {
    let stmt = Stmt::Delete(DeleteStmt::new("session").limit(100));
    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @"DELETE FROM `session` LIMIT 100");
}
