#![cfg(test)]

use ransack_query::distinct;
use ransack_query::{Direction, OrderExpr, Relation, SearchError, SelectQuery};
use serde_json::json;

use crate::fixtures::{compile, context, lenient, people_sql};

fn ordered(orders: &str) -> String {
    format!("SELECT \"people\".* FROM \"people\" ORDER BY {}", orders)
}

#[test_log::test]
fn sort_strings() {
    assert_eq!(
        people_sql(json!({"s": "name desc"})),
        ordered("\"people\".\"name\" DESC")
    );
    assert_eq!(
        people_sql(json!({"s": "name"})),
        ordered("\"people\".\"name\" ASC")
    );
    assert_eq!(
        people_sql(json!({"s": "name ASC, age desc"})),
        ordered("\"people\".\"name\" ASC, \"people\".\"age\" DESC")
    );
    assert_eq!(
        people_sql(json!({"s": "name sideways"})),
        ordered("\"people\".\"name\" ASC")
    );
}

#[test_log::test]
fn sort_collections() {
    let expected = ordered("\"people\".\"name\" ASC, \"people\".\"age\" DESC");
    assert_eq!(people_sql(json!({"s": ["name", "age desc"]})), expected);
    assert_eq!(
        people_sql(json!({"s": {"1": "age desc", "0": "name"}})),
        expected
    );
    assert_eq!(
        people_sql(json!({"sorts": [{"name": "name"}, {"name": "age", "dir": "DESC"}]})),
        expected
    );
    assert_eq!(
        people_sql(json!({"s": {"name": "age", "dir": "desc"}})),
        ordered("\"people\".\"age\" DESC")
    );

    let mut ctx = context("Person");
    let search = ctx.search(&json!({"s": ["age desc", ""]})).unwrap();
    assert_eq!(search.sorts().len(), 1);
    assert_eq!(search.sorts()[0].direction(), Direction::Desc);
    assert_eq!(search.sorts()[0].attribute().attribute_name(), "age");

    assert!(matches!(
        ctx.search(&json!({"s": 3})),
        Err(SearchError::MalformedGrouping(k)) if k == "s"
    ));
}

#[test_log::test]
fn sorts_through_associations() {
    assert_eq!(
        people_sql(json!({"s": ["name", "children_name desc"]})),
        "SELECT \"people\".* FROM \"people\" \
         LEFT OUTER JOIN \"people\" \"children_people\" ON \"children_people\".\"parent_id\" = \"people\".\"id\" \
         ORDER BY \"people\".\"name\" ASC, \"children_people\".\"name\" DESC"
    );
}

#[test_log::test]
fn unknown_sorts() {
    let mut ctx = context("Person");
    assert!(matches!(
        ctx.search(&json!({"s": "nickname desc"})),
        Err(SearchError::UnknownAttribute(a)) if a == "nickname"
    ));

    let mut ctx = lenient("Person");
    assert_eq!(
        compile(&mut ctx, json!({"s": "nickname desc, name"})).to_sql(),
        ordered("\"people\".\"name\" ASC")
    );
}

#[test_log::test]
fn distinct_searches_select_their_orderings() {
    let mut ctx = context("Person");
    let mut search = ctx.search(&json!({"s": "children_name desc"})).unwrap();
    search.set_distinct(true);
    assert!(search.is_distinct());

    let mut query = ctx.result(&search).unwrap();
    let selects = query.select_values().to_vec();
    assert_eq!(selects.len(), 2);
    assert_eq!(selects[0], "\"people\".*");
    let alias = selects[1]
        .strip_prefix("\"children_people\".\"name\" AS ")
        .unwrap()
        .to_string();
    assert!(alias.starts_with("ordering_"));
    assert_eq!(
        query.to_sql(),
        format!(
            "SELECT DISTINCT \"people\".*, \"children_people\".\"name\" AS {alias} FROM \"people\" \
             LEFT OUTER JOIN \"people\" \"children_people\" ON \"children_people\".\"parent_id\" = \"people\".\"id\" \
             ORDER BY {alias} DESC",
            alias = alias
        )
    );

    let before = query.clone();
    assert!(!distinct::rewrite(&mut query));
    assert_eq!(query, before);
}

#[test_log::test]
fn distinct_base_columns_need_no_alias() {
    let mut ctx = context("Person");
    let mut search = ctx.search(&json!({"s": "name desc"})).unwrap();
    search.set_distinct(true);
    assert_eq!(
        ctx.result(&search).unwrap().to_sql(),
        "SELECT DISTINCT \"people\".* FROM \"people\" ORDER BY \"people\".\"name\" DESC"
    );
}

#[test_log::test]
fn applying_to_a_host_relation() {
    let mut ctx = context("Person");
    let search = ctx.search(&json!({"age_gt": 3})).unwrap();

    let mut query = SelectQuery::new("people");
    query.distinct(true);
    query.select("id");
    query.order(OrderExpr::Raw("name ASC".to_string()));
    query.order(OrderExpr::Opaque("RANDOM()".to_string()));
    ctx.apply(&search, &mut query).unwrap();

    let selects = query.select_values().to_vec();
    assert_eq!(selects.len(), 2);
    assert_eq!(selects[0], "id");
    let alias = selects[1].strip_prefix("name AS ").unwrap().to_string();
    assert!(alias.starts_with("ordering_"));
    assert_eq!(
        query.order_values(),
        &[
            OrderExpr::Raw(format!("{} ASC", alias)),
            OrderExpr::Opaque("RANDOM()".to_string()),
        ]
    );
    assert_eq!(
        query.predicate().map(|p| p.to_sql()),
        Some("\"people\".\"age\" > 3".to_string())
    );
}

#[test_log::test]
fn non_distinct_orders_are_untouched() {
    let mut ctx = context("Person");
    let search = ctx.search(&json!({"s": "children_name"})).unwrap();
    let query = ctx.result(&search).unwrap();
    assert!(query.select_values().is_empty());
    assert_eq!(
        query.order_values(),
        &[OrderExpr::Sort {
            expr: "\"children_people\".\"name\"".to_string(),
            direction: Direction::Asc
        }]
    );
}
