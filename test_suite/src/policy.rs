#![cfg(test)]

use ransack_query::{AllowList, Config, SearchError};
use serde_json::json;

use crate::fixtures::{compile, context, context_with, lenient, people_sql, people_where};

#[test_log::test]
fn strict_searches_reject_unknown_keys() {
    let mut ctx = context("Person");
    assert!(matches!(
        ctx.search(&json!({"foo_bar_eq": 1})),
        Err(SearchError::UnknownAttribute(a)) if a == "foo_bar"
    ));
    assert!(matches!(
        ctx.search(&json!({"name_resembles": "x"})),
        Err(SearchError::UnknownPredicate(k)) if k == "name_resembles"
    ));
    assert!(matches!(
        ctx.search(&json!({"children_nickname_cont": "x"})),
        Err(SearchError::UnknownAttribute(a)) if a == "children_nickname"
    ));

    let search = ctx.search(&json!({"foo_bar_eq": "", "name_resembles": []})).unwrap();
    assert!(search.is_empty());
}

#[test_log::test]
fn lenient_searches_drop_unknown_keys() {
    let mut ctx = lenient("Person");
    assert_eq!(
        compile(
            &mut ctx,
            json!({"foo_bar_eq": 1, "name_resembles": "x", "name_eq": "Ernie"})
        )
        .to_sql(),
        people_where("\"people\".\"name\" = 'Ernie'")
    );

    let mut ctx = context_with(
        "Person",
        Config::from_json(r#"{"ignore_unknown_conditions": true}"#).unwrap(),
    );
    assert_eq!(
        compile(&mut ctx, json!({"foo_bar_eq": 1})).to_sql(),
        "SELECT \"people\".* FROM \"people\""
    );
}

fn policy() -> AllowList {
    AllowList::new()
        .attribute("Person", "name")
        .attribute("Person", "email")
        .attribute("Person", "age")
        .association("Person", "children")
        .scope("Person", "awesome_only")
}

#[test_log::test]
fn authorized_references() {
    let mut ctx = context("Person").with_authorizer(policy());
    assert_eq!(
        compile(
            &mut ctx,
            json!({"children_name_eq": "x", "awesome_only": true, "s": "age desc"})
        )
        .to_sql(),
        "SELECT \"people\".* FROM \"people\" \
         LEFT OUTER JOIN \"people\" \"children_people\" ON \"children_people\".\"parent_id\" = \"people\".\"id\" \
         WHERE \"children_people\".\"name\" = 'x' AND \"people\".\"awesome\" = TRUE \
         ORDER BY \"people\".\"age\" DESC"
    );
}

#[test_log::test]
fn refusals_are_fatal_even_when_lenient() {
    let refused = [
        (json!({"salary_gt": 1}), "attribute", "salary"),
        (json!({"articles_title_eq": "x"}), "association", "articles"),
        (json!({"older_than": 30}), "scope", "older_than"),
        (json!({"s": "salary desc"}), "attribute", "salary"),
        (
            json!({"c": [{"a": ["name", "born_on"], "p": "eq", "v": ["x"]}]}),
            "attribute",
            "born_on",
        ),
    ];
    for (params, expected_kind, expected_name) in refused {
        let mut ctx = lenient("Person").with_authorizer(policy());
        match ctx.search(&params) {
            Err(SearchError::UnauthorizedReference { kind, entity, name }) => {
                assert_eq!(kind, expected_kind);
                assert_eq!(entity, "Person");
                assert_eq!(name, expected_name);
            }
            other => panic!("{} gave {:?}", params, other),
        }
    }
}

#[test_log::test]
fn flag_scopes() {
    assert_eq!(
        people_sql(json!({"awesome_only": "1"})),
        people_where("\"people\".\"awesome\" = TRUE")
    );
    assert_eq!(
        people_sql(json!({"awesome_only": "false"})),
        "SELECT \"people\".* FROM \"people\""
    );
    assert_eq!(
        people_sql(json!({"awesome_only": ""})),
        "SELECT \"people\".* FROM \"people\""
    );

    let mut ctx = context_with(
        "Person",
        Config {
            sanitize_scope_args: false,
            ..Config::default()
        },
    );
    let search = ctx.search(&json!({"awesome_only": "false"})).unwrap();
    assert_eq!(search.scopes().len(), 1);
    assert_eq!(search.scopes()[0].args(), &[ransack_query::Value::from("false")]);
    assert_eq!(
        ctx.result(&search).unwrap().to_sql(),
        people_where("\"people\".\"awesome\" = TRUE")
    );
}

#[test_log::test]
fn scopes_with_arguments() {
    let mut ctx = context("Person");
    let search = ctx.search(&json!({"older_than": 30})).unwrap();
    assert_eq!(search.scopes()[0].name(), "older_than");
    assert_eq!(
        ctx.result(&search).unwrap().to_sql(),
        people_where("\"people\".\"age\" > 30")
    );

    let search = ctx.search(&json!({"older_than": false})).unwrap();
    assert_eq!(
        ctx.result(&search).unwrap().to_sql(),
        people_where("\"people\".\"age\" > FALSE")
    );
}

#[test_log::test]
fn scopes_are_conjoined_with_the_tree() {
    assert_eq!(
        people_sql(json!({"m": "or", "name_eq": "a", "email_eq": "b", "awesome_only": true})),
        people_where(
            "(\"people\".\"name\" = 'a' OR \"people\".\"email\" = 'b') AND \"people\".\"awesome\" = TRUE"
        )
    );
}

#[test_log::test]
fn raw_scope_bodies_stay_inside_the_conjunction() {
    assert_eq!(
        people_sql(json!({"name_eq": "Ernie", "minors_or_retirees": true})),
        people_where(
            "\"people\".\"name\" = 'Ernie' AND (\"people\".\"age\" < 18 OR \"people\".\"age\" > 65)"
        )
    );
    assert_eq!(
        people_sql(json!({"minors_or_retirees": true})),
        people_where("\"people\".\"age\" < 18 OR \"people\".\"age\" > 65")
    );
}

#[test_log::test]
fn scopes_only_apply_at_the_top_level() {
    let mut ctx = context("Person");
    assert!(matches!(
        ctx.search(&json!({"g": [{"awesome_only": true}]})),
        Err(SearchError::UnknownPredicate(k)) if k == "awesome_only"
    ));
}
