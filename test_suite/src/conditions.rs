#![cfg(test)]

use std::sync::Arc;

use ransack_query::predicates::{self, PredicateError, PredicateRegistry};
use ransack_query::sql::Expr;
use ransack_query::{Arity, Config, PredicateSpec, SearchError, Value};
use serde_json::json;

use crate::fixtures::{context, context_with, lenient, people_sql, people_where, shared_schema};

#[test_log::test]
fn single_attribute_predicates() {
    assert_eq!(
        people_sql(json!({"name_eq": "Ernie"})),
        people_where("\"people\".\"name\" = 'Ernie'")
    );
    assert_eq!(
        people_sql(json!({"name_not_eq": "Ernie"})),
        people_where("\"people\".\"name\" != 'Ernie'")
    );
    assert_eq!(
        people_sql(json!({"name_i_cont": "ern"})),
        people_where("\"people\".\"name\" ILIKE '%ern%'")
    );
    assert_eq!(
        people_sql(json!({"name_start": "Er", "name_end": "ie"})),
        people_where("\"people\".\"name\" LIKE 'Er%' AND \"people\".\"name\" LIKE '%ie'")
    );
    assert_eq!(
        people_sql(json!({"name_matches": "E_n%"})),
        people_where("\"people\".\"name\" LIKE 'E_n%'")
    );
    assert_eq!(
        people_sql(json!({"age_gteq": 18, "age_lt": "65"})),
        people_where("\"people\".\"age\" >= 18 AND \"people\".\"age\" < 65")
    );
}

#[test_log::test]
fn multi_attribute_conditions() {
    assert_eq!(
        people_sql(json!({"name_or_email_eq": "x"})),
        people_where("\"people\".\"name\" = 'x' OR \"people\".\"email\" = 'x'")
    );
    assert_eq!(
        people_sql(json!({"name_and_email_cont": "x"})),
        people_where("\"people\".\"name\" LIKE '%x%' AND \"people\".\"email\" LIKE '%x%'")
    );
    assert_eq!(
        people_sql(json!({"name_or_email_eq": ["a", "b"]})),
        people_where("\"people\".\"name\" = 'a' OR \"people\".\"email\" = 'b'")
    );
    assert_eq!(
        people_sql(json!({"name_or_email_in": ["a", "b"]})),
        people_where(
            "\"people\".\"name\" IN ('a', 'b') OR \"people\".\"email\" IN ('a', 'b')"
        )
    );
}

#[test_log::test]
fn wildcards_are_escaped() {
    assert_eq!(
        people_sql(json!({"name_cont": "%._\\"})),
        people_where("\"people\".\"name\" LIKE '%\\%._\\\\%'")
    );
    assert_eq!(
        people_sql(json!({"name_cont": 42})),
        people_where("\"people\".\"name\" LIKE '%42%'")
    );
}

#[test_log::test]
fn values_are_cast_to_column_types() {
    assert_eq!(
        people_sql(json!({"awesome_eq": "true"})),
        people_where("\"people\".\"awesome\" = TRUE")
    );
    assert_eq!(
        people_sql(json!({"awesome_eq": false})),
        people_where("\"people\".\"awesome\" = FALSE")
    );
    assert_eq!(
        people_sql(json!({"born_on_lt": "2000-01-01"})),
        people_where("\"people\".\"born_on\" < '2000-01-01'")
    );
    assert_eq!(
        people_sql(json!({"age_in": {"1": "2", "0": "1"}})),
        people_where("\"people\".\"age\" IN (1, 2)")
    );
    assert_eq!(
        people_sql(json!({"age_in": ["", "3"]})),
        people_where("\"people\".\"age\" IN (3)")
    );
    assert_eq!(
        people_sql(json!({"name_eq": ["a", "b"]})),
        people_where("\"people\".\"name\" = 'a'")
    );

    let mut ctx = context("Person");
    assert!(matches!(
        ctx.search(&json!({"age_gt": "old"})),
        Err(SearchError::InvalidValue { attribute, .. }) if attribute == "age"
    ));

    let mut ctx = lenient("Person");
    let search = ctx.search(&json!({"age_gt": "old", "name_eq": "Ernie"})).unwrap();
    assert_eq!(
        ctx.result(&search).unwrap().to_sql(),
        people_where("\"people\".\"name\" = 'Ernie'")
    );
}

#[test_log::test]
fn flags_and_nulls() {
    assert_eq!(
        people_sql(json!({"name_present": "1"})),
        people_where("\"people\".\"name\" IS NOT NULL AND \"people\".\"name\" != ''")
    );
    assert_eq!(
        people_sql(json!({"name_present": false})),
        people_where("\"people\".\"name\" IS NULL OR \"people\".\"name\" = ''")
    );
    assert_eq!(
        people_sql(json!({"awesome_true": "0"})),
        people_where("\"people\".\"awesome\" != TRUE")
    );
    assert_eq!(
        people_sql(json!({"awesome_not_false": true})),
        people_where("\"people\".\"awesome\" != FALSE")
    );
    assert_eq!(
        people_sql(json!({"email_null": true})),
        people_where("\"people\".\"email\" IS NULL")
    );
    assert_eq!(
        people_sql(json!({"email_not_null": "0"})),
        people_where("\"people\".\"email\" IS NOT NULL")
    );
    assert_eq!(
        people_sql(json!({"email_null": ""})),
        "SELECT \"people\".* FROM \"people\""
    );
}

#[test_log::test]
fn compound_predicates() {
    assert_eq!(
        people_sql(json!({"name_eq_any": ["Ernie", "Bert"]})),
        people_where("\"people\".\"name\" = 'Ernie' OR \"people\".\"name\" = 'Bert'")
    );
    assert_eq!(
        people_sql(json!({"name_not_cont_all": ["a", "b"]})),
        people_where("\"people\".\"name\" NOT LIKE '%a%' AND \"people\".\"name\" NOT LIKE '%b%'")
    );
    assert_eq!(
        people_sql(json!({"name_eq_any": ["Ernie", "Bert"], "age_gt": 3})),
        people_where(
            "(\"people\".\"name\" = 'Ernie' OR \"people\".\"name\" = 'Bert') AND \"people\".\"age\" > 3"
        )
    );
}

#[test_log::test]
fn whitespace_stripping() {
    assert_eq!(
        people_sql(json!({"name_eq": "  Ernie "})),
        people_where("\"people\".\"name\" = 'Ernie'")
    );

    let mut ctx = context_with(
        "Person",
        Config {
            strip_whitespace: false,
            ..Config::default()
        },
    );
    let search = ctx.search(&json!({"name_eq": "  Ernie ", "email_eq": "   "})).unwrap();
    assert_eq!(
        ctx.result(&search).unwrap().to_sql(),
        people_where("\"people\".\"name\" = '  Ernie '")
    );
}

fn shorter_than() -> PredicateSpec {
    PredicateSpec::custom("shorter_than", Arity::Single, |attr, value| {
        Ok(Expr::raw(&format!("length({}) < {}", attr.to_sql(), value.to_sql())))
    })
    .with_value_type(ransack_query::AttributeType::Integer)
}

#[test_log::test]
fn private_registry() {
    let mut registry = PredicateRegistry::standard();
    registry.insert(shorter_than());
    let mut ctx = context("Person").with_registry(Arc::new(registry));
    let search = ctx.search(&json!({"name_shorter_than": "5"})).unwrap();
    assert_eq!(
        ctx.result(&search).unwrap().to_sql(),
        people_where("length(\"people\".\"name\") < 5")
    );

    let mut ctx = context("Person");
    assert!(matches!(
        ctx.search(&json!({"name_shorter_than": "5"})),
        Err(SearchError::UnknownPredicate(_))
    ));
}

#[test_log::test]
fn global_registration() {
    let before = ransack_query::Context::new(shared_schema(), "Person").unwrap();
    predicates::register(
        PredicateSpec::custom("longer_than", Arity::Single, |attr, value| {
            Ok(Expr::raw(&format!("length({}) > {}", attr.to_sql(), value.to_sql())))
        })
        .with_value_type(ransack_query::AttributeType::Integer),
    );
    assert!(before.registry().get("longer_than").is_none());

    let mut after = ransack_query::Context::new(shared_schema(), "Person").unwrap();
    let search = after.search(&json!({"name_longer_than": 3})).unwrap();
    assert_eq!(
        after.result(&search).unwrap().to_sql(),
        people_where("length(\"people\".\"name\") > 3")
    );
}

#[test_log::test]
fn failing_custom_predicates_are_reported() {
    let mut registry = PredicateRegistry::standard();
    registry.insert(PredicateSpec::custom("refused", Arity::Single, |_, value| {
        Err(refusal(value))
    }));
    let mut ctx = context("Person").with_registry(Arc::new(registry));
    let search = ctx.search(&json!({"name_refused": "x"})).unwrap();
    assert!(matches!(ctx.result(&search), Err(SearchError::Predicate(_))));
}

fn refusal(value: &Value) -> PredicateError {
    PredicateError::msg(format!("cannot search for {}", value))
}
