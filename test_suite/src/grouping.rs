#![cfg(test)]

use std::collections::BTreeSet;

use ransack_query::nodes::{Condition, Grouping, Node};
use ransack_query::visitor::{self, Visitor};
use ransack_query::{Combinator, SearchError};
use serde_json::json;

use crate::fixtures::{context, people_sql, people_where};

const NESTED_OR: &str = "SELECT \"people\".* FROM \"people\" \
     LEFT OUTER JOIN \"people\" \"children_people\" ON \"children_people\".\"parent_id\" = \"people\".\"id\" \
     WHERE \"people\".\"name\" = 'Ernie' \
     AND (\"people\".\"name\" = 'Ernie' OR \"children_people\".\"name\" = 'Ernie')";

#[test_log::test]
fn nested_groupings_keep_their_combinator() {
    assert_eq!(
        people_sql(json!({
            "name_eq": "Ernie",
            "g": [{"m": "or", "name_eq": "Ernie", "children_name_eq": "Ernie"}]
        })),
        NESTED_OR
    );
    assert_eq!(
        people_sql(json!({
            "name_eq": "Ernie",
            "g": {"0": {"m": "or", "name_eq": "Ernie", "children_name_eq": "Ernie"}}
        })),
        NESTED_OR
    );
    assert_eq!(
        people_sql(json!({
            "name_eq": "Ernie",
            "groupings": [{"combinator": "OR", "name_eq": "Ernie", "children_name_eq": "Ernie"}]
        })),
        NESTED_OR
    );
}

#[test_log::test]
fn root_combinator() {
    assert_eq!(
        people_sql(json!({"m": "OR", "name_eq": "a", "email_eq": "b"})),
        people_where("\"people\".\"name\" = 'a' OR \"people\".\"email\" = 'b'")
    );
    assert_eq!(
        people_sql(json!({"m": "either", "name_eq": "a", "email_eq": "b"})),
        people_where("\"people\".\"name\" = 'a' AND \"people\".\"email\" = 'b'")
    );
    assert_eq!(
        people_sql(json!({
            "g": [{"m": "or", "name_eq": "a", "g": [{"email_eq": "b", "age_gt": 1}]}]
        })),
        people_where(
            "\"people\".\"name\" = 'a' OR (\"people\".\"email\" = 'b' AND \"people\".\"age\" > 1)"
        )
    );
}

#[test_log::test]
fn indexed_groupings_follow_numeric_order() {
    assert_eq!(
        people_sql(json!({
            "m": "or",
            "g": {"10": {"name_eq": "c"}, "2": {"name_eq": "b"}, "1": {"name_eq": "a"}}
        })),
        people_where(
            "\"people\".\"name\" = 'a' OR \"people\".\"name\" = 'b' OR \"people\".\"name\" = 'c'"
        )
    );
}

#[test_log::test]
fn blank_values_prune_the_tree() {
    let mut ctx = context("Person");
    let search = ctx
        .search(&json!({
            "name_eq": "",
            "g": [
                {"email_eq": "  ", "c": [{"a": ["name"], "p": "eq", "v": [""]}]},
                {"m": "or", "g": [{"age_in": ["", null]}]}
            ],
            "age_in": ["", ""],
            "s": ""
        }))
        .unwrap();
    assert!(search.is_empty());
    assert!(search.sorts().is_empty());
    assert!(ctx.join_graph().is_empty());
    assert_eq!(
        ctx.result(&search).unwrap().to_sql(),
        "SELECT \"people\".* FROM \"people\""
    );

    let search = ctx
        .search(&json!({"g": [{"name_eq": ""}, {"name_eq": "x"}]}))
        .unwrap();
    assert_eq!(search.base().len(), 1);
    assert_eq!(search.base().groupings().next().map(Grouping::len), Some(1));
}

#[test_log::test]
fn indexed_conditions_match_their_keys() {
    let expected = people_where("\"people\".\"name\" = 'x' OR \"people\".\"email\" = 'x'");
    assert_eq!(people_sql(json!({"name_or_email_eq": "x"})), expected);
    assert_eq!(
        people_sql(json!({"c": [{"a": ["name", "email"], "p": "eq", "v": ["x"]}]})),
        expected
    );
    assert_eq!(
        people_sql(json!({
            "conditions": {"0": {
                "attributes": {"0": {"name": "name"}, "1": {"name": "email"}},
                "predicate": "eq",
                "values": {"0": {"value": "x"}}
            }}
        })),
        expected
    );
    assert_eq!(
        people_sql(json!({"c": [{"a": ["name", "email"], "p": "eq", "m": "and", "v": ["x", "y"]}]})),
        people_where("\"people\".\"name\" = 'x' AND \"people\".\"email\" = 'y'")
    );

    let mut ctx = context("Person");
    let search = ctx
        .search(&json!({"c": [{"a": ["children_name"], "p": "cont", "v": ["Er"]}]}))
        .unwrap();
    let condition = search.base().conditions().next().unwrap();
    assert_eq!(condition.key(), "children_name_cont");
    assert_eq!(condition.combinator(), Combinator::Or);
    assert_eq!(condition.attributes()[0].association_path(), &["children".to_string()]);
}

#[test_log::test]
fn incomplete_indexed_conditions_are_dropped() {
    let mut ctx = context("Person");
    let search = ctx
        .search(&json!({"c": [{"a": ["name"], "v": ["x"]}, {"p": "eq", "v": ["x"]}]}))
        .unwrap();
    assert!(search.is_empty());

    assert!(matches!(
        ctx.search(&json!({"c": [{"a": ["name"], "p": "resembles", "v": ["x"]}]})),
        Err(SearchError::UnknownPredicate(p)) if p == "resembles"
    ));
}

#[test_log::test]
fn malformed_groupings() {
    let mut ctx = context("Person");
    for params in [
        json!({"g": "name_eq"}),
        json!({"g": [1, 2]}),
        json!({"g": {"first": {"name_eq": "x"}}}),
        json!({"c": "name_eq"}),
        json!({"g": [{"c": {"a": {"name_eq": "x"}}}]}),
    ] {
        assert!(
            matches!(ctx.search(&params), Err(SearchError::MalformedGrouping(_))),
            "{}",
            params
        );
    }

    let mut lenient = crate::fixtures::lenient("Person");
    assert!(matches!(
        lenient.search(&json!({"g": "name_eq"})),
        Err(SearchError::MalformedGrouping(k)) if k == "g"
    ));
}

/// Counts the nodes of a tree and how deeply groupings nest.
#[derive(Default)]
struct Shape {
    conditions: usize,
    groupings: usize,
    depth: usize,
    deepest: usize,
}

impl Visitor for Shape {
    type Output = ();

    fn visit_grouping(&mut self, grouping: &Grouping) {
        self.groupings += 1;
        self.depth += 1;
        self.deepest = self.deepest.max(self.depth);
        for child in grouping.children() {
            child.accept(self);
        }
        self.depth -= 1;
    }

    fn visit_condition(&mut self, _condition: &Condition) {
        self.conditions += 1;
    }
}

#[test_log::test]
fn custom_visitors() {
    let mut ctx = context("Person");
    let search = ctx
        .search(&json!({
            "name_eq": "a",
            "g": [
                {"m": "or", "email_eq": "b", "g": [{"age_gt": 1, "age_lt": 9}]},
                {"name_cont": "c"}
            ]
        }))
        .unwrap();

    let mut shape = Shape::default();
    search.base().accept(&mut shape);
    assert_eq!(shape.conditions, 5);
    assert_eq!(shape.groupings, 4);
    assert_eq!(shape.deepest, 3);
}

#[test_log::test]
fn compiling_one_node() {
    let mut ctx = context("Person");
    let search = ctx
        .search(&json!({
            "g": [{"m": "or", "name_eq": "a", "children_name_eq": "a"}],
            "articles_title_eq": "x"
        }))
        .unwrap();
    let graph = ctx.join_graph();
    assert_eq!(graph.len(), 2);

    let grouping = &search.base().children()[0];
    assert!(matches!(grouping, Node::Grouping(_)));
    let (expr, used) = visitor::compile(grouping, graph).unwrap();
    assert_eq!(
        expr.unwrap().to_sql(),
        "\"people\".\"name\" = 'a' OR \"children_people\".\"name\" = 'a'"
    );
    let children = graph.find(&[("children".to_string(), None)]).unwrap();
    assert_eq!(used, [children].into_iter().collect::<BTreeSet<_>>());

    let (expr, used) = visitor::compile(&search.base().children()[1], graph).unwrap();
    assert_eq!(expr.unwrap().to_sql(), "\"articles\".\"title\" = 'x'");
    assert_eq!(used.len(), 1);
    assert!(!used.contains(&children));
}
