#![cfg(test)]

use std::sync::Arc;
use std::thread;

use ransack_query::nodes::Condition;
use ransack_query::{Config, Context, JoinKind, Search};
use serde_json::json;

use crate::fixtures::{compile, context, context_with, lenient, shared_schema};

fn conditions(search: &Search) -> Vec<&Condition> {
    search.base().conditions().collect()
}

#[test_log::test]
fn same_path_shares_one_join() {
    for depth in 0..5 {
        let prefix = "children_".repeat(depth);
        let mut ctx = context("Person");
        let search = ctx
            .search(&json!({
                format!("{}name_eq", prefix): "a",
                format!("{}name_cont", prefix): "b",
            }))
            .unwrap();

        let found = conditions(&search);
        assert_eq!(found.len(), 2);
        let first = found[0].attributes()[0].join();
        let second = found[1].attributes()[0].join();
        assert_eq!(first, second, "depth {}", depth);
        assert_eq!(ctx.join_graph().len(), depth);
        if let (Some(a), Some(b)) = (first, second) {
            assert!(std::ptr::eq(
                ctx.join_graph().node(a),
                ctx.join_graph().node(b)
            ));
        }

        let sql = ctx.result(&search).unwrap().to_sql();
        assert_eq!(sql.matches(" JOIN ").count(), depth, "{}", sql);
    }
}

#[test_log::test]
fn graph_lookup_by_path() {
    let mut ctx = context("Person");
    ctx.search(&json!({"children_children_name_eq": "x"})).unwrap();
    let graph = ctx.join_graph();

    let child = graph.find(&[("children".to_string(), None)]).unwrap();
    let grandchild = graph
        .find(&[("children".to_string(), None), ("children".to_string(), None)])
        .unwrap();
    assert_eq!(graph.node(grandchild).parent(), Some(child));
    assert_eq!(graph.path_of(grandchild).len(), 2);
    assert_eq!(graph.reference(Some(grandchild)), "children_children_people");
    assert_eq!(graph.reference(None), "people");
    assert!(graph.find(&[("parent".to_string(), None)]).is_none());
}

#[test_log::test]
fn dropped_conditions_leave_no_join() {
    let mut ctx = lenient("Person");
    let search = ctx
        .search(&json!({"children_age_gt": "old", "name_eq": "Ernie"}))
        .unwrap();
    assert_eq!(ctx.join_graph().len(), 1);
    assert_eq!(
        ctx.result(&search).unwrap().to_sql(),
        "SELECT \"people\".* FROM \"people\" WHERE \"people\".\"name\" = 'Ernie'"
    );
}

#[test_log::test]
fn contexts_share_joins_between_searches() {
    let mut shared = context("Comment");
    let first = shared.search(&json!({"article_person_name_eq": "a"})).unwrap();
    let second = shared.search(&json!({"person_name_eq": "b"})).unwrap();
    assert_eq!(
        shared.result(&first).unwrap().to_sql(),
        "SELECT \"comments\".* FROM \"comments\" \
         LEFT OUTER JOIN \"articles\" ON \"articles\".\"id\" = \"comments\".\"article_id\" \
         LEFT OUTER JOIN \"people\" ON \"people\".\"id\" = \"articles\".\"person_id\" \
         WHERE \"people\".\"name\" = 'a'"
    );
    assert_eq!(
        shared.result(&second).unwrap().to_sql(),
        "SELECT \"comments\".* FROM \"comments\" \
         LEFT OUTER JOIN \"people\" \"person_comments\" ON \"person_comments\".\"id\" = \"comments\".\"person_id\" \
         WHERE \"person_comments\".\"name\" = 'b'"
    );

    let mut fresh = context("Comment");
    assert_eq!(
        compile(&mut fresh, json!({"person_name_eq": "b"})).to_sql(),
        "SELECT \"comments\".* FROM \"comments\" \
         LEFT OUTER JOIN \"people\" ON \"people\".\"id\" = \"comments\".\"person_id\" \
         WHERE \"people\".\"name\" = 'b'"
    );
}

#[test_log::test]
fn deep_chains_alias_repeated_tables() {
    let mut ctx = context("Person");
    assert_eq!(
        compile(&mut ctx, json!({"articles_comments_person_name_eq": "Ernie"})).to_sql(),
        "SELECT \"people\".* FROM \"people\" \
         LEFT OUTER JOIN \"articles\" ON \"articles\".\"person_id\" = \"people\".\"id\" \
         LEFT OUTER JOIN \"comments\" ON \"comments\".\"article_id\" = \"articles\".\"id\" \
         LEFT OUTER JOIN \"people\" \"person_comments\" ON \"person_comments\".\"id\" = \"comments\".\"person_id\" \
         WHERE \"person_comments\".\"name\" = 'Ernie'"
    );
}

#[test_log::test]
fn inner_joins_by_configuration() {
    let mut ctx = context_with(
        "Person",
        Config {
            join_type: JoinKind::Inner,
            ..Config::default()
        },
    );
    assert_eq!(
        compile(&mut ctx, json!({"articles_title_eq": "a"})).to_sql(),
        "SELECT \"people\".* FROM \"people\" \
         INNER JOIN \"articles\" ON \"articles\".\"person_id\" = \"people\".\"id\" \
         WHERE \"articles\".\"title\" = 'a'"
    );
    assert!(ctx
        .join_graph()
        .nodes()
        .all(|node| node.join_kind() == JoinKind::Inner));
}

#[test_log::test]
fn polymorphic_belongs_to() {
    let mut ctx = context("Note");
    assert_eq!(
        compile(&mut ctx, json!({"notable_of_Person_type_name_eq": "Ernie"})).to_sql(),
        "SELECT \"notes\".* FROM \"notes\" \
         LEFT OUTER JOIN \"people\" ON \"people\".\"id\" = \"notes\".\"notable_id\" \
         AND \"notes\".\"notable_type\" = 'Person' \
         WHERE \"people\".\"name\" = 'Ernie'"
    );

    let mut ctx = context("Note");
    assert_eq!(
        compile(&mut ctx, json!({"notable_of_Article_type_title_cont": "Rust"})).to_sql(),
        "SELECT \"notes\".* FROM \"notes\" \
         LEFT OUTER JOIN \"articles\" ON \"articles\".\"id\" = \"notes\".\"notable_id\" \
         AND \"notes\".\"notable_type\" = 'Article' \
         WHERE \"articles\".\"title\" LIKE '%Rust%'"
    );
}

#[test_log::test]
fn polymorphic_subtypes_get_their_own_joins() {
    let provider = shared_schema();
    let mut ctx = Context::new(provider.clone(), "Note").unwrap();
    ctx.search(&json!({
        "notable_of_Person_type_name_eq": "Ernie",
        "notable_of_Article_type_title_eq": "Rust",
    }))
    .unwrap();

    let graph = ctx.join_graph();
    assert_eq!(graph.len(), 2);
    let subtypes = graph
        .nodes()
        .map(|node| {
            (
                node.polymorphic_subtype().map(str::to_string),
                node.association().target().map(str::to_string),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        subtypes,
        vec![
            (Some("Person".to_string()), Some("Person".to_string())),
            (Some("Article".to_string()), Some("Article".to_string())),
        ]
    );

    let notable = provider
        .entity("Note")
        .unwrap()
        .get_association("notable")
        .unwrap()
        .clone();
    assert_eq!(notable.target(), None);
}

#[test_log::test]
fn polymorphic_searches_in_parallel() {
    let provider = shared_schema();
    let handles = (0..8)
        .map(|i| {
            let provider = provider.clone();
            thread::spawn(move || {
                let (subtype, table, column) = if i % 2 == 0 {
                    ("Person", "people", "name")
                } else {
                    ("Article", "articles", "title")
                };
                let mut ctx = Context::new(provider, "Note").unwrap();
                let key = format!("notable_of_{}_type_{}_eq", subtype, column);
                let search = ctx.search(&json!({ key: "x" })).unwrap();
                let sql = ctx.result(&search).unwrap().to_sql();
                assert!(
                    sql.contains(&format!("\"notes\".\"notable_type\" = '{}'", subtype)),
                    "{}",
                    sql
                );
                assert!(sql.ends_with(&format!("WHERE \"{}\".\"{}\" = 'x'", table, column)));
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }

    let note = provider.entity("Note").unwrap();
    assert_eq!(
        note.get_association("notable").map(|a| a.target()),
        Some(None)
    );
    assert_eq!(Arc::strong_count(&provider), 1);
}

#[test_log::test]
fn has_many_as_polymorphic() {
    let mut ctx = context("Person");
    assert_eq!(
        compile(&mut ctx, json!({"notes_note_cont": "x"})).to_sql(),
        "SELECT \"people\".* FROM \"people\" \
         LEFT OUTER JOIN \"notes\" ON \"notes\".\"notable_id\" = \"people\".\"id\" \
         AND \"notes\".\"notable_type\" = 'Person' \
         WHERE \"notes\".\"note\" LIKE '%x%'"
    );
}
