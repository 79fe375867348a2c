use std::sync::Arc;

use ransack_query::sql::{BinaryOp, Expr};
use ransack_query::{
    Association, AttributeType, Config, Context, Entity, MetadataProvider, Schema, SelectQuery,
    Value,
};

/// People write articles, comment on them, have children, and can
/// have notes attached, as can articles.
pub fn schema() -> Schema {
    use AttributeType::*;

    Schema::new()
        .with_entity(
            Entity::new("Person", "people")
                .attribute("id", Integer)
                .attribute("name", String)
                .attribute("email", String)
                .attribute("age", Integer)
                .attribute("salary", Integer)
                .attribute("awesome", Boolean)
                .attribute("born_on", Date)
                .association(Association::belongs_to("parent", "Person"))
                .association(Association::has_many("children", "Person", "parent_id"))
                .association(Association::has_many("articles", "Article", "person_id"))
                .association(Association::has_many("comments", "Comment", "person_id"))
                .association(
                    Association::has_many("notes", "Note", "notable_id").as_polymorphic("notable"),
                )
                .flag_scope("awesome_only", || {
                    Expr::column("people", "awesome").eq(Value::Bool(true))
                })
                .flag_scope("minors_or_retirees", || {
                    Expr::raw("\"people\".\"age\" < 18 OR \"people\".\"age\" > 65")
                })
                .scope("older_than", |args| {
                    Expr::column("people", "age").binary(
                        BinaryOp::Gt,
                        args.first().cloned().unwrap_or(Value::Null),
                    )
                }),
        )
        .with_entity(
            Entity::new("Article", "articles")
                .attribute("id", Integer)
                .attribute("title", String)
                .attribute("body", Text)
                .attribute("published", Boolean)
                .attribute("created_at", DateTime)
                .association(Association::belongs_to("person", "Person"))
                .association(Association::has_many("comments", "Comment", "article_id"))
                .association(
                    Association::has_many("notes", "Note", "notable_id").as_polymorphic("notable"),
                ),
        )
        .with_entity(
            Entity::new("Comment", "comments")
                .attribute("id", Integer)
                .attribute("body", Text)
                .association(Association::belongs_to("article", "Article"))
                .association(Association::belongs_to("person", "Person")),
        )
        .with_entity(
            Entity::new("Note", "notes")
                .attribute("id", Integer)
                .attribute("note", Text)
                .association(Association::polymorphic("notable")),
        )
}

pub fn shared_schema() -> Arc<dyn MetadataProvider> {
    Arc::new(schema())
}

/// A strict context over `entity`.
pub fn context(entity: &str) -> Context {
    context_with(entity, Config::default())
}

pub fn lenient(entity: &str) -> Context {
    context_with(
        entity,
        Config {
            ignore_unknown_conditions: true,
            ..Config::default()
        },
    )
}

pub fn context_with(entity: &str, config: Config) -> Context {
    Context::new(shared_schema(), entity)
        .unwrap()
        .with_config(config)
}

/// Build and compile one search over people.
pub fn people_sql(params: serde_json::Value) -> String {
    let mut ctx = context("Person");
    let search = ctx.search(&params).unwrap();
    ctx.result(&search).unwrap().to_sql()
}

/// The SQL for a search over people with a `WHERE` clause and no joins.
pub fn people_where(predicate: &str) -> String {
    format!("SELECT \"people\".* FROM \"people\" WHERE {}", predicate)
}

pub fn compile(ctx: &mut Context, params: serde_json::Value) -> SelectQuery {
    let search = ctx.search(&params).unwrap();
    ctx.result(&search).unwrap()
}
