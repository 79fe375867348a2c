//! # Compile search parameters into SQL
//!
//! Search forms and query strings often describe a search as a map of
//! keys like `name_eq`, `children_name_cont` or
//! `notable_of_Person_type_name_start`: an attribute path through the
//! associations of some base entity, followed by a predicate. This crate
//! turns such a map into the pieces of a relational query: a `WHERE`
//! predicate, the joins it needs, `ORDER BY` expressions, and if the
//! query is distinct, the select expressions its orderings require.
//!
//! The main pieces are:
//! - [`schema`], the description of entities, their attributes,
//!   associations and scopes, reached through
//!   [`MetadataProvider`](schema::MetadataProvider).
//! - [`predicates`], the registry of predicate suffixes like `eq` and
//!   `cont`, which can be extended at start up.
//! - [`naming`], which splits a key into attribute paths and a
//!   predicate.
//! - [`joins`], which turns attribute paths into joins, reusing and
//!   aliasing them as needed.
//! - [`nodes`], the search tree of groupings, conditions and sorts.
//! - [`visitor`], which compiles that tree into [`sql::Expr`].
//! - [`distinct`], which makes orderings valid for `SELECT DISTINCT`.
//! - [`context`], which ties these together.
//!
//! Example:
//! ```rust
//! use std::sync::Arc;
//! use ransack_query::{Association, AttributeType, Context, Entity, Schema};
//! use serde_json::json;
//!
//! let schema = Schema::new().with_entity(
//!     Entity::new("Person", "people")
//!         .attribute("name", AttributeType::String)
//!         .association(Association::has_many("children", "Person", "parent_id")),
//! );
//!
//! let mut ctx = Context::new(Arc::new(schema), "Person").unwrap();
//! let search = ctx
//!     .search(&json!({
//!         "name_eq": "Ernie",
//!         "g": [{"m": "or", "name_eq": "Ernie", "children_name_eq": "Ernie"}]
//!     }))
//!     .unwrap();
//! assert_eq!(
//!     ctx.result(&search).unwrap().to_sql(),
//!     "SELECT \"people\".* FROM \"people\" \
//!      LEFT OUTER JOIN \"people\" \"children_people\" ON \"children_people\".\"parent_id\" = \"people\".\"id\" \
//!      WHERE \"people\".\"name\" = 'Ernie' \
//!      AND (\"people\".\"name\" = 'Ernie' OR \"children_people\".\"name\" = 'Ernie')"
//! );
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod distinct;
pub mod error;
pub mod joins;
pub mod naming;
pub mod nodes;
pub mod predicates;
pub mod schema;
pub mod sql;
pub mod value;
pub mod visitor;

pub use crate::auth::{AllowAll, AllowList, Authorizer};
pub use crate::config::Config;
pub use crate::context::{Context, Search};
pub use crate::error::SearchError;
pub use crate::nodes::Combinator;
pub use crate::predicates::{Arity, PredicateSpec};
pub use crate::schema::{Association, Entity, MetadataProvider, Schema};
pub use crate::sql::{Direction, Expr, JoinKind, OrderExpr, Relation, SelectQuery};
pub use crate::value::{AttributeType, Value};
