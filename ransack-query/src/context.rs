//! # Search contexts
//!
//! A [`Context`] holds everything needed to build and compile searches
//! over one base entity: the metadata, the predicate registry, the
//! authorization policy, the configuration, and the [`JoinGraph`] the
//! searches add their joins to.
//!
//! Each context owns its join graph, so a fresh context per search
//! gives every search its own joins. Building several searches in one
//! context shares the graph between them, so that a path used by more
//! than one of them is joined once, under the same alias.
//!
//! Example:
//! ```rust
//! use std::sync::Arc;
//! use ransack_query::context::Context;
//! use ransack_query::schema::{Association, Entity, Schema};
//! use ransack_query::value::AttributeType;
//! use serde_json::json;
//!
//! let schema = Schema::new()
//!     .with_entity(
//!         Entity::new("Person", "people")
//!             .attribute("name", AttributeType::String)
//!             .association(Association::has_many("articles", "Article", "person_id")),
//!     )
//!     .with_entity(
//!         Entity::new("Article", "articles")
//!             .attribute("title", AttributeType::String)
//!             .attribute("person_id", AttributeType::Integer),
//!     );
//!
//! let mut ctx = Context::new(Arc::new(schema), "Person").unwrap();
//! let search = ctx
//!     .search(&json!({"name_or_articles_title_cont": "Rust", "s": "name desc"}))
//!     .unwrap();
//! assert_eq!(
//!     ctx.result(&search).unwrap().to_sql(),
//!     "SELECT \"people\".* FROM \"people\" \
//!      LEFT OUTER JOIN \"articles\" ON \"articles\".\"person_id\" = \"people\".\"id\" \
//!      WHERE \"people\".\"name\" LIKE '%Rust%' OR \"articles\".\"title\" LIKE '%Rust%' \
//!      ORDER BY \"people\".\"name\" DESC"
//! );
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::auth::{AllowAll, Authorizer};
use crate::config::{self, Config};
use crate::distinct;
use crate::error::SearchError;
use crate::joins::{JoinGraph, Resolver};
use crate::naming::NameParser;
use crate::nodes::{Builder, Condition, Grouping, ScopeCall, Sort};
use crate::predicates::{self, PredicateRegistry};
use crate::schema::{Entity, MetadataProvider};
use crate::sql::{Relation, SelectQuery};
use crate::value::Value;
use crate::visitor::Compiler;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// The state shared by the searches built over one base entity.
pub struct Context {
    id: u64,
    provider: Arc<dyn MetadataProvider>,
    base: Arc<Entity>,
    config: Config,
    registry: Arc<PredicateRegistry>,
    authorizer: Arc<dyn Authorizer>,
    graph: JoinGraph,
}

impl Context {
    /// A context over `entity`, using the process-wide configuration
    /// and predicate registry as they stand now, and allowing every
    /// reference.
    pub fn new(provider: Arc<dyn MetadataProvider>, entity: &str) -> Result<Self, SearchError> {
        let base = provider
            .entity(entity)
            .ok_or_else(|| SearchError::UnknownEntity(entity.to_string()))?;
        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            provider,
            graph: JoinGraph::new(base.clone()),
            base,
            config: config::global(),
            registry: predicates::registry(),
            authorizer: Arc::new(AllowAll),
        })
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_authorizer<A: Authorizer + 'static>(mut self, authorizer: A) -> Self {
        self.authorizer = Arc::new(authorizer);
        self
    }

    pub fn with_registry(mut self, registry: Arc<PredicateRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn base(&self) -> &Arc<Entity> {
        &self.base
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PredicateRegistry> {
        &self.registry
    }

    /// The joins created by the searches built so far.
    pub fn join_graph(&self) -> &JoinGraph {
        &self.graph
    }

    /// Build a search from a parameter map.
    pub fn search(&mut self, params: &serde_json::Value) -> Result<Search, SearchError> {
        let parser = NameParser::new(self.provider.as_ref(), &self.registry);
        let resolver = Resolver::new(&mut self.graph, self.authorizer.as_ref(), self.config.join_type);
        let assembled = Builder::new(
            parser,
            &self.registry,
            resolver,
            self.authorizer.as_ref(),
            &self.base,
            &self.config,
        )
        .build(params)?;
        log::debug!(
            "built search on '{}' with {} top level node(s), {} sort(s), {} scope(s)",
            self.base.name(),
            assembled.base.len(),
            assembled.sorts.len(),
            assembled.scopes.len()
        );
        Ok(Search {
            context: self.id,
            registry: self.registry.clone(),
            base: assembled.base,
            scopes: assembled.scopes,
            sorts: assembled.sorts,
            distinct: false,
        })
    }

    /// Compile `search` onto the default relation of the base entity.
    pub fn result(&self, search: &Search) -> Result<SelectQuery, SearchError> {
        let mut relation = self
            .provider
            .default_relation(self.base.name())
            .ok_or_else(|| SearchError::UnknownEntity(self.base.name().to_string()))?;
        self.apply(search, &mut relation)?;
        Ok(relation)
    }

    /// Compile `search` onto `relation`.
    pub fn apply<R: Relation + ?Sized>(&self, search: &Search, relation: &mut R) -> Result<(), SearchError> {
        if search.context != self.id {
            return Err(SearchError::ForeignSearch);
        }

        let mut compiler = Compiler::new(&self.graph);
        let predicate = search.base.accept(&mut compiler)?;
        let scopes = search
            .scopes
            .iter()
            .map(|call| compiler.scope(call))
            .collect::<Vec<_>>();
        let orders = search
            .sorts
            .iter()
            .map(|sort| compiler.sort(sort))
            .collect::<Vec<_>>();

        for join in self.graph.clauses(compiler.used_joins()) {
            relation.joins(join);
        }
        if let Some(predicate) = predicate {
            relation.where_clause(predicate);
        }
        for scope in scopes {
            relation.where_clause(scope);
        }
        for order in orders {
            relation.order(order);
        }
        if search.distinct {
            relation.distinct(true);
        }
        distinct::rewrite(relation);
        Ok(())
    }
}

/// A search built by a [`Context`].
#[derive(Debug, Clone)]
pub struct Search {
    context: u64,
    registry: Arc<PredicateRegistry>,
    base: Grouping,
    scopes: Vec<ScopeCall>,
    sorts: Vec<Sort>,
    distinct: bool,
}

impl Search {
    /// The root grouping.
    pub fn base(&self) -> &Grouping {
        &self.base
    }

    pub fn sorts(&self) -> &[Sort] {
        &self.sorts
    }

    pub fn scopes(&self) -> &[ScopeCall] {
        &self.scopes
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Ask for `SELECT DISTINCT` when the search is compiled.
    pub fn set_distinct(&mut self, distinct: bool) {
        self.distinct = distinct;
    }

    /// Whether the search constrains nothing.
    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.scopes.is_empty()
    }

    /// The value given for a top level condition key, such as
    /// `"name_eq"`.
    ///
    /// Returns `Ok(None)` for a well formed key that was not given, or
    /// was dropped as blank, and
    /// [`UnknownPredicate`](SearchError::UnknownPredicate) for a key
    /// with no predicate suffix.
    pub fn value(&self, key: &str) -> Result<Option<&Value>, SearchError> {
        if self.registry.detect(key).is_none() {
            return Err(SearchError::UnknownPredicate(key.to_string()));
        }
        Ok(self.condition(key).ok().map(Condition::value))
    }

    /// The top level condition built from `key`.
    pub fn condition(&self, key: &str) -> Result<&Condition, SearchError> {
        self.base
            .conditions()
            .find(|c| c.key() == key)
            .ok_or_else(|| SearchError::UnknownCondition(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::value::AttributeType;
    use serde_json::json;

    fn context() -> Context {
        let schema = Schema::new().with_entity(
            Entity::new("Person", "people")
                .attribute("name", AttributeType::String)
                .attribute("age", AttributeType::Integer),
        );
        Context::new(Arc::new(schema), "Person").unwrap()
    }

    #[test]
    fn unknown_entity() {
        assert!(matches!(
            Context::new(Arc::new(Schema::new()), "Person"),
            Err(SearchError::UnknownEntity(e)) if e == "Person"
        ));
    }

    #[test]
    fn typed_accessor() {
        let mut ctx = context();
        let search = ctx.search(&json!({"name_eq": "Ernie", "age_gt": ""})).unwrap();
        assert_eq!(search.value("name_eq").unwrap(), Some(&Value::from("Ernie")));
        assert_eq!(search.value("age_gt").unwrap(), None);
        assert!(matches!(
            search.value("name_like"),
            Err(SearchError::UnknownPredicate(_))
        ));
        assert_eq!(search.condition("name_eq").unwrap().attributes().len(), 1);
        assert!(matches!(
            search.condition("age_gt"),
            Err(SearchError::UnknownCondition(k)) if k == "age_gt"
        ));
    }

    #[test]
    fn searches_belong_to_their_context() {
        let mut ctx = context();
        let other = context();
        let search = ctx.search(&json!({"age_lt": 40})).unwrap();
        assert!(matches!(other.result(&search), Err(SearchError::ForeignSearch)));
        assert_eq!(
            ctx.result(&search).unwrap().to_sql(),
            "SELECT \"people\".* FROM \"people\" WHERE \"people\".\"age\" < 40"
        );
    }

    #[test]
    fn malformed_params() {
        let mut ctx = context();
        assert!(matches!(
            ctx.search(&json!(["name_eq"])),
            Err(SearchError::MalformedGrouping(_))
        ));
        assert!(ctx.search(&serde_json::Value::Null).unwrap().is_empty());
    }
}
