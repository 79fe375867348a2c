//! # Entity metadata
//!
//! A search is always relative to a base entity, and everything it can
//! reach is described by the entity metadata: the columns of each
//! table, the associations leading to other entities, and the named
//! scopes the application exposes. The [`MetadataProvider`] trait is the
//! seam through which that description is obtained; [`Schema`] is a
//! simple in-memory implementation built from [`Entity`] values.
//!
//! Metadata is shared between every search in the process, typically
//! behind an [`Arc`]. Nothing in this crate mutates it once built:
//! polymorphic associations are narrowed by taking a private copy with
//! [`Association::narrowed`] rather than by editing the shared one.
//!
//! Example:
//! ```rust
//! use ransack_query::schema::{Association, Entity, MetadataProvider, Schema};
//! use ransack_query::value::AttributeType;
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
//! assert!(schema.known_attributes("Person").contains("name"));
//! assert_eq!(schema.known_associations("Person")[0].name(), "articles");
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::sql::{Expr, SelectQuery};
use crate::value::{AttributeType, Value};

/// How many target rows an association reaches from one source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Cardinality {
    BelongsTo,
    HasOne,
    HasMany,
}

/// A named link from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    name: String,
    cardinality: Cardinality,
    target: Option<String>,
    foreign_key: String,
    foreign_type: Option<String>,
    as_name: Option<String>,
}

impl Association {
    /// A belongs-to association; the foreign key `<name>_id` lives on
    /// the owning entity.
    pub fn belongs_to(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            cardinality: Cardinality::BelongsTo,
            target: Some(target.to_string()),
            foreign_key: format!("{}_id", name),
            foreign_type: None,
            as_name: None,
        }
    }

    /// A belongs-to association whose target entity is recorded per
    /// row in the `<name>_type` column. It has no fixed target, so it
    /// can only be searched through once narrowed to a subtype.
    pub fn polymorphic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cardinality: Cardinality::BelongsTo,
            target: None,
            foreign_key: format!("{}_id", name),
            foreign_type: Some(format!("{}_type", name)),
            as_name: None,
        }
    }

    /// A has-many association; `foreign_key` lives on the target.
    pub fn has_many(name: &str, target: &str, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            cardinality: Cardinality::HasMany,
            target: Some(target.to_string()),
            foreign_key: foreign_key.to_string(),
            foreign_type: None,
            as_name: None,
        }
    }

    /// A has-one association; `foreign_key` lives on the target.
    pub fn has_one(name: &str, target: &str, foreign_key: &str) -> Self {
        Self {
            cardinality: Cardinality::HasOne,
            ..Self::has_many(name, target, foreign_key)
        }
    }

    /// Mark a has-many or has-one association as the inverse of the
    /// polymorphic belongs-to `as_name` on its target, so joins also
    /// match `<as_name>_type` against the owning entity.
    pub fn as_polymorphic(mut self, as_name: &str) -> Self {
        self.foreign_key = format!("{}_id", as_name);
        self.as_name = Some(as_name.to_string());
        self
    }

    /// Override the foreign key column.
    pub fn with_foreign_key(mut self, foreign_key: &str) -> Self {
        self.foreign_key = foreign_key.to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// The target entity, if it is fixed.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// The type discriminator column of a polymorphic belongs-to.
    pub fn foreign_type(&self) -> Option<&str> {
        self.foreign_type.as_deref()
    }

    /// The polymorphic interface name of an `as:` association.
    pub fn as_name(&self) -> Option<&str> {
        self.as_name.as_deref()
    }

    pub fn is_polymorphic(&self) -> bool {
        self.foreign_type.is_some()
    }

    /// Produce a private copy of a polymorphic association with its
    /// target fixed to `subtype`. The receiver is left untouched, which
    /// matters because it is shared by every search in the process.
    pub fn narrowed(&self, subtype: &str) -> Self {
        Self {
            target: Some(subtype.to_string()),
            ..self.clone()
        }
    }
}

/// The body of a named scope: builds a predicate from the scope's
/// arguments.
pub type ScopeFn = dyn Fn(&[Value]) -> Expr + Send + Sync;

/// A named, application-defined condition.
#[derive(Clone)]
pub struct Scope {
    name: String,
    takes_arguments: bool,
    body: Arc<ScopeFn>,
}

impl Scope {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scopes that take no arguments are toggled by a boolean-ish value
    /// when scope argument sanitising is enabled.
    pub fn takes_arguments(&self) -> bool {
        self.takes_arguments
    }

    pub fn apply(&self, args: &[Value]) -> Expr {
        (self.body)(args)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("takes_arguments", &self.takes_arguments)
            .finish()
    }
}

/// Everything a search needs to know about one entity.
#[derive(Debug, Clone)]
pub struct Entity {
    name: String,
    table: String,
    primary_key: String,
    attributes: BTreeMap<String, AttributeType>,
    associations: BTreeMap<String, Arc<Association>>,
    scopes: BTreeMap<String, Scope>,
}

impl Entity {
    /// A new entity stored in `table`, with primary key `id`.
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: "id".to_string(),
            attributes: BTreeMap::new(),
            associations: BTreeMap::new(),
            scopes: BTreeMap::new(),
        }
    }

    pub fn primary_key(mut self, column: &str) -> Self {
        self.primary_key = column.to_string();
        self
    }

    pub fn attribute(mut self, name: &str, ty: AttributeType) -> Self {
        self.attributes.insert(name.to_string(), ty);
        self
    }

    pub fn association(mut self, association: Association) -> Self {
        self.associations
            .insert(association.name.clone(), Arc::new(association));
        self
    }

    /// Add a scope that receives the supplied search value(s) as
    /// arguments.
    pub fn scope<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(&[Value]) -> Expr + Send + Sync + 'static,
    {
        self.scopes.insert(
            name.to_string(),
            Scope {
                name: name.to_string(),
                takes_arguments: true,
                body: Arc::new(body),
            },
        );
        self
    }

    /// Add a scope that takes no arguments.
    pub fn flag_scope<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn() -> Expr + Send + Sync + 'static,
    {
        self.scopes.insert(
            name.to_string(),
            Scope {
                name: name.to_string(),
                takes_arguments: false,
                body: Arc::new(move |_: &[Value]| body()),
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key_column(&self) -> &str {
        &self.primary_key
    }

    pub fn attribute_type(&self, name: &str) -> Option<AttributeType> {
        self.attributes.get(name).copied()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// The shared association called `name`.
    pub fn get_association(&self, name: &str) -> Option<&Arc<Association>> {
        self.associations.get(name)
    }

    pub fn get_scope(&self, name: &str) -> Option<&Scope> {
        self.scopes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, AttributeType)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn associations(&self) -> impl Iterator<Item = &Arc<Association>> {
        self.associations.values()
    }
}

/// Source of entity metadata.
///
/// Only [`entity`](MetadataProvider::entity) has to be implemented;
/// the remaining methods are conveniences derived from it.
pub trait MetadataProvider: Send + Sync {
    /// Look up an entity by name.
    fn entity(&self, name: &str) -> Option<Arc<Entity>>;

    /// The associations of `entity`, or nothing if it is unknown.
    fn known_associations(&self, entity: &str) -> Vec<Arc<Association>> {
        self.entity(entity)
            .map(|e| e.associations().cloned().collect())
            .unwrap_or_default()
    }

    /// The attribute names of `entity`, or nothing if it is unknown.
    fn known_attributes(&self, entity: &str) -> BTreeSet<String> {
        self.entity(entity)
            .map(|e| e.attributes().map(|(k, _)| k.to_string()).collect())
            .unwrap_or_default()
    }

    /// The unfiltered query over `entity`.
    fn default_relation(&self, entity: &str) -> Option<SelectQuery> {
        self.entity(entity).map(|e| SelectQuery::new(e.table()))
    }
}

/// An in-memory [`MetadataProvider`].
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: HashMap<String, Arc<Entity>>,
}

impl Schema {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.add_entity(entity);
        self
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities
            .insert(entity.name.clone(), Arc::new(entity));
    }
}

impl MetadataProvider for Schema {
    fn entity(&self, name: &str) -> Option<Arc<Entity>> {
        self.entities.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_copies() {
        let shared = Arc::new(Association::polymorphic("notable"));
        let narrowed = shared.narrowed("Person");
        assert_eq!(narrowed.target(), Some("Person"));
        assert_eq!(narrowed.foreign_type(), Some("notable_type"));
        assert_eq!(shared.target(), None);
    }

    #[test]
    fn as_polymorphic_keys() {
        let notes = Association::has_many("notes", "Note", "person_id").as_polymorphic("notable");
        assert_eq!(notes.foreign_key(), "notable_id");
        assert_eq!(notes.as_name(), Some("notable"));
        assert!(!notes.is_polymorphic());
    }

    #[test]
    fn provider_defaults() {
        let schema = Schema::new().with_entity(
            Entity::new("Person", "people")
                .attribute("name", AttributeType::String)
                .association(Association::belongs_to("parent", "Person")),
        );
        assert_eq!(
            schema.known_attributes("Person").into_iter().collect::<Vec<_>>(),
            vec!["name".to_string()]
        );
        assert_eq!(schema.known_associations("Person").len(), 1);
        assert!(schema.known_attributes("Nobody").is_empty());
        assert_eq!(
            schema.default_relation("Person").map(|q| q.to_sql()),
            Some("SELECT \"people\".* FROM \"people\"".to_string())
        );
    }
}
