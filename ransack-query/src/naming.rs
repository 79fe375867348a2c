//! # Parsing search keys
//!
//! A search key such as `children_name_or_email_cont` packs three
//! things into one string: a trailing predicate (`cont`), an optional
//! combinator infix (`_or_` or `_and_`) separating several attribute
//! paths, and the attribute paths themselves (`children_name` and
//! `email`). An attribute path is a sequence of association names
//! followed by an attribute of the entity the last association reaches.
//!
//! Because both association and attribute names may contain
//! underscores, a path such as `parent_name` has to be decomposed
//! against the metadata: it may be the attribute `parent_name` of the
//! base entity, or the attribute `name` reached through the
//! association `parent`. When several decompositions are valid, the one
//! using the most associations wins.
//!
//! Polymorphic belongs-to associations have no fixed target, so a path
//! through one has to name the subtype to search, as in
//! `notable_of_Person_type_name`.
//!
//! Example:
//! ```rust
//! use ransack_query::naming::NameParser;
//! use ransack_query::predicates::PredicateRegistry;
//! use ransack_query::schema::{Association, Entity, MetadataProvider, Schema};
//! use ransack_query::value::AttributeType;
//!
//! let schema = Schema::new().with_entity(
//!     Entity::new("Person", "people")
//!         .attribute("name", AttributeType::String)
//!         .attribute("email", AttributeType::String)
//!         .association(Association::has_many("children", "Person", "parent_id")),
//! );
//! let registry = PredicateRegistry::standard();
//! let parser = NameParser::new(&schema, &registry);
//! let person = schema.entity("Person").unwrap();
//!
//! let parsed = parser.parse(&person, "children_name_or_email_cont").unwrap();
//! assert_eq!(parsed.predicate.name(), "cont");
//! assert_eq!(parsed.paths.len(), 2);
//! assert_eq!(parsed.paths[0].association_names(), vec!["children"]);
//! assert_eq!(parsed.paths[0].attribute(), "name");
//! assert_eq!(parsed.paths[1].attribute(), "email");
//! ```

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SearchError;
use crate::nodes::Combinator;
use crate::predicates::{PredicateRegistry, PredicateSpec};
use crate::schema::{Association, Entity, MetadataProvider};
use crate::value::AttributeType;

static INFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(or|and)_").unwrap());

/// One association traversed by an [`AttributePath`].
#[derive(Debug, Clone)]
pub struct PathStep {
    /// The entity the association is declared on.
    pub owner: Arc<Entity>,
    /// The shared association metadata. Never modified; joins narrow a
    /// private copy of it.
    pub association: Arc<Association>,
    /// The subtype named by an `_of_<Type>_type` segment.
    pub subtype: Option<String>,
    /// The entity reached.
    pub target: Arc<Entity>,
}

/// A fully decomposed attribute path.
#[derive(Debug, Clone)]
pub struct AttributePath {
    steps: Vec<PathStep>,
    attribute: String,
    entity: Arc<Entity>,
}

impl AttributePath {
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// The entity owning the attribute.
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    pub fn association_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.association.name()).collect()
    }

    pub fn attribute_type(&self) -> Option<AttributeType> {
        self.entity.attribute_type(&self.attribute)
    }
}

/// The result of parsing one search key.
#[derive(Debug, Clone)]
pub struct ParsedName {
    pub paths: Vec<AttributePath>,
    /// How the paths combine; [`Combinator::And`] for single paths.
    pub combinator: Combinator,
    pub predicate: Arc<PredicateSpec>,
}

/// Parses search keys against entity metadata and a predicate
/// registry.
pub struct NameParser<'a> {
    provider: &'a dyn MetadataProvider,
    registry: &'a PredicateRegistry,
}

impl<'a> NameParser<'a> {
    pub fn new(provider: &'a dyn MetadataProvider, registry: &'a PredicateRegistry) -> Self {
        Self { provider, registry }
    }

    /// Parse a full search key relative to `base`.
    pub fn parse(&self, base: &Arc<Entity>, key: &str) -> Result<ParsedName, SearchError> {
        let (stem, predicate) = self
            .registry
            .detect(key)
            .ok_or_else(|| SearchError::UnknownPredicate(key.to_string()))?;
        log::trace!("key '{}' has predicate '{}'", key, predicate.name());

        if let Some(path) = self.decompose(base, stem) {
            return Ok(ParsedName {
                paths: vec![path],
                combinator: Combinator::And,
                predicate: predicate.clone(),
            });
        }

        let combinator = match INFIX.captures(stem).and_then(|c| c.get(1)) {
            Some(m) if m.as_str() == "or" => Combinator::Or,
            Some(_) => Combinator::And,
            None => return Err(SearchError::UnknownAttribute(stem.to_string())),
        };
        let paths = INFIX
            .split(stem)
            .map(|part| self.resolve_path(base, part))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ParsedName {
            paths,
            combinator,
            predicate: predicate.clone(),
        })
    }

    /// Decompose a single attribute path, such as `children_name`.
    pub fn resolve_path(&self, base: &Arc<Entity>, path: &str) -> Result<AttributePath, SearchError> {
        self.decompose(base, path)
            .ok_or_else(|| SearchError::UnknownAttribute(path.to_string()))
    }

    fn decompose(&self, entity: &Arc<Entity>, rest: &str) -> Option<AttributePath> {
        let mut best = if entity.has_attribute(rest) {
            Some(AttributePath {
                steps: Vec::new(),
                attribute: rest.to_string(),
                entity: entity.clone(),
            })
        } else {
            None
        };

        for association in entity.associations() {
            let (subtype, remainder) = match split_association(association, rest) {
                Some(split) => split,
                None => continue,
            };
            let target_name = match subtype.or_else(|| association.target()) {
                Some(name) => name,
                None => continue,
            };
            let target = match self.provider.entity(target_name) {
                Some(target) => target,
                None => {
                    log::debug!(
                        "association '{}' on '{}' leads to unknown entity '{}'",
                        association.name(),
                        entity.name(),
                        target_name
                    );
                    continue;
                }
            };
            if let Some(mut path) = self.decompose(&target, remainder) {
                path.steps.insert(
                    0,
                    PathStep {
                        owner: entity.clone(),
                        association: association.clone(),
                        subtype: subtype.map(str::to_string),
                        target,
                    },
                );
                if best
                    .as_ref()
                    .map_or(true, |b| path.steps.len() > b.steps.len())
                {
                    best = Some(path);
                }
            }
        }

        best
    }
}

/// Match the leading association segment of `rest`, returning the
/// named subtype for polymorphic associations and the remainder.
fn split_association<'r>(
    association: &Association,
    rest: &'r str,
) -> Option<(Option<&'r str>, &'r str)> {
    let after = rest.strip_prefix(association.name())?.strip_prefix('_')?;
    if association.is_polymorphic() {
        let after = after.strip_prefix("of_")?;
        let end = after.find("_type_")?;
        let subtype = &after[..end];
        let remainder = &after[end + "_type_".len()..];
        if subtype.is_empty() || subtype.contains('_') || remainder.is_empty() {
            return None;
        }
        Some((Some(subtype), remainder))
    } else if after.is_empty() {
        None
    } else {
        Some((None, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn schema() -> Schema {
        Schema::new()
            .with_entity(
                Entity::new("Person", "people")
                    .attribute("name", AttributeType::String)
                    .attribute("parent_name", AttributeType::String)
                    .association(Association::belongs_to("parent", "Person"))
                    .association(Association::has_many("children", "Person", "parent_id"))
                    .association(
                        Association::has_many("notes", "Note", "notable_id").as_polymorphic("notable"),
                    ),
            )
            .with_entity(
                Entity::new("Article", "articles").attribute("title", AttributeType::String),
            )
            .with_entity(
                Entity::new("Note", "notes")
                    .attribute("note", AttributeType::Text)
                    .association(Association::polymorphic("notable")),
            )
    }

    #[test]
    fn prefers_more_associations() {
        let schema = schema();
        let registry = PredicateRegistry::standard();
        let parser = NameParser::new(&schema, &registry);
        let person = schema.entity("Person").unwrap();

        let path = parser.resolve_path(&person, "parent_name").unwrap();
        assert_eq!(path.association_names(), vec!["parent"]);
        assert_eq!(path.attribute(), "name");

        let path = parser
            .resolve_path(&person, "children_children_parent_name")
            .unwrap();
        assert_eq!(path.association_names(), vec!["children", "children", "parent"]);
    }

    #[test]
    fn polymorphic_paths_name_their_subtype() {
        let schema = schema();
        let registry = PredicateRegistry::standard();
        let parser = NameParser::new(&schema, &registry);
        let note = schema.entity("Note").unwrap();

        let path = parser
            .resolve_path(&note, "notable_of_Article_type_title")
            .unwrap();
        assert_eq!(path.steps()[0].subtype.as_deref(), Some("Article"));
        assert_eq!(path.entity().name(), "Article");
        assert_eq!(path.steps()[0].association.target(), None);

        assert!(parser.resolve_path(&note, "notable_title").is_err());
        assert!(parser
            .resolve_path(&note, "notable_of_Nobody_type_title")
            .is_err());
    }

    #[test]
    fn combinators_and_failures() {
        let schema = schema();
        let registry = PredicateRegistry::standard();
        let parser = NameParser::new(&schema, &registry);
        let person = schema.entity("Person").unwrap();

        let parsed = parser.parse(&person, "name_and_children_name_eq").unwrap();
        assert_eq!(parsed.combinator, Combinator::And);
        assert_eq!(parsed.paths.len(), 2);

        assert!(matches!(
            parser.parse(&person, "foo_bar_eq"),
            Err(SearchError::UnknownAttribute(s)) if s == "foo_bar"
        ));
        assert!(matches!(
            parser.parse(&person, "name_resembles"),
            Err(SearchError::UnknownPredicate(_))
        ));
    }
}
