//! # Join graph and association resolution
//!
//! Every association path a search mentions becomes a chain of
//! [`JoinNode`]s in a [`JoinGraph`]. The graph is an arena: nodes are
//! addressed by [`JoinId`], each node knows its parent, and insertion is
//! idempotent on the full path from the base entity. Two conditions on
//! `children_name` and `children_age` therefore share one join, while
//! `children_name` and `children_children_name` get two, the second
//! with its own alias so the self-join does not collide.
//!
//! Aliases are deterministic. The first join to reach a table uses the
//! table name itself; later ones are named `<association>_<parent>`,
//! where `<parent>` is the name the parent join is referred to by, with
//! a numeric suffix added on the rare collision.
//!
//! Resolving a path through a polymorphic association never touches
//! the shared association metadata: the node stores a private copy
//! narrowed to the requested subtype with [`Association::narrowed`].
//!
//! The graph grows while searches are built and is only read while they
//! are compiled. Compilation records which nodes it actually used, and
//! only those nodes and their ancestors are emitted by
//! [`JoinGraph::clauses`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::auth::Authorizer;
use crate::error::SearchError;
use crate::naming::{AttributePath, PathStep};
use crate::schema::{Association, Cardinality, Entity};
use crate::sql::{Expr, JoinClause, JoinKind};
use crate::value::{AttributeType, Value};

/// The address of a node in a [`JoinGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JoinId(usize);

impl JoinId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One segment of a join path key: an association name, and the
/// subtype it was narrowed to if it is polymorphic.
pub type PathSegment = (String, Option<String>);

/// A single join from a parent (the base entity, or another node) to
/// the target of an association.
#[derive(Debug, Clone)]
pub struct JoinNode {
    id: JoinId,
    parent: Option<JoinId>,
    association: Association,
    target: Arc<Entity>,
    join_kind: JoinKind,
    alias: Option<String>,
    polymorphic_subtype: Option<String>,
}

impl JoinNode {
    pub fn id(&self) -> JoinId {
        self.id
    }

    pub fn parent(&self) -> Option<JoinId> {
        self.parent
    }

    pub fn association_name(&self) -> &str {
        self.association.name()
    }

    /// This join's own copy of the association, narrowed to
    /// [`polymorphic_subtype`](Self::polymorphic_subtype) if there is
    /// one.
    pub fn association(&self) -> &Association {
        &self.association
    }

    pub fn target_entity(&self) -> &Arc<Entity> {
        &self.target
    }

    pub fn join_kind(&self) -> JoinKind {
        self.join_kind
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn polymorphic_subtype(&self) -> Option<&str> {
        self.polymorphic_subtype.as_deref()
    }

    /// The name columns of the joined table are qualified with.
    pub fn reference(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.target.table())
    }

    fn condition(&self, parent_ref: &str, parent: &Entity) -> Expr {
        let own = self.reference();
        let a = &self.association;
        match a.cardinality() {
            Cardinality::BelongsTo => {
                let mut parts = vec![Expr::column(own, self.target.primary_key_column())
                    .eq_expr(Expr::column(parent_ref, a.foreign_key()))];
                if let (Some(type_column), Some(subtype)) =
                    (a.foreign_type(), self.polymorphic_subtype.as_deref())
                {
                    parts.push(Expr::column(parent_ref, type_column).eq(subtype.into()));
                }
                Expr::and(parts)
            }
            Cardinality::HasMany | Cardinality::HasOne => {
                let mut parts = vec![Expr::column(own, a.foreign_key())
                    .eq_expr(Expr::column(parent_ref, parent.primary_key_column()))];
                if let Some(as_name) = a.as_name() {
                    parts.push(
                        Expr::column(own, &format!("{}_type", as_name))
                            .eq(Value::from(parent.name())),
                    );
                }
                Expr::and(parts)
            }
        }
    }
}

/// The joins needed by the searches built against one base entity.
#[derive(Debug, Clone)]
pub struct JoinGraph {
    base: Arc<Entity>,
    nodes: Vec<JoinNode>,
    index: HashMap<Vec<PathSegment>, JoinId>,
    keys: Vec<Vec<PathSegment>>,
    references: HashSet<String>,
}

impl JoinGraph {
    pub fn new(base: Arc<Entity>) -> Self {
        let mut references = HashSet::new();
        references.insert(base.table().to_string());
        Self {
            base,
            nodes: Vec::new(),
            index: HashMap::new(),
            keys: Vec::new(),
            references,
        }
    }

    pub fn base(&self) -> &Arc<Entity> {
        &self.base
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: JoinId) -> &JoinNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &JoinNode> {
        self.nodes.iter()
    }

    /// The name used to qualify columns reached through `join`, or the
    /// base table for `None`.
    pub fn reference(&self, join: Option<JoinId>) -> &str {
        match join {
            Some(id) => self.node(id).reference(),
            None => self.base.table(),
        }
    }

    /// Find the node for a full path, if it has been inserted.
    pub fn find(&self, path: &[PathSegment]) -> Option<JoinId> {
        self.index.get(path).copied()
    }

    /// The full path key of a node.
    pub fn path_of(&self, id: JoinId) -> &[PathSegment] {
        &self.keys[id.0]
    }

    /// Return the node for `step` under `parent`, creating it if this
    /// is the first time the path has been seen.
    pub fn insert(&mut self, parent: Option<JoinId>, step: &PathStep, join_kind: JoinKind) -> JoinId {
        let mut key = parent
            .map(|p| self.keys[p.0].clone())
            .unwrap_or_default();
        key.push((step.association.name().to_string(), step.subtype.clone()));

        if let Some(id) = self.index.get(&key) {
            return *id;
        }

        let association = match &step.subtype {
            Some(subtype) => step.association.narrowed(subtype),
            None => Association::clone(&step.association),
        };

        let table = step.target.table();
        let alias = if self.references.contains(table) {
            let stem = format!("{}_{}", association.name(), self.reference(parent));
            let mut candidate = stem.clone();
            let mut n = 2;
            while self.references.contains(&candidate) {
                candidate = format!("{}_{}", stem, n);
                n += 1;
            }
            Some(candidate)
        } else {
            None
        };
        self.references
            .insert(alias.clone().unwrap_or_else(|| table.to_string()));

        let id = JoinId(self.nodes.len());
        log::trace!(
            "join {:?} for {:?} as {:?}",
            id,
            key,
            alias.as_deref().unwrap_or(table)
        );
        self.nodes.push(JoinNode {
            id,
            parent,
            association,
            target: step.target.clone(),
            join_kind,
            alias,
            polymorphic_subtype: step.subtype.clone(),
        });
        self.index.insert(key.clone(), id);
        self.keys.push(key);
        id
    }

    /// Join instructions for `used` and all their ancestors, in the
    /// order the nodes were created.
    pub fn clauses(&self, used: &BTreeSet<JoinId>) -> Vec<JoinClause> {
        let mut needed = BTreeSet::new();
        for id in used {
            let mut current = Some(*id);
            while let Some(id) = current {
                if !needed.insert(id) {
                    break;
                }
                current = self.node(id).parent;
            }
        }
        needed
            .into_iter()
            .map(|id| {
                let node = self.node(id);
                let (parent_ref, parent_entity) = match node.parent {
                    Some(p) => (self.node(p).reference(), self.node(p).target.as_ref()),
                    None => (self.base.table(), self.base.as_ref()),
                };
                JoinClause {
                    kind: node.join_kind,
                    table: node.target.table().to_string(),
                    alias: node.alias.clone(),
                    on: node.condition(parent_ref, parent_entity),
                }
            })
            .collect()
    }
}

/// A resolved reference to an attribute: the association path leading
/// to it, its owning entity, and the join its column is read through.
#[derive(Debug, Clone)]
pub struct AttributeReference {
    association_path: Vec<String>,
    attribute_name: String,
    attribute_type: AttributeType,
    target_entity: Arc<Entity>,
    join: Option<JoinId>,
}

impl AttributeReference {
    pub fn association_path(&self) -> &[String] {
        &self.association_path
    }

    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    pub fn attribute_type(&self) -> AttributeType {
        self.attribute_type
    }

    pub fn target_entity(&self) -> &Arc<Entity> {
        &self.target_entity
    }

    /// The join the attribute is reached through; `None` for
    /// attributes of the base entity.
    pub fn join(&self) -> Option<JoinId> {
        self.join
    }

    /// The column expression, qualified by its join's alias.
    pub fn column(&self, graph: &JoinGraph) -> Expr {
        Expr::column(graph.reference(self.join), &self.attribute_name)
    }
}

/// Turns [`AttributePath`]s into [`AttributeReference`]s, checking
/// authorization and adding the joins they need to a graph.
pub struct Resolver<'g> {
    graph: &'g mut JoinGraph,
    authorizer: &'g dyn Authorizer,
    join_kind: JoinKind,
}

impl<'g> Resolver<'g> {
    pub fn new(graph: &'g mut JoinGraph, authorizer: &'g dyn Authorizer, join_kind: JoinKind) -> Self {
        Self {
            graph,
            authorizer,
            join_kind,
        }
    }

    /// Check an attribute path and materialize its joins.
    pub fn resolve(&mut self, path: &AttributePath) -> Result<AttributeReference, SearchError> {
        for step in path.steps() {
            if !self
                .authorizer
                .association_authorized(&step.owner, step.association.name())
            {
                return Err(SearchError::UnauthorizedReference {
                    kind: "association",
                    entity: step.owner.name().to_string(),
                    name: step.association.name().to_string(),
                });
            }
        }
        if !self
            .authorizer
            .attribute_authorized(path.entity(), path.attribute())
        {
            return Err(SearchError::UnauthorizedReference {
                kind: "attribute",
                entity: path.entity().name().to_string(),
                name: path.attribute().to_string(),
            });
        }
        let attribute_type = path
            .attribute_type()
            .ok_or_else(|| SearchError::UnknownAttribute(path.attribute().to_string()))?;

        let mut join = None;
        for step in path.steps() {
            join = Some(self.graph.insert(join, step, self.join_kind));
        }

        Ok(AttributeReference {
            association_path: path
                .association_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            attribute_name: path.attribute().to_string(),
            attribute_type,
            target_entity: path.entity().clone(),
            join,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, AllowList};
    use crate::naming::NameParser;
    use crate::predicates::PredicateRegistry;
    use crate::schema::{MetadataProvider, Schema};

    fn schema() -> Schema {
        Schema::new()
            .with_entity(
                Entity::new("Person", "people")
                    .attribute("name", AttributeType::String)
                    .association(Association::belongs_to("parent", "Person"))
                    .association(Association::has_many("children", "Person", "parent_id"))
                    .association(Association::has_many("articles", "Article", "person_id")),
            )
            .with_entity(
                Entity::new("Article", "articles")
                    .attribute("title", AttributeType::String)
                    .association(Association::belongs_to("person", "Person")),
            )
    }

    fn resolve(graph: &mut JoinGraph, schema: &Schema, path: &str) -> AttributeReference {
        let registry = PredicateRegistry::standard();
        let parser = NameParser::new(schema, &registry);
        let path = parser.resolve_path(graph.base(), path).unwrap();
        Resolver::new(graph, &AllowAll, JoinKind::Outer)
            .resolve(&path)
            .unwrap()
    }

    #[test]
    fn insertion_is_idempotent() {
        let schema = schema();
        let mut graph = JoinGraph::new(schema.entity("Person").unwrap());
        let a = resolve(&mut graph, &schema, "children_name");
        let b = resolve(&mut graph, &schema, "children_name");
        assert_eq!(a.join(), b.join());
        assert_eq!(graph.len(), 1);

        let c = resolve(&mut graph, &schema, "children_children_name");
        assert_ne!(a.join(), c.join());
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.node(c.join().unwrap()).parent(), a.join());
    }

    #[test]
    fn self_joins_are_aliased() {
        let schema = schema();
        let mut graph = JoinGraph::new(schema.entity("Person").unwrap());
        let children = resolve(&mut graph, &schema, "children_name");
        let grandchildren = resolve(&mut graph, &schema, "children_children_name");
        let articles = resolve(&mut graph, &schema, "articles_title");
        let authors = resolve(&mut graph, &schema, "articles_person_name");

        assert_eq!(graph.reference(children.join()), "children_people");
        assert_eq!(
            graph.reference(grandchildren.join()),
            "children_children_people"
        );
        assert_eq!(graph.reference(articles.join()), "articles");
        assert_eq!(graph.reference(authors.join()), "person_articles");

        let used: BTreeSet<JoinId> = [grandchildren.join().unwrap()].into_iter().collect();
        let sql = graph
            .clauses(&used)
            .iter()
            .map(JoinClause::to_sql)
            .collect::<Vec<_>>();
        assert_eq!(
            sql,
            vec![
                "LEFT OUTER JOIN \"people\" \"children_people\" ON \"children_people\".\"parent_id\" = \"people\".\"id\"",
                "LEFT OUTER JOIN \"people\" \"children_children_people\" ON \"children_children_people\".\"parent_id\" = \"children_people\".\"id\"",
            ]
        );
    }

    #[test]
    fn refused_association() {
        let schema = schema();
        let mut graph = JoinGraph::new(schema.entity("Person").unwrap());
        let registry = PredicateRegistry::standard();
        let parser = NameParser::new(&schema, &registry);
        let path = parser.resolve_path(graph.base(), "articles_title").unwrap();
        let policy = AllowList::new()
            .attribute("Article", "title")
            .attribute("Person", "name");
        let err = Resolver::new(&mut graph, &policy, JoinKind::Inner)
            .resolve(&path)
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::UnauthorizedReference { kind: "association", .. }
        ));
        assert!(graph.is_empty());
    }
}
