//! # Search trees
//!
//! A search is held as a tree of [`Node`]s under a root [`Grouping`].
//! A [`Grouping`] combines its children with one [`Combinator`]; a
//! [`Condition`] applies one predicate to one or more attributes.
//! Sorts and scopes are held beside the tree, since they do not take
//! part in its boolean structure.
//!
//! The tree is assembled from a parameter map. Keys at each level are
//! read in the order given:
//!
//! - `m` (or `combinator`) sets the level's combinator; `"or"` in any
//!   case means `OR`, anything else `AND`.
//! - `g` (or `groupings`) holds nested groupings, as an array of maps or
//!   as a map from indices to maps, which is read in numeric index
//!   order.
//! - `c` (or `conditions`) holds conditions in the indexed form, each a
//!   map with attribute names under `a`, a predicate name under `p`,
//!   values under `v` and a combinator for the attributes under `m`.
//! - at the top level only, `s` (or `sorts`) holds sort expressions, and
//!   a key naming a scope of the base entity applies that scope.
//! - any other key is a condition key such as `children_name_cont`.
//!
//! Blank values are dropped as the tree is built, and groupings left
//! empty are dropped with them, so an all-blank search builds an empty
//! root.
//!
//! Example:
//! ```rust
//! use std::sync::Arc;
//! use ransack_query::context::Context;
//! use ransack_query::nodes::Combinator;
//! use ransack_query::schema::{Entity, Schema};
//! use ransack_query::value::AttributeType;
//! use serde_json::json;
//!
//! let schema = Schema::new().with_entity(
//!     Entity::new("Person", "people").attribute("name", AttributeType::String),
//! );
//! let mut ctx = Context::new(Arc::new(schema), "Person").unwrap();
//! let search = ctx
//!     .search(&json!({"name_eq": "", "g": [{"m": "or", "name_eq": "Ernie", "name_cont": "Bert"}]}))
//!     .unwrap();
//! let nested = search.base().groupings().next().unwrap();
//! assert_eq!(nested.combinator(), Combinator::Or);
//! assert_eq!(nested.len(), 2);
//! assert_eq!(search.base().conditions().count(), 0);
//! ```

use std::sync::Arc;

use serde_json::{Map, Value as Json};

use crate::auth::Authorizer;
use crate::config::Config;
use crate::error::SearchError;
use crate::joins::{AttributeReference, Resolver};
use crate::naming::NameParser;
use crate::predicates::{Arity, PredicateRegistry, PredicateSpec};
use crate::schema::{Entity, Scope};
use crate::sql::{Direction, Expr};
use crate::value::Value;
use crate::visitor::Visitor;

/// How siblings, or the attributes of one condition, are combined.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Combinator {
    And,
    Or,
}

impl Default for Combinator {
    fn default() -> Self {
        Combinator::And
    }
}

impl Combinator {
    /// Read a combinator; `"or"` in any case is [`Combinator::Or`],
    /// anything else [`Combinator::And`].
    pub fn parse(s: &str) -> Self {
        s.trim().to_ascii_lowercase().parse().unwrap_or_default()
    }

    /// Combine expressions with this combinator.
    pub fn combine(self, exprs: Vec<Expr>) -> Expr {
        match self {
            Combinator::And => Expr::and(exprs),
            Combinator::Or => Expr::or(exprs),
        }
    }
}

/// One predicate applied to one or more attributes.
#[derive(Debug, Clone)]
pub struct Condition {
    key: String,
    attributes: Vec<AttributeReference>,
    predicate: Arc<PredicateSpec>,
    value: Value,
    combinator: Combinator,
}

impl Condition {
    pub fn new(
        key: &str,
        attributes: Vec<AttributeReference>,
        predicate: Arc<PredicateSpec>,
        value: Value,
        combinator: Combinator,
    ) -> Self {
        Self {
            key: key.to_string(),
            attributes,
            predicate,
            value,
            combinator,
        }
    }

    /// The key the condition was built from.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn attributes(&self) -> &[AttributeReference] {
        &self.attributes
    }

    pub fn predicate(&self) -> &Arc<PredicateSpec> {
        &self.predicate
    }

    /// The value as supplied, before casting.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// How the per-attribute predicates are combined.
    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    /// Pair each attribute with its value, cast to the attribute's
    /// type.
    ///
    /// A single-valued predicate given an array with exactly one
    /// element per attribute takes the elements positionally; in every
    /// other case the whole value is given to each attribute. A
    /// single-valued predicate given any other array uses its first
    /// element.
    pub fn operands(&self) -> Result<Vec<(&AttributeReference, Value)>, SearchError> {
        let arity = self.predicate.arity();
        let zipped = match &self.value {
            Value::Array(items)
                if arity == Arity::Single
                    && self.attributes.len() > 1
                    && items.len() == self.attributes.len() =>
            {
                Some(items)
            }
            _ => None,
        };
        self.attributes
            .iter()
            .enumerate()
            .map(|(i, attribute)| {
                let raw = zipped.map_or(&self.value, |items| &items[i]);
                self.cast(attribute, raw).map(|value| (attribute, value))
            })
            .collect()
    }

    fn cast(&self, attribute: &AttributeReference, raw: &Value) -> Result<Value, SearchError> {
        let ty = self
            .predicate
            .value_type()
            .unwrap_or_else(|| attribute.attribute_type());
        let name = attribute.attribute_name();
        match self.predicate.arity() {
            Arity::None => Ok(raw.clone()),
            Arity::Single => match raw {
                Value::Array(items) => items.first().map_or(Ok(Value::Null), |v| v.cast(ty, name)),
                scalar => scalar.cast(ty, name),
            },
            Arity::Array => Value::Array(raw.to_list()).cast(ty, name),
        }
    }
}

/// A sort on one attribute.
#[derive(Debug, Clone)]
pub struct Sort {
    attribute: AttributeReference,
    direction: Direction,
}

impl Sort {
    pub fn new(attribute: AttributeReference, direction: Direction) -> Self {
        Self {
            attribute,
            direction,
        }
    }

    pub fn attribute(&self) -> &AttributeReference {
        &self.attribute
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// A scope of the base entity, with the arguments it was given.
#[derive(Debug, Clone)]
pub struct ScopeCall {
    scope: Scope,
    args: Vec<Value>,
}

impl ScopeCall {
    pub fn name(&self) -> &str {
        self.scope.name()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn apply(&self) -> Expr {
        self.scope.apply(&self.args)
    }
}

/// A node of the search tree.
#[derive(Debug, Clone)]
pub enum Node {
    Condition(Condition),
    Grouping(Grouping),
}

impl Node {
    pub fn accept<V: Visitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Node::Condition(c) => visitor.visit_condition(c),
            Node::Grouping(g) => visitor.visit_grouping(g),
        }
    }
}

/// A list of nodes combined with one combinator.
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    combinator: Combinator,
    children: Vec<Node>,
}

impl Grouping {
    pub fn new(combinator: Combinator) -> Self {
        Self {
            combinator,
            children: Vec::new(),
        }
    }

    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn push(&mut self, node: Node) {
        self.children.push(node);
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// The conditions directly under this grouping.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.children.iter().filter_map(|n| match n {
            Node::Condition(c) => Some(c),
            Node::Grouping(_) => None,
        })
    }

    /// The groupings directly under this grouping.
    pub fn groupings(&self) -> impl Iterator<Item = &Grouping> {
        self.children.iter().filter_map(|n| match n {
            Node::Grouping(g) => Some(g),
            Node::Condition(_) => None,
        })
    }

    pub fn accept<V: Visitor>(&self, visitor: &mut V) -> V::Output {
        visitor.visit_grouping(self)
    }
}

/// Everything assembled from one parameter map.
#[derive(Debug, Default)]
pub(crate) struct Assembled {
    pub base: Grouping,
    pub scopes: Vec<ScopeCall>,
    pub sorts: Vec<Sort>,
}

/// Assembles the search tree from a parameter map, resolving every
/// attribute it mentions as it goes.
pub(crate) struct Builder<'a> {
    parser: NameParser<'a>,
    registry: &'a PredicateRegistry,
    resolver: Resolver<'a>,
    authorizer: &'a dyn Authorizer,
    base: &'a Arc<Entity>,
    config: &'a Config,
}

impl<'a> Builder<'a> {
    pub fn new(
        parser: NameParser<'a>,
        registry: &'a PredicateRegistry,
        resolver: Resolver<'a>,
        authorizer: &'a dyn Authorizer,
        base: &'a Arc<Entity>,
        config: &'a Config,
    ) -> Self {
        Self {
            parser,
            registry,
            resolver,
            authorizer,
            base,
            config,
        }
    }

    pub fn build(mut self, params: &Json) -> Result<Assembled, SearchError> {
        let mut assembled = Assembled::default();
        match params {
            Json::Null => {}
            Json::Object(map) => {
                assembled.base = self.level(map, Some(&mut assembled.scopes), &mut assembled.sorts)?;
            }
            _ => return Err(SearchError::MalformedGrouping("params".to_string())),
        }
        Ok(assembled)
    }

    fn level(
        &mut self,
        map: &Map<String, Json>,
        mut scopes: Option<&mut Vec<ScopeCall>>,
        sorts: &mut Vec<Sort>,
    ) -> Result<Grouping, SearchError> {
        let root = scopes.is_some();
        let combinator = map
            .get("m")
            .or_else(|| map.get("combinator"))
            .and_then(Json::as_str)
            .map(Combinator::parse)
            .unwrap_or_default();
        let mut grouping = Grouping::new(combinator);

        for (key, value) in map {
            match key.as_str() {
                "m" | "combinator" => {}
                "g" | "groupings" => {
                    for sub in ordered_maps(key, value)? {
                        let nested = self.level(sub, None, sorts)?;
                        if nested.is_empty() {
                            log::trace!("dropping empty grouping under '{}'", key);
                        } else {
                            grouping.push(Node::Grouping(nested));
                        }
                    }
                }
                "c" | "conditions" => {
                    for entry in ordered_maps(key, value)? {
                        let condition = self.indexed_condition(entry);
                        if let Some(c) = self.tolerate(key, condition)? {
                            grouping.push(Node::Condition(c));
                        }
                    }
                }
                "s" | "sorts" if root => self.sorts(key, value, sorts)?,
                _ => {
                    if let (Some(scopes), Some(scope)) = (scopes.as_deref_mut(), self.base.get_scope(key)) {
                        let call = self.scope(scope, value);
                        if let Some(call) = self.tolerate(key, call)? {
                            scopes.push(call);
                        }
                        continue;
                    }
                    let condition = self.condition(key, value);
                    if let Some(c) = self.tolerate(key, condition)? {
                        grouping.push(Node::Condition(c));
                    }
                }
            }
        }

        Ok(grouping)
    }

    fn tolerate<T>(
        &self,
        key: &str,
        result: Result<Option<T>, SearchError>,
    ) -> Result<Option<T>, SearchError> {
        match result {
            Err(e) if self.config.ignore_unknown_conditions && e.is_recoverable() => {
                log::debug!("ignoring '{}': {}", key, e);
                Ok(None)
            }
            other => other,
        }
    }

    /// Convert a raw value, returning `None` if it is blank.
    fn prepare(&self, key: &str, json: &Json) -> Result<Option<Value>, SearchError> {
        let value = Value::from_json(json).ok_or_else(|| SearchError::InvalidValue {
            attribute: key.to_string(),
            value: json.to_string(),
        })?;
        let value = if self.config.strip_whitespace {
            value.stripped()
        } else {
            value
        };
        let value = value.without_blank_elements();
        if value.is_blank() {
            log::trace!("'{}' is blank", key);
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    fn condition(&mut self, key: &str, json: &Json) -> Result<Option<Condition>, SearchError> {
        let value = match self.prepare(key, json)? {
            Some(value) => value,
            None => return Ok(None),
        };
        let parsed = self.parser.parse(self.base, key)?;
        let attributes = parsed
            .paths
            .iter()
            .map(|path| self.resolver.resolve(path))
            .collect::<Result<Vec<_>, _>>()?;
        let condition = Condition::new(key, attributes, parsed.predicate, value, parsed.combinator);
        condition.operands()?;
        log::trace!("condition '{}' => {:?}", key, condition.value());
        Ok(Some(condition))
    }

    fn indexed_condition(&mut self, entry: &Map<String, Json>) -> Result<Option<Condition>, SearchError> {
        let field = |short: &str, long: &str| entry.get(short).or_else(|| entry.get(long));

        let names = match field("a", "attributes") {
            Some(a) => ordered_values(a)
                .into_iter()
                .filter_map(|item| match item {
                    Json::String(s) => Some(s.trim().to_string()),
                    Json::Object(m) => m.get("name").and_then(Json::as_str).map(|s| s.trim().to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>(),
            None => Vec::new(),
        };
        let predicate_name = field("p", "predicate")
            .and_then(Json::as_str)
            .map(str::trim)
            .unwrap_or_default();
        let values = match field("v", "values") {
            Some(v) => ordered_values(v)
                .into_iter()
                .map(|item| match item {
                    Json::Object(m) => m.get("value").cloned().unwrap_or(Json::Null),
                    other => other.clone(),
                })
                .collect::<Vec<_>>(),
            None => Vec::new(),
        };
        let combinator = field("m", "combinator")
            .and_then(Json::as_str)
            .map(Combinator::parse)
            .unwrap_or(Combinator::Or);

        if names.is_empty() || predicate_name.is_empty() {
            log::trace!("dropping incomplete indexed condition {:?}", entry);
            return Ok(None);
        }
        let separator = format!("_{}_", combinator);
        let key = format!("{}_{}", names.join(separator.as_str()), predicate_name);
        let raw = if values.len() == 1 {
            values[0].clone()
        } else {
            Json::Array(values)
        };
        let value = match self.prepare(&key, &raw)? {
            Some(value) => value,
            None => return Ok(None),
        };
        let predicate = self
            .registry
            .get(predicate_name)
            .cloned()
            .ok_or_else(|| SearchError::UnknownPredicate(predicate_name.to_string()))?;

        let mut attributes = Vec::with_capacity(names.len());
        for name in &names {
            let path = self.parser.resolve_path(self.base, name)?;
            attributes.push(self.resolver.resolve(&path)?);
        }
        let condition = Condition::new(&key, attributes, predicate, value, combinator);
        condition.operands()?;
        Ok(Some(condition))
    }

    fn scope(&self, scope: &Scope, json: &Json) -> Result<Option<ScopeCall>, SearchError> {
        if !self.authorizer.scope_authorized(self.base, scope.name()) {
            return Err(SearchError::UnauthorizedReference {
                kind: "scope",
                entity: self.base.name().to_string(),
                name: scope.name().to_string(),
            });
        }
        let value = match self.prepare(scope.name(), json)? {
            Some(value) => value,
            None => return Ok(None),
        };
        let args = if scope.takes_arguments() || !self.config.sanitize_scope_args {
            value.to_list()
        } else if value.as_flag() == Some(false) {
            log::debug!("scope '{}' switched off", scope.name());
            return Ok(None);
        } else {
            Vec::new()
        };
        Ok(Some(ScopeCall {
            scope: scope.clone(),
            args,
        }))
    }

    fn sorts(&mut self, key: &str, json: &Json, sorts: &mut Vec<Sort>) -> Result<(), SearchError> {
        let malformed = || SearchError::MalformedGrouping(key.to_string());
        let items = match json {
            Json::Object(m) if !m.contains_key("name") => indexed(m).ok_or_else(malformed)?,
            Json::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let mut entries: Vec<(String, Option<String>)> = Vec::new();
        for item in items {
            match item {
                Json::String(s) => {
                    entries.extend(s.split(',').map(|part| (part.trim().to_string(), None)));
                }
                Json::Object(m) => {
                    let name = m.get("name").and_then(Json::as_str).unwrap_or_default();
                    let dir = m.get("dir").and_then(Json::as_str).map(str::to_string);
                    entries.push((name.trim().to_string(), dir));
                }
                Json::Null => {}
                _ => return Err(malformed()),
            }
        }

        for (text, dir) in entries {
            let sort = self.sort(&text, dir.as_deref());
            if let Some(sort) = self.tolerate(&text, sort)? {
                sorts.push(sort);
            }
        }
        Ok(())
    }

    fn sort(&mut self, text: &str, dir: Option<&str>) -> Result<Option<Sort>, SearchError> {
        let mut words = text.split_whitespace();
        let path = match words.next() {
            Some(path) => path,
            None => return Ok(None),
        };
        let direction = match dir.or_else(|| words.next()) {
            Some(d) => d.trim().to_ascii_lowercase().parse().unwrap_or_else(|_| {
                log::debug!("unknown sort direction '{}' for '{}'", d, path);
                Direction::Asc
            }),
            None => Direction::Asc,
        };
        let path = self.parser.resolve_path(self.base, path)?;
        let attribute = self.resolver.resolve(&path)?;
        Ok(Some(Sort::new(attribute, direction)))
    }
}

fn indexed(map: &Map<String, Json>) -> Option<Vec<&Json>> {
    let mut entries = map
        .iter()
        .map(|(k, v)| k.trim().parse::<u64>().ok().map(|i| (i, v)))
        .collect::<Option<Vec<_>>>()?;
    entries.sort_by_key(|(i, _)| *i);
    Some(entries.into_iter().map(|(_, v)| v).collect())
}

/// Read `g` or `c` as an ordered sequence of maps.
fn ordered_maps<'j>(key: &str, json: &'j Json) -> Result<Vec<&'j Map<String, Json>>, SearchError> {
    let malformed = || SearchError::MalformedGrouping(key.to_string());
    let items = match json {
        Json::Null => Vec::new(),
        Json::Array(items) => items.iter().collect(),
        Json::Object(map) => indexed(map).ok_or_else(malformed)?,
        _ => return Err(malformed()),
    };
    items
        .into_iter()
        .map(|item| item.as_object().ok_or_else(malformed))
        .collect()
}

/// Read a list that may be an array, an indexed map, or a lone item.
fn ordered_values(json: &Json) -> Vec<&Json> {
    match json {
        Json::Null => Vec::new(),
        Json::Array(items) => items.iter().collect(),
        Json::Object(map) => indexed(map).unwrap_or_else(|| vec![json]),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combinator_parsing() {
        assert_eq!(Combinator::parse("OR"), Combinator::Or);
        assert_eq!(Combinator::parse(" or "), Combinator::Or);
        assert_eq!(Combinator::parse("and"), Combinator::And);
        assert_eq!(Combinator::parse("xor"), Combinator::And);
        assert_eq!(Combinator::Or.to_string(), "or");
    }

    #[test]
    fn ordered_forms_agree() {
        let array = serde_json::json!([{"a": 1}, {"b": 2}]);
        let hash = serde_json::json!({"10": {"b": 2}, "2": {"a": 1}});
        let from_array = ordered_maps("g", &array).unwrap();
        let from_hash = ordered_maps("g", &hash).unwrap();
        assert_eq!(from_array, from_hash);

        assert!(matches!(
            ordered_maps("g", &serde_json::json!("nope")),
            Err(SearchError::MalformedGrouping(k)) if k == "g"
        ));
        assert!(matches!(
            ordered_maps("c", &serde_json::json!({"x": {"a": 1}})),
            Err(SearchError::MalformedGrouping(_))
        ));
        assert!(matches!(
            ordered_maps("g", &serde_json::json!([1, 2])),
            Err(SearchError::MalformedGrouping(_))
        ));
    }
}
