//! Authorization of search references.
//!
//! Every attribute, association and scope a search names is checked
//! against an [`Authorizer`] before it is used. A refusal always fails
//! the search with
//! [`UnauthorizedReference`](crate::error::SearchError::UnauthorizedReference);
//! unlike unknown attributes, it is never quietly dropped.

use crate::schema::Entity;

/// Decides which parts of the metadata a search may reference.
///
/// All methods allow everything by default.
pub trait Authorizer: Send + Sync {
    fn attribute_authorized(&self, _entity: &Entity, _name: &str) -> bool {
        true
    }

    fn association_authorized(&self, _entity: &Entity, _name: &str) -> bool {
        true
    }

    fn scope_authorized(&self, _entity: &Entity, _name: &str) -> bool {
        true
    }
}

/// An [`Authorizer`] that allows every reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {}

/// An [`Authorizer`] built from explicit allow lists of
/// `(entity, name)` pairs. Anything not listed is refused.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    attributes: Vec<(String, String)>,
    associations: Vec<(String, String)>,
    scopes: Vec<(String, String)>,
}

impl AllowList {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn attribute(mut self, entity: &str, name: &str) -> Self {
        self.attributes.push((entity.to_string(), name.to_string()));
        self
    }

    pub fn association(mut self, entity: &str, name: &str) -> Self {
        self.associations.push((entity.to_string(), name.to_string()));
        self
    }

    pub fn scope(mut self, entity: &str, name: &str) -> Self {
        self.scopes.push((entity.to_string(), name.to_string()));
        self
    }
}

fn listed(list: &[(String, String)], entity: &Entity, name: &str) -> bool {
    list.iter().any(|(e, n)| e == entity.name() && n == name)
}

impl Authorizer for AllowList {
    fn attribute_authorized(&self, entity: &Entity, name: &str) -> bool {
        listed(&self.attributes, entity, name)
    }

    fn association_authorized(&self, entity: &Entity, name: &str) -> bool {
        listed(&self.associations, entity, name)
    }

    fn scope_authorized(&self, entity: &Entity, name: &str) -> bool {
        listed(&self.scopes, entity, name)
    }
}
