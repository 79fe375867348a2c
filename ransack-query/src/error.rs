use thiserror::Error;

/// Errors produced while building or compiling a search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The key does not decompose into any association path ending in
    /// a known attribute.
    #[error("no attribute or association path matches '{0}'")]
    UnknownAttribute(String),
    /// The key does not end with any registered predicate name.
    #[error("no registered predicate matches '{0}'")]
    UnknownPredicate(String),
    /// An attribute, association or scope was refused by the
    /// [`Authorizer`](crate::auth::Authorizer).
    #[error("{kind} '{name}' on '{entity}' is not authorized for search")]
    UnauthorizedReference {
        kind: &'static str,
        entity: String,
        name: String,
    },
    /// A `g` or `c` key holds something other than an ordered
    /// collection of maps.
    #[error("malformed grouping under key '{0}'")]
    MalformedGrouping(String),
    /// A join kind string is not one of the recognised kinds.
    #[error("invalid join type '{0}'")]
    InvalidJoinType(String),
    /// A value could not be cast to the type of its column.
    #[error("cannot use {value} as a value for '{attribute}'")]
    InvalidValue { attribute: String, value: String },
    /// The metadata provider knows no entity by this name.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    /// The typed accessor was asked for something that is not a
    /// condition key.
    #[error("'{0}' is not a search condition")]
    UnknownCondition(String),
    /// A search was compiled by a context other than the one that
    /// built it, so its join references do not apply.
    #[error("search was built by a different context")]
    ForeignSearch,
    /// A configuration document is not valid JSON or does not have
    /// the shape of a [`Config`](crate::config::Config).
    #[error("invalid search configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
    /// A user-registered predicate failed to compile its value.
    #[error(transparent)]
    Predicate(#[from] anyhow::Error),
}

impl SearchError {
    /// Whether lenient mode may drop the offending condition instead of
    /// failing the whole search.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SearchError::UnknownAttribute(_)
                | SearchError::UnknownPredicate(_)
                | SearchError::InvalidValue { .. }
                | SearchError::UnknownCondition(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_never_recoverable() {
        let e = SearchError::UnauthorizedReference {
            kind: "attribute",
            entity: "Person".to_string(),
            name: "salary".to_string(),
        };
        assert!(!e.is_recoverable());
        assert_eq!(
            e.to_string(),
            "attribute 'salary' on 'Person' is not authorized for search"
        );
        assert!(SearchError::UnknownAttribute("foo_bar".into()).is_recoverable());
        assert!(!SearchError::MalformedGrouping("g".into()).is_recoverable());
    }
}
