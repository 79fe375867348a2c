//! Search configuration.
//!
//! A [`Config`] can be given to each [`Context`](crate::context::Context)
//! explicitly; otherwise the context takes a copy of the process-wide
//! configuration, which is changed with [`configure`]. Since a context
//! copies its configuration when created, a single search never sees
//! a mixture of policies.
//!
//! Example:
//! ```rust
//! use ransack_query::config::Config;
//! use ransack_query::sql::JoinKind;
//!
//! let config = Config::from_json(r#"{"ignore_unknown_conditions": true, "join_type": "inner"}"#).unwrap();
//! assert!(config.ignore_unknown_conditions);
//! assert_eq!(config.join_type, JoinKind::Inner);
//! ```

use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::error::SearchError;
use crate::sql::JoinKind;

/// Options governing how searches are built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Drop conditions naming unknown attributes or predicates instead
    /// of failing the search.
    pub ignore_unknown_conditions: bool,
    /// The kind of join used to reach associations.
    pub join_type: JoinKind,
    /// Trim whitespace from string values before use.
    pub strip_whitespace: bool,
    /// Treat boolean-ish values given to argument-less scopes as
    /// on/off switches.
    pub sanitize_scope_args: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_unknown_conditions: false,
            join_type: JoinKind::Outer,
            strip_whitespace: true,
            sanitize_scope_args: true,
        }
    }
}

impl Config {
    /// Read a configuration from JSON. Missing keys take their
    /// defaults; an unrecognised join type is reported as
    /// [`SearchError::InvalidJoinType`] and anything else wrong with the
    /// document as [`SearchError::InvalidConfig`].
    pub fn from_json(json: &str) -> Result<Self, SearchError> {
        let raw: serde_json::Value = serde_json::from_str(json)?;
        if let Some(kind) = raw.get("join_type").and_then(|v| v.as_str()) {
            JoinKind::parse(kind)?;
        }
        Ok(serde_json::from_value(raw)?)
    }

    /// Set the join type from its name.
    pub fn set_join_type(&mut self, kind: &str) -> Result<(), SearchError> {
        self.join_type = JoinKind::parse(kind)?;
        Ok(())
    }
}

static GLOBAL: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

/// A copy of the process-wide configuration.
pub fn global() -> Config {
    GLOBAL
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Change the process-wide configuration. Contexts already created
/// keep the configuration they copied.
pub fn configure<F: FnOnce(&mut Config)>(f: F) {
    let mut guard = GLOBAL
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard);
    log::debug!("search configuration is now {:?}", *guard);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_strict() {
        let c = Config::default();
        assert!(!c.ignore_unknown_conditions);
        assert_eq!(c.join_type, JoinKind::Outer);
        assert!(c.strip_whitespace);
    }

    #[test]
    fn bad_join_type() {
        assert!(matches!(
            Config::from_json(r#"{"join_type": "sideways"}"#),
            Err(SearchError::InvalidJoinType(s)) if s == "sideways"
        ));
        let mut c = Config::default();
        assert!(c.set_join_type("INNER").is_ok());
        assert_eq!(c.join_type, JoinKind::Inner);
    }

    #[test]
    fn malformed_documents() {
        assert!(matches!(
            Config::from_json("{\"join_type\": "),
            Err(SearchError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"strip_whitespace": "sometimes"}"#),
            Err(SearchError::InvalidConfig(_))
        ));
        assert!(!SearchError::InvalidConfig(serde_json::from_str::<Config>("[").unwrap_err())
            .is_recoverable());
    }

    #[test]
    fn process_wide_changes_reach_new_copies() {
        let before = global();
        configure(|c| c.sanitize_scope_args = false);
        assert!(!global().sanitize_scope_args);
        assert!(before.sanitize_scope_args);
        configure(|c| c.sanitize_scope_args = true);
        assert_eq!(global(), before);
    }
}
