//! Standard search predicates, and the registry they live in.
//!
//! A predicate is the suffix of a search key naming the comparison to
//! make, as in `name_cont` or `age_gteq`. The registered predicates are:
//!
//! Name             | Arity  | SQL
//! -----------------|--------|-----------------------------------
//! `eq`             | single | `attr = v`
//! `not_eq`         | single | `attr != v`
//! `lt`, `lteq`     | single | `attr < v`, `attr <= v`
//! `gt`, `gteq`     | single | `attr > v`, `attr >= v`
//! `matches`        | single | `attr LIKE v`
//! `does_not_match` | single | `attr NOT LIKE v`
//! `cont`           | single | `attr LIKE '%v%'`
//! `not_cont`       | single | `attr NOT LIKE '%v%'`
//! `i_cont`         | single | `attr ILIKE '%v%'`
//! `not_i_cont`     | single | `attr NOT ILIKE '%v%'`
//! `start`          | single | `attr LIKE 'v%'`
//! `not_start`      | single | `attr NOT LIKE 'v%'`
//! `end`            | single | `attr LIKE '%v'`
//! `not_end`        | single | `attr NOT LIKE '%v'`
//! `in`             | array  | `attr IN (v, ...)`
//! `not_in`         | array  | `attr NOT IN (v, ...)`
//! `true`           | single | `attr = TRUE` (inverted by a false value)
//! `not_true`       | single | `attr != TRUE` (inverted by a false value)
//! `false`          | single | `attr = FALSE` (inverted by a false value)
//! `not_false`      | single | `attr != FALSE` (inverted by a false value)
//! `present`        | single | `attr IS NOT NULL AND attr != ''` (inverted by a false value)
//! `blank`          | single | `attr IS NULL OR attr = ''` (inverted by a false value)
//! `null`           | none   | `attr IS NULL`
//! `not_null`       | none   | `attr IS NOT NULL`
//!
//! Every single-valued comparison from `eq` to `not_end` also has
//! `_any` and `_all` forms taking an array, which combine the
//! per-element comparisons with `OR` and `AND` respectively.
//!
//! The pattern predicates escape `\` and `%` in the value before
//! wrapping it in wildcards, so that a literal percent sign in a search
//! term does not match everything.
//!
//! The registry is process-wide. It is read through [`registry`], which
//! hands out an immutable snapshot, and extended through [`register`],
//! which swaps in a new snapshot; a search keeps using the snapshot it
//! started with.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::sql::{BinaryOp, Expr};
use crate::value::{AttributeType, Value};

/// How many values a predicate consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Arity {
    /// The value only switches the condition on.
    None,
    Single,
    Array,
}

/// How the `_any` and `_all` forms combine per-element comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Compound {
    Any,
    All,
}

/// The error a predicate's compile function may fail with.
pub use anyhow::Error as PredicateError;

/// Compile one attribute and one (already cast) value into a predicate.
pub type CompileFn = dyn Fn(&Expr, &Value) -> anyhow::Result<Expr> + Send + Sync;

/// A named predicate.
#[derive(Clone)]
pub struct PredicateSpec {
    name: String,
    arity: Arity,
    negated: bool,
    case_insensitive: bool,
    wants_wildcard_escape: bool,
    compound: Option<Compound>,
    value_type: Option<AttributeType>,
    compile: Arc<CompileFn>,
}

impl fmt::Debug for PredicateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateSpec")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("negated", &self.negated)
            .field("case_insensitive", &self.case_insensitive)
            .field("wants_wildcard_escape", &self.wants_wildcard_escape)
            .field("compound", &self.compound)
            .field("value_type", &self.value_type)
            .finish()
    }
}

impl PredicateSpec {
    /// A user-defined predicate. `compile` receives the attribute's
    /// column expression and the value, cast to the column's type.
    pub fn custom<F>(name: &str, arity: Arity, compile: F) -> Self
    where
        F: Fn(&Expr, &Value) -> anyhow::Result<Expr> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            arity,
            negated: false,
            case_insensitive: false,
            wants_wildcard_escape: false,
            compound: None,
            value_type: None,
            compile: Arc::new(compile),
        }
    }

    /// Cast values to `ty` instead of the column's own type.
    pub fn with_value_type(mut self, ty: AttributeType) -> Self {
        self.value_type = Some(ty);
        self
    }

    pub fn with_negated(mut self, negated: bool) -> Self {
        self.negated = negated;
        self
    }

    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn wants_wildcard_escape(&self) -> bool {
        self.wants_wildcard_escape
    }

    pub fn compound(&self) -> Option<Compound> {
        self.compound
    }

    /// The type values are cast to, when it is not the column's.
    pub fn value_type(&self) -> Option<AttributeType> {
        self.value_type
    }

    /// Produce the predicate for one attribute.
    pub fn compile(&self, attribute: &Expr, value: &Value) -> anyhow::Result<Expr> {
        (self.compile)(attribute, value)
    }

    fn builtin(name: &str, arity: Arity, compile: Arc<CompileFn>) -> Self {
        Self {
            name: name.to_string(),
            arity,
            negated: false,
            case_insensitive: false,
            wants_wildcard_escape: false,
            compound: None,
            value_type: None,
            compile,
        }
    }

    fn compounded(&self, compound: Compound) -> Self {
        let inner = self.compile.clone();
        let compile: Arc<CompileFn> =
            Arc::new(move |attr: &Expr, value: &Value| -> anyhow::Result<Expr> {
                let parts = value
                    .to_list()
                    .iter()
                    .map(|v| inner(attr, v))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok(match compound {
                    Compound::Any => Expr::or(parts),
                    Compound::All => Expr::and(parts),
                })
            });
        Self {
            name: format!("{}_{}", self.name, compound),
            arity: Arity::Array,
            compound: Some(compound),
            compile,
            ..self.clone()
        }
    }
}

/// Escape the characters that `LIKE` would otherwise treat specially.
pub fn escape_wildcards(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%")
}

#[derive(Clone, Copy)]
enum Wildcard {
    Both,
    Leading,
    Trailing,
}

fn comparison(op: BinaryOp) -> Arc<CompileFn> {
    Arc::new(move |attr: &Expr, value: &Value| -> anyhow::Result<Expr> {
        Ok(attr.clone().binary(op, value.clone()))
    })
}

fn pattern(wildcard: Wildcard, negated: bool, case_insensitive: bool) -> Arc<CompileFn> {
    Arc::new(move |attr: &Expr, value: &Value| -> anyhow::Result<Expr> {
        let escaped = escape_wildcards(&value.to_text());
        let pattern = match wildcard {
            Wildcard::Both => format!("%{}%", escaped),
            Wildcard::Leading => format!("%{}", escaped),
            Wildcard::Trailing => format!("{}%", escaped),
        };
        Ok(attr.clone().like(pattern, negated, case_insensitive))
    })
}

fn matches(negated: bool) -> Arc<CompileFn> {
    Arc::new(move |attr: &Expr, value: &Value| -> anyhow::Result<Expr> {
        Ok(attr.clone().like(value.to_text(), negated, false))
    })
}

fn membership(negated: bool) -> Arc<CompileFn> {
    Arc::new(move |attr: &Expr, value: &Value| -> anyhow::Result<Expr> {
        Ok(attr.clone().in_list(value.to_list(), negated))
    })
}

fn nullity(negated: bool) -> Arc<CompileFn> {
    Arc::new(move |attr: &Expr, _value: &Value| -> anyhow::Result<Expr> {
        Ok(attr.clone().is_null(negated))
    })
}

fn flag(target: bool, negated: bool) -> Arc<CompileFn> {
    Arc::new(move |attr: &Expr, value: &Value| -> anyhow::Result<Expr> {
        let wanted = value.as_flag().unwrap_or(true) != negated;
        Ok(if wanted {
            attr.clone().eq(Value::Bool(target))
        } else {
            attr.clone().not_eq(Value::Bool(target))
        })
    })
}

fn presence(negated: bool) -> Arc<CompileFn> {
    Arc::new(move |attr: &Expr, value: &Value| -> anyhow::Result<Expr> {
        let present = value.as_flag().unwrap_or(true) != negated;
        Ok(if present {
            Expr::and(vec![
                attr.clone().is_null(true),
                attr.clone().not_eq(Value::String(String::new())),
            ])
        } else {
            Expr::or(vec![
                attr.clone().is_null(false),
                attr.clone().eq(Value::String(String::new())),
            ])
        })
    })
}

/// A set of predicates, looked up by name or by key suffix.
#[derive(Debug, Clone, Default)]
pub struct PredicateRegistry {
    by_name: HashMap<String, Arc<PredicateSpec>>,
    names_by_length: Vec<String>,
}

impl PredicateRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// The registry holding every standard predicate.
    pub fn standard() -> Self {
        use Wildcard::*;

        let mut registry = Self::new();

        let single = |name: &str, compile: Arc<CompileFn>| {
            PredicateSpec::builtin(name, Arity::Single, compile)
        };
        let text = |name: &str, compile: Arc<CompileFn>, negated: bool, ci: bool| {
            let mut spec = PredicateSpec::builtin(name, Arity::Single, compile)
                .with_value_type(AttributeType::String)
                .with_negated(negated)
                .with_case_insensitive(ci);
            spec.wants_wildcard_escape = true;
            spec
        };

        let compoundable = vec![
            single("eq", comparison(BinaryOp::Eq)),
            single("not_eq", comparison(BinaryOp::NotEq)).with_negated(true),
            single("lt", comparison(BinaryOp::Lt)),
            single("lteq", comparison(BinaryOp::LtEq)),
            single("gt", comparison(BinaryOp::Gt)),
            single("gteq", comparison(BinaryOp::GtEq)),
            single("matches", matches(false)).with_value_type(AttributeType::String),
            single("does_not_match", matches(true))
                .with_value_type(AttributeType::String)
                .with_negated(true),
            text("cont", pattern(Both, false, false), false, false),
            text("not_cont", pattern(Both, true, false), true, false),
            text("i_cont", pattern(Both, false, true), false, true),
            text("not_i_cont", pattern(Both, true, true), true, true),
            text("start", pattern(Trailing, false, false), false, false),
            text("not_start", pattern(Trailing, true, false), true, false),
            text("end", pattern(Leading, false, false), false, false),
            text("not_end", pattern(Leading, true, false), true, false),
        ];

        for spec in compoundable {
            registry.insert(spec.compounded(Compound::Any));
            registry.insert(spec.compounded(Compound::All));
            registry.insert(spec);
        }

        registry.insert(PredicateSpec::builtin("in", Arity::Array, membership(false)));
        registry.insert(
            PredicateSpec::builtin("not_in", Arity::Array, membership(true)).with_negated(true),
        );

        for (name, target, negated) in [
            ("true", true, false),
            ("not_true", true, true),
            ("false", false, false),
            ("not_false", false, true),
        ] {
            registry.insert(
                single(name, flag(target, negated))
                    .with_value_type(AttributeType::Boolean)
                    .with_negated(negated),
            );
        }
        registry.insert(single("present", presence(false)).with_value_type(AttributeType::Boolean));
        registry.insert(
            single("blank", presence(true))
                .with_value_type(AttributeType::Boolean)
                .with_negated(true),
        );

        registry.insert(PredicateSpec::builtin("null", Arity::None, nullity(false)));
        registry.insert(
            PredicateSpec::builtin("not_null", Arity::None, nullity(true)).with_negated(true),
        );

        registry
    }

    /// Add or replace a predicate.
    pub fn insert(&mut self, spec: PredicateSpec) {
        let name = spec.name.clone();
        if self.by_name.insert(name.clone(), Arc::new(spec)).is_none() {
            self.names_by_length.push(name);
            self.names_by_length
                .sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<PredicateSpec>> {
        self.by_name.get(name)
    }

    /// Find the predicate whose name ends `key`, preferring the longest
    /// name, and return it with the rest of the key.
    ///
    /// `"name_not_eq"` yields `("name", not_eq)`, never `("name_not", eq)`.
    pub fn detect<'k>(&self, key: &'k str) -> Option<(&'k str, &Arc<PredicateSpec>)> {
        self.names_by_length.iter().find_map(|name| {
            let stem = key.strip_suffix(name.as_str())?.strip_suffix('_')?;
            if stem.is_empty() {
                None
            } else {
                self.by_name.get(name).map(|spec| (stem, spec))
            }
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names_by_length.iter().map(String::as_str)
    }
}

static REGISTRY: Lazy<RwLock<Arc<PredicateRegistry>>> =
    Lazy::new(|| RwLock::new(Arc::new(PredicateRegistry::standard())));

/// A snapshot of the process-wide registry.
pub fn registry() -> Arc<PredicateRegistry> {
    REGISTRY
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Add a predicate to the process-wide registry. Searches started
/// before the call do not see it.
pub fn register(spec: PredicateSpec) {
    let mut guard = REGISTRY
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut next = PredicateRegistry::clone(&guard);
    log::debug!("registering predicate '{}'", spec.name());
    next.insert(spec);
    *guard = Arc::new(next);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> Expr {
        Expr::column("people", "name")
    }

    #[test]
    fn longest_suffix_wins() {
        let r = PredicateRegistry::standard();
        let (stem, spec) = r.detect("name_not_eq").unwrap();
        assert_eq!(stem, "name");
        assert_eq!(spec.name(), "not_eq");

        let (stem, spec) = r.detect("children_name_not_i_cont_any").unwrap();
        assert_eq!(stem, "children_name");
        assert_eq!(spec.name(), "not_i_cont_any");
        assert_eq!(spec.arity(), Arity::Array);
        assert!(spec.is_negated() && spec.is_case_insensitive());

        assert!(r.detect("eq").is_none());
        assert!(r.detect("name_equals").is_none());
    }

    #[test]
    fn wildcard_escaping() {
        let r = PredicateRegistry::standard();
        let cont = r.get("cont").unwrap();
        let e = cont.compile(&name(), &Value::from("%._\\")).unwrap();
        assert_eq!(e.to_sql(), "\"people\".\"name\" LIKE '%\\%._\\\\%'");

        let e = cont.compile(&name(), &Value::Integer(42)).unwrap();
        assert_eq!(e.to_sql(), "\"people\".\"name\" LIKE '%42%'");

        let start = r.get("not_start").unwrap();
        let e = start.compile(&name(), &Value::from("Er")).unwrap();
        assert_eq!(e.to_sql(), "\"people\".\"name\" NOT LIKE 'Er%'");
    }

    #[test]
    fn compounds() {
        let r = PredicateRegistry::standard();
        let any = r.get("eq_any").unwrap();
        let e = any
            .compile(&name(), &Value::Array(vec!["a".into(), "b".into()]))
            .unwrap();
        assert_eq!(
            e.to_sql(),
            "\"people\".\"name\" = 'a' OR \"people\".\"name\" = 'b'"
        );
        let all = r.get("cont_all").unwrap();
        let e = all
            .compile(&name(), &Value::Array(vec!["a".into(), "b".into()]))
            .unwrap();
        assert_eq!(
            e.to_sql(),
            "\"people\".\"name\" LIKE '%a%' AND \"people\".\"name\" LIKE '%b%'"
        );
    }

    #[test]
    fn flags_and_nulls() {
        let r = PredicateRegistry::standard();
        let awesome = Expr::column("people", "awesome");
        assert_eq!(
            r.get("true").unwrap().compile(&awesome, &Value::Bool(false)).unwrap().to_sql(),
            "\"people\".\"awesome\" != TRUE"
        );
        assert_eq!(
            r.get("not_null").unwrap().compile(&awesome, &Value::Bool(false)).unwrap().to_sql(),
            "\"people\".\"awesome\" IS NOT NULL"
        );
        assert_eq!(
            r.get("blank").unwrap().compile(&name(), &Value::Bool(true)).unwrap().to_sql(),
            "\"people\".\"name\" IS NULL OR \"people\".\"name\" = ''"
        );
    }

    #[test]
    fn registration_is_snapshotted() {
        let before = registry();
        register(PredicateSpec::custom("sounds_like", Arity::Single, |attr, value| {
            Ok(Expr::raw(&format!(
                "SOUNDEX({}) = SOUNDEX({})",
                attr.to_sql(),
                value.to_sql()
            )))
        }));
        assert!(before.get("sounds_like").is_none());
        let after = registry();
        let (stem, spec) = after.detect("name_sounds_like").unwrap();
        assert_eq!(stem, "name");
        assert_eq!(
            spec.compile(&name(), &"Ernie".into()).unwrap().to_sql(),
            "SOUNDEX(\"people\".\"name\") = SOUNDEX('Ernie')"
        );
    }
}
