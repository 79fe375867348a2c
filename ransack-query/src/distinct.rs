//! # Ordering distinct queries
//!
//! SQL forbids a `SELECT DISTINCT` query from ordering by an expression
//! that is not in its select list. [`rewrite`] repairs such a relation:
//! each order key that is not already selected is added to the select
//! list under a fresh alias, and the order refers to the alias instead.
//!
//! Whether a key is already selected is decided textually. A select
//! entry matches a key if it is the same text, or if it has the form
//! `<expr> AS <alias>` and the key is the expression or the alias; an
//! entry `"table".*` matches the plain columns of that table. This is
//! an approximation: `lower(name)` and `LOWER(name)` are different keys
//! as far as this module is concerned. Because rewritten orders refer to
//! their aliases, running the pass again finds nothing left to do.
//!
//! A sort key may end in `ASC` or `DESC` and then `NULLS FIRST` or
//! `NULLS LAST`; both are kept on the rewritten order. An order this
//! module cannot read, such as one with unbalanced parentheses or with
//! ordering keywords out of place, is left untouched.
//!
//! Example:
//! ```rust
//! use ransack_query::distinct::rewrite;
//! use ransack_query::sql::{OrderExpr, Relation, SelectQuery};
//!
//! let mut q = SelectQuery::new("people");
//! q.distinct(true);
//! q.select("id");
//! q.order(OrderExpr::Raw("name ASC".to_string()));
//! assert!(rewrite(&mut q));
//! assert_eq!(q.select_values().len(), 2);
//! assert!(q.select_values()[1].starts_with("name AS ordering_"));
//! assert!(!rewrite(&mut q));
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::sql::{quote_ident, Direction, OrderExpr, Relation};

static ALIASED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^(.*\S)\s+AS\s+(\S+)$").unwrap());
static DIRECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(.*?\S)(?:\s+(ASC|DESC))?(?:\s+NULLS\s+(FIRST|LAST))?$").unwrap()
});
static KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:ASC|DESC|NULLS)\b").unwrap());
static IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^(?:"[^"]+"|[A-Za-z_][A-Za-z0-9_]*)$"#).unwrap());

/// One sort key read out of an order expression.
#[derive(Debug, Clone, PartialEq)]
struct SortKey {
    expr: String,
    direction: Option<Direction>,
    nulls: Option<&'static str>,
}

impl SortKey {
    /// The key with its expression replaced by `alias`.
    fn render(&self, alias: &str) -> String {
        let mut sql = alias.to_string();
        if let Some(d) = self.direction {
            sql.push(' ');
            sql.push_str(d.as_sql());
        }
        if let Some(nulls) = self.nulls {
            sql.push(' ');
            sql.push_str(nulls);
        }
        sql
    }
}

/// Split `sql` on the commas that are outside parentheses and quotes.
fn split_top_level(sql: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in sql.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            (None, ',') if depth == 0 => {
                parts.push(sql[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return None;
    }
    parts.push(sql[start..].trim());
    if parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(parts)
}

/// Read a sort key, or `None` if ordering keywords remain in what
/// would be its expression.
fn read_key(part: &str) -> Option<SortKey> {
    let c = DIRECTED.captures(part.trim())?;
    let expr = c[1].trim();
    if KEYWORD.is_match(expr) {
        return None;
    }
    Some(SortKey {
        expr: expr.to_string(),
        direction: c.get(2).map(|d| {
            if d.as_str().eq_ignore_ascii_case("desc") {
                Direction::Desc
            } else {
                Direction::Asc
            }
        }),
        nulls: c.get(3).map(|n| {
            if n.as_str().eq_ignore_ascii_case("first") {
                "NULLS FIRST"
            } else {
                "NULLS LAST"
            }
        }),
    })
}

fn unquote(ident: &str) -> &str {
    ident
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(ident)
}

/// Whether `expr` is already available from the select list.
fn is_selected(expr: &str, selects: &[String]) -> bool {
    selects.iter().any(|entry| {
        let entry = entry.trim();
        if entry == expr {
            return true;
        }
        if let Some(c) = ALIASED.captures(entry) {
            if c[1].trim() == expr || unquote(&c[2]) == unquote(expr) {
                return true;
            }
        }
        match entry.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('.') => expr
                .strip_prefix(prefix)
                .map_or(false, |column| IDENT.is_match(column)),
            _ => false,
        }
    })
}

/// Whether `expr` is a plain column of `table`, qualified or not.
fn is_primary_column(expr: &str, table: &str) -> bool {
    let column = match expr.rsplit_once('.') {
        Some((qualifier, column)) if unquote(qualifier) == table => column,
        Some(_) => return false,
        None => expr,
    };
    IDENT.is_match(column)
}

/// Make the order expressions of a distinct relation valid, returning
/// whether anything was changed.
///
/// Does nothing unless the relation is distinct and has orders.
pub fn rewrite<R: Relation + ?Sized>(relation: &mut R) -> bool {
    if !relation.is_distinct() || relation.order_values().is_empty() {
        return false;
    }

    let table = relation.table_name().to_string();
    let mut selects = relation.select_values().to_vec();
    let mut additions = Vec::new();
    let mut orders = Vec::new();
    let mut changed = false;

    let alias_for = |key: &SortKey, selects: &mut Vec<String>, additions: &mut Vec<String>| {
        if is_selected(&key.expr, selects) {
            return None;
        }
        if selects.is_empty() && is_primary_column(&key.expr, &table) {
            log::trace!("'{}' is implicitly selected", key.expr);
            return None;
        }
        if selects.is_empty() {
            let all = format!("{}.*", quote_ident(&table));
            selects.push(all.clone());
            additions.push(all);
        }
        let alias = format!("ordering_{}", Uuid::new_v4().simple());
        let entry = format!("{} AS {}", key.expr, alias);
        log::debug!("selecting '{}' for a distinct ordering", entry);
        selects.push(entry.clone());
        additions.push(entry);
        Some(alias)
    };

    for order in relation.order_values().to_vec() {
        match &order {
            OrderExpr::Sort { expr, direction } => {
                let key = SortKey {
                    expr: expr.clone(),
                    direction: Some(*direction),
                    nulls: None,
                };
                match alias_for(&key, &mut selects, &mut additions) {
                    Some(alias) => {
                        changed = true;
                        orders.push(OrderExpr::Sort {
                            expr: alias,
                            direction: *direction,
                        });
                    }
                    None => orders.push(order),
                }
            }
            OrderExpr::Raw(sql) => {
                let keys = split_top_level(sql).and_then(|parts| {
                    parts
                        .into_iter()
                        .map(|part| read_key(part).map(|key| (part, key)))
                        .collect::<Option<Vec<_>>>()
                });
                let keys = match keys {
                    Some(keys) => keys,
                    None => {
                        log::debug!("leaving unreadable order '{}' alone", sql);
                        orders.push(order);
                        continue;
                    }
                };
                let mut rewritten = Vec::with_capacity(keys.len());
                let mut touched = false;
                for (part, key) in keys {
                    match alias_for(&key, &mut selects, &mut additions) {
                        Some(alias) => {
                            touched = true;
                            rewritten.push(key.render(&alias));
                        }
                        None => rewritten.push(part.to_string()),
                    }
                }
                if touched {
                    changed = true;
                    orders.push(OrderExpr::Raw(rewritten.join(", ")));
                } else {
                    orders.push(order);
                }
            }
            OrderExpr::Opaque(sql) => {
                log::trace!("passing opaque order '{}' through", sql);
                orders.push(order);
            }
        }
    }

    if changed {
        for entry in &additions {
            relation.select(entry);
        }
        relation.reorder(orders);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::SelectQuery;

    fn distinct(table: &str) -> SelectQuery {
        let mut q = SelectQuery::new(table);
        q.distinct(true);
        q
    }

    #[test]
    fn splitting() {
        assert_eq!(
            split_top_level("a ASC, coalesce(b, c) DESC, 'x,y'"),
            Some(vec!["a ASC", "coalesce(b, c) DESC", "'x,y'"])
        );
        assert_eq!(split_top_level("f(a, b"), None);
        assert_eq!(split_top_level("a,,b"), None);
        assert_eq!(
            read_key("lower(name)   desc"),
            Some(SortKey {
                expr: "lower(name)".to_string(),
                direction: Some(Direction::Desc),
                nulls: None,
            })
        );
        assert_eq!(
            read_key("name DESC nulls  last"),
            Some(SortKey {
                expr: "name".to_string(),
                direction: Some(Direction::Desc),
                nulls: Some("NULLS LAST"),
            })
        );
        assert_eq!(
            read_key("name"),
            Some(SortKey {
                expr: "name".to_string(),
                direction: None,
                nulls: None,
            })
        );
        assert_eq!(read_key("name NULLS LAST DESC"), None);
    }

    #[test]
    fn selection_matching() {
        let selects = vec![
            "\"people\".*".to_string(),
            "lower(name) AS lname".to_string(),
        ];
        assert!(is_selected("\"people\".\"name\"", &selects));
        assert!(is_selected("lower(name)", &selects));
        assert!(is_selected("lname", &selects));
        assert!(!is_selected("LOWER(name)", &selects));
        assert!(!is_selected("\"articles\".\"title\"", &selects));
    }

    #[test]
    fn guard() {
        let mut q = SelectQuery::new("people");
        q.order(OrderExpr::Raw("name ASC".to_string()));
        assert!(!rewrite(&mut q));

        let mut q = distinct("people");
        assert!(!rewrite(&mut q));
    }

    #[test]
    fn primary_columns_are_implicit() {
        let mut q = distinct("people");
        q.order(OrderExpr::Raw("\"people\".\"name\" DESC, id".to_string()));
        assert!(!rewrite(&mut q));
        assert!(q.select_values().is_empty());
    }

    #[test]
    fn joined_columns_are_aliased() {
        let mut q = distinct("people");
        q.order(OrderExpr::Sort {
            expr: "\"children_people\".\"name\"".to_string(),
            direction: Direction::Desc,
        });
        q.order(OrderExpr::Opaque("RANDOM()".to_string()));
        assert!(rewrite(&mut q));

        let selects = q.select_values().to_vec();
        assert_eq!(selects.len(), 2);
        assert_eq!(selects[0], "\"people\".*");
        let alias = selects[1]
            .strip_prefix("\"children_people\".\"name\" AS ")
            .unwrap()
            .to_string();
        assert!(alias.starts_with("ordering_"));
        assert_eq!(
            q.order_values(),
            &[
                OrderExpr::Sort {
                    expr: alias,
                    direction: Direction::Desc
                },
                OrderExpr::Opaque("RANDOM()".to_string()),
            ]
        );

        let before = q.clone();
        assert!(!rewrite(&mut q));
        assert_eq!(q, before);
    }

    #[test]
    fn null_placement_is_carried_over() {
        let mut q = distinct("people");
        q.select("id");
        q.order(OrderExpr::Raw("name DESC NULLS LAST, age nulls first".to_string()));
        assert!(rewrite(&mut q));

        let selects = q.select_values().to_vec();
        assert_eq!(selects.len(), 3);
        let name = selects[1].strip_prefix("name AS ").unwrap();
        let age = selects[2].strip_prefix("age AS ").unwrap();
        assert_eq!(
            q.order_values(),
            &[OrderExpr::Raw(format!(
                "{} DESC NULLS LAST, {} NULLS FIRST",
                name, age
            ))]
        );
        assert!(q.to_sql().starts_with("SELECT DISTINCT id, name AS ordering_"));
    }

    #[test]
    fn orders_with_stray_keywords_are_kept() {
        let mut q = distinct("people");
        q.select("id");
        q.order(OrderExpr::Raw("age ASC, name NULLS LAST DESC".to_string()));
        assert!(!rewrite(&mut q));
        assert_eq!(q.select_values(), &["id".to_string()]);
        assert_eq!(
            q.order_values(),
            &[OrderExpr::Raw("age ASC, name NULLS LAST DESC".to_string())]
        );
    }

    #[test]
    fn unreadable_orders_are_kept() {
        let mut q = distinct("people");
        q.select("id");
        q.order(OrderExpr::Raw("coalesce(name, ".to_string()));
        assert!(!rewrite(&mut q));
        assert_eq!(
            q.order_values(),
            &[OrderExpr::Raw("coalesce(name, ".to_string())]
        );
    }
}
