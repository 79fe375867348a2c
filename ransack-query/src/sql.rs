//! # The host query representation
//!
//! Searches compile into the small set of fragments a relational query
//! builder accepts: boolean [`Expr`] trees for `WHERE`, [`JoinClause`]s,
//! [`OrderExpr`]s and select expressions. The [`Relation`] trait is the
//! interface a host query builder implements to receive them;
//! [`SelectQuery`] is an implementation that simply renders SQL text,
//! which is what the crate's own tests and the default
//! [`Context::result`](crate::context::Context::result) use.

use std::convert::TryFrom;

use serde::Deserialize;

use crate::error::SearchError;
use crate::value::{quote, Value};

/// Quote an identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A comparison operator between two expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    fn as_sql(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        }
    }
}

/// A boolean or scalar SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column of a table or table alias.
    Column { table: String, name: String },
    Literal(Value),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
        case_insensitive: bool,
    },
    InList {
        expr: Box<Expr>,
        values: Vec<Value>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// Literal SQL, used verbatim.
    Raw(String),
}

impl Expr {
    pub fn column(table: &str, name: &str) -> Self {
        Expr::Column {
            table: table.to_string(),
            name: name.to_string(),
        }
    }

    pub fn raw(sql: &str) -> Self {
        Expr::Raw(sql.to_string())
    }

    pub fn binary(self, op: BinaryOp, value: Value) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(Expr::Literal(value)),
        }
    }

    pub fn eq(self, value: Value) -> Self {
        self.binary(BinaryOp::Eq, value)
    }

    pub fn not_eq(self, value: Value) -> Self {
        self.binary(BinaryOp::NotEq, value)
    }

    /// Compare against another expression rather than a literal.
    pub fn eq_expr(self, other: Expr) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op: BinaryOp::Eq,
            right: Box::new(other),
        }
    }

    pub fn like(self, pattern: String, negated: bool, case_insensitive: bool) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern,
            negated,
            case_insensitive,
        }
    }

    pub fn in_list(self, values: Vec<Value>, negated: bool) -> Self {
        Expr::InList {
            expr: Box::new(self),
            values,
            negated,
        }
    }

    pub fn is_null(self, negated: bool) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated,
        }
    }

    /// Conjunction; a single operand is returned as is.
    pub fn and(mut exprs: Vec<Expr>) -> Self {
        if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expr::And(exprs)
        }
    }

    /// Disjunction; a single operand is returned as is.
    pub fn or(mut exprs: Vec<Expr>) -> Self {
        if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expr::Or(exprs)
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Render as SQL text.
    pub fn to_sql(&self) -> String {
        match self {
            Expr::Column { table, name } => format!("{}.{}", quote_ident(table), quote_ident(name)),
            Expr::Literal(v) => v.to_sql(),
            Expr::Binary { left, op, right } => match (op, right.as_ref()) {
                (BinaryOp::Eq, Expr::Literal(Value::Null)) => {
                    format!("{} IS NULL", left.to_sql())
                }
                (BinaryOp::NotEq, Expr::Literal(Value::Null)) => {
                    format!("{} IS NOT NULL", left.to_sql())
                }
                _ => format!("{} {} {}", left.to_sql(), op.as_sql(), right.to_sql()),
            },
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => format!(
                "{} {}{} {}",
                expr.to_sql(),
                if *negated { "NOT " } else { "" },
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                quote(pattern)
            ),
            Expr::InList {
                expr,
                values,
                negated,
            } => format!(
                "{} {}IN {}",
                expr.to_sql(),
                if *negated { "NOT " } else { "" },
                Value::Array(values.clone()).to_sql()
            ),
            Expr::IsNull { expr, negated } => format!(
                "{} IS {}NULL",
                expr.to_sql(),
                if *negated { "NOT " } else { "" }
            ),
            Expr::And(exprs) if exprs.is_empty() => "1=1".to_string(),
            Expr::Or(exprs) if exprs.is_empty() => "1=0".to_string(),
            Expr::And(exprs) => exprs
                .iter()
                .map(|e| match e {
                    Expr::Or(inner) if inner.len() > 1 => format!("({})", e.to_sql()),
                    _ => e.operand_sql(exprs.len()),
                })
                .collect::<Vec<_>>()
                .join(" AND "),
            Expr::Or(exprs) => exprs
                .iter()
                .map(|e| match e {
                    Expr::And(inner) if inner.len() > 1 => format!("({})", e.to_sql()),
                    _ => e.operand_sql(exprs.len()),
                })
                .collect::<Vec<_>>()
                .join(" OR "),
            Expr::Not(inner) => format!("NOT ({})", inner.to_sql()),
            Expr::Raw(sql) => sql.clone(),
        }
    }

    /// Render as one of `siblings` operands of `AND` or `OR`. Raw SQL
    /// may hold its own connectives, so it is bracketed.
    fn operand_sql(&self, siblings: usize) -> String {
        match self {
            Expr::Raw(sql) if siblings > 1 => format!("({})", sql),
            _ => self.to_sql(),
        }
    }
}

/// How a join treats rows without a match.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::EnumString, strum::Display, strum::AsRefStr,
)]
#[serde(try_from = "String")]
#[strum(serialize_all = "snake_case")]
pub enum JoinKind {
    #[strum(to_string = "inner", serialize = "inner_join")]
    Inner,
    #[strum(
        to_string = "outer",
        serialize = "left",
        serialize = "left_outer",
        serialize = "left_outer_join"
    )]
    Outer,
}

impl Default for JoinKind {
    fn default() -> Self {
        JoinKind::Outer
    }
}

impl JoinKind {
    /// Parse a join kind, case insensitively.
    pub fn parse(s: &str) -> Result<Self, SearchError> {
        s.trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| SearchError::InvalidJoinType(s.to_string()))
    }

    fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Outer => "LEFT OUTER JOIN",
        }
    }
}

impl TryFrom<String> for JoinKind {
    type Error = SearchError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        JoinKind::parse(&s)
    }
}

/// One join instruction for the host query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    pub alias: Option<String>,
    pub on: Expr,
}

impl JoinClause {
    /// The name the joined table is referred to by.
    pub fn reference(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    pub fn to_sql(&self) -> String {
        match &self.alias {
            Some(alias) => format!(
                "{} {} {} ON {}",
                self.kind.as_sql(),
                quote_ident(&self.table),
                quote_ident(alias),
                self.on.to_sql()
            ),
            None => format!(
                "{} {} ON {}",
                self.kind.as_sql(),
                quote_ident(&self.table),
                self.on.to_sql()
            ),
        }
    }
}

/// Sort direction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    #[strum(to_string = "asc", serialize = "ASC")]
    Asc,
    #[strum(to_string = "desc", serialize = "DESC")]
    Desc,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Asc
    }
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// An `ORDER BY` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderExpr {
    /// A structured sort: an expression and its direction.
    Sort { expr: String, direction: Direction },
    /// Raw SQL, possibly holding several comma separated sort keys.
    Raw(String),
    /// SQL that must be passed through untouched, such as `RANDOM()`.
    Opaque(String),
}

impl OrderExpr {
    pub fn sort(expr: &Expr, direction: Direction) -> Self {
        OrderExpr::Sort {
            expr: expr.to_sql(),
            direction,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            OrderExpr::Sort { expr, direction } => format!("{} {}", expr, direction.as_sql()),
            OrderExpr::Raw(sql) | OrderExpr::Opaque(sql) => sql.clone(),
        }
    }
}

/// A relational query under construction, as provided by the host.
pub trait Relation {
    /// The primary table.
    fn table_name(&self) -> &str;
    /// Add a predicate, combined with any existing ones by `AND`.
    fn where_clause(&mut self, predicate: Expr);
    /// Add a join. Adding a join that is already present is a no-op.
    fn joins(&mut self, join: JoinClause);
    /// Append an order expression.
    fn order(&mut self, order: OrderExpr);
    /// Append a select expression. An empty select list means all
    /// columns of the primary table.
    fn select(&mut self, expr: &str);
    fn distinct(&mut self, distinct: bool);
    fn is_distinct(&self) -> bool;
    fn select_values(&self) -> &[String];
    fn order_values(&self) -> &[OrderExpr];
    /// Replace every order expression.
    fn reorder(&mut self, orders: Vec<OrderExpr>);
}

/// A [`Relation`] that renders SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    table: String,
    distinct: bool,
    selects: Vec<String>,
    joins: Vec<JoinClause>,
    predicates: Vec<Expr>,
    orders: Vec<OrderExpr>,
}

impl SelectQuery {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            distinct: false,
            selects: Vec::new(),
            joins: Vec::new(),
            predicates: Vec::new(),
            orders: Vec::new(),
        }
    }

    pub fn join_clauses(&self) -> &[JoinClause] {
        &self.joins
    }

    /// The combined `WHERE` predicate, if any.
    pub fn predicate(&self) -> Option<Expr> {
        if self.predicates.is_empty() {
            None
        } else {
            Some(Expr::and(self.predicates.clone()))
        }
    }

    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.selects.is_empty() {
            sql.push_str(&format!("{}.*", quote_ident(&self.table)));
        } else {
            sql.push_str(&self.selects.join(", "));
        }
        sql.push_str(&format!(" FROM {}", quote_ident(&self.table)));
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }
        if let Some(predicate) = self.predicate() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate.to_sql());
        }
        if !self.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(
                &self
                    .orders
                    .iter()
                    .map(OrderExpr::to_sql)
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
        sql
    }
}

impl Relation for SelectQuery {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn where_clause(&mut self, predicate: Expr) {
        self.predicates.push(predicate);
    }

    fn joins(&mut self, join: JoinClause) {
        if !self.joins.contains(&join) {
            self.joins.push(join);
        }
    }

    fn order(&mut self, order: OrderExpr) {
        self.orders.push(order);
    }

    fn select(&mut self, expr: &str) {
        self.selects.push(expr.to_string());
    }

    fn distinct(&mut self, distinct: bool) {
        self.distinct = distinct;
    }

    fn is_distinct(&self) -> bool {
        self.distinct
    }

    fn select_values(&self) -> &[String] {
        &self.selects
    }

    fn order_values(&self) -> &[OrderExpr] {
        &self.orders
    }

    fn reorder(&mut self, orders: Vec<OrderExpr>) {
        self.orders = orders;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_boolean_rendering() {
        let name = Expr::column("people", "name");
        let e = Expr::and(vec![
            name.clone().eq("Ernie".into()),
            Expr::or(vec![
                name.clone().eq("Ernie".into()),
                Expr::column("children_people", "name").eq("Ernie".into()),
            ]),
        ]);
        assert_eq!(
            e.to_sql(),
            "\"people\".\"name\" = 'Ernie' AND (\"people\".\"name\" = 'Ernie' OR \"children_people\".\"name\" = 'Ernie')"
        );
    }

    #[test]
    fn raw_operands_are_bracketed() {
        let wide = Expr::raw("\"people\".\"age\" < 18 OR \"people\".\"age\" > 65");
        let name = Expr::column("people", "name").eq("Ernie".into());
        assert_eq!(
            Expr::and(vec![name.clone(), wide.clone()]).to_sql(),
            "\"people\".\"name\" = 'Ernie' AND (\"people\".\"age\" < 18 OR \"people\".\"age\" > 65)"
        );
        assert_eq!(
            Expr::or(vec![Expr::raw("a AND b"), name]).to_sql(),
            "(a AND b) OR \"people\".\"name\" = 'Ernie'"
        );
        assert_eq!(Expr::and(vec![wide.clone()]).to_sql(), wide.to_sql());
    }

    #[test]
    fn null_comparisons() {
        let c = Expr::column("people", "name");
        assert_eq!(c.clone().eq(Value::Null).to_sql(), "\"people\".\"name\" IS NULL");
        assert_eq!(c.not_eq(Value::Null).to_sql(), "\"people\".\"name\" IS NOT NULL");
    }

    #[test]
    fn join_kinds() {
        assert_eq!(JoinKind::parse("INNER").unwrap(), JoinKind::Inner);
        assert_eq!(JoinKind::parse("left_outer").unwrap(), JoinKind::Outer);
        assert!(matches!(
            JoinKind::parse("cross"),
            Err(SearchError::InvalidJoinType(_))
        ));
    }

    #[test]
    fn select_query_rendering() {
        let mut q = SelectQuery::new("people");
        q.distinct(true);
        q.where_clause(Expr::column("people", "id").binary(BinaryOp::Gt, Value::Integer(3)));
        q.order(OrderExpr::Raw("\"people\".\"id\" DESC".to_string()));
        assert_eq!(
            q.to_sql(),
            "SELECT DISTINCT \"people\".* FROM \"people\" WHERE \"people\".\"id\" > 3 ORDER BY \"people\".\"id\" DESC"
        );
    }
}
