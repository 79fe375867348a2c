//! # Compiling search trees
//!
//! Search trees are walked with a [`Visitor`]: each [`Node`] dispatches
//! to the visitor method for its kind through
//! [`Node::accept`](crate::nodes::Node::accept), and the visitor decides
//! how to recurse.
//!
//! [`Compiler`] is the visitor that turns a tree into a single boolean
//! [`Expr`]. A grouping folds its compiled children with its combinator;
//! a condition compiles its predicate once per attribute and folds those
//! with the condition's own combinator. Every join a compiled column
//! reads through is recorded, so that the caller can emit exactly the
//! joins the surviving conditions need.

use std::collections::BTreeSet;

use crate::error::SearchError;
use crate::joins::{AttributeReference, JoinGraph, JoinId};
use crate::nodes::{Condition, Grouping, Node, ScopeCall, Sort};
use crate::predicates::Arity;
use crate::sql::{Expr, OrderExpr};
use crate::value::Value;

/// Receives the nodes of a search tree.
pub trait Visitor {
    type Output;

    fn visit_grouping(&mut self, grouping: &Grouping) -> Self::Output;
    fn visit_condition(&mut self, condition: &Condition) -> Self::Output;
}

/// Compiles search trees against a [`JoinGraph`].
///
/// The graph is only read. Compiling a node yields `None` when there is
/// nothing to constrain, which happens for empty groupings.
pub struct Compiler<'g> {
    graph: &'g JoinGraph,
    used: BTreeSet<JoinId>,
}

impl<'g> Compiler<'g> {
    pub fn new(graph: &'g JoinGraph) -> Self {
        Self {
            graph,
            used: BTreeSet::new(),
        }
    }

    /// The joins read through by everything compiled so far.
    pub fn used_joins(&self) -> &BTreeSet<JoinId> {
        &self.used
    }

    pub fn sort(&mut self, sort: &Sort) -> OrderExpr {
        OrderExpr::sort(&self.column(sort.attribute()), sort.direction())
    }

    pub fn scope(&mut self, call: &ScopeCall) -> Expr {
        call.apply()
    }

    fn column(&mut self, attribute: &AttributeReference) -> Expr {
        if let Some(join) = attribute.join() {
            self.used.insert(join);
        }
        attribute.column(self.graph)
    }
}

impl<'g> Visitor for Compiler<'g> {
    type Output = Result<Option<Expr>, SearchError>;

    fn visit_grouping(&mut self, grouping: &Grouping) -> Self::Output {
        let mut parts = Vec::with_capacity(grouping.len());
        for child in grouping.children() {
            if let Some(expr) = child.accept(self)? {
                parts.push(expr);
            }
        }
        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(grouping.combinator().combine(parts)))
        }
    }

    fn visit_condition(&mut self, condition: &Condition) -> Self::Output {
        let predicate = condition.predicate();
        let mut parts = Vec::with_capacity(condition.attributes().len());
        for (attribute, value) in condition.operands()? {
            if predicate.arity() != Arity::None && value == Value::Null {
                log::trace!(
                    "skipping null value for '{}' in '{}'",
                    attribute.attribute_name(),
                    condition.key()
                );
                continue;
            }
            let column = self.column(attribute);
            parts.push(predicate.compile(&column, &value)?);
        }
        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(condition.combinator().combine(parts)))
        }
    }
}

/// Compile a single node.
pub fn compile(node: &Node, graph: &JoinGraph) -> Result<(Option<Expr>, BTreeSet<JoinId>), SearchError> {
    let mut compiler = Compiler::new(graph);
    let expr = node.accept(&mut compiler)?;
    Ok((expr, compiler.used))
}
