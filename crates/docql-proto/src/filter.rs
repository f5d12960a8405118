//! Filter types: the wire-level `FilterTree` and the typed `FilterNode`.

use serde::{Deserialize, Serialize};

use crate::value::Scalar;

/// Comparison operators accepted in a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    /// Operator name used in native storage queries.
    pub fn native_name(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
        }
    }
}

/// A single field comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Dotted field path, possibly prefixed by a relation path.
    pub field: String,
    /// Comparison operator.
    #[serde(rename = "operation")]
    pub operator: Operator,
    /// Right-hand side value.
    pub value: Scalar,
}

impl Predicate {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Scalar>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Structurally recursive filter as received from the query transport.
///
/// Every key is optional. A tree with no key set constrains nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterTree {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<FilterTree>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<FilterTree>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<FilterTree>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
}

/// Typed logical filter.
///
/// Filters are immutable inputs: every transformation over a `FilterNode`
/// returns a new tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FilterTree", into = "FilterTree")]
pub enum FilterNode {
    Predicate(Predicate),
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Empty,
}

impl FilterNode {
    /// Shorthand for a predicate leaf.
    pub fn predicate(field: impl Into<String>, operator: Operator, value: impl Into<Scalar>) -> Self {
        FilterNode::Predicate(Predicate::new(field, operator, value))
    }

    /// Shorthand for an equality predicate.
    pub fn eq(field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::predicate(field, Operator::Eq, value)
    }

    /// Wrap a node in a negation.
    pub fn negate(node: FilterNode) -> Self {
        FilterNode::Not(Box::new(node))
    }

    /// Number of predicate leaves in the tree.
    pub fn predicate_count(&self) -> usize {
        match self {
            FilterNode::Predicate(_) => 1,
            FilterNode::And(children) | FilterNode::Or(children) => {
                children.iter().map(FilterNode::predicate_count).sum()
            }
            FilterNode::Not(child) => child.predicate_count(),
            FilterNode::Empty => 0,
        }
    }

    /// True when the tree contains only `And` connectives above its predicates.
    pub fn is_conjunctive(&self) -> bool {
        match self {
            FilterNode::Predicate(_) | FilterNode::Empty => true,
            FilterNode::And(children) => children.iter().all(FilterNode::is_conjunctive),
            FilterNode::Or(_) | FilterNode::Not(_) => false,
        }
    }
}

impl From<FilterTree> for FilterNode {
    fn from(tree: FilterTree) -> Self {
        let mut parts = Vec::new();
        if let Some(predicate) = tree.filter {
            parts.push(FilterNode::Predicate(predicate));
        }
        if let Some(children) = tree.and {
            parts.push(FilterNode::And(children.into_iter().map(Into::into).collect()));
        }
        if let Some(children) = tree.or {
            parts.push(FilterNode::Or(children.into_iter().map(Into::into).collect()));
        }
        if let Some(child) = tree.not {
            parts.push(FilterNode::Not(Box::new((*child).into())));
        }

        match parts.len() {
            0 => FilterNode::Empty,
            1 => parts.remove(0),
            _ => FilterNode::And(parts),
        }
    }
}

impl From<FilterNode> for FilterTree {
    fn from(node: FilterNode) -> Self {
        match node {
            FilterNode::Predicate(p) => FilterTree {
                filter: Some(p),
                ..Default::default()
            },
            FilterNode::And(children) => FilterTree {
                and: Some(children.into_iter().map(Into::into).collect()),
                ..Default::default()
            },
            FilterNode::Or(children) => FilterTree {
                or: Some(children.into_iter().map(Into::into).collect()),
                ..Default::default()
            },
            FilterNode::Not(child) => FilterTree {
                not: Some(Box::new((*child).into())),
                ..Default::default()
            },
            FilterNode::Empty => FilterTree::default(),
        }
    }
}
