//! Filter compilation.
//!
//! Two independent operations over [`FilterNode`]:
//! - [`FilterCompiler::compile_query`] turns a filter into a native query.
//! - [`FilterCompiler::partition_by_prefix`] splits a filter into per-relation
//!   pieces keyed by field prefix plus a remainder for the primary entity.
//!
//! Partitioning keeps the connective of every node, so an `Or` or `Not` that
//! straddles relations is applied as independent join sub-filters. Once each
//! piece runs in its own join (with hosts dropped when the join comes back
//! empty), the combined effect is closer to an `And` of the pieces than to
//! the original tree evaluated on a fully joined document.

use docql_proto::{FilterNode, NativeQuery, Predicate};
use tracing::warn;

/// Result of splitting a filter by relation prefix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Partition {
    /// One entry per prefix, in prefix order. Field paths are stripped of the
    /// prefix.
    pub buckets: Vec<Option<FilterNode>>,
    /// Predicates matching no prefix.
    pub remainder: Option<FilterNode>,
}

impl Partition {
    /// Bucket for the prefix at `index`.
    pub fn bucket(&self, index: usize) -> Option<&FilterNode> {
        self.buckets.get(index).and_then(Option::as_ref)
    }

    /// Total predicates across buckets and remainder.
    pub fn predicate_count(&self) -> usize {
        self.buckets
            .iter()
            .flatten()
            .chain(self.remainder.iter())
            .map(FilterNode::predicate_count)
            .sum()
    }

    /// True when at least one relation bucket is populated.
    pub fn touches_relations(&self) -> bool {
        self.buckets.iter().any(Option::is_some)
    }
}

/// Compiles filter trees into native queries and relation partitions.
pub struct FilterCompiler;

impl FilterCompiler {
    /// Compile a filter into the store's native boolean query.
    ///
    /// `Not` becomes a native negation of its compiled child.
    pub fn compile_query(node: &FilterNode) -> NativeQuery {
        match node {
            FilterNode::Predicate(p) => NativeQuery::Compare {
                field: p.field.clone(),
                operator: p.operator,
                value: p.value.clone(),
            },
            FilterNode::And(children) => {
                NativeQuery::And(children.iter().map(Self::compile_query).collect())
            }
            FilterNode::Or(children) => {
                NativeQuery::Or(children.iter().map(Self::compile_query).collect())
            }
            FilterNode::Not(child) => NativeQuery::Not(Box::new(Self::compile_query(child))),
            FilterNode::Empty => NativeQuery::Empty,
        }
    }

    /// Compile an optional filter; absent filters match everything.
    pub fn compile_optional(node: Option<&FilterNode>) -> NativeQuery {
        node.map_or(NativeQuery::Empty, Self::compile_query)
    }

    /// Split a filter by field prefix.
    ///
    /// Each predicate goes to the first prefix (in list order) that its field
    /// starts with, with that prefix stripped, or to the remainder. `And`/`Or`
    /// nodes are rebuilt per bucket from the children that landed there;
    /// a single surviving child is returned on its own. `Not` wraps each
    /// piece of its child. Empty pieces are pruned to `None`.
    pub fn partition_by_prefix(node: &FilterNode, prefixes: &[String]) -> Partition {
        let partition = Self::partition_node(node, prefixes);

        if partition.touches_relations() && !node.is_conjunctive() {
            warn!(
                predicates = node.predicate_count(),
                "non-conjunctive filter spans relations; its parts are applied as independent join filters"
            );
        }

        partition
    }

    fn partition_node(node: &FilterNode, prefixes: &[String]) -> Partition {
        match node {
            FilterNode::Predicate(p) => Self::partition_predicate(p, prefixes),
            FilterNode::And(children) => {
                Self::partition_connective(children, prefixes, FilterNode::And)
            }
            FilterNode::Or(children) => {
                Self::partition_connective(children, prefixes, FilterNode::Or)
            }
            FilterNode::Not(child) => {
                let inner = Self::partition_node(child, prefixes);
                Partition {
                    buckets: inner
                        .buckets
                        .into_iter()
                        .map(|b| b.map(FilterNode::negate))
                        .collect(),
                    remainder: inner.remainder.map(FilterNode::negate),
                }
            }
            FilterNode::Empty => Partition {
                buckets: vec![None; prefixes.len()],
                remainder: None,
            },
        }
    }

    fn partition_predicate(predicate: &Predicate, prefixes: &[String]) -> Partition {
        let mut buckets = vec![None; prefixes.len()];

        let matched = prefixes
            .iter()
            .enumerate()
            .find_map(|(i, prefix)| predicate.field.strip_prefix(prefix.as_str()).map(|rest| (i, rest)));

        match matched {
            Some((index, stripped)) => {
                buckets[index] = Some(FilterNode::Predicate(Predicate {
                    field: stripped.to_string(),
                    operator: predicate.operator,
                    value: predicate.value.clone(),
                }));
                Partition {
                    buckets,
                    remainder: None,
                }
            }
            None => Partition {
                buckets,
                remainder: Some(FilterNode::Predicate(predicate.clone())),
            },
        }
    }

    fn partition_connective(
        children: &[FilterNode],
        prefixes: &[String],
        connective: fn(Vec<FilterNode>) -> FilterNode,
    ) -> Partition {
        let mut bucket_children: Vec<Vec<FilterNode>> = vec![Vec::new(); prefixes.len()];
        let mut remainder_children = Vec::new();

        for child in children {
            let part = Self::partition_node(child, prefixes);
            for (slot, piece) in bucket_children.iter_mut().zip(part.buckets) {
                slot.extend(piece);
            }
            remainder_children.extend(part.remainder);
        }

        Partition {
            buckets: bucket_children
                .into_iter()
                .map(|c| rebuild(c, connective))
                .collect(),
            remainder: rebuild(remainder_children, connective),
        }
    }
}

fn rebuild(mut children: Vec<FilterNode>, connective: fn(Vec<FilterNode>) -> FilterNode) -> Option<FilterNode> {
    match children.len() {
        0 => None,
        1 => children.pop(),
        _ => Some(connective(children)),
    }
}
