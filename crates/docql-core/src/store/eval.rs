//! Native query evaluation against raw documents.

use std::cmp::Ordering;

use docql_proto::document::path_values;
use docql_proto::{Document, NativeQuery, Operator};
use serde_json::Value;

use crate::error::StoreError;

/// Reject paths the store cannot address: empty paths, empty segments and
/// `$`-prefixed segments.
pub fn validate_path(path: &str) -> Result<(), StoreError> {
    if path.is_empty()
        || path
            .split('.')
            .any(|segment| segment.is_empty() || segment.starts_with('$'))
    {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Evaluates native queries with document-store semantics.
///
/// A comparison on a path that reaches several values (through arrays)
/// matches if any value matches; `ne` matches only if no value is equal,
/// which includes documents missing the field.
pub struct QueryEvaluator;

impl QueryEvaluator {
    /// Evaluate a query against a document.
    pub fn matches(query: &NativeQuery, doc: &Document) -> Result<bool, StoreError> {
        match query {
            NativeQuery::Empty => Ok(true),
            NativeQuery::Compare {
                field,
                operator,
                value,
            } => {
                validate_path(field)?;
                let expected = value.to_json();
                let candidates = flatten(path_values(doc, field));
                Ok(match operator {
                    Operator::Neq => !candidates.iter().any(|v| values_equal(v, &expected)),
                    Operator::Eq => candidates.iter().any(|v| values_equal(v, &expected)),
                    ordering => candidates.iter().any(|v| {
                        compare_values(v, &expected).is_some_and(|ord| satisfies(*ordering, ord))
                    }),
                })
            }
            NativeQuery::And(children) => {
                for child in children {
                    if !Self::matches(child, doc)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            NativeQuery::Or(children) => {
                for child in children {
                    if Self::matches(child, doc)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            NativeQuery::Not(child) => Ok(!Self::matches(child, doc)?),
        }
    }
}

/// Expand arrays one level so that `tags: ["a", "b"]` matches `tags eq "a"`.
pub(crate) fn flatten(values: Vec<&Value>) -> Vec<&Value> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::Array(items) => out.extend(items.iter()),
            other => out.push(other),
        }
    }
    out
}

/// Equality with numeric widening between integers and floats.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None, // Incompatible types never match
    }
}

fn satisfies(operator: Operator, ordering: Ordering) -> bool {
    match operator {
        Operator::Gt => ordering == Ordering::Greater,
        Operator::Gte => ordering != Ordering::Less,
        Operator::Lt => ordering == Ordering::Less,
        Operator::Lte => ordering != Ordering::Greater,
        Operator::Eq => ordering == Ordering::Equal,
        Operator::Neq => ordering != Ordering::Equal,
    }
}
