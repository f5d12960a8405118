//! Field selections and storage projections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A node of a nested field selection.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionNode {
    /// A plain field name.
    Leaf(String),
    /// A field whose value is itself selected into.
    Node { name: String, children: FieldSelection },
}

impl SelectionNode {
    /// Name of the selected field.
    pub fn name(&self) -> &str {
        match self {
            SelectionNode::Leaf(name) | SelectionNode::Node { name, .. } => name,
        }
    }
}

/// An ordered, immutable field selection tree.
///
/// On the wire this is a list whose elements are either a field name or a
/// single-key object mapping a field name to a nested selection list:
/// `["name", {"items": ["quantity"]}]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RawSelection>", into = "Vec<RawSelection>")]
pub struct FieldSelection(Vec<SelectionNode>);

impl FieldSelection {
    pub fn new(nodes: Vec<SelectionNode>) -> Self {
        Self(nodes)
    }

    /// A flat selection of leaf fields.
    pub fn leaves<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(|n| SelectionNode::Leaf(n.into())).collect())
    }

    /// Append a nested selection.
    pub fn with_node(mut self, name: impl Into<String>, children: FieldSelection) -> Self {
        self.0.push(SelectionNode::Node {
            name: name.into(),
            children,
        });
        self
    }

    pub fn nodes(&self) -> &[SelectionNode] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Children of the first nested node called `name`.
    pub fn child(&self, name: &str) -> Option<&FieldSelection> {
        self.0.iter().find_map(|node| match node {
            SelectionNode::Node { name: n, children } if n == name => Some(children),
            _ => None,
        })
    }

    /// Follow a dotted path of nested nodes.
    pub fn descend(&self, path: &str) -> Option<&FieldSelection> {
        path.split('.')
            .try_fold(self, |selection, segment| selection.child(segment))
    }
}

/// Serde shape of a selection element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawSelection {
    Leaf(String),
    Nested(BTreeMap<String, Vec<RawSelection>>),
}

impl TryFrom<Vec<RawSelection>> for FieldSelection {
    type Error = Error;

    fn try_from(raw: Vec<RawSelection>) -> Result<Self, Self::Error> {
        let mut nodes = Vec::with_capacity(raw.len());
        for item in raw {
            match item {
                RawSelection::Leaf(name) => nodes.push(SelectionNode::Leaf(name)),
                RawSelection::Nested(map) => {
                    if map.len() != 1 {
                        return Err(Error::InvalidSelection(format!(
                            "nested selection must have exactly one key, found {}",
                            map.len()
                        )));
                    }
                    for (name, children) in map {
                        nodes.push(SelectionNode::Node {
                            name,
                            children: FieldSelection::try_from(children)?,
                        });
                    }
                }
            }
        }
        Ok(Self(nodes))
    }
}

impl From<FieldSelection> for Vec<RawSelection> {
    fn from(selection: FieldSelection) -> Self {
        selection
            .0
            .into_iter()
            .map(|node| match node {
                SelectionNode::Leaf(name) => RawSelection::Leaf(name),
                SelectionNode::Node { name, children } => {
                    RawSelection::Nested(BTreeMap::from([(name, children.into())]))
                }
            })
            .collect()
    }
}

/// Mapping from dotted path to inclusion flag.
///
/// Keys are unique; setting an existing path overwrites its flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Projection(BTreeMap<String, bool>);

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a path as included.
    pub fn include(&mut self, path: impl Into<String>) {
        self.0.insert(path.into(), true);
    }

    /// Set the flag for a path.
    pub fn set(&mut self, path: impl Into<String>, included: bool) {
        self.0.insert(path.into(), included);
    }

    /// Merge another projection into this one; `other` wins on collisions.
    pub fn merge(&mut self, other: Projection) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.get(path).copied().unwrap_or(false)
    }

    /// Included paths in key order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, included)| **included)
            .map(|(path, _)| path.as_str())
    }

    /// All entries including excluded ones.
    pub fn entries(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(path, flag)| (path.as_str(), *flag))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when any included path lies under `prefix` (a dotted prefix
    /// ending in `.`).
    pub fn references_prefix(&self, prefix: &str) -> bool {
        self.paths().any(|path| path.starts_with(prefix))
    }

    /// Copy of this projection without paths under any of `prefixes`.
    pub fn without_prefixes(&self, prefixes: &[String]) -> Projection {
        Projection(
            self.0
                .iter()
                .filter(|(path, _)| !prefixes.iter().any(|p| path.starts_with(p.as_str())))
                .map(|(path, flag)| (path.clone(), *flag))
                .collect(),
        )
    }
}

impl<S: Into<String>> FromIterator<S> for Projection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Projection(iter.into_iter().map(|p| (p.into(), true)).collect())
    }
}
