//! Field selection to storage projection.

use docql_proto::{FieldSelection, Projection, SelectionNode};

use crate::catalog::EntityDef;

/// Builds storage projections for one entity type.
///
/// The projection is always seeded with the entity's linking fields so that
/// relations can be traversed even when the caller did not select them.
/// Field names are not validated; unknown paths are left for the store to
/// ignore.
#[derive(Debug, Clone, Copy)]
pub struct FieldSelector<'a> {
    linking_fields: &'a [String],
}

impl<'a> FieldSelector<'a> {
    pub fn new(linking_fields: &'a [String]) -> Self {
        Self { linking_fields }
    }

    pub fn for_entity(def: &'a EntityDef) -> Self {
        Self::new(&def.linking_fields)
    }

    /// Project a selection rooted at the entity.
    pub fn project(&self, selection: &FieldSelection) -> Projection {
        self.project_under(selection, "")
    }

    /// Project a selection whose paths are prefixed by `parent_path`.
    pub fn project_under(&self, selection: &FieldSelection, parent_path: &str) -> Projection {
        let mut projection: Projection = self.linking_fields.iter().cloned().collect();
        projection.merge(selection_paths(selection, parent_path));
        projection
    }
}

/// Flatten a selection into dotted paths without any seeded fields.
pub fn selection_paths(selection: &FieldSelection, parent_path: &str) -> Projection {
    let mut projection = Projection::new();
    for node in selection.nodes() {
        let path = join_path(parent_path, node.name());
        match node {
            SelectionNode::Leaf(_) => projection.include(path),
            SelectionNode::Node { children, .. } => {
                projection.merge(selection_paths(children, &path));
            }
        }
    }
    projection
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}
