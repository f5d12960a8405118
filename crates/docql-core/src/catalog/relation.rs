//! Relation definitions between entities.

use docql_proto::RelationSpec;

use super::entity::EntityKind;

/// How a relation is reached when resolving a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Joined into listed documents under the join alias.
    Embedded,
    /// Host stores the target id; resolved through the target loader.
    BelongsTo,
    /// Target documents reference the host id.
    HasMany,
    /// Only joined to filter listings.
    FilterOnly,
}

/// A relation from one entity type to another.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    /// Dotted relation path on the host (e.g. "items.product").
    pub path: String,
    /// Related entity type.
    pub target: EntityKind,
    /// Join description used by listing pipelines.
    pub join: RelationSpec,
    /// Resolution strategy.
    pub link: Link,
    /// Relation that must be joined before this one.
    pub parent: Option<String>,
}

impl RelationDef {
    fn new(path: impl Into<String>, target: EntityKind, join: RelationSpec, link: Link) -> Self {
        Self {
            path: path.into(),
            target,
            join,
            link,
            parent: None,
        }
    }

    /// Create a belongs-to relation.
    pub fn belongs_to(path: impl Into<String>, target: EntityKind, join: RelationSpec) -> Self {
        Self::new(path, target, join, Link::BelongsTo)
    }

    /// Create a has-many relation.
    pub fn has_many(path: impl Into<String>, target: EntityKind, join: RelationSpec) -> Self {
        Self::new(path, target, join, Link::HasMany)
    }

    /// Create an embedded relation.
    pub fn embedded(path: impl Into<String>, target: EntityKind, join: RelationSpec) -> Self {
        Self::new(path, target, join, Link::Embedded)
    }

    /// Create a filter-only relation.
    pub fn filter_only(path: impl Into<String>, target: EntityKind, join: RelationSpec) -> Self {
        Self::new(path, target, join, Link::FilterOnly)
    }

    /// Set the parent relation.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Filter and projection prefix of this relation.
    pub fn prefix(&self) -> String {
        format!("{}.", self.path)
    }

    /// Path of the object or array holding the relation, if nested.
    pub fn container(&self) -> Option<&str> {
        self.path.rsplit_once('.').map(|(container, _)| container)
    }

    /// Key the resolved value is attached under.
    pub fn attach_key(&self) -> &str {
        self.path
            .rsplit_once('.')
            .map_or(self.path.as_str(), |(_, key)| key)
    }

    /// Field holding the reference, relative to the container.
    pub fn reference_field(&self) -> &str {
        match self.container() {
            Some(container) => self
                .join
                .local_field
                .strip_prefix(container)
                .and_then(|rest| rest.strip_prefix('.'))
                .unwrap_or(&self.join.local_field),
            None => &self.join.local_field,
        }
    }

    /// True when the relation is joined inline into listed documents.
    pub fn is_embedded(&self) -> bool {
        self.link == Link::Embedded
    }
}
