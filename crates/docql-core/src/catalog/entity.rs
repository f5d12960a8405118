//! Entity definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::relation::RelationDef;

/// The entity types served by the query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Order,
    Product,
    Review,
    Test,
    TestPlan,
    TestResult,
}

impl EntityKind {
    /// Every entity kind, in catalog order.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::User,
        EntityKind::Order,
        EntityKind::Product,
        EntityKind::Review,
        EntityKind::Test,
        EntityKind::TestPlan,
        EntityKind::TestResult,
    ];

    /// Singular entity name.
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Order => "order",
            EntityKind::Product => "product",
            EntityKind::Review => "review",
            EntityKind::Test => "test",
            EntityKind::TestPlan => "test_plan",
            EntityKind::TestResult => "test_result",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An entity definition (collection schema as far as the query core needs it).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDef {
    /// Entity type.
    pub kind: EntityKind,
    /// Backing collection name.
    pub collection: String,
    /// Fields always projected so relations stay traversable.
    pub linking_fields: Vec<String>,
    /// Relations in join order (parents before children).
    pub relations: Vec<RelationDef>,
}

impl EntityDef {
    /// Create a new entity definition with `_id` as its only linking field.
    pub fn new(kind: EntityKind, collection: impl Into<String>) -> Self {
        Self {
            kind,
            collection: collection.into(),
            linking_fields: vec![docql_proto::ID_FIELD.to_string()],
            relations: Vec::new(),
        }
    }

    /// Add a mandatory linking field.
    pub fn with_linking_field(mut self, field: impl Into<String>) -> Self {
        self.linking_fields.push(field.into());
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Look up a relation by path.
    pub fn relation(&self, path: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.path == path)
    }

    /// Relation prefixes in partition order: longest first, so a nested
    /// relation claims its predicates before its parent does.
    pub fn filter_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.relations.iter().map(RelationDef::prefix).collect();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        prefixes
    }

    /// Prefixes of relations whose fields never come from the listing
    /// pipeline itself.
    pub fn resolved_prefixes(&self) -> Vec<String> {
        self.relations
            .iter()
            .filter(|r| !r.is_embedded())
            .map(RelationDef::prefix)
            .collect()
    }
}
