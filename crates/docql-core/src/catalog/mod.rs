//! Entity catalog.
//!
//! Describes the collections behind each entity type, the fields that must
//! always be projected, and the relations a filter or selection may traverse.

mod entity;
mod relation;

pub use entity::{EntityDef, EntityKind};
pub use relation::{Link, RelationDef};

use std::collections::HashMap;

use docql_proto::RelationSpec;

/// Registry of entity definitions.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entities: HashMap<EntityKind, EntityDef>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity definition, replacing any previous one.
    pub fn with_entity(mut self, def: EntityDef) -> Self {
        self.entities.insert(def.kind, def);
        self
    }

    /// Get the definition of an entity type.
    ///
    /// Every kind is registered by [`Catalog::standard`]; a custom catalog
    /// missing a kind yields `None`.
    pub fn get(&self, kind: EntityKind) -> Option<&EntityDef> {
        self.entities.get(&kind)
    }

    /// Iterate over every registered entity definition.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.values()
    }

    /// The users / orders / products / reviews / tests schema.
    pub fn standard() -> Self {
        let user = EntityDef::new(EntityKind::User, "users").with_relation(RelationDef::has_many(
            "orders",
            EntityKind::Order,
            RelationSpec::new("orders", "_id", "user_id", "orders"),
        ));

        let order = EntityDef::new(EntityKind::Order, "orders")
            .with_linking_field("user_id")
            .with_linking_field("items.product_id")
            .with_relation(RelationDef::belongs_to(
                "user",
                EntityKind::User,
                RelationSpec::new("users", "user_id", "_id", "users"),
            ))
            .with_relation(RelationDef::belongs_to(
                "items.product",
                EntityKind::Product,
                RelationSpec::new("products", "items.product_id", "_id", "products"),
            ))
            .with_relation(
                RelationDef::filter_only(
                    "items.product.reviews",
                    EntityKind::Review,
                    RelationSpec::new("reviews", "products._id", "product_id", "reviews"),
                )
                .with_parent("items.product"),
            );

        let product = EntityDef::new(EntityKind::Product, "products").with_relation(
            RelationDef::has_many(
                "reviews",
                EntityKind::Review,
                RelationSpec::new("reviews", "_id", "product_id", "reviews"),
            ),
        );

        let review = EntityDef::new(EntityKind::Review, "reviews")
            .with_linking_field("product_id")
            .with_linking_field("user_id")
            .with_relation(RelationDef::belongs_to(
                "product",
                EntityKind::Product,
                RelationSpec::new("products", "product_id", "_id", "products"),
            ))
            .with_relation(RelationDef::belongs_to(
                "user",
                EntityKind::User,
                RelationSpec::new("users", "user_id", "_id", "users"),
            ));

        let test = EntityDef::new(EntityKind::Test, "tests");

        let test_plan = EntityDef::new(EntityKind::TestPlan, "test_plans")
            .with_linking_field("test_id")
            .with_relation(RelationDef::embedded(
                "test",
                EntityKind::Test,
                RelationSpec::new("tests", "test_id", "_id", "test"),
            ));

        let test_result = EntityDef::new(EntityKind::TestResult, "test_results")
            .with_linking_field("test_id")
            .with_linking_field("test_plan_id")
            .with_relation(RelationDef::embedded(
                "test",
                EntityKind::Test,
                RelationSpec::new("tests", "test_id", "_id", "test"),
            ))
            .with_relation(RelationDef::embedded(
                "test_plan",
                EntityKind::TestPlan,
                RelationSpec::new("test_plans", "test_plan_id", "_id", "test_plan"),
            ));

        Self::new()
            .with_entity(user)
            .with_entity(order)
            .with_entity(product)
            .with_entity(review)
            .with_entity(test)
            .with_entity(test_plan)
            .with_entity(test_result)
    }
}
