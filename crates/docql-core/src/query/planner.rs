//! Pipeline construction for entity listings.
//!
//! [`PipelineBuilder`] assembles the fixed stage order
//! `match → (lookup → unwind)* → project`. [`ListingPlanner`] decides which
//! relations of an entity take part in a listing and feeds the builder.

use docql_proto::{
    FieldSelection, FilterNode, Lookup, NativeQuery, Pipeline, Projection, RelationSpec, Stage,
    Unwind, ID_FIELD,
};
use tracing::debug;

use super::filter::{FilterCompiler, Partition};
use super::selector::FieldSelector;
use crate::catalog::{Catalog, EntityDef};

/// Assembles storage pipelines. Performs no validation of paths or join
/// targets; malformed pipelines are rejected by the store when executed.
pub struct PipelineBuilder;

impl PipelineBuilder {
    /// Build a pipeline from the base query, the relations to join (in join
    /// order) with their partitioned filters, and the final projection.
    ///
    /// Every join is followed by a non-preserving flatten, so a relation with
    /// no matching documents drops its host.
    pub fn build(
        base_query: NativeQuery,
        relations: &[(RelationSpec, Option<FilterNode>)],
        projection: &Projection,
    ) -> Pipeline {
        let mut pipeline = Pipeline::new().with_stage(Stage::Match(base_query));

        for (relation, filter) in relations {
            let inner = filter.as_ref().map(FilterCompiler::compile_query);
            pipeline.push(Stage::Lookup(Lookup::from_relation(relation, inner)));
            pipeline.push(Stage::Unwind(Unwind {
                path: relation.alias.clone(),
            }));
        }

        pipeline.push(Stage::Project(projection.clone()));
        pipeline
    }
}

/// A planned entity listing.
#[derive(Debug, Clone)]
pub struct ListingPlan {
    /// Pipeline to run on the entity collection.
    pub pipeline: Pipeline,
    /// Full projection of the caller's selection, including relation paths.
    pub projection: Projection,
    /// Paths of the relations joined by the pipeline, in join order.
    pub joined: Vec<String>,
}

/// Plans listings for one entity type.
pub struct ListingPlanner<'a> {
    entity: &'a EntityDef,
    catalog: &'a Catalog,
}

impl<'a> ListingPlanner<'a> {
    /// The catalog supplies the linking fields of inline joined values.
    pub fn new(entity: &'a EntityDef, catalog: &'a Catalog) -> Self {
        Self { entity, catalog }
    }

    /// Plan a listing of the entity's collection.
    ///
    /// A relation is joined when its partition bucket is non-empty, when it
    /// is embedded and the selection reaches into it, or when a joined
    /// relation depends on it.
    pub fn plan(&self, selection: &FieldSelection, filter: Option<&FilterNode>) -> ListingPlan {
        let entity = self.entity;
        let projection = FieldSelector::for_entity(entity).project(selection);
        let prefixes = entity.filter_prefixes();

        let partition = match filter {
            Some(node) => FilterCompiler::partition_by_prefix(node, &prefixes),
            None => Partition {
                buckets: vec![None; prefixes.len()],
                remainder: None,
            },
        };

        let bucket_for = |prefix: &str| {
            prefixes
                .iter()
                .position(|p| p == prefix)
                .and_then(|i| partition.bucket(i))
        };

        let mut included: Vec<bool> = entity
            .relations
            .iter()
            .map(|relation| {
                let prefix = relation.prefix();
                bucket_for(&prefix).is_some()
                    || (relation.is_embedded() && projection.references_prefix(&prefix))
            })
            .collect();

        // Children come after their parents, so one reverse pass reaches
        // every ancestor.
        for index in (0..entity.relations.len()).rev() {
            if !included[index] {
                continue;
            }
            if let Some(parent) = &entity.relations[index].parent {
                if let Some(p) = entity.relations.iter().position(|r| &r.path == parent) {
                    included[p] = true;
                }
            }
        }

        let relations: Vec<(RelationSpec, Option<FilterNode>)> = entity
            .relations
            .iter()
            .zip(&included)
            .filter(|(_, included)| **included)
            .map(|(relation, _)| (relation.join.clone(), bucket_for(&relation.prefix()).cloned()))
            .collect();

        let joined: Vec<String> = entity
            .relations
            .iter()
            .zip(&included)
            .filter(|(_, included)| **included)
            .map(|(relation, _)| relation.path.clone())
            .collect();

        // Inline joined values keep their id and linking fields so they can
        // seed the target's loader.
        let mut storage_projection = projection.without_prefixes(&entity.resolved_prefixes());
        for relation in &entity.relations {
            if !relation.is_embedded() || !projection.references_prefix(&relation.prefix()) {
                continue;
            }
            let prefix = relation.prefix();
            match self.catalog.get(relation.target) {
                Some(target) => {
                    for field in &target.linking_fields {
                        storage_projection.include(format!("{prefix}{field}"));
                    }
                }
                None => storage_projection.include(format!("{prefix}{ID_FIELD}")),
            }
        }
        let base_query = FilterCompiler::compile_optional(partition.remainder.as_ref());
        let pipeline = PipelineBuilder::build(base_query, &relations, &storage_projection);

        debug!(
            entity = %entity.kind,
            joined = ?joined,
            stages = pipeline.len(),
            "planned listing pipeline"
        );

        ListingPlan {
            pipeline,
            projection,
            joined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, EntityKind};
    use docql_proto::Operator;
    use serde_json::json;

    fn assert_stage_order(pipeline: &Pipeline) {
        let stages = pipeline.stages();
        assert_eq!(stages.first().map(Stage::kind), Some("match"));
        assert_eq!(stages.last().map(Stage::kind), Some("project"));
        for (i, stage) in stages.iter().enumerate() {
            if let Stage::Lookup(lookup) = stage {
                match stages.get(i + 1) {
                    Some(Stage::Unwind(unwind)) => assert_eq!(unwind.path, lookup.alias),
                    other => panic!("lookup not followed by unwind: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_build_without_relations() {
        let projection: Projection = ["_id", "name"].into_iter().collect();
        let pipeline = PipelineBuilder::build(NativeQuery::Empty, &[], &projection);

        assert_stage_order(&pipeline);
        assert_eq!(
            serde_json::to_value(&pipeline).unwrap(),
            json!([{"match": {}}, {"project": {"_id": true, "name": true}}])
        );
    }

    #[test]
    fn test_build_keeps_relation_order() {
        let relations = vec![
            (RelationSpec::new("products", "items.product_id", "_id", "products"), None),
            (
                RelationSpec::new("reviews", "products._id", "product_id", "reviews"),
                Some(FilterNode::predicate("rating", Operator::Gte, 4)),
            ),
        ];
        let pipeline = PipelineBuilder::build(NativeQuery::eq("status", "shipped"), &relations, &Projection::new());

        assert_stage_order(&pipeline);
        let kinds: Vec<&str> = pipeline.stages().iter().map(Stage::kind).collect();
        assert_eq!(kinds, vec!["match", "lookup", "unwind", "lookup", "unwind", "project"]);
        match &pipeline.stages()[3] {
            Stage::Lookup(lookup) => {
                assert_eq!(lookup.from, "reviews");
                assert_eq!(lookup.pipeline.len(), 1);
            }
            other => panic!("unexpected stage {other:?}"),
        }
    }

    #[test]
    fn test_order_listing_with_user_filter() {
        let catalog = Catalog::standard();
        let order = catalog.get(EntityKind::Order).unwrap();
        let selection = FieldSelection::leaves(["status"])
            .with_node("user", FieldSelection::leaves(["name"]));
        let filter = FilterNode::And(vec![
            FilterNode::eq("status", "SHIPPED"),
            FilterNode::eq("user.profile.location", "IND"),
        ]);

        let plan = ListingPlanner::new(order, &catalog).plan(&selection, Some(&filter));

        assert_stage_order(&plan.pipeline);
        assert_eq!(plan.joined, vec!["user"]);
        assert!(plan.projection.contains("user.name"));
        assert_eq!(
            serde_json::to_value(&plan.pipeline).unwrap(),
            json!([
                {"match": {"status": {"eq": "SHIPPED"}}},
                {"lookup": {
                    "from": "users",
                    "localField": "user_id",
                    "foreignField": "_id",
                    "as": "users",
                    "pipeline": [{"match": {"profile.location": {"eq": "IND"}}}]
                }},
                {"unwind": {"path": "users"}},
                {"project": {"_id": true, "items.product_id": true, "status": true, "user_id": true}}
            ])
        );
    }

    #[test]
    fn test_review_filter_pulls_in_product_join() {
        let catalog = Catalog::standard();
        let order = catalog.get(EntityKind::Order).unwrap();
        let filter = FilterNode::predicate("items.product.reviews.rating", Operator::Gte, 4);

        let plan = ListingPlanner::new(order, &catalog).plan(&FieldSelection::default(), Some(&filter));

        assert_stage_order(&plan.pipeline);
        assert_eq!(plan.joined, vec!["items.product", "items.product.reviews"]);
        match &plan.pipeline.stages()[1] {
            Stage::Lookup(lookup) => assert!(lookup.pipeline.is_empty()),
            other => panic!("unexpected stage {other:?}"),
        }
    }

    #[test]
    fn test_embedded_relation_joined_for_projection() {
        let catalog = Catalog::standard();
        let test_result = catalog.get(EntityKind::TestResult).unwrap();
        let selection = FieldSelection::leaves(["name"])
            .with_node("test_plan", FieldSelection::leaves(["name"]));

        let plan = ListingPlanner::new(test_result, &catalog).plan(&selection, None);

        assert_stage_order(&plan.pipeline);
        assert_eq!(plan.joined, vec!["test_plan"]);
        match plan.pipeline.stages().last() {
            Some(Stage::Project(projection)) => {
                assert!(projection.contains("test_plan.name"));
                assert!(projection.contains("test_plan._id"));
                assert!(!projection.contains("test._id"));
            }
            other => panic!("unexpected stage {other:?}"),
        }
    }

    #[test]
    fn test_embedded_projection_keeps_target_links() {
        let catalog = Catalog::standard();
        let test_result = catalog.get(EntityKind::TestResult).unwrap();
        let selection = FieldSelection::default().with_node("test_plan", FieldSelection::leaves(["name"]));

        let plan = ListingPlanner::new(test_result, &catalog).plan(&selection, None);

        match plan.pipeline.stages().last() {
            Some(Stage::Project(projection)) => {
                assert!(projection.contains("test_plan._id"));
                assert!(projection.contains("test_plan.test_id"));
            }
            other => panic!("unexpected stage {other:?}"),
        }
    }

    #[test]
    fn test_no_filter_no_joins() {
        let catalog = Catalog::standard();
        let review = catalog.get(EntityKind::Review).unwrap();
        let plan = ListingPlanner::new(review, &catalog).plan(&FieldSelection::leaves(["rating"]), None);

        assert_stage_order(&plan.pipeline);
        assert!(plan.joined.is_empty());
        assert_eq!(plan.pipeline.len(), 2);
    }
}
