//! Integration tests for listing and by-id resolution.

use std::sync::Arc;

use docql_core::proto::{FieldSelection, FilterNode, FilterTree, Operator};
use docql_core::{
    Catalog, ContextConfig, EntityKind, Error, LoaderConfig, MemoryStore, RequestContext, Resolver,
    StoreError,
};
use serde_json::{json, Value};

const U1: &str = "650000000000000000000001";
const U2: &str = "650000000000000000000002";
const U3: &str = "650000000000000000000003";
const P1: &str = "651000000000000000000001";
const P2: &str = "651000000000000000000002";
const P3: &str = "651000000000000000000003";
const O1: &str = "652000000000000000000001";
const O2: &str = "652000000000000000000002";
const O3: &str = "652000000000000000000003";
const T1: &str = "654000000000000000000001";
const TP1: &str = "655000000000000000000001";

struct TestContext {
    store: Arc<MemoryStore>,
    catalog: Arc<Catalog>,
}

impl TestContext {
    fn new() -> Self {
        let catalog = Catalog::standard();
        let store = MemoryStore::for_catalog(&catalog);
        store.load_seed(seed()).unwrap();

        Self {
            store: Arc::new(store),
            catalog: Arc::new(catalog),
        }
    }

    /// A fresh per-request context over the shared store.
    fn request(&self) -> RequestContext {
        self.request_with(ContextConfig::new())
    }

    fn request_with(&self, config: ContextConfig) -> RequestContext {
        RequestContext::new(self.store.clone(), self.catalog.clone(), config)
    }

    fn calls(&self) -> usize {
        self.store.call_count()
    }
}

fn seed() -> Value {
    json!({
        "users": [
            {"_id": U1, "name": "Ada", "email": "ada@example.com", "profile": {"age": 36, "location": "IND"}},
            {"_id": U2, "name": "Grace", "email": "grace@example.com", "profile": {"age": 45, "location": "USA"}},
            {"_id": U3, "name": "Linus", "email": "linus@example.com", "profile": {"age": 28, "location": "FIN"}}
        ],
        "products": [
            {"_id": P1, "name": "Lamp", "price": 25},
            {"_id": P2, "name": "Mug", "price": 8},
            {"_id": P3, "name": "Desk", "price": 120}
        ],
        "reviews": [
            {"_id": "653000000000000000000001", "product_id": P1, "user_id": U2, "rating": 5},
            {"_id": "653000000000000000000002", "product_id": P1, "user_id": U1, "rating": 3},
            {"_id": "653000000000000000000003", "product_id": P3, "user_id": U1, "rating": 2}
        ],
        "orders": [
            {"_id": O1, "user_id": U1, "status": "SHIPPED",
             "items": [{"product_id": P1, "quantity": 2}, {"product_id": P2, "quantity": 1}]},
            {"_id": O2, "user_id": U1, "status": "PENDING",
             "items": [{"product_id": P3, "quantity": 1}]},
            {"_id": O3, "user_id": U2, "status": "SHIPPED",
             "items": [{"product_id": P2, "quantity": 4}]}
        ],
        "tests": [
            {"_id": T1, "name": "login"}
        ],
        "test_plans": [
            {"_id": TP1, "name": "smoke", "test_id": T1}
        ],
        "test_results": [
            {"_id": "656000000000000000000001", "test_id": T1, "test_plan_id": TP1, "status": "passed"}
        ]
    })
}

fn ids(docs: &[docql_core::proto::Document]) -> Vec<&str> {
    docs.iter()
        .map(|doc| doc["_id"].as_str().unwrap_or_default())
        .collect()
}

fn selection(value: Value) -> FieldSelection {
    serde_json::from_value(value).unwrap()
}

fn filter(value: Value) -> FilterNode {
    serde_json::from_value::<FilterTree>(value).unwrap().into()
}

#[tokio::test]
async fn test_list_with_relation_filter() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let filter = filter(json!({"and": [
        {"filter": {"field": "status", "operation": "EQ", "value": "SHIPPED"}},
        {"filter": {"field": "user.profile.location", "operation": "EQ", "value": "IND"}}
    ]}));

    let orders = Resolver::new(&request)
        .list(EntityKind::Order, &selection(json!(["_id", "status"])), Some(&filter))
        .await
        .unwrap();

    assert_eq!(ids(&orders), vec![O1]);
    assert_eq!(ctx.calls(), 1);
}

#[tokio::test]
async fn test_relation_filter_is_inner_join() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let filter = FilterNode::eq("user.profile.location", "FRA");

    let orders = Resolver::new(&request)
        .list(EntityKind::Order, &selection(json!(["_id"])), Some(&filter))
        .await
        .unwrap();

    assert!(orders.is_empty());
}

#[tokio::test]
async fn test_array_relation_filter_duplicates_hosts() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let filter = FilterNode::predicate("items.product.price", Operator::Gt, 5);

    let orders = Resolver::new(&request)
        .list(EntityKind::Order, &selection(json!(["_id"])), Some(&filter))
        .await
        .unwrap();

    // One row per matching product of each order
    assert_eq!(ids(&orders), vec![O1, O1, O2, O3]);
}

#[tokio::test]
async fn test_nested_relation_filter() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let filter = FilterNode::predicate("items.product.reviews.rating", Operator::Gte, 4);

    let orders = Resolver::new(&request)
        .list(EntityKind::Order, &selection(json!(["_id", "status"])), Some(&filter))
        .await
        .unwrap();

    assert_eq!(ids(&orders), vec![O1]);
    assert_eq!(ctx.calls(), 1);
}

#[tokio::test]
async fn test_or_across_relations_narrows_like_and() {
    // Partitioned pieces are applied as independent stages, so an `or`
    // spanning the base entity and a relation narrows to both sides.
    let ctx = TestContext::new();
    let request = ctx.request();
    let filter = FilterNode::Or(vec![
        FilterNode::eq("status", "PENDING"),
        FilterNode::eq("user.profile.location", "USA"),
    ]);

    let orders = Resolver::new(&request)
        .list(EntityKind::Order, &selection(json!(["_id"])), Some(&filter))
        .await
        .unwrap();

    assert!(orders.is_empty());
}

#[tokio::test]
async fn test_not_filter() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let filter = filter(json!({"not": {"filter": {"field": "status", "operation": "EQ", "value": "SHIPPED"}}}));

    let orders = Resolver::new(&request)
        .list(EntityKind::Order, &selection(json!(["_id"])), Some(&filter))
        .await
        .unwrap();

    assert_eq!(ids(&orders), vec![O2]);
}

#[tokio::test]
async fn test_nested_selection_batches_each_depth() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let selection = selection(json!([
        "name",
        {"orders": ["status", {"items": ["quantity", {"product": ["name", {"reviews": ["rating"]}]}]}]}
    ]));

    let users = Resolver::new(&request)
        .list(EntityKind::User, &selection, None)
        .await
        .unwrap();

    // users, orders, products, reviews
    assert_eq!(ctx.calls(), 4);
    assert_eq!(
        Value::Object(users[0].clone()),
        json!({
            "name": "Ada",
            "orders": [
                {"status": "SHIPPED", "items": [
                    {"quantity": 2, "product": {"name": "Lamp", "reviews": [{"rating": 5}, {"rating": 3}]}},
                    {"quantity": 1, "product": {"name": "Mug", "reviews": []}}
                ]},
                {"status": "PENDING", "items": [
                    {"quantity": 1, "product": {"name": "Desk", "reviews": [{"rating": 2}]}}
                ]}
            ]
        })
    );
    assert_eq!(Value::Object(users[2].clone()), json!({"name": "Linus", "orders": []}));

    // Products were cached by this request
    let product = Resolver::new(&request)
        .by_id(EntityKind::Product, P3, &selection_of(&["name"]))
        .await
        .unwrap();
    assert_eq!(product["name"], json!("Desk"));
    assert_eq!(ctx.calls(), 4);
}

fn selection_of(fields: &[&str]) -> FieldSelection {
    FieldSelection::leaves(fields.iter().copied())
}

#[tokio::test]
async fn test_belongs_to_from_reviews() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let selection = selection(json!(["rating", {"user": ["name"]}, {"product": ["name"]}]));

    let reviews = Resolver::new(&request)
        .list(EntityKind::Review, &selection, None)
        .await
        .unwrap();

    assert_eq!(reviews.len(), 3);
    assert_eq!(
        Value::Object(reviews[0].clone()),
        json!({"rating": 5, "user": {"name": "Grace"}, "product": {"name": "Lamp"}})
    );
    // reviews, users, products
    assert_eq!(ctx.calls(), 3);
}

#[tokio::test]
async fn test_sibling_subtrees_share_each_depth() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let selection = selection(json!([
        "rating",
        {"product": [{"reviews": [{"user": ["name"]}]}]},
        {"user": [{"orders": [{"user": ["email"]}]}]}
    ]));

    let reviews = Resolver::new(&request)
        .list(EntityKind::Review, &selection, None)
        .await
        .unwrap();

    assert_eq!(
        Value::Object(reviews[0].clone()),
        json!({
            "rating": 5,
            "product": {"reviews": [{"user": {"name": "Grace"}}, {"user": {"name": "Ada"}}]},
            "user": {"orders": [{"user": {"email": "grace@example.com"}}]}
        })
    );
    // reviews; products and users; reviews and orders pipelines; users again
    assert_eq!(ctx.calls(), 6);
    assert_eq!(request.loader(EntityKind::User).unwrap().stats().fetches, 2);
}

#[tokio::test]
async fn test_same_relation_at_one_depth_runs_one_pipeline() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let selection = selection(json!([
        {"user": [{"orders": [{"user": [{"orders": ["status"]}]}]}]},
        {"product": [{"reviews": [{"user": [{"orders": ["status"]}]}]}]}
    ]));

    let reviews = Resolver::new(&request)
        .list(EntityKind::Review, &selection, None)
        .await
        .unwrap();

    assert_eq!(
        Value::Object(reviews[0].clone()),
        json!({
            "user": {"orders": [{"user": {"orders": [{"status": "SHIPPED"}]}}]},
            "product": {"reviews": [
                {"user": {"orders": [{"status": "SHIPPED"}]}},
                {"user": {"orders": [{"status": "SHIPPED"}, {"status": "PENDING"}]}}
            ]}
        })
    );
    // reviews; products and users; orders and reviews pipelines; one orders
    // pipeline for both branches at the fourth depth
    assert_eq!(ctx.calls(), 6);
}

#[tokio::test]
async fn test_partially_listed_object_is_completed_by_id() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let resolver = Resolver::new(&request);

    resolver
        .list(EntityKind::User, &selection(json!([{"profile": ["age"]}])), None)
        .await
        .unwrap();
    let user = resolver
        .by_id(EntityKind::User, U1, &selection_of(&["profile"]))
        .await
        .unwrap();

    assert_eq!(Value::Object(user), json!({"profile": {"age": 36, "location": "IND"}}));
    assert_eq!(ctx.calls(), 2);
}

#[tokio::test]
async fn test_embedded_relations_come_from_the_listing() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let selection = selection(json!(["status", {"test": ["name"]}, {"test_plan": ["name"]}]));

    let results = Resolver::new(&request)
        .list(EntityKind::TestResult, &selection, None)
        .await
        .unwrap();

    assert_eq!(
        results.into_iter().map(Value::Object).collect::<Vec<_>>(),
        vec![json!({"status": "passed", "test": {"name": "login"}, "test_plan": {"name": "smoke"}})]
    );
    assert_eq!(ctx.calls(), 1);
}

#[tokio::test]
async fn test_embedded_relation_by_id_goes_through_loader() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let selection = selection(json!(["name", {"test": ["name"]}]));

    let plan = Resolver::new(&request)
        .by_id(EntityKind::TestPlan, TP1, &selection)
        .await
        .unwrap();

    assert_eq!(Value::Object(plan), json!({"name": "smoke", "test": {"name": "login"}}));
    assert_eq!(ctx.calls(), 2);
}

#[tokio::test]
async fn test_by_id_errors() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let resolver = Resolver::new(&request);

    let err = resolver
        .by_id(EntityKind::Order, "12345", &selection_of(&["status"]))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "validation error: invalid ID format: 12345. Check it and try again."
    );
    assert_eq!(ctx.calls(), 0);

    let missing = "652000000000000000000099";
    let err = resolver
        .by_id(EntityKind::Order, missing, &selection_of(&["status"]))
        .await
        .unwrap_err();
    assert_eq!(err, Error::not_found(EntityKind::Order, missing));
}

#[tokio::test]
async fn test_store_errors_surface() {
    let ctx = TestContext::new();
    let request = ctx.request();
    let filter = FilterNode::eq("status..bad", "x");

    let err = Resolver::new(&request)
        .list(EntityKind::Order, &selection_of(&["status"]), Some(&filter))
        .await
        .unwrap_err();

    assert_eq!(err, Error::Store(StoreError::InvalidPath("status..bad".into())));
    assert_eq!(ctx.calls(), 1);
}

#[tokio::test]
async fn test_requests_do_not_share_caches() {
    let ctx = TestContext::new();
    let config = ContextConfig::new().with_loader(LoaderConfig::new().with_max_batch_size(1));
    let selection = selection_of(&["name"]);

    let first = ctx.request_with(config.clone());
    Resolver::new(&first)
        .by_id(EntityKind::User, U1, &selection)
        .await
        .unwrap();
    Resolver::new(&first)
        .by_id(EntityKind::User, U1, &selection)
        .await
        .unwrap();
    assert_eq!(ctx.calls(), 1);

    let second = ctx.request_with(config);
    Resolver::new(&second)
        .by_id(EntityKind::User, U1, &selection)
        .await
        .unwrap();
    assert_eq!(ctx.calls(), 2);
}

#[tokio::test]
async fn test_batch_size_splits_reference_fetches() {
    let ctx = TestContext::new();
    let config = ContextConfig::new().with_loader(LoaderConfig::new().with_max_batch_size(2));
    let request = ctx.request_with(config);
    let selection = selection(json!(["_id", {"items": [{"product": ["name"]}]}]));

    Resolver::new(&request)
        .list(EntityKind::Order, &selection, None)
        .await
        .unwrap();

    // Listing, then three products split into two fetches
    assert_eq!(ctx.calls(), 3);
    assert_eq!(request.stats().fetches, 2);
}
