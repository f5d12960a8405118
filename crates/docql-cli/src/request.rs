//! Query request files.

use docql_core::{EntityKind, RequestContext, Resolver};
use docql_proto::{FieldSelection, FilterNode, FilterTree};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while decoding or answering a request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The request is well-formed JSON but asks for something unsupported.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Request file could not be decoded.
    #[error("request decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Query resolution failed.
    #[error(transparent)]
    Query(#[from] docql_core::Error),
}

/// One query: a listing when `id` is absent, a by-id lookup otherwise.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    pub entity: EntityKind,
    pub selection: FieldSelection,
    #[serde(default)]
    pub filter: Option<FilterTree>,
    #[serde(default)]
    pub id: Option<String>,
}

impl QueryRequest {
    pub fn from_json(text: &str) -> Result<Self, RequestError> {
        let request: QueryRequest = serde_json::from_str(text)?;
        if request.id.is_some() && request.filter.is_some() {
            return Err(RequestError::Invalid(
                "a by-id request cannot carry a filter".to_string(),
            ));
        }
        Ok(request)
    }

    /// Answer the request. Listings yield an array, by-id lookups a single
    /// object.
    pub async fn execute(&self, ctx: &RequestContext) -> Result<Value, RequestError> {
        let resolver = Resolver::new(ctx);
        match &self.id {
            Some(id) => {
                let doc = resolver.by_id(self.entity, id, &self.selection).await?;
                Ok(Value::Object(doc))
            }
            None => {
                let filter = self.filter.clone().map(FilterNode::from);
                let docs = resolver
                    .list(self.entity, &self.selection, filter.as_ref())
                    .await?;
                Ok(Value::Array(docs.into_iter().map(Value::Object).collect()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docql_core::{Catalog, ContextConfig, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> RequestContext {
        let catalog = Catalog::standard();
        let store = MemoryStore::for_catalog(&catalog);
        store
            .load_seed(json!({
                "users": [{"_id": "660000000000000000000001", "name": "Ada"}],
                "orders": [
                    {"_id": "661000000000000000000001", "user_id": "660000000000000000000001", "status": "SHIPPED"},
                    {"_id": "661000000000000000000002", "user_id": "660000000000000000000001", "status": "PENDING"}
                ]
            }))
            .unwrap();
        RequestContext::new(Arc::new(store), Arc::new(catalog), ContextConfig::new())
    }

    #[tokio::test]
    async fn test_listing_request() {
        let request = QueryRequest::from_json(
            r#"{
                "entity": "order",
                "selection": ["status", {"user": ["name"]}],
                "filter": {"filter": {"field": "status", "operation": "EQ", "value": "SHIPPED"}}
            }"#,
        )
        .unwrap();

        let result = request.execute(&context()).await.unwrap();
        assert_eq!(result, json!([{"status": "SHIPPED", "user": {"name": "Ada"}}]));
    }

    #[tokio::test]
    async fn test_by_id_request() {
        let request = QueryRequest::from_json(
            r#"{"entity": "user", "selection": ["name"], "id": "660000000000000000000001"}"#,
        )
        .unwrap();

        let result = request.execute(&context()).await.unwrap();
        assert_eq!(result, json!({"name": "Ada"}));
    }

    #[tokio::test]
    async fn test_not_found_message() {
        let request = QueryRequest::from_json(
            r#"{"entity": "user", "selection": ["name"], "id": "6600000000000000000000ff"}"#,
        )
        .unwrap();

        let err = request.execute(&context()).await.unwrap_err();
        assert_eq!(err.to_string(), "user with ID 6600000000000000000000ff not found.");
    }

    #[test]
    fn test_rejects_bad_requests() {
        assert!(matches!(
            QueryRequest::from_json(r#"{"entity": "user", "selection": ["name"], "id": "x", "filter": {}}"#),
            Err(RequestError::Invalid(_))
        ));
        assert!(matches!(
            QueryRequest::from_json(r#"{"entity": "shop", "selection": []}"#),
            Err(RequestError::Decode(_))
        ));
        assert!(matches!(
            QueryRequest::from_json(r#"{"entity": "user", "selection": [{"a": [], "b": []}]}"#),
            Err(RequestError::Decode(_))
        ));
    }
}
