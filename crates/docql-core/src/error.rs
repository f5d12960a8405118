//! Core error types.

use thiserror::Error;

use crate::catalog::EntityKind;

/// Failures raised by the document store while executing a pipeline.
///
/// These are surfaced verbatim and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A stage references a malformed field path.
    #[error("invalid field path '{0}'")]
    InvalidPath(String),

    /// A stage references a collection the store does not know.
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    /// A fetch did not complete within the configured timeout.
    #[error("store call timed out after {0}ms")]
    Timeout(u64),

    /// Backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Core query errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Input rejected before any storage call.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested entity does not exist.
    #[error("{entity} with ID {id} not found.")]
    NotFound { entity: EntityKind, id: String },

    /// Entity type missing from the catalog.
    #[error("entity '{0}' is not registered in the catalog")]
    UnknownEntity(EntityKind),

    /// Pipeline execution failed at the store.
    #[error("store execution error: {0}")]
    Store(#[from] StoreError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] docql_proto::Error),
}

impl Error {
    /// Create a not-found error for an entity id.
    pub fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }
}
