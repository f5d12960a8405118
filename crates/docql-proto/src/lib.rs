//! DocQL protocol types.
//!
//! This crate defines the structured inputs the query core accepts from the
//! query transport and the pipeline shape it hands to the document store.
//!
//! # Modules
//!
//! - [`filter`] - Wire filter trees and the typed `FilterNode`
//! - [`selection`] - Nested field selections and flat projections
//! - [`pipeline`] - Native queries and storage pipeline stages
//! - [`value`] - Scalars, documents and object ids
//! - [`document`] - Dotted-path helpers over raw documents
//! - [`error`] - Protocol error types

pub mod document;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod selection;
pub mod value;

pub use error::Error;

pub use filter::{FilterNode, FilterTree, Operator, Predicate};
pub use pipeline::{Lookup, NativeQuery, Pipeline, RelationSpec, Stage, Unwind};
pub use selection::{FieldSelection, Projection, SelectionNode};
pub use value::{Document, ObjectId, Scalar, ID_FIELD};
