//! Query compilation.
//!
//! Turns wire filters and field selections into native queries, storage
//! projections and listing pipelines.

mod filter;
mod planner;
mod selector;

pub use filter::{FilterCompiler, Partition};
pub use planner::{ListingPlan, ListingPlanner, PipelineBuilder};
pub use selector::{selection_paths, FieldSelector};
