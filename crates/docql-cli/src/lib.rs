//! DocQL command-line runner.
//!
//! Loads a seed file into an in-memory store and answers one query request.

pub mod config;
pub mod request;

pub use config::{Args, CliConfig};
pub use request::{QueryRequest, RequestError};
