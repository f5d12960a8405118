//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Identifier is not a 24 character hexadecimal object id.
    #[error("invalid ID format: {0}. Check it and try again.")]
    InvalidId(String),

    /// Field selection could not be decoded.
    #[error("invalid field selection: {0}")]
    InvalidSelection(String),
}
