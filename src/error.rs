//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A stored cell decoded to a different SQL type than the schema calls for
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// SQL type the column is declared with
        expected: &'static str,
        /// SQL type actually found in the cell
        actual: String,
    },

    /// Invalid caller input, rejected before the store is touched
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Backing store failure
    #[error("storage error: {0}")]
    Storage(String),
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
