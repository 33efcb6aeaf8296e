// docstore-core/src/error.rs
// Error kinds reported by the store, matcher, applier and grouper

use thiserror::Error;

/// Every fallible operation in the crate returns this error type
#[derive(Debug, Error)]
pub enum DocStoreError {
    /// Insert (or upsert) with an identifier that already exists in the collection
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Operator applied to an incompatible existing value, e.g. `$inc` on a string
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Unknown query or update operator
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// Malformed dot-notation path or a path that cannot be traversed
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Filter expression with a malformed operand
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Update expression that cannot be applied as written
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Document that is not an object or carries an unusable `_id`
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DocStoreError>;
