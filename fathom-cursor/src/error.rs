//! Error types for cursor operations.

use bson::Bson;
use thiserror::Error;

/// Result type for cursor operations.
pub type CursorResult<T> = Result<T, CursorError>;

/// Errors that can occur while driving a cursor.
///
/// Errors are `Clone` so a single pull failure can be yielded on the stream
/// and emitted on the `error` event.
#[derive(Error, Debug, Clone)]
pub enum CursorError {
    /// MongoDB driver error.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// A fetched document could not be decoded into the item type.
    #[error("bson deserialization error: {0}")]
    Deserialization(String),

    /// The operation exists on the driver cursor but is not offered here.
    #[error("unsupported cursor operation: {operation}")]
    Unsupported {
        /// Name of the rejected operation.
        operation: &'static str,
        /// Arguments it was called with.
        args: Vec<Bson>,
    },

    /// `count()` was called on an aggregation cursor before `set_filter()`.
    #[error("filter must be set before counting")]
    FilterNotSet,

    /// The cursor already started fetching and can no longer be reconfigured.
    #[error("cursor is already initialized")]
    AlreadyInitialized,

    /// The cursor was destroyed.
    #[error("cursor is destroyed")]
    Destroyed,

    /// A result document lacked an expected field.
    #[error("missing field in result: {0}")]
    MissingField(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CursorError {
    /// Create an unsupported-operation error.
    pub fn unsupported(operation: &'static str, args: Vec<Bson>) -> Self {
        Self::Unsupported { operation, args }
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is an unsupported-operation error.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Check if this error comes from the driver.
    pub fn is_driver_error(&self) -> bool {
        matches!(self, Self::Driver(_))
    }

    /// Check if this is a precondition failure.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::FilterNotSet | Self::AlreadyInitialized)
    }

    /// Check if this error means the cursor is destroyed.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl From<bson::de::Error> for CursorError {
    fn from(err: bson::de::Error) -> Self {
        CursorError::Deserialization(err.to_string())
    }
}
