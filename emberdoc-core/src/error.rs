//! Error types and result types for document store operations.
//!
//! This module provides comprehensive error handling for all document store operations.
//! Use [`DocumentStoreResult<T>`] as the return type for fallible operations.
//!
//! Errors fall into three groups:
//!
//! - **Structural** errors raised while the registry is brought up
//!   ([`NoModelsRegistered`](DocumentStoreError::NoModelsRegistered),
//!   [`NoIdentityField`](DocumentStoreError::NoIdentityField)). These are propagated, never swallowed.
//! - **Availability** errors ([`DatabaseNotEnabled`](DocumentStoreError::DatabaseNotEnabled))
//!   which callers may treat as "feature disabled".
//! - **Client** errors caused by the request itself (bad filter text, duplicate identity,
//!   unknown collection, invalid import record).

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// No model types were registered before the database was enabled.
    #[error("No models registered: at least one model type is required to enable the database")]
    NoModelsRegistered,
    /// A collection was requested before the database reached the ready state, or after it closed.
    #[error("Database is not enabled")]
    DatabaseNotEnabled,
    /// The model declares no identity field and none is annotated.
    #[error("Model {0} has no identity field")]
    NoIdentityField(String),
    /// The identity field of a document could not be read or written.
    /// The first argument is the field name, the second describes the problem.
    #[error("Identity field {0} is not usable: {1}")]
    IdentityAccess(String, String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection is not registered.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    /// Filter text could not be parsed, or a filter tree is structurally invalid.
    #[error("Malformed filter at position {position}: {message}")]
    MalformedFilter {
        /// Byte offset into the filter text (0 for tree-level problems).
        position: usize,
        /// What went wrong.
        message: String,
    },
    /// A single record of an import batch could not be mapped onto the model.
    #[error("Invalid import record {index}: {reason}")]
    ImportRecordInvalid {
        /// Position of the record inside the imported array.
        index: usize,
        /// Why the record was rejected.
        reason: String,
    },
    /// A global watch was requested while the watcher feature is off.
    #[error("Watcher is not enabled")]
    WatcherDisabled,
    /// The document violates schema constraints or has invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DocumentStoreError {
    pub(crate) fn malformed(position: usize, message: impl Into<String>) -> Self {
        DocumentStoreError::MalformedFilter {
            position,
            message: message.into(),
        }
    }

    /// Returns `true` when the error was caused by the caller's input rather than by the store.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DocumentStoreError::MalformedFilter { .. }
                | DocumentStoreError::DocumentAlreadyExists(..)
                | DocumentStoreError::InvalidDocument(_)
                | DocumentStoreError::ImportRecordInvalid { .. }
                | DocumentStoreError::IdentityAccess(..)
                | DocumentStoreError::Serialization(_)
        )
    }

    /// Returns `true` when the store as a whole cannot serve requests.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DocumentStoreError::DatabaseNotEnabled
                | DocumentStoreError::NoModelsRegistered
                | DocumentStoreError::WatcherDisabled
        )
    }

    /// Returns `true` when the error refers to something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DocumentStoreError::UnknownCollection(_) | DocumentStoreError::DocumentNotFound(..)
        )
    }
}

/// A specialized `Result` type for document store operations.
///
/// This type alias is used throughout the crate to indicate operations that may fail
/// with a [`DocumentStoreError`].
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<regex::Error> for DocumentStoreError {
    fn from(err: regex::Error) -> Self {
        DocumentStoreError::malformed(0, err.to_string())
    }
}
