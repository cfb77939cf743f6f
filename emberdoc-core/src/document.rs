//! Core traits and types for model registration and document serialization.
//!
//! A *model* is a plain serde type registered with the database. Each model describes
//! itself through a static [`ModelDescriptor`], usually generated by `#[derive(Model)]`:
//!
//! ```ignore
//! use emberdoc::prelude::*;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Model)]
//! pub struct User {
//!     #[model(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//!     pub age: u32,
//! }
//! ```
//!
//! Documents themselves are stored as [`bson::Document`] values; the [`DocumentExt`]
//! extension trait converts models to and from that representation and to JSON.

use bson::{Bson, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value, to_value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A raw stored document.
pub type RawDocument = bson::Document;

/// Static description of a model type.
///
/// This replaces runtime type introspection: the descriptor is built at compile time and
/// handed to the registry when the model is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Collection name the model is registered under.
    pub name: &'static str,
    /// Identity field declared on the type itself (`#[model(id = "...")]`).
    pub declared_id: Option<&'static str>,
    /// Fields annotated as identity (`#[model(id)]`), in declaration order.
    pub annotated_ids: &'static [&'static str],
}

impl ModelDescriptor {
    /// Creates a descriptor with no identity information.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            declared_id: None,
            annotated_ids: &[],
        }
    }

    /// Declares the identity field by name.
    pub const fn with_declared_id(mut self, field: &'static str) -> Self {
        self.declared_id = Some(field);
        self
    }

    /// Sets the fields annotated as identity.
    pub const fn with_annotated_ids(mut self, fields: &'static [&'static str]) -> Self {
        self.annotated_ids = fields;
        self
    }
}

/// Core trait that all models stored in a collection must implement.
///
/// # Example
///
/// ```ignore
/// use emberdoc::document::{Model, ModelDescriptor};
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Note {
///     pub key: String,
///     pub body: String,
/// }
///
/// impl Model for Note {
///     fn descriptor() -> ModelDescriptor {
///         ModelDescriptor::new("Note").with_declared_id("key")
///     }
/// }
/// ```
pub trait Model: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static {
    /// Returns the static description of this model.
    fn descriptor() -> ModelDescriptor;

    /// Returns the name of the collection this model belongs to.
    fn collection_name() -> &'static str {
        Self::descriptor().name
    }
}

/// Extension trait providing serialization/deserialization utilities for models.
///
/// This trait is automatically implemented for all types that implement [`Model`].
pub trait DocumentExt: Model {
    /// Converts this model to a stored document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] if the model does not serialize to an object.
    fn to_document(&self) -> DocumentStoreResult<RawDocument>;

    /// Creates a model from a stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_document(document: RawDocument) -> DocumentStoreResult<Self>;

    /// Converts this model to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn to_json(&self) -> DocumentStoreResult<Value>;

    /// Creates a model from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the structure is invalid.
    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<D: Model> DocumentExt for D {
    fn to_document(&self) -> DocumentStoreResult<RawDocument> {
        match serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "model {} serialized to {:?} instead of an object",
                D::collection_name(),
                other.element_type()
            ))),
        }
    }

    fn from_document(document: RawDocument) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}

/// Converts a stored document into plain JSON.
pub fn document_to_json(document: &RawDocument) -> DocumentStoreResult<Value> {
    Ok(to_value(document)?)
}

/// Converts a JSON object into a stored document.
pub fn json_to_document(value: Value) -> DocumentStoreResult<RawDocument> {
    match serialize_to_bson(&value)? {
        Bson::Document(document) => Ok(document),
        _ => Err(DocumentStoreError::InvalidDocument(
            "expected a JSON object".to_string(),
        )),
    }
}

/// Resolves a dotted path (`a.b.c`) against a document.
pub fn lookup_path<'a>(document: &'a RawDocument, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Type-erased conversion used by the registry for models known only by name.
///
/// `normalize` pushes a raw document through the model type and back, which rejects
/// records that do not fit the model and drops nothing silently.
#[derive(Debug, Clone, Copy)]
pub struct ModelCodec {
    normalize: fn(RawDocument) -> DocumentStoreResult<RawDocument>,
}

impl ModelCodec {
    /// Builds the codec for a model type.
    pub fn of<D: Model>() -> Self {
        Self {
            normalize: |document| D::from_document(document)?.to_document(),
        }
    }

    /// Maps a raw document onto the model and back.
    pub fn normalize(&self, document: RawDocument) -> DocumentStoreResult<RawDocument> {
        (self.normalize)(document)
    }
}
