//! Storage backend abstraction for the document store.
//!
//! This module defines the traits that abstract over the physical document engine,
//! allowing collections to work with any storage implementation (in-memory, file-backed,
//! remote, etc.).
//!
//! # Overview
//!
//! The [`StoreBackend`] trait provides a unified async interface for all storage operations.
//! Implementations are required to be thread-safe (`Send + Sync`) and must serialize
//! conflicting writes themselves: collections never lock around single-document mutations.
//!
//! Mutating operations report the documents they touched. Collections turn that report into
//! exactly one change event per call, which is the normalized form of the engine's change feed.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for opening backend instances
//! - [`DynStoreBackendBuilder`]: Object-safe form of the builder used by the registry
//!
//! # Examples
//!
//! ```ignore
//! use emberdoc::backend::StoreBackend;
//! use bson::doc;
//!
//! backend.create_collection("User", "id").await?;
//! backend.insert_documents(vec![("u-1".into(), doc! { "id": "u-1", "name": "Alice" })], "User").await?;
//! ```

use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

use crate::{
    document::RawDocument,
    error::DocumentStoreResult,
    query::{Expr, FindOptions},
};

/// Outcome of an atomic upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No document had the identity, a new one was stored.
    Inserted,
    /// The document with the identity was replaced.
    Updated,
}

/// Abstract interface for document storage backends.
///
/// Every collection has an identity field, registered through [`create_collection`](Self::create_collection).
/// Backends must keep identity values unique per collection and keep documents in
/// insertion order, which is the order reported when no sort is requested.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Creates a collection whose documents are unique on `id_field`.
    ///
    /// Creating an existing collection is a no-op.
    async fn create_collection(&self, name: &str, id_field: &str) -> DocumentStoreResult<()>;

    /// Inserts new documents keyed by their identity value.
    ///
    /// The batch is all-or-nothing: if any identity already exists (or repeats within the
    /// batch) nothing is written and [`DocumentAlreadyExists`](crate::error::DocumentStoreError::DocumentAlreadyExists)
    /// is returned.
    async fn insert_documents(
        &self,
        documents: Vec<(String, RawDocument)>,
        collection: &str,
    ) -> DocumentStoreResult<()>;

    /// Replaces the document with identity `id`, or inserts it when absent, as one atomic step.
    async fn upsert_document(
        &self,
        id: String,
        document: RawDocument,
        collection: &str,
    ) -> DocumentStoreResult<UpsertOutcome>;

    /// Replaces the document with identity `id` wholesale, leaving absent identities alone.
    ///
    /// Returns the stored replacement, or `None` when no document had that identity.
    async fn replace_document(
        &self,
        id: String,
        document: RawDocument,
        collection: &str,
    ) -> DocumentStoreResult<Option<RawDocument>>;

    /// Copies the top-level fields of `changes` onto every document matching `filter`.
    ///
    /// Returns the documents after the update.
    async fn update_documents(
        &self,
        filter: &Expr,
        changes: RawDocument,
        collection: &str,
    ) -> DocumentStoreResult<Vec<RawDocument>>;

    /// Removes every document matching `filter` (all documents when `None`).
    ///
    /// Returns the removed documents.
    async fn delete_documents(
        &self,
        filter: Option<&Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<RawDocument>>;

    /// Filters, sorts and paginates documents.
    async fn query_documents(
        &self,
        options: FindOptions,
        collection: &str,
    ) -> DocumentStoreResult<Vec<RawDocument>>;

    /// Counts the documents of a collection.
    async fn count_documents(&self, collection: &str) -> DocumentStoreResult<usize>;

    /// Drops a collection and all of its documents.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists all collections in the store.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Flushes and releases backend resources.
    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend + ?Sized,
{
    async fn create_collection(&self, name: &str, id_field: &str) -> DocumentStoreResult<()> {
        (**self).create_collection(name, id_field).await
    }

    async fn insert_documents(
        &self,
        documents: Vec<(String, RawDocument)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        (**self).insert_documents(documents, collection).await
    }

    async fn upsert_document(
        &self,
        id: String,
        document: RawDocument,
        collection: &str,
    ) -> DocumentStoreResult<UpsertOutcome> {
        (**self).upsert_document(id, document, collection).await
    }

    async fn replace_document(
        &self,
        id: String,
        document: RawDocument,
        collection: &str,
    ) -> DocumentStoreResult<Option<RawDocument>> {
        (**self).replace_document(id, document, collection).await
    }

    async fn update_documents(
        &self,
        filter: &Expr,
        changes: RawDocument,
        collection: &str,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        (**self).update_documents(filter, changes, collection).await
    }

    async fn delete_documents(
        &self,
        filter: Option<&Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        (**self).delete_documents(filter, collection).await
    }

    async fn query_documents(
        &self,
        options: FindOptions,
        collection: &str,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        (**self).query_documents(options, collection).await
    }

    async fn count_documents(&self, collection: &str) -> DocumentStoreResult<usize> {
        (**self).count_documents(collection).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (**self).drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (**self).list_collections().await
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        (**self).shutdown().await
    }
}

/// Factory for opening a backend.
///
/// Building takes `&self` so that a failed database initialization can be retried.
#[async_trait]
pub trait StoreBackendBuilder: Send + Sync {
    type Backend: StoreBackend + 'static;

    async fn build(&self) -> DocumentStoreResult<Self::Backend>;
}

/// Object-safe form of [`StoreBackendBuilder`], implemented for every builder.
#[async_trait]
pub trait DynStoreBackendBuilder: Send + Sync {
    async fn open(&self) -> DocumentStoreResult<Arc<dyn StoreBackend>>;
}

#[async_trait]
impl<B> DynStoreBackendBuilder for B
where
    B: StoreBackendBuilder,
{
    async fn open(&self) -> DocumentStoreResult<Arc<dyn StoreBackend>> {
        let backend: Arc<dyn StoreBackend> = Arc::new(self.build().await?);
        Ok(backend)
    }
}
