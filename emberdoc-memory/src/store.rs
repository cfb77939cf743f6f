//! In-memory storage implementation for document stores.
//!
//! Documents live in insertion-ordered maps guarded by an async-aware read-write lock.
//! When a snapshot path is configured, every mutation is written through to a JSON file
//! (written to a temporary file first, then renamed over the snapshot), and the snapshot
//! is loaded again when the store is built.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use indexmap::IndexMap;
use mea::rwlock::RwLock;
use serde::{Deserialize, Serialize};

use emberdoc_core::{
    backend::{StoreBackend, StoreBackendBuilder, UpsertOutcome},
    document::RawDocument,
    error::{DocumentStoreError, DocumentStoreResult},
    evaluator::{DocumentEvaluator, sort_documents},
    identity::assign_identity,
    query::{Expr, FindOptions},
};

/// Snapshot location used by [`InMemoryStoreBuilder::with_default_path`].
pub const DEFAULT_PATH: &str = "db/embedded.db";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoredCollection {
    id_field: String,
    documents: IndexMap<String, RawDocument>,
}

impl StoredCollection {
    /// Keys of the documents matching `filter`, in stored order.
    fn matching_keys(&self, filter: &Expr) -> DocumentStoreResult<Vec<String>> {
        let mut evaluator: Option<DocumentEvaluator<'_>> = None;
        let mut keys = Vec::new();

        for (key, document) in &self.documents {
            let evaluator = evaluator.get_or_insert_with(|| DocumentEvaluator::new(document));
            if evaluator.evaluate_on(document, filter)? {
                keys.push(key.clone());
            }
        }

        Ok(keys)
    }

    /// Re-keys every document on a new identity field.
    ///
    /// Two documents sharing a value of the new field is an error; `self` is only changed
    /// when every document got a distinct key.
    fn rekey(&mut self, collection: &str, id_field: &str) -> DocumentStoreResult<()> {
        let mut documents = IndexMap::with_capacity(self.documents.len());

        for document in self.documents.values() {
            let mut document = document.clone();
            let id = assign_identity(&mut document, id_field)?;

            if documents.contains_key(&id) {
                return Err(DocumentStoreError::DocumentAlreadyExists(id, collection.to_string()));
            }
            documents.insert(id, document);
        }

        self.documents = documents;
        self.id_field = id_field.to_string();

        Ok(())
    }
}

type StoreMap = IndexMap<String, StoredCollection>;

fn unknown(collection: &str) -> DocumentStoreError {
    DocumentStoreError::UnknownCollection(collection.to_string())
}

fn io_error(path: &Path, action: &str, err: io::Error) -> DocumentStoreError {
    DocumentStoreError::Backend(format!("failed to {action} {}: {err}", path.display()))
}

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable; clones share the same underlying data.
///
/// Queries scan every document of a collection (there is no indexing), which is fine for
/// the small datasets this engine is meant for.
///
/// # Example
///
/// ```ignore
/// use emberdoc_memory::InMemoryStore;
/// use emberdoc_core::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store.create_collection("User", "id").await?;
/// store.insert_documents(vec![("u-1".into(), doc! { "id": "u-1", "name": "Alice" })], "User").await?;
///
/// assert_eq!(store.count_documents("User").await?, 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
    path: Option<Arc<PathBuf>>,
}

impl InMemoryStore {
    /// Creates a new empty store that is never written to disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore` with custom options.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Snapshot file, if the store persists.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    fn open(path: PathBuf) -> DocumentStoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, "create directory", e))?;
        }

        let store = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => StoreMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => StoreMap::new(),
            Err(err) => return Err(io_error(&path, "read snapshot", err)),
        };

        tracing::debug!(
            path = %path.display(),
            collections = store.len(),
            "Snapshot loaded"
        );

        Ok(Self {
            store: Arc::new(RwLock::new(store)),
            path: Some(Arc::new(path)),
        })
    }

    fn persist(&self, store: &StoreMap) -> DocumentStoreResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(store)?;
        let staging = path.with_extension("tmp");

        fs::write(&staging, bytes).map_err(|e| io_error(&staging, "write snapshot", e))?;
        fs::rename(&staging, path).map_err(|e| io_error(path, "replace snapshot", e))?;

        Ok(())
    }

    /// Applies `apply` to one collection and writes the result through.
    ///
    /// `apply` reports whether it changed anything. With a snapshot it runs on a copy that
    /// only becomes visible once the snapshot is written, so a failed write leaves memory
    /// and disk agreeing. `apply` must not change the collection when it returns an error.
    async fn write_collection<T>(
        &self,
        collection: &str,
        apply: impl FnOnce(&mut StoredCollection) -> DocumentStoreResult<(T, bool)>,
    ) -> DocumentStoreResult<T> {
        let mut store = self.store.write().await;
        let stored = store.get_mut(collection).ok_or_else(|| unknown(collection))?;

        if self.path.is_none() {
            return apply(stored).map(|(output, _)| output);
        }

        let mut staged = stored.clone();
        let (output, changed) = apply(&mut staged)?;
        if !changed {
            return Ok(output);
        }

        let previous = std::mem::replace(stored, staged);
        if let Err(err) = self.persist(&store) {
            if let Some(stored) = store.get_mut(collection) {
                *stored = previous;
            }
            tracing::error!(collection = %collection, error = %err, "Snapshot write failed, change rolled back");
            return Err(err);
        }

        Ok(output)
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn create_collection(&self, name: &str, id_field: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;

        let staged = match store.get(name) {
            Some(existing) if existing.id_field == id_field => return Ok(()),
            Some(existing) => {
                tracing::warn!(
                    collection = %name,
                    from = %existing.id_field,
                    to = %id_field,
                    "Identity field changed, re-keying stored documents"
                );
                let mut staged = existing.clone();
                staged.rekey(name, id_field)?;
                staged
            }
            None => StoredCollection {
                id_field: id_field.to_string(),
                documents: IndexMap::new(),
            },
        };

        let previous = store.insert(name.to_string(), staged);
        if let Err(err) = self.persist(&store) {
            match previous {
                Some(previous) => {
                    store.insert(name.to_string(), previous);
                }
                None => {
                    store.shift_remove(name);
                }
            }
            return Err(err);
        }

        Ok(())
    }

    async fn insert_documents(
        &self,
        documents: Vec<(String, RawDocument)>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        self.write_collection(collection, |stored| {
            for (index, (id, _)) in documents.iter().enumerate() {
                let repeated = documents[..index].iter().any(|(other, _)| other == id);

                if repeated || stored.documents.contains_key(id) {
                    return Err(DocumentStoreError::DocumentAlreadyExists(
                        id.clone(),
                        collection.to_string(),
                    ));
                }
            }

            let changed = !documents.is_empty();
            stored.documents.extend(documents);

            Ok(((), changed))
        })
        .await
    }

    async fn upsert_document(
        &self,
        id: String,
        document: RawDocument,
        collection: &str,
    ) -> DocumentStoreResult<UpsertOutcome> {
        self.write_collection(collection, |stored| {
            let outcome = match stored.documents.insert(id, document) {
                Some(_) => UpsertOutcome::Updated,
                None => UpsertOutcome::Inserted,
            };

            Ok((outcome, true))
        })
        .await
    }

    async fn replace_document(
        &self,
        id: String,
        document: RawDocument,
        collection: &str,
    ) -> DocumentStoreResult<Option<RawDocument>> {
        self.write_collection(collection, |stored| {
            let Some(current) = stored.documents.get_mut(&id) else {
                return Ok((None, false));
            };

            *current = document.clone();

            Ok((Some(document), true))
        })
        .await
    }

    async fn update_documents(
        &self,
        filter: &Expr,
        changes: RawDocument,
        collection: &str,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        self.write_collection(collection, |stored| {
            let keys = stored.matching_keys(filter)?;
            let mut updated = Vec::with_capacity(keys.len());

            for key in &keys {
                if let Some(document) = stored.documents.get_mut(key) {
                    for (field, value) in &changes {
                        document.insert(field.clone(), value.clone());
                    }
                    updated.push(document.clone());
                }
            }

            let changed = !updated.is_empty();
            Ok((updated, changed))
        })
        .await
    }

    async fn delete_documents(
        &self,
        filter: Option<&Expr>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        self.write_collection(collection, |stored| {
            let removed: Vec<RawDocument> = match filter {
                Some(filter) => stored
                    .matching_keys(filter)?
                    .iter()
                    .filter_map(|key| stored.documents.shift_remove(key))
                    .collect(),
                None => std::mem::take(&mut stored.documents).into_values().collect(),
            };

            let changed = !removed.is_empty();
            Ok((removed, changed))
        })
        .await
    }

    async fn query_documents(
        &self,
        options: FindOptions,
        collection: &str,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        let store = self.store.read().await;
        let Some(stored) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut documents = match &options.filter {
            Some(filter) => DocumentEvaluator::filter_documents(stored.documents.values(), filter)?,
            None => stored.documents.values().cloned().collect(),
        };

        if let Some(sort) = &options.sort {
            sort_documents(&mut documents, sort);
        }

        Ok(options.paginate(documents))
    }

    async fn count_documents(&self, collection: &str) -> DocumentStoreResult<usize> {
        Ok(self
            .store
            .read()
            .await
            .get(collection)
            .map_or(0, |stored| stored.documents.len()))
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;

        let Some((index, key, removed)) = store.shift_remove_full(name) else {
            return Err(unknown(name));
        };

        if let Err(err) = self.persist(&store) {
            store.shift_insert(index, key, removed);
            return Err(err);
        }

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        Ok(self.store.read().await.keys().cloned().collect())
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        let store = self.store.read().await;
        self.persist(&store)?;

        if let Some(path) = self.path() {
            tracing::debug!(path = %path.display(), "Snapshot flushed");
        }

        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// Without a path the store lives only in memory.
///
/// # Example
///
/// ```ignore
/// use emberdoc_memory::InMemoryStoreBuilder;
///
/// let db = Database::builder(InMemoryStoreBuilder::new().path("db/app.db"))
///     .model::<User>()
///     .build();
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryStoreBuilder {
    path: Option<PathBuf>,
}

impl InMemoryStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists the store to a JSON snapshot at `path`.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Persists the store to [`DEFAULT_PATH`].
    pub fn with_default_path(self) -> Self {
        self.path(DEFAULT_PATH)
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(&self) -> DocumentStoreResult<Self::Backend> {
        match &self.path {
            Some(path) => InMemoryStore::open(path.clone()),
            None => Ok(InMemoryStore::new()),
        }
    }
}
