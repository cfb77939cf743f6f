//! Collection handles for document store operations.
//!
//! Collections are obtained from a ready [`Database`](crate::registry::Database) and are
//! cheap to clone: every handle for the same name shares one core holding the backend,
//! the resolved identity field and the change notifier.
//!
//! # Collection Types
//!
//! - [`Collection`] - Untyped collection over raw documents and JSON, used by the browser
//! - [`TypedCollection`] - Type-safe collection for a specific model type
//!
//! Every mutating call publishes at most one [`ChangeEvent`], carrying all the documents it
//! touched. Calls that touch nothing publish nothing.
//!
//! # Example
//!
//! ```ignore
//! let users = db.typed::<User>()?;
//!
//! let alice = users.save(User { id: None, name: "Alice".into(), age: 30 }).await?;
//! let adults = users.find_where("age>=18").await?;
//! users.delete_by_id(alice.id.as_deref().unwrap()).await?;
//! ```

use std::{fmt, marker::PhantomData, sync::Arc};

use serde::Serialize;
use serde_json::Value;

use crate::{
    backend::{StoreBackend, UpsertOutcome},
    document::{DocumentExt, Model, ModelCodec, RawDocument, document_to_json, json_to_document},
    dsl::compile,
    error::{DocumentStoreError, DocumentStoreResult},
    identity::{assign_identity, identify, identity_of},
    notifier::{ChangeEvent, ChangeKind, ChangeNotifier, Subscriber, SubscriptionId},
    query::{Expr, Filter, FindOptions},
};

pub(crate) struct CollectionCore {
    name: String,
    id_field: String,
    backend: Arc<dyn StoreBackend>,
    codec: ModelCodec,
    notifier: ChangeNotifier,
    global: ChangeNotifier,
}

impl CollectionCore {
    pub(crate) fn new(
        name: String,
        id_field: String,
        backend: Arc<dyn StoreBackend>,
        codec: ModelCodec,
        global: ChangeNotifier,
    ) -> Self {
        Self {
            name,
            id_field,
            backend,
            codec,
            notifier: ChangeNotifier::new(),
            global,
        }
    }

    fn publish(&self, kind: ChangeKind, documents: Vec<RawDocument>) {
        if documents.is_empty() {
            return;
        }

        let event = ChangeEvent::new(self.name.clone(), kind, documents);
        let delivered = self.notifier.publish(&event) + self.global.publish(&event);

        tracing::trace!(collection = %self.name, kind = %kind, delivered, "Change published");
    }

    fn id_filter(&self, id: &str) -> Expr {
        Filter::eq(self.id_field.as_str(), id)
    }
}

fn checked(filter: &Expr) -> DocumentStoreResult<&Expr> {
    filter.validate()?;
    Ok(filter)
}

/// A record of an import batch that was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    pub index: usize,
    pub reason: String,
}

impl ImportFailure {
    /// Reports a rejected record; [`DocumentStoreError::ImportRecordInvalid`] keeps its bare reason.
    pub fn from_error(index: usize, err: DocumentStoreError) -> Self {
        match err {
            DocumentStoreError::ImportRecordInvalid { index, reason } => Self { index, reason },
            other => Self {
                index,
                reason: other.to_string(),
            },
        }
    }
}

/// Outcome of [`Collection::import_json`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    /// The stored documents, identity filled in.
    pub imported: Vec<Value>,
    pub failures: Vec<ImportFailure>,
}

/// An untyped collection over raw documents.
#[derive(Clone)]
pub struct Collection {
    core: Arc<CollectionCore>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.core.name)
            .field("id_field", &self.core.id_field)
            .finish()
    }
}

impl Collection {
    pub(crate) fn from_core(core: Arc<CollectionCore>) -> Self {
        Self { core }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Returns the identity field, fixed when the database was enabled.
    pub fn id_field(&self) -> &str {
        &self.core.id_field
    }

    /// Views this collection as a collection of `D`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::UnknownCollection`] if `D` is registered under another name.
    pub fn typed<D: Model>(&self) -> DocumentStoreResult<TypedCollection<D>> {
        if D::collection_name() != self.name() {
            return Err(DocumentStoreError::UnknownCollection(
                D::collection_name().to_string(),
            ));
        }

        Ok(TypedCollection {
            raw: self.clone(),
            _marker: PhantomData,
        })
    }

    pub async fn find_raw(&self, options: FindOptions) -> DocumentStoreResult<Vec<RawDocument>> {
        if let Some(filter) = &options.filter {
            filter.validate()?;
        }

        self.core.backend.query_documents(options, self.name()).await
    }

    pub async fn find_json(&self, options: FindOptions) -> DocumentStoreResult<Vec<Value>> {
        self.find_raw(options)
            .await?
            .iter()
            .map(document_to_json)
            .collect()
    }

    pub async fn find_one_raw(&self, filter: Expr) -> DocumentStoreResult<Option<RawDocument>> {
        let options = FindOptions::builder().filter(filter).limit(1).build();

        Ok(self.find_raw(options).await?.into_iter().next())
    }

    pub async fn count(&self) -> DocumentStoreResult<usize> {
        self.core.backend.count_documents(self.name()).await
    }

    /// Removes every document matching `filter` and returns how many were removed.
    pub async fn delete_where(&self, filter: &Expr) -> DocumentStoreResult<usize> {
        let removed = self
            .core
            .backend
            .delete_documents(Some(checked(filter)?), self.name())
            .await?;

        let count = removed.len();
        self.core.publish(ChangeKind::Delete, removed);

        Ok(count)
    }

    pub async fn delete_by_id(&self, id: &str) -> DocumentStoreResult<usize> {
        self.delete_where(&self.core.id_filter(id)).await
    }

    pub async fn delete_all(&self) -> DocumentStoreResult<usize> {
        let removed = self.core.backend.delete_documents(None, self.name()).await?;

        let count = removed.len();
        self.core.publish(ChangeKind::Delete, removed);

        Ok(count)
    }

    /// Copies the top-level fields of `changes` onto every match, leaving identities alone.
    pub async fn update_where_raw(
        &self,
        filter: &Expr,
        mut changes: RawDocument,
    ) -> DocumentStoreResult<usize> {
        changes.remove(self.id_field());

        let updated = self
            .core
            .backend
            .update_documents(checked(filter)?, changes, self.name())
            .await?;

        let count = updated.len();
        self.core.publish(ChangeKind::Update, updated);

        Ok(count)
    }

    /// Replaces the whole stored document with identity `id`; fields absent from `document`
    /// are dropped. Absent identities are left alone and count as `0`.
    pub async fn replace_raw(&self, id: &str, mut document: RawDocument) -> DocumentStoreResult<usize> {
        document.insert(self.id_field().to_string(), id);

        let replaced = self
            .core
            .backend
            .replace_document(id.to_string(), document, self.name())
            .await?;

        let count = usize::from(replaced.is_some());
        self.core.publish(ChangeKind::Update, replaced.into_iter().collect());

        Ok(count)
    }

    /// Upserts raw documents one by one and reports a single event for the whole call.
    ///
    /// If a write fails, the documents already stored are still reported before the error
    /// is returned.
    pub async fn save_raw(&self, documents: Vec<RawDocument>) -> DocumentStoreResult<Vec<RawDocument>> {
        let mut saved = Vec::with_capacity(documents.len());
        let mut replaced = false;
        let mut failure = None;

        for mut document in documents {
            let result = match assign_identity(&mut document, self.id_field()) {
                Ok(id) => {
                    self.core
                        .backend
                        .upsert_document(id, document.clone(), self.name())
                        .await
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(outcome) => {
                    replaced |= outcome == UpsertOutcome::Updated;
                    saved.push(document);
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let kind = if replaced { ChangeKind::Update } else { ChangeKind::Insert };
        self.core.publish(kind, saved.clone());

        match failure {
            Some(err) => Err(err),
            None => Ok(saved),
        }
    }

    /// Imports a batch of JSON records.
    ///
    /// Each record must be an object that maps onto the model without unknown or missing
    /// fields. Rejected records are reported with their index; the valid ones are saved
    /// (upserted by identity) in one call.
    pub async fn import_json(&self, records: Vec<Value>) -> DocumentStoreResult<ImportReport> {
        let mut valid = Vec::with_capacity(records.len());
        let mut failures = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            match self.prepare_import(index, record) {
                Ok(document) => valid.push(document),
                Err(err) => {
                    tracing::warn!(collection = %self.name(), error = %err, "Import record rejected");
                    failures.push(ImportFailure::from_error(index, err));
                }
            }
        }

        let imported = if valid.is_empty() {
            Vec::new()
        } else {
            self.save_raw(valid)
                .await?
                .iter()
                .map(document_to_json)
                .collect::<DocumentStoreResult<_>>()?
        };

        tracing::info!(
            collection = %self.name(),
            imported = imported.len(),
            rejected = failures.len(),
            "Import finished"
        );

        Ok(ImportReport { imported, failures })
    }

    fn prepare_import(&self, index: usize, record: Value) -> DocumentStoreResult<RawDocument> {
        let invalid = |reason: String| DocumentStoreError::ImportRecordInvalid { index, reason };

        if !record.is_object() {
            return Err(invalid("expected a JSON object".to_string()));
        }

        let mut document = json_to_document(record).map_err(|e| invalid(e.to_string()))?;
        assign_identity(&mut document, self.id_field()).map_err(|e| invalid(e.to_string()))?;

        let normalized = self
            .core
            .codec
            .normalize(document.clone())
            .map_err(|e| invalid(e.to_string()))?;

        let unknown: Vec<&str> = document
            .keys()
            .filter(|key| !normalized.contains_key(key.as_str()))
            .map(String::as_str)
            .collect();

        if !unknown.is_empty() {
            return Err(invalid(format!("unknown field(s): {}", unknown.join(", "))));
        }

        Ok(normalized)
    }

    /// Returns every document as JSON, in stored order.
    pub async fn export_json(&self) -> DocumentStoreResult<Vec<Value>> {
        self.find_json(FindOptions::new()).await
    }

    /// Subscribes to changes of this collection.
    pub fn watch(&self, subscriber: impl Subscriber + 'static) -> SubscriptionId {
        self.core.notifier.subscribe(subscriber)
    }

    /// Subscribes to one kind of change of this collection.
    pub fn watch_kind(&self, kind: ChangeKind, subscriber: impl Subscriber + 'static) -> SubscriptionId {
        self.core.notifier.subscribe_kind(kind, subscriber)
    }

    pub fn unwatch(&self, id: SubscriptionId) -> bool {
        self.core.notifier.unsubscribe(id)
    }
}

/// A collection of model type `D`.
pub struct TypedCollection<D: Model> {
    raw: Collection,
    _marker: PhantomData<fn() -> D>,
}

impl<D: Model> Clone for TypedCollection<D> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<D: Model> fmt::Debug for TypedCollection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedCollection")
            .field("name", &self.name())
            .field("id_field", &self.id_field())
            .finish()
    }
}

fn decode_all<D: Model>(documents: Vec<RawDocument>) -> DocumentStoreResult<Vec<D>> {
    documents.into_iter().map(D::from_document).collect()
}

impl<D: Model> TypedCollection<D> {
    pub fn name(&self) -> &str {
        self.raw.name()
    }

    pub fn id_field(&self) -> &str {
        self.raw.id_field()
    }

    /// The untyped view of the same collection.
    pub fn raw(&self) -> &Collection {
        &self.raw
    }

    fn core(&self) -> &CollectionCore {
        &self.raw.core
    }

    /// Finds documents matching `options`. An empty result is not an error.
    pub async fn find(&self, options: FindOptions) -> DocumentStoreResult<Vec<D>> {
        decode_all(self.raw.find_raw(options).await?)
    }

    pub async fn find_all(&self) -> DocumentStoreResult<Vec<D>> {
        self.find(FindOptions::new()).await
    }

    /// Finds documents matching filter text, see [`dsl`](crate::dsl).
    pub async fn find_where(&self, filter: &str) -> DocumentStoreResult<Vec<D>> {
        self.find(FindOptions::filtered(compile(filter)?)).await
    }

    /// First match in stored order.
    pub async fn find_one(&self, filter: Expr) -> DocumentStoreResult<Option<D>> {
        self.raw
            .find_one_raw(filter)
            .await?
            .map(D::from_document)
            .transpose()
    }

    /// First match under `options`, honoring its sort and offset.
    pub async fn find_one_with(&self, options: FindOptions) -> DocumentStoreResult<Option<D>> {
        let options = FindOptions { limit: 1, ..options };

        Ok(self.find(options).await?.into_iter().next())
    }

    pub async fn find_by_id(&self, id: &str) -> DocumentStoreResult<Option<D>> {
        self.find_one(self.core().id_filter(id)).await
    }

    /// Inserts a new model, generating its identity when empty.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentAlreadyExists`] if the identity is taken.
    pub async fn insert(&self, model: D) -> DocumentStoreResult<D> {
        let mut inserted = self.insert_many(vec![model]).await?;

        inserted
            .pop()
            .ok_or_else(|| DocumentStoreError::Unknown("insert returned no document".to_string()))
    }

    /// Inserts several models as one batch; nothing is written if any identity is taken.
    pub async fn insert_many(&self, models: Vec<D>) -> DocumentStoreResult<Vec<D>> {
        if models.is_empty() {
            return Ok(models);
        }

        let mut models = models;
        let mut entries = Vec::with_capacity(models.len());

        for model in models.iter_mut() {
            entries.push(identify(model, self.id_field())?);
        }

        let documents: Vec<RawDocument> = entries.iter().map(|(_, doc)| doc.clone()).collect();

        self.core()
            .backend
            .insert_documents(entries, self.name())
            .await?;

        self.core().publish(ChangeKind::Insert, documents);

        Ok(models)
    }

    /// Inserts or replaces a model by identity as one atomic backend write.
    ///
    /// Saving the same model twice leaves a single stored document.
    pub async fn save(&self, model: D) -> DocumentStoreResult<D> {
        let mut saved = self.save_many(vec![model]).await?;

        saved
            .pop()
            .ok_or_else(|| DocumentStoreError::Unknown("save returned no document".to_string()))
    }

    /// Saves several models; the call reports `Update` if any of them replaced a document.
    pub async fn save_many(&self, models: Vec<D>) -> DocumentStoreResult<Vec<D>> {
        let mut models = models;
        let mut documents = Vec::with_capacity(models.len());

        for model in models.iter_mut() {
            documents.push(identify(model, self.id_field())?.1);
        }

        self.raw.save_raw(documents).await?;

        Ok(models)
    }

    /// Replaces the stored document with the model's identity by the model itself.
    ///
    /// Fields the model no longer serializes are removed from the stored document. Returns
    /// the number of replaced documents, `0` if the model has no identity yet or nothing is
    /// stored under it.
    pub async fn update(&self, model: D) -> DocumentStoreResult<usize> {
        let document = model.to_document()?;

        match identity_of(&document, self.id_field()) {
            Some(id) => self.raw.replace_raw(&id, document).await,
            None => Ok(0),
        }
    }

    /// Copies the model's fields onto every document matching `filter`.
    ///
    /// The identity field is never copied, so matches keep their own identities.
    pub async fn update_where(&self, filter: &Expr, model: D) -> DocumentStoreResult<usize> {
        let mut document = model.to_document()?;
        assign_identity(&mut document, self.id_field())?;

        self.raw.update_where_raw(filter, document).await
    }

    pub async fn update_by_id(&self, id: &str, model: D) -> DocumentStoreResult<usize> {
        self.update_where(&self.core().id_filter(id), model).await
    }

    /// Deletes the stored document with the model's identity.
    pub async fn delete(&self, model: &D) -> DocumentStoreResult<usize> {
        let document = model.to_document()?;

        match identity_of(&document, self.id_field()) {
            Some(id) => self.raw.delete_by_id(&id).await,
            None => Ok(0),
        }
    }

    pub async fn delete_where(&self, filter: &Expr) -> DocumentStoreResult<usize> {
        self.raw.delete_where(filter).await
    }

    pub async fn delete_by_id(&self, id: &str) -> DocumentStoreResult<usize> {
        self.raw.delete_by_id(id).await
    }

    pub async fn delete_all(&self) -> DocumentStoreResult<usize> {
        self.raw.delete_all().await
    }

    pub async fn count(&self) -> DocumentStoreResult<usize> {
        self.raw.count().await
    }

    pub fn watch(&self, subscriber: impl Subscriber + 'static) -> SubscriptionId {
        self.raw.watch(subscriber)
    }

    pub fn watch_kind(&self, kind: ChangeKind, subscriber: impl Subscriber + 'static) -> SubscriptionId {
        self.raw.watch_kind(kind, subscriber)
    }

    pub fn unwatch(&self, id: SubscriptionId) -> bool {
        self.raw.unwatch(id)
    }
}
