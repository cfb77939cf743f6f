//! The database: model registration, lifecycle and collection lookup.
//!
//! A [`Database`] moves through four states:
//!
//! ```text
//! Uninitialized --enable()--> Initializing --ok--> Ready --close()--> Closed
//!                                  |
//!                                  +--error--> Uninitialized
//! ```
//!
//! Collections can only be looked up while `Ready`. Enabling opens the backend, resolves the
//! identity field of every registered model, creates the backing collections and starts the
//! enabled sidecars (the browser, for instance).
//!
//! # Example
//!
//! ```ignore
//! let db = Database::builder(InMemoryStoreBuilder::new().path("db/app.db"))
//!     .model::<User>()
//!     .model::<Post>()
//!     .enable_watcher(true)
//!     .build();
//!
//! db.enable().await?;
//! let users = db.typed::<User>()?;
//! ```

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::{
    backend::{DynStoreBackendBuilder, StoreBackend, StoreBackendBuilder},
    collection::{Collection, CollectionCore, TypedCollection},
    document::{Model, ModelCodec, ModelDescriptor},
    error::{DocumentStoreError, DocumentStoreResult},
    identity::resolve_identity,
    notifier::{ChangeNotifier, Subscriber, SubscriptionId},
};

/// Observable lifecycle state of a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// What a sidecar is, so the database can honor its feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarKind {
    /// Started only with the browser enabled.
    Browser,
    /// Started only with the watcher enabled.
    Watcher,
    Other,
}

/// An auxiliary service started with the database and stopped with it.
#[async_trait]
pub trait Sidecar: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SidecarKind {
        SidecarKind::Other
    }

    /// Starts the service against a ready registry.
    async fn start(&self, registry: Arc<Registry>) -> DocumentStoreResult<()>;

    /// Stops the service. Must not block and must tolerate being called when not running.
    fn stop(&self);
}

#[async_trait]
impl<S> Sidecar for Arc<S>
where
    S: Sidecar + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> SidecarKind {
        (**self).kind()
    }

    async fn start(&self, registry: Arc<Registry>) -> DocumentStoreResult<()> {
        (**self).start(registry).await
    }

    fn stop(&self) {
        (**self).stop()
    }
}

/// The collections of a ready database.
pub struct Registry {
    backend: Arc<dyn StoreBackend>,
    collections: IndexMap<String, Collection>,
    notifier: ChangeNotifier,
    watcher_enabled: bool,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("collections", &self.collection_names())
            .field("watcher_enabled", &self.watcher_enabled)
            .finish()
    }
}

impl Registry {
    /// Looks up a collection by model name.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::UnknownCollection`] for names that were never registered.
    pub fn collection(&self, name: &str) -> DocumentStoreResult<Collection> {
        self.collections
            .get(name)
            .cloned()
            .ok_or_else(|| DocumentStoreError::UnknownCollection(name.to_string()))
    }

    pub fn typed<D: Model>(&self) -> DocumentStoreResult<TypedCollection<D>> {
        self.collection(D::collection_name())?.typed::<D>()
    }

    /// Registered collection names, in registration order.
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.values()
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    pub fn watcher_enabled(&self) -> bool {
        self.watcher_enabled
    }

    /// Subscribes to the changes of every collection.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::WatcherDisabled`] unless the watcher was enabled.
    pub fn watch_all(&self, subscriber: impl Subscriber + 'static) -> DocumentStoreResult<SubscriptionId> {
        if !self.watcher_enabled {
            return Err(DocumentStoreError::WatcherDisabled);
        }

        Ok(self.notifier.subscribe(subscriber))
    }

    pub fn unwatch_all(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }
}

#[derive(Clone, Copy)]
struct ModelEntry {
    descriptor: ModelDescriptor,
    codec: ModelCodec,
}

enum State {
    Uninitialized,
    Initializing,
    Ready(Arc<Registry>),
    Closed,
}

impl State {
    fn public(&self) -> DatabaseState {
        match self {
            State::Uninitialized => DatabaseState::Uninitialized,
            State::Initializing => DatabaseState::Initializing,
            State::Ready(_) => DatabaseState::Ready,
            State::Closed => DatabaseState::Closed,
        }
    }
}

/// Builder for a [`Database`].
///
/// The browser sidecar is enabled by default, the watcher is not.
pub struct DatabaseBuilder {
    backend: Box<dyn DynStoreBackendBuilder>,
    models: Vec<ModelEntry>,
    sidecars: Vec<Box<dyn Sidecar>>,
    watcher_enabled: bool,
    browser_enabled: bool,
}

impl DatabaseBuilder {
    /// Registers a model type.
    pub fn model<D: Model>(mut self) -> Self {
        self.models.push(ModelEntry {
            descriptor: D::descriptor(),
            codec: ModelCodec::of::<D>(),
        });
        self
    }

    /// Adds a sidecar started on [`Database::enable`].
    pub fn sidecar(mut self, sidecar: impl Sidecar + 'static) -> Self {
        self.sidecars.push(Box::new(sidecar));
        self
    }

    pub fn enable_watcher(mut self, enabled: bool) -> Self {
        self.watcher_enabled = enabled;
        self
    }

    pub fn enable_browser(mut self, enabled: bool) -> Self {
        self.browser_enabled = enabled;
        self
    }

    pub fn build(self) -> Database {
        Database {
            backend: self.backend,
            models: self.models,
            sidecars: self.sidecars,
            watcher_enabled: self.watcher_enabled,
            browser_enabled: self.browser_enabled,
            state: RwLock::new(State::Uninitialized),
            sidecars_stopped: AtomicBool::new(false),
        }
    }
}

/// An embedded document database.
pub struct Database {
    backend: Box<dyn DynStoreBackendBuilder>,
    models: Vec<ModelEntry>,
    sidecars: Vec<Box<dyn Sidecar>>,
    watcher_enabled: bool,
    browser_enabled: bool,
    state: RwLock<State>,
    sidecars_stopped: AtomicBool,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("state", &self.state())
            .field("models", &self.models.len())
            .field("watcher_enabled", &self.watcher_enabled)
            .field("browser_enabled", &self.browser_enabled)
            .finish()
    }
}

impl Database {
    pub fn builder(backend: impl StoreBackendBuilder + 'static) -> DatabaseBuilder {
        DatabaseBuilder {
            backend: Box::new(backend),
            models: Vec::new(),
            sidecars: Vec::new(),
            watcher_enabled: false,
            browser_enabled: true,
        }
    }

    pub fn state(&self) -> DatabaseState {
        self.state.read().public()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == DatabaseState::Ready
    }

    /// Brings the database up. Enabling a ready database returns its registry again.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::NoModelsRegistered`] when no model was registered
    /// - [`DocumentStoreError::NoIdentityField`] when a model has no identity field
    /// - backend errors from opening the store or creating collections
    ///
    /// On error the database returns to `Uninitialized` and can be enabled again.
    pub async fn enable(&self) -> DocumentStoreResult<Arc<Registry>> {
        {
            let mut state = self.state.write();
            match &*state {
                State::Ready(registry) => return Ok(registry.clone()),
                State::Initializing => {
                    return Err(DocumentStoreError::Initialization(
                        "database is already being enabled".to_string(),
                    ));
                }
                State::Closed => return Err(DocumentStoreError::DatabaseNotEnabled),
                State::Uninitialized => *state = State::Initializing,
            }
        }

        let registry = match self.initialize().await {
            Ok(registry) => Arc::new(registry),
            Err(err) => {
                tracing::error!(error = %err, "Failed to enable database");
                self.reset_from_initializing();
                return Err(err);
            }
        };

        let promoted = {
            let mut state = self.state.write();
            let initializing = matches!(*state, State::Initializing);
            if initializing {
                *state = State::Ready(registry.clone());
            }
            initializing
        };

        if !promoted {
            // Closed while initializing.
            registry.backend.shutdown().await?;
            return Err(DocumentStoreError::DatabaseNotEnabled);
        }

        tracing::info!(
            collections = registry.collections.len(),
            watcher = self.watcher_enabled,
            "Database enabled"
        );

        self.start_sidecars(&registry).await;

        Ok(registry)
    }

    async fn initialize(&self) -> DocumentStoreResult<Registry> {
        if self.models.is_empty() {
            return Err(DocumentStoreError::NoModelsRegistered);
        }

        let backend = self.backend.open().await?;
        let notifier = ChangeNotifier::new();

        match self.register_models(&backend, &notifier).await {
            Ok(collections) => Ok(Registry {
                backend,
                collections,
                notifier,
                watcher_enabled: self.watcher_enabled,
            }),
            Err(err) => {
                if let Err(shutdown) = backend.shutdown().await {
                    tracing::warn!(error = %shutdown, "Backend shutdown after failed enable also failed");
                }
                Err(err)
            }
        }
    }

    async fn register_models(
        &self,
        backend: &Arc<dyn StoreBackend>,
        global: &ChangeNotifier,
    ) -> DocumentStoreResult<IndexMap<String, Collection>> {
        let mut collections = IndexMap::with_capacity(self.models.len());

        for entry in &self.models {
            let name = entry.descriptor.name;

            if collections.contains_key(name) {
                tracing::warn!(collection = %name, "Model registered twice, keeping the first registration");
                continue;
            }

            let id_field = resolve_identity(&entry.descriptor)?;
            backend.create_collection(name, &id_field).await?;

            let core = CollectionCore::new(
                name.to_string(),
                id_field.clone(),
                backend.clone(),
                entry.codec,
                global.clone(),
            );
            collections.insert(name.to_string(), Collection::from_core(Arc::new(core)));

            tracing::debug!(collection = %name, id_field = %id_field, "Collection registered");
        }

        Ok(collections)
    }

    fn reset_from_initializing(&self) {
        let mut state = self.state.write();
        if matches!(*state, State::Initializing) {
            *state = State::Uninitialized;
        }
    }

    async fn start_sidecars(&self, registry: &Arc<Registry>) {
        for sidecar in &self.sidecars {
            let disabled = match sidecar.kind() {
                SidecarKind::Browser => !self.browser_enabled,
                SidecarKind::Watcher => !self.watcher_enabled,
                SidecarKind::Other => false,
            };
            if disabled {
                tracing::debug!(sidecar = %sidecar.name(), kind = ?sidecar.kind(), "Feature disabled, sidecar not started");
                continue;
            }

            match sidecar.start(registry.clone()).await {
                Ok(()) => tracing::info!(sidecar = %sidecar.name(), "Sidecar started"),
                Err(err) => tracing::error!(sidecar = %sidecar.name(), error = %err, "Sidecar failed to start"),
            }
        }
    }

    fn stop_sidecars(&self) {
        if self.sidecars_stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        for sidecar in &self.sidecars {
            sidecar.stop();
            tracing::debug!(sidecar = %sidecar.name(), "Sidecar stopped");
        }
    }

    /// Returns the registry of a ready database.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DatabaseNotEnabled`] unless the database is `Ready`.
    pub fn registry(&self) -> DocumentStoreResult<Arc<Registry>> {
        match &*self.state.read() {
            State::Ready(registry) => Ok(registry.clone()),
            _ => Err(DocumentStoreError::DatabaseNotEnabled),
        }
    }

    pub fn collection(&self, name: &str) -> DocumentStoreResult<Collection> {
        self.registry()?.collection(name)
    }

    pub fn typed<D: Model>(&self) -> DocumentStoreResult<TypedCollection<D>> {
        self.registry()?.typed::<D>()
    }

    pub fn collection_names(&self) -> DocumentStoreResult<Vec<String>> {
        Ok(self.registry()?.collection_names())
    }

    /// Subscribes to every collection, see [`Registry::watch_all`].
    pub fn watch_all(&self, subscriber: impl Subscriber + 'static) -> DocumentStoreResult<SubscriptionId> {
        self.registry()?.watch_all(subscriber)
    }

    /// Stops the sidecars and shuts the backend down. Later calls do nothing.
    pub async fn close(&self) -> DocumentStoreResult<()> {
        let previous = std::mem::replace(&mut *self.state.write(), State::Closed);

        match previous {
            State::Ready(registry) => {
                self.stop_sidecars();
                registry.backend.shutdown().await?;
                tracing::info!("Database closed");
            }
            State::Closed => {}
            State::Uninitialized | State::Initializing => {
                tracing::debug!("Database closed before it was enabled");
            }
        }

        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if matches!(*self.state.get_mut(), State::Ready(_)) {
            self.stop_sidecars();
            tracing::debug!("Database dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::RawDocument,
        backend::UpsertOutcome,
        query::{Expr, FindOptions},
    };
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct NullBackend {
        created: parking_lot::Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl StoreBackend for NullBackend {
        async fn create_collection(&self, name: &str, id_field: &str) -> DocumentStoreResult<()> {
            self.created.lock().push((name.to_string(), id_field.to_string()));
            Ok(())
        }

        async fn insert_documents(&self, _: Vec<(String, RawDocument)>, _: &str) -> DocumentStoreResult<()> {
            Ok(())
        }

        async fn upsert_document(&self, _: String, _: RawDocument, _: &str) -> DocumentStoreResult<UpsertOutcome> {
            Ok(UpsertOutcome::Inserted)
        }

        async fn replace_document(&self, _: String, _: RawDocument, _: &str) -> DocumentStoreResult<Option<RawDocument>> {
            Ok(None)
        }

        async fn update_documents(&self, _: &Expr, _: RawDocument, _: &str) -> DocumentStoreResult<Vec<RawDocument>> {
            Ok(Vec::new())
        }

        async fn delete_documents(&self, _: Option<&Expr>, _: &str) -> DocumentStoreResult<Vec<RawDocument>> {
            Ok(Vec::new())
        }

        async fn query_documents(&self, _: FindOptions, _: &str) -> DocumentStoreResult<Vec<RawDocument>> {
            Ok(Vec::new())
        }

        async fn count_documents(&self, _: &str) -> DocumentStoreResult<usize> {
            Ok(0)
        }

        async fn drop_collection(&self, _: &str) -> DocumentStoreResult<()> {
            Ok(())
        }

        async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct NullBuilder;

    #[async_trait]
    impl StoreBackendBuilder for NullBuilder {
        type Backend = NullBackend;

        async fn build(&self) -> DocumentStoreResult<NullBackend> {
            Ok(NullBackend::default())
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct User {
        id: Option<String>,
        name: String,
    }

    impl Model for User {
        fn descriptor() -> ModelDescriptor {
            ModelDescriptor::new("User").with_annotated_ids(&["id"])
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Orphan {
        name: String,
    }

    impl Model for Orphan {
        fn descriptor() -> ModelDescriptor {
            ModelDescriptor::new("Orphan")
        }
    }

    #[derive(Default)]
    struct CountingSidecar {
        kind: Option<SidecarKind>,
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Sidecar for CountingSidecar {
        fn name(&self) -> &str {
            "counting"
        }

        fn kind(&self) -> SidecarKind {
            self.kind.unwrap_or(SidecarKind::Other)
        }

        async fn start(&self, _: Arc<Registry>) -> DocumentStoreResult<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn lookups_fail_before_enable() {
        let db = Database::builder(NullBuilder).model::<User>().build();

        assert_eq!(db.state(), DatabaseState::Uninitialized);
        assert!(matches!(db.collection("User"), Err(DocumentStoreError::DatabaseNotEnabled)));
        assert!(matches!(db.typed::<User>(), Err(DocumentStoreError::DatabaseNotEnabled)));
    }

    #[tokio::test]
    async fn enabling_without_models_fails_and_resets() {
        let db = Database::builder(NullBuilder).build();

        let err = db.enable().await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::NoModelsRegistered));
        assert_eq!(db.state(), DatabaseState::Uninitialized);
    }

    #[tokio::test]
    async fn identity_failure_resets_state() {
        let db = Database::builder(NullBuilder).model::<User>().model::<Orphan>().build();

        let err = db.enable().await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::NoIdentityField(name) if name == "Orphan"));
        assert_eq!(db.state(), DatabaseState::Uninitialized);
    }

    #[tokio::test]
    async fn enable_registers_models_once() {
        let db = Database::builder(NullBuilder)
            .model::<User>()
            .model::<User>()
            .build();

        let registry = db.enable().await.unwrap();

        assert_eq!(db.state(), DatabaseState::Ready);
        assert_eq!(registry.collection_names(), vec!["User"]);
        assert_eq!(db.collection("User").unwrap().id_field(), "id");
        assert!(matches!(
            db.collection("Post"),
            Err(DocumentStoreError::UnknownCollection(name)) if name == "Post"
        ));
    }

    #[tokio::test]
    async fn watch_all_requires_the_watcher() {
        let db = Database::builder(NullBuilder).model::<User>().build();
        db.enable().await.unwrap();

        let err = db.watch_all(|_: &crate::notifier::ChangeEvent| {}).unwrap_err();

        assert!(matches!(err, DocumentStoreError::WatcherDisabled));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_sidecars_once() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let db = Database::builder(NullBuilder)
            .model::<User>()
            .sidecar(CountingSidecar { stopped: stopped.clone(), ..Default::default() })
            .build();

        db.enable().await.unwrap();
        db.close().await.unwrap();
        db.close().await.unwrap();
        drop(db);

        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_database_cannot_be_reenabled() {
        let db = Database::builder(NullBuilder).model::<User>().build();
        db.enable().await.unwrap();
        db.close().await.unwrap();

        assert_eq!(db.state(), DatabaseState::Closed);
        assert!(matches!(db.enable().await, Err(DocumentStoreError::DatabaseNotEnabled)));
        assert!(matches!(db.registry(), Err(DocumentStoreError::DatabaseNotEnabled)));
    }

    #[tokio::test]
    async fn drop_stops_running_sidecars() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let db = Database::builder(NullBuilder)
            .model::<User>()
            .sidecar(CountingSidecar { stopped: stopped.clone(), ..Default::default() })
            .build();

        db.enable().await.unwrap();
        drop(db);

        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_browser_sidecar_is_not_started() {
        let browser = Arc::new(AtomicUsize::new(0));
        let other = Arc::new(AtomicUsize::new(0));
        let db = Database::builder(NullBuilder)
            .model::<User>()
            .sidecar(CountingSidecar {
                kind: Some(SidecarKind::Browser),
                started: browser.clone(),
                ..Default::default()
            })
            .sidecar(CountingSidecar { started: other.clone(), ..Default::default() })
            .enable_browser(false)
            .build();

        db.enable().await.unwrap();

        assert_eq!(browser.load(Ordering::SeqCst), 0);
        assert_eq!(other.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn watcher_sidecars_follow_the_watcher_switch() {
        let watcher = Arc::new(AtomicUsize::new(0));
        let sidecar = || CountingSidecar {
            kind: Some(SidecarKind::Watcher),
            started: watcher.clone(),
            ..Default::default()
        };

        let off = Database::builder(NullBuilder).model::<User>().sidecar(sidecar()).build();
        off.enable().await.unwrap();
        assert_eq!(watcher.load(Ordering::SeqCst), 0);

        let on = Database::builder(NullBuilder)
            .model::<User>()
            .sidecar(sidecar())
            .enable_watcher(true)
            .enable_browser(false)
            .build();
        on.enable().await.unwrap();
        assert_eq!(watcher.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn enabling_twice_returns_the_same_registry() {
        let db = Database::builder(NullBuilder).model::<User>().build();

        let first = db.enable().await.unwrap();
        let second = db.enable().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn collections_are_created_with_their_identity_field() {
        let db = Database::builder(NullBuilder).model::<User>().build();
        let registry = db.enable().await.unwrap();

        assert_eq!(registry.collection("User").unwrap().name(), "User");
        assert_eq!(registry.typed::<User>().unwrap().id_field(), "id");
    }
}
