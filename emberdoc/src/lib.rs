//! Embedded JSON document store with a filter DSL and live change notifications.
//!
//! This crate is the primary entry point for users of emberdoc. It re-exports the core
//! types from the sub-crates and wires the default setup: the in-memory engine persisted
//! to `db/embedded.db`, the collection browser on `127.0.0.1:9595` and, once the watcher is
//! enabled, the watch sockets on `127.0.0.1:9596`.
//!
//! # Features
//!
//! - **Typed collections** - Define models with Serde and `#[derive(Model)]`
//! - **Filter DSL** - `age>=18 && (name=~J% || name~~'^B')`, or the [`query::Filter`] builders
//! - **Change notifications** - Per-collection and global subscriptions to insert, update and delete events
//! - **Collection browser** - REST and WebSocket endpoints over every registered collection (requires `browser` feature)
//!
//! # Quick Start
//!
//! ```ignore
//! use emberdoc::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Model)]
//! pub struct User {
//!     #[model(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//!     pub age: u32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let db = emberdoc::embedded().model::<User>().build();
//!     db.enable().await?;
//!
//!     let users = db.typed::<User>()?;
//!
//!     // Identity is generated on save
//!     let john = users
//!         .save(User { id: None, name: "John".into(), age: 30 })
//!         .await?;
//!
//!     let adults = users.find_where("age>=18").await?;
//!     println!("{} adult(s), first id {:?}", adults.len(), john.id);
//!
//!     db.close().await
//! }
//! ```
//!
//! # Watching changes
//!
//! ```ignore
//! let users = db.typed::<User>()?;
//!
//! let id = users.watch(|event: &ChangeEvent| {
//!     println!("{} {} document(s) in {}", event.kind, event.documents.len(), event.collection);
//! });
//!
//! users.unwatch(id);
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory engine with optional JSON snapshot persistence
//! - [`browser`] - Collection browser sidecar (requires `browser` feature)

#[allow(unused_extern_crates)]
extern crate self as emberdoc;

pub mod prelude;

use std::path::PathBuf;

pub use emberdoc_core::{
    backend, collection, document, dsl, error, evaluator, identity, notifier, query, registry,
};
pub use emberdoc_macros::Model;

// Re-export BSON and JSON types for convenience
pub use bson;
pub use serde_json;

use emberdoc_core::registry::{Database, DatabaseBuilder};
use emberdoc_memory::{DEFAULT_PATH, InMemoryStoreBuilder};

/// In-memory storage backend implementations.
pub mod memory {
    pub use emberdoc_memory::{DEFAULT_PATH, InMemoryStore, InMemoryStoreBuilder};
}

/// Collection browser and watch transport.
///
/// This module is only available when the `browser` feature is enabled.
#[cfg(feature = "browser")]
pub mod browser {
    pub use emberdoc_browser::{
        BrowserConfig, BrowserError, BrowserService, ConfigError, RegistrySource, WatchConfig,
        WatchService, router, watch,
    };
}

/// Starts a database builder over the default on-disk location, `db/embedded.db`.
///
/// See [`embedded_at`].
pub fn embedded() -> DatabaseBuilder {
    embedded_at(DEFAULT_PATH)
}

/// Starts a database builder whose store is persisted to `path`.
///
/// With the `browser` feature the builder also carries a [`browser::BrowserService`]
/// configured from `EMBERDOC_BROWSER_ADDR` and `EMBERDOC_EXPORT_DIR` (turn it off with
/// `enable_browser(false)`), and a [`browser::WatchService`] on `EMBERDOC_WATCH_ADDR` that
/// only starts with `enable_watcher(true)`.
pub fn embedded_at(path: impl Into<PathBuf>) -> DatabaseBuilder {
    let builder = Database::builder(InMemoryStoreBuilder::new().path(path));

    #[cfg(feature = "browser")]
    let builder = builder.sidecar(browser_service()).sidecar(watch_service());

    builder
}

#[cfg(feature = "browser")]
fn browser_service() -> emberdoc_browser::BrowserService {
    use emberdoc_browser::{BrowserConfig, BrowserService};

    let config = BrowserConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!("Ignoring browser configuration from the environment: {}", e);
        BrowserConfig::default()
    });

    BrowserService::new(config)
}

#[cfg(feature = "browser")]
fn watch_service() -> emberdoc_browser::WatchService {
    use emberdoc_browser::{WatchConfig, WatchService};

    let config = WatchConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!("Ignoring watch configuration from the environment: {}", e);
        WatchConfig::default()
    });

    WatchService::new(config)
}
