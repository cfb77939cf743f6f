//! In-memory document storage backend for emberdoc.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access, keeps documents in insertion
//! order and can write every change through to a JSON snapshot file.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads, one writer per mutation
//! - **Atomic upserts** - Replace-or-insert under a single write lock
//! - **Full query support** - Filtering, sorting and pagination through the core evaluator
//! - **Optional persistence** - Snapshot loaded on open, rewritten after each mutation
//!
//! # Quick Start
//!
//! ```ignore
//! use emberdoc_core::registry::Database;
//! use emberdoc_memory::InMemoryStoreBuilder;
//!
//! let db = Database::builder(InMemoryStoreBuilder::new().path("db/embedded.db"))
//!     .model::<User>()
//!     .build();
//!
//! db.enable().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as emberdoc_memory;

pub mod store;

pub use store::{DEFAULT_PATH, InMemoryStore, InMemoryStoreBuilder};
