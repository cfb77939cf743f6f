//! Core of the emberdoc embedded document store.
//!
//! This crate provides:
//!
//! - **Models and documents** ([`document`]) - The [`Model`](document::Model) trait and conversions
//! - **Identity** ([`identity`]) - Identity field resolution and UUID assignment
//! - **Filters** ([`query`], [`dsl`], [`evaluator`]) - Filter trees, their text syntax and evaluation
//! - **Backends** ([`backend`]) - The storage engine abstraction
//! - **Collections** ([`collection`]) - Typed and untyped CRUD handles
//! - **Change notification** ([`notifier`]) - Watch subscriptions and event fan-out
//! - **Registry** ([`registry`]) - The [`Database`](registry::Database) lifecycle and collection lookup
//! - **Errors** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use emberdoc::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Model)]
//! pub struct User {
//!     #[model(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//!     pub age: u32,
//! }
//!
//! let db = Database::builder(InMemoryStoreBuilder::new()).model::<User>().build();
//! db.enable().await?;
//!
//! let users = db.typed::<User>()?;
//! users.save(User { id: None, name: "John".into(), age: 30 }).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as emberdoc_core;

pub mod backend;
pub mod collection;
pub mod document;
pub mod dsl;
pub mod error;
pub mod evaluator;
pub mod identity;
pub mod notifier;
pub mod query;
pub mod registry;
