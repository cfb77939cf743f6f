//! Convenient re-exports of commonly used types from emberdoc.
//!
//! ```ignore
//! use emberdoc::prelude::*;
//! ```

pub use emberdoc_core::{
    backend::{DynStoreBackendBuilder, StoreBackend, StoreBackendBuilder, UpsertOutcome},
    collection::{Collection, ImportFailure, ImportReport, TypedCollection},
    document::{DocumentExt, Model, ModelDescriptor, RawDocument},
    dsl::compile,
    error::{DocumentStoreError, DocumentStoreResult},
    identity::{assign_identity, identity_of, resolve_identity},
    notifier::{ChangeEvent, ChangeKind, ChangeNotifier, Subscriber, SubscriptionId},
    query::{Expr, FieldOp, Filter, FindOptions, Sort, SortDirection},
    registry::{Database, DatabaseBuilder, DatabaseState, Registry, Sidecar, SidecarKind},
};
pub use emberdoc_macros::Model;
