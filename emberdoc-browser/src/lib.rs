//! Collection browser and watch transport for emberdoc.
//!
//! - [`routes`] - REST endpoints to list, fetch, delete, import, drop and export collections
//! - [`watch`] - WebSocket endpoints streaming change events
//! - [`service`] - [`BrowserService`] and [`WatchService`], database sidecars serving each
//!   on its own port
//! - [`config`] - [`BrowserConfig`] (`127.0.0.1:9595`) and [`WatchConfig`] (`127.0.0.1:9596`)
//! - [`error`] - [`BrowserError`] and its HTTP mapping

pub mod config;
pub mod error;
pub mod routes;
pub mod service;
pub mod watch;

pub use config::{BrowserConfig, ConfigError, WatchConfig};
pub use error::BrowserError;
pub use routes::{RegistrySource, router};
pub use service::{BrowserService, WatchService};
