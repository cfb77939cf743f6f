//! Configuration for the browser and watch services.

use std::{env, net::SocketAddr, path::PathBuf};

pub const DEFAULT_ADDR: &str = "127.0.0.1:9595";
pub const DEFAULT_WATCH_ADDR: &str = "127.0.0.1:9596";
pub const DEFAULT_EXPORT_DIR: &str = "db";

/// Browser configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserConfig {
    /// Address the browser listens on
    pub addr: SocketAddr,
    /// Directory collection exports are written to
    pub export_dir: PathBuf,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 9595)),
            export_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
        }
    }
}

impl BrowserConfig {
    /// Load configuration from `EMBERDOC_BROWSER_ADDR` and `EMBERDOC_EXPORT_DIR`,
    /// falling back to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let addr = lookup("EMBERDOC_BROWSER_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidAddr)?;

        let export_dir = lookup("EMBERDOC_EXPORT_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_DIR));

        Ok(Self { addr, export_dir })
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }
}

/// Watch service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Address the watch sockets are served on
    pub addr: SocketAddr,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 9596)),
        }
    }
}

impl WatchConfig {
    /// Load configuration from `EMBERDOC_WATCH_ADDR`, falling back to the default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let addr = lookup("EMBERDOC_WATCH_ADDR")
            .unwrap_or_else(|| DEFAULT_WATCH_ADDR.to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidWatchAddr)?;

        Ok(Self { addr })
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid EMBERDOC_BROWSER_ADDR value")]
    InvalidAddr,
    #[error("Invalid EMBERDOC_WATCH_ADDR value")]
    InvalidWatchAddr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = BrowserConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, BrowserConfig::default());
        assert_eq!(config.addr.port(), 9595);
    }

    #[test]
    fn variables_override_defaults() {
        let config = BrowserConfig::from_lookup(lookup(&[
            ("EMBERDOC_BROWSER_ADDR", "0.0.0.0:8080"),
            ("EMBERDOC_EXPORT_DIR", "exports"),
        ]))
        .unwrap();

        assert_eq!(config.addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.export_dir, PathBuf::from("exports"));
    }

    #[test]
    fn watch_address_has_its_own_variable() {
        assert_eq!(WatchConfig::from_lookup(lookup(&[])).unwrap().addr.port(), 9596);

        let config = WatchConfig::from_lookup(lookup(&[
            ("EMBERDOC_BROWSER_ADDR", "0.0.0.0:8080"),
            ("EMBERDOC_WATCH_ADDR", "0.0.0.0:8081"),
        ]))
        .unwrap();
        assert_eq!(config.addr.to_string(), "0.0.0.0:8081");

        let err = WatchConfig::from_lookup(lookup(&[("EMBERDOC_WATCH_ADDR", "x")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWatchAddr));
    }

    #[test]
    fn invalid_address_is_rejected() {
        let err = BrowserConfig::from_lookup(lookup(&[("EMBERDOC_BROWSER_ADDR", "nowhere")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidAddr));
    }
}
