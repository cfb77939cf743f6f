//! The browser and the watch transport as database sidecars.
//!
//! Each service binds its own listener while the database is ready. The database starts
//! [`BrowserService`] only with the browser enabled and [`WatchService`] only with the
//! watcher enabled, so either can run without the other.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use tokio::{net::TcpListener, sync::oneshot};

use emberdoc_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    registry::{Registry, Sidecar, SidecarKind},
};

use crate::{
    config::{BrowserConfig, WatchConfig},
    routes, watch,
};

#[derive(Debug)]
struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
}

/// One HTTP listener that can be started and stopped repeatedly.
#[derive(Debug, Default)]
struct Listener {
    running: Mutex<Option<Running>>,
}

impl Listener {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.addr)
    }

    async fn serve(&self, name: &'static str, addr: SocketAddr, app: Router) -> DocumentStoreResult<()> {
        if let Some(addr) = self.local_addr() {
            tracing::warn!(service = name, addr = %addr, "Already running");
            return Ok(());
        }

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            DocumentStoreError::Initialization(format!("{name} failed to bind {addr}: {e}"))
        })?;
        let bound = listener
            .local_addr()
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        let (shutdown, signal) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await;

            if let Err(e) = served {
                tracing::error!(service = name, "Server error: {}", e);
            }
        });

        tracing::info!(service = name, addr = %bound, "Listening");
        *self.running.lock() = Some(Running { addr: bound, shutdown });

        Ok(())
    }

    fn stop(&self, name: &'static str) {
        if let Some(running) = self.running.lock().take() {
            let _ = running.shutdown.send(());
            tracing::info!(service = name, addr = %running.addr, "Stopping");
        }
    }
}

/// Serves the browser routes on their own listener while the database is ready.
///
/// ```ignore
/// let db = Database::builder(InMemoryStoreBuilder::new())
///     .model::<User>()
///     .sidecar(BrowserService::new(BrowserConfig::from_env()?))
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct BrowserService {
    config: BrowserConfig,
    listener: Listener,
}

impl BrowserService {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            listener: Listener::default(),
        }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Address actually bound, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Sidecar for BrowserService {
    fn name(&self) -> &str {
        "browser"
    }

    fn kind(&self) -> SidecarKind {
        SidecarKind::Browser
    }

    async fn start(&self, registry: Arc<Registry>) -> DocumentStoreResult<()> {
        let app = routes::router(registry, self.config.clone());

        self.listener.serve("browser", self.config.addr, app).await
    }

    fn stop(&self) {
        self.listener.stop("browser");
    }
}

/// Serves the `/watch-collections` sockets while the database is ready and its watcher
/// is enabled, independently of the browser.
#[derive(Debug, Default)]
pub struct WatchService {
    config: WatchConfig,
    listener: Listener,
}

impl WatchService {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            listener: Listener::default(),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Sidecar for WatchService {
    fn name(&self) -> &str {
        "watch"
    }

    fn kind(&self) -> SidecarKind {
        SidecarKind::Watcher
    }

    async fn start(&self, registry: Arc<Registry>) -> DocumentStoreResult<()> {
        self.listener
            .serve("watch", self.config.addr, watch::router(registry))
            .await
    }

    fn stop(&self) {
        self.listener.stop("watch");
    }
}
