//! WebSocket push channel for change events.
//!
//! `GET /watch-collections` streams the changes of every collection (the watcher must be
//! enabled), `GET /watch-collections/{coll}` those of a single collection. Each event is
//! sent as one text frame:
//!
//! ```json
//! { "model": "User", "event": "insert", "data": [{ "id": "…", "name": "John" }] }
//! ```
//!
//! A subscription lives exactly as long as its socket.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{
    SinkExt, StreamExt,
    channel::mpsc::{self, UnboundedReceiver},
};
use serde::Serialize;
use serde_json::Value;

use emberdoc_core::{
    collection::Collection,
    document::document_to_json,
    error::{DocumentStoreError, DocumentStoreResult},
    notifier::{ChangeEvent, ChangeKind, SubscriptionId},
    registry::Registry,
};

use crate::{error::Result, routes::RegistrySource};

/// A change event as sent over the socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchMessage {
    pub model: String,
    pub event: ChangeKind,
    pub data: Vec<Value>,
}

impl WatchMessage {
    pub fn from_event(event: &ChangeEvent) -> DocumentStoreResult<Self> {
        Ok(Self {
            model: event.collection.clone(),
            event: event.kind,
            data: event
                .documents
                .iter()
                .map(document_to_json)
                .collect::<DocumentStoreResult<_>>()?,
        })
    }
}

enum Subscription {
    All(Arc<Registry>, SubscriptionId),
    Collection(Collection, SubscriptionId),
}

impl Subscription {
    fn cancel(self) {
        match self {
            Subscription::All(registry, id) => {
                registry.unwatch_all(id);
            }
            Subscription::Collection(collection, id) => {
                collection.unwatch(id);
            }
        }
    }
}

/// Creates the watch routes.
pub fn router(source: impl Into<RegistrySource>) -> Router {
    Router::new()
        .route("/watch-collections", get(watch_all))
        .route("/watch-collections/{coll}", get(watch_collection))
        .with_state(source.into())
}

async fn watch_all(
    State(source): State<RegistrySource>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response> {
    let registry = source.registry()?;

    if !registry.watcher_enabled() {
        return Err(DocumentStoreError::WatcherDisabled.into());
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let (tx, rx) = mpsc::unbounded();
    let id = registry.watch_all(tx)?;
    let subscription = Subscription::All(registry, id);

    Ok(ws.on_upgrade(move |socket| forward(socket, rx, subscription)))
}

async fn watch_collection(
    State(source): State<RegistrySource>,
    Path(coll): Path<String>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response> {
    let collection = source.registry()?.collection(&coll)?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let (tx, rx) = mpsc::unbounded();
    let id = collection.watch(tx);
    let subscription = Subscription::Collection(collection, id);

    Ok(ws.on_upgrade(move |socket| forward(socket, rx, subscription)))
}

async fn forward(
    socket: WebSocket,
    mut events: UnboundedReceiver<ChangeEvent>,
    subscription: Subscription,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    tracing::info!("Watch client connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let encoded = WatchMessage::from_event(&event)
                .and_then(|msg| serde_json::to_string(&msg).map_err(Into::into));

            let text = match encoded {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(collection = %event.collection, "Failed to encode change event: {}", e);
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                tracing::warn!("Failed to send change event: {}", e);
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Watch socket error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    subscription.cancel();

    tracing::info!("Watch client disconnected");
}
