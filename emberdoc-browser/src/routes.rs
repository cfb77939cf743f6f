//! REST routes of the collection browser.
//!
//! | method   | path                               | result                                 |
//! |----------|------------------------------------|----------------------------------------|
//! | `GET`    | `/rest/collNames`                  | registered collection names            |
//! | `GET`    | `/rest/{coll}`                     | `{ "<idField>": [documents] }`         |
//! | `DELETE` | `/rest/{coll}/{id}`                | `"OK"`                                 |
//! | `POST`   | `/rest/{coll}`                     | import report for the `files` upload   |
//! | `DELETE` | `/api/drop-collection/{coll}`      | number of removed documents            |
//! | `GET`    | `/api/export-collection/{coll}`    | pretty JSON export, also written to disk |
//!
//! The fetch route accepts `filter` (filter text), `sort` (`field` or `field:desc`),
//! `limit` and `offset` query parameters.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{delete, get},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;

use emberdoc_core::{
    collection::{Collection, ImportReport},
    dsl::compile,
    error::DocumentStoreResult,
    query::FindOptions,
    registry::{Database, Registry},
};

use crate::{
    config::BrowserConfig,
    error::{BrowserError, Result},
};

/// Where handlers get the registry from.
///
/// A bare registry is always available; a database is only available once enabled, and
/// requests made before that are answered with `503`.
#[derive(Clone)]
pub enum RegistrySource {
    Registry(Arc<Registry>),
    Database(Arc<Database>),
}

impl RegistrySource {
    pub fn registry(&self) -> DocumentStoreResult<Arc<Registry>> {
        match self {
            RegistrySource::Registry(registry) => Ok(registry.clone()),
            RegistrySource::Database(db) => db.registry(),
        }
    }

    pub(crate) fn collection(&self, name: &str) -> DocumentStoreResult<Collection> {
        self.registry()?.collection(name)
    }
}

impl From<Arc<Registry>> for RegistrySource {
    fn from(registry: Arc<Registry>) -> Self {
        RegistrySource::Registry(registry)
    }
}

impl From<Arc<Database>> for RegistrySource {
    fn from(db: Arc<Database>) -> Self {
        RegistrySource::Database(db)
    }
}

/// Application state shared across browser handlers.
#[derive(Clone)]
pub struct BrowserState {
    pub source: RegistrySource,
    pub config: Arc<BrowserConfig>,
}

/// Query parameters of the fetch route.
#[derive(Debug, Default, Deserialize)]
pub struct FetchParams {
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl FetchParams {
    pub fn into_options(self) -> DocumentStoreResult<FindOptions> {
        let filter = match self.filter.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Some(compile(text)?),
            _ => None,
        };

        let sort = match self.sort.as_deref().map(str::trim) {
            Some(spec) if !spec.is_empty() => Some(FindOptions::parse_sort(spec)?),
            _ => None,
        };

        Ok(FindOptions {
            filter,
            sort,
            limit: self.limit.unwrap_or(0),
            offset: self.offset.unwrap_or(0),
        })
    }
}

/// Creates the browser routes.
pub fn router(source: impl Into<RegistrySource>, config: BrowserConfig) -> Router {
    let state = BrowserState {
        source: source.into(),
        config: Arc::new(config),
    };

    Router::new()
        .route("/rest/collNames", get(collection_names))
        .route("/rest/{coll}", get(fetch_documents).post(import_documents))
        .route("/rest/{coll}/{id}", delete(delete_document))
        .route("/api/drop-collection/{coll}", delete(drop_collection))
        .route("/api/export-collection/{coll}", get(export_collection))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn collection_names(State(state): State<BrowserState>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.source.registry()?.collection_names()))
}

async fn fetch_documents(
    State(state): State<BrowserState>,
    Path(coll): Path<String>,
    Query(params): Query<FetchParams>,
) -> Result<Json<Map<String, Value>>> {
    let collection = state.source.collection(&coll)?;
    let documents = collection.find_json(params.into_options()?).await?;

    let mut body = Map::new();
    body.insert(collection.id_field().to_string(), Value::Array(documents));

    Ok(Json(body))
}

async fn delete_document(
    State(state): State<BrowserState>,
    Path((coll, id)): Path<(String, String)>,
) -> Result<&'static str> {
    let removed = state.source.collection(&coll)?.delete_by_id(&id).await?;

    tracing::debug!(collection = %coll, id = %id, removed, "Document deleted from browser");

    Ok("OK")
}

async fn import_documents(
    State(state): State<BrowserState>,
    Path(coll): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ImportReport>> {
    let collection = state.source.collection(&coll)?;
    let mut records = Vec::new();
    let mut uploads = 0;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BrowserError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("files") {
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| BrowserError::BadRequest(e.to_string()))?;

        match serde_json::from_slice::<Value>(&bytes)
            .map_err(|e| BrowserError::BadRequest(format!("upload is not valid JSON: {e}")))?
        {
            Value::Array(items) => records.extend(items),
            object @ Value::Object(_) => records.push(object),
            _ => {
                return Err(BrowserError::BadRequest(
                    "upload must hold a JSON array of documents".to_string(),
                ));
            }
        }

        uploads += 1;
    }

    if uploads == 0 {
        return Err(BrowserError::BadRequest("missing `files` field".to_string()));
    }

    Ok(Json(collection.import_json(records).await?))
}

async fn drop_collection(
    State(state): State<BrowserState>,
    Path(coll): Path<String>,
) -> Result<Json<usize>> {
    let removed = state.source.collection(&coll)?.delete_all().await?;

    tracing::info!(collection = %coll, removed, "Collection dropped from browser");

    Ok(Json(removed))
}

async fn export_collection(
    State(state): State<BrowserState>,
    Path(coll): Path<String>,
) -> Result<impl IntoResponse> {
    let collection = state.source.collection(&coll)?;
    let documents = collection.export_json().await?;
    let body = serde_json::to_string_pretty(&documents)
        .map_err(emberdoc_core::error::DocumentStoreError::from)?;

    let file_name = format!("{}.json", collection.name());
    let path = state.config.export_dir.join(&file_name);

    tokio::fs::create_dir_all(&state.config.export_dir).await?;
    tokio::fs::write(&path, &body).await?;

    tracing::info!(
        collection = %coll,
        documents = documents.len(),
        path = %path.display(),
        "Collection exported"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberdoc_core::query::SortDirection;

    #[test]
    fn empty_params_mean_everything() {
        let options = FetchParams::default().into_options().unwrap();

        assert_eq!(options, FindOptions::new());
    }

    #[test]
    fn params_are_compiled() {
        let options = FetchParams {
            filter: Some("age>=18".into()),
            sort: Some("name:desc".into()),
            limit: Some(5),
            offset: Some(10),
        }
        .into_options()
        .unwrap();

        assert!(options.filter.is_some());
        assert_eq!(options.sort.unwrap().direction, SortDirection::Desc);
        assert_eq!((options.limit, options.offset), (5, 10));
    }

    #[test]
    fn malformed_filter_is_reported() {
        let err = FetchParams { filter: Some("age>=".into()), ..Default::default() }
            .into_options()
            .unwrap_err();

        assert!(err.is_client_error());
    }
}
