//! Public endpoints: service info, health, ingestion and queries.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use crate::Error;
use crate::loader::DocumentSource;
use crate::model::SourceFormat;
use crate::pipeline::{IngestionStatus, TrackingId};
use crate::query::{QueryResult, StructuredQuery};

use super::{ApiError, AppState};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/ingest", post(submit))
        .route("/ingest/{id}", get(ingest_status))
        .route("/ingest/{id}/cancel", post(cancel))
        .route("/ingest/{id}/retry", post(retry))
        .route("/query", post(run_query))
}

async fn service_info(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.environment.as_ref(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<JsonValue> {
    let snapshot = state.kg.snapshot();
    Json(json!({
        "status": "ok",
        "last_success": state.kg.pipeline().last_success(),
        "snapshot_version": snapshot.version(),
        "entities": snapshot.entity_count(),
        "relations": snapshot.relation_count(),
        "schema_version": state.kg.schema().active_version(),
    }))
}

// ============================================================================
// Ingestion
// ============================================================================

/// `{ "path" }`, `{ "uri" }` or `{ "name", "content", "format"? }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IngestRequest {
    Path(PathSource),
    Uri(UriSource),
    Inline(InlineSource),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UriSource {
    uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InlineSource {
    name: String,
    content: String,
    #[serde(default)]
    format: Option<SourceFormat>,
}

impl From<IngestRequest> for DocumentSource {
    fn from(req: IngestRequest) -> Self {
        match req {
            IngestRequest::Path(PathSource { path }) => DocumentSource::Path(path),
            IngestRequest::Uri(UriSource { uri }) => DocumentSource::Uri(uri),
            IngestRequest::Inline(InlineSource { name, content, format }) => DocumentSource::Inline {
                name,
                bytes: content.into_bytes(),
                format,
            },
        }
    }
}

async fn submit(
    State(state): State<AppState>,
    Json(body): Json<JsonValue>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let request: IngestRequest = serde_json::from_value(body)?;
    if !state.file_sources && !matches!(request, IngestRequest::Inline(_)) {
        return Err(Error::Forbidden("file sources are disabled; send inline content".into()).into());
    }
    let id = state.kg.submit(request.into());
    Ok((StatusCode::ACCEPTED, Json(json!({ "tracking_id": id }))))
}

async fn ingest_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IngestionStatus>, ApiError> {
    let id: TrackingId = id.parse()?;
    Ok(Json(state.kg.status(id)?))
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IngestionStatus>, ApiError> {
    let id: TrackingId = id.parse()?;
    Ok(Json(state.kg.cancel(id)?))
}

async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<IngestionStatus>), ApiError> {
    let id: TrackingId = id.parse()?;
    state.kg.retry(id)?;
    Ok((StatusCode::ACCEPTED, Json(state.kg.status(id)?)))
}

// ============================================================================
// Queries
// ============================================================================

/// Either `{ "text": "MATCH ..." }` or a structured query.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QueryRequest {
    Text(TextQuery),
    Structured(StructuredQuery),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TextQuery {
    text: String,
}

async fn run_query(
    State(state): State<AppState>,
    Json(body): Json<JsonValue>,
) -> Result<Json<QueryResult>, ApiError> {
    let request: QueryRequest = serde_json::from_value(body)?;
    let result = match request {
        QueryRequest::Text(TextQuery { text }) => state.kg.query_text(&text)?,
        QueryRequest::Structured(query) => state.kg.query(&query)?,
    };
    tracing::debug!(
        rows = result.stats.rows,
        snapshot_version = result.stats.snapshot_version,
        "query answered"
    );
    Ok(Json(result))
}
