//! Schema administration and export, behind a bearer token.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use crate::export::export_cypher_dump;
use crate::schema::SchemaDefinition;

use super::{ApiError, AppState};

/// Admin routes guarded by `token`.
pub fn admin_routes(token: Arc<str>) -> Router<AppState> {
    Router::new()
        .route("/admin/schema", get(list_schema).post(register_schema))
        .route("/admin/schema/{version}/activate", post(activate_schema))
        .route("/admin/export", get(export))
        .route_layer(middleware::from_fn_with_state(token, require_bearer))
}

async fn require_bearer(State(token): State<Arc<str>>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(p) if constant_time_eq(p.as_bytes(), token.as_bytes()) => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "rejected admin request");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized", "message": "missing or invalid bearer token" })),
            )
                .into_response()
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn list_schema(State(state): State<AppState>) -> Json<JsonValue> {
    let registry = state.kg.schema();
    let versions: Vec<JsonValue> = registry
        .versions()
        .iter()
        .map(|v| {
            json!({
                "version": v.version,
                "created_at": v.created_at,
                "entity_types": v.entity_types.keys().collect::<Vec<_>>(),
                "predicates": v.relations.iter().map(|r| &r.predicate).collect::<Vec<_>>(),
            })
        })
        .collect();
    Json(json!({
        "active": registry.active().as_ref(),
        "versions": versions,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegisterSchema {
    definition: SchemaDefinition,
    #[serde(default)]
    activate: bool,
}

async fn register_schema(
    State(state): State<AppState>,
    Json(body): Json<JsonValue>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let request: RegisterSchema = serde_json::from_value(body)?;
    let registry = state.kg.schema();
    let version = registry.register(request.definition)?;
    let previous = if request.activate { Some(registry.activate(version)?) } else { None };
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "version": version,
            "active": registry.active_version(),
            "previous": previous,
        })),
    ))
}

async fn activate_schema(
    State(state): State<AppState>,
    Path(version): Path<u32>,
) -> Result<Json<JsonValue>, ApiError> {
    let previous = state.kg.schema().activate(version)?;
    Ok(Json(json!({ "active": version, "previous": previous })))
}

async fn export(State(state): State<AppState>) -> Result<Response, ApiError> {
    let snapshot = state.kg.snapshot();
    let mut out = Vec::new();
    export_cypher_dump(&snapshot, &mut out)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        out,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secrets"));
    }
}
