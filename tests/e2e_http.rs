//! HTTP surface tests, driving the router in-process with `oneshot`.
#![cfg(feature = "http")]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use cortex_kg::config::PipelineConfig;
use cortex_kg::http::{AppState, router};
use cortex_kg::{FileLoader, KnowledgeGraph, MemoryStore, RuleExtractor, SchemaRegistry};
use cortex_kg::schema::{EntityTypeDef, RelationRule, SchemaDefinition};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

const TOKEN: &str = "s3cret";

fn app(token: Option<&str>) -> Router {
    router(AppState::new(KnowledgeGraph::in_memory(), "test"), token)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
    request
}

/// A router whose loader only reads files under `root`.
fn rooted_app(root: &Path) -> Router {
    let kg = KnowledgeGraph::new(
        Arc::new(MemoryStore::new()),
        Arc::new(SchemaRegistry::regulatory()),
        Arc::new(FileLoader::new().with_root(root)),
        Arc::new(RuleExtractor::new()),
        PipelineConfig::default(),
    );
    router(AppState::new(kg, "test").with_file_sources(true), Some(TOKEN))
}

async fn ingest_and_wait(app: &Router, name: &str, content: &str) -> Value {
    submit_and_wait(app, json!({ "name": name, "content": content })).await
}

async fn submit_and_wait(app: &Router, request: Value) -> Value {
    let (status, body) = send(app, post("/ingest", request)).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    let id = body["tracking_id"].as_str().unwrap().to_string();

    let poll = async {
        loop {
            let (status, body) = send(app, get(&format!("/ingest/{id}"))).await;
            assert_eq!(status, StatusCode::OK);
            if matches!(body["stage"].as_str(), Some("committed" | "failed" | "cancelled")) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll).await.unwrap()
}

// ============================================================================
// 1. Public routes
// ============================================================================

#[tokio::test]
async fn test_service_info_and_health() {
    let app = app(None);
    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "cortex-kg");
    assert_eq!(body["environment"], "test");

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["snapshot_version"], 0);
    assert_eq!(body["schema_version"], 1);
    assert!(body["last_success"].is_null());
}

#[tokio::test]
async fn test_ingest_then_query() {
    let app = app(None);
    let status = ingest_and_wait(
        &app,
        "art5.txt",
        "Article 5 requires conformity assessment for high-risk AI systems.",
    )
    .await;
    assert_eq!(status["stage"], "committed");
    assert_eq!(status["entities"], 3);
    assert_eq!(status["relations"], 1);

    let (code, body) = send(&app, post("/query", json!({ "text": "MATCH Article -[requires]-> DEPTH 1" }))).await;
    assert_eq!(code, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["root"]["label"], "Article 5");

    let (code, body) = send(
        &app,
        post("/query", json!({ "entityType": "Concept", "propertyFilters": { "label": "conformity assessment" } })),
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["rows"].as_array().unwrap().len(), 1);
    assert_eq!(body["rows"][0]["root"]["entity_type"], "Concept");

    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["snapshot_version"], 1);
    assert!(health["last_success"].is_string());
}

#[tokio::test]
async fn test_error_mapping() {
    let app = app(None);

    let (code, body) = send(&app, post("/query", json!({ "text": "MATCH Article WHERE" }))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "query_syntax");

    let (code, body) = send(&app, post("/query", json!({ "entityType": "Regulation" }))).await;
    assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "unknown_type");

    let (code, body) = send(
        &app,
        post("/query", json!({ "entityType": "Article", "relationPath": ["refers_to"], "depth": 11 })),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_depth");

    let (code, body) = send(&app, post("/ingest", json!({ "bogus": true }))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (code, body) = send(&app, get("/ingest/not-a-uuid")).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let unknown = uuid::Uuid::new_v4();
    let (code, _) = send(&app, get(&format!("/ingest/{unknown}"))).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_terminal_document_conflicts() {
    let app = app(None);
    let status = ingest_and_wait(&app, "a.txt", "Article 9 prohibits social scoring.").await;
    let id = status["tracking_id"].as_str().unwrap();

    let (code, body) = send(&app, post(&format!("/ingest/{id}/cancel"), json!({}))).await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    // only failed documents can be retried
    let (code, _) = send(&app, post(&format!("/ingest/{id}/retry"), json!({}))).await;
    assert_eq!(code, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_failed_document_reports_error() {
    let app = app(None);
    let status = ingest_and_wait(&app, "broken.pdf", "%PDF-1.4\n1 0 obj").await;
    assert_eq!(status["stage"], "failed");
    assert!(status["error"].is_string());
}

// ============================================================================
// 2. Admin routes
// ============================================================================

#[tokio::test]
async fn test_admin_routes_absent_without_token() {
    let app = app(None);
    let (code, _) = send(&app, get("/admin/schema")).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_requires_bearer() {
    let app = app(Some(TOKEN));
    let (code, body) = send(&app, get("/admin/schema")).await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (code, _) = send(&app, with_bearer(get("/admin/schema"), "wrong")).await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);

    let (code, body) = send(&app, with_bearer(get("/admin/schema"), TOKEN)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["active"]["version"], 1);
    assert_eq!(body["versions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_register_and_activate_schema() {
    let app = app(Some(TOKEN));
    let definition = SchemaDefinition::regulatory()
        .with_entity_type("Regulation", EntityTypeDef::default())
        .with_relation(RelationRule::new("part_of", "Article", "Regulation"));

    let request = post(
        "/admin/schema",
        json!({ "definition": serde_json::to_value(&definition).unwrap() }),
    );
    let (code, body) = send(&app, with_bearer(request, TOKEN)).await;
    assert_eq!(code, StatusCode::CREATED);
    assert_eq!(body["version"], 2);
    assert_eq!(body["active"], 1);

    // still inactive: queries against the new type are rejected
    let (code, _) = send(&app, post("/query", json!({ "entityType": "Regulation" }))).await;
    assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);

    let (code, body) = send(&app, with_bearer(post("/admin/schema/2/activate", json!({})), TOKEN)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["previous"], 1);

    let (code, body) = send(&app, post("/query", json!({ "entityType": "Regulation" }))).await;
    assert_eq!(code, StatusCode::OK);
    assert!(body["rows"].as_array().unwrap().is_empty());

    let (code, body) = send(&app, with_bearer(post("/admin/schema/9/activate", json!({})), TOKEN)).await;
    assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "schema");
}

#[tokio::test]
async fn test_admin_export() {
    let app = app(Some(TOKEN));
    ingest_and_wait(&app, "a.txt", "Article 6 refers to Article 5.").await;

    let (code, body) = send(&app, with_bearer(get("/admin/export"), TOKEN)).await;
    assert_eq!(code, StatusCode::OK);
    let script = body.as_str().unwrap();
    assert!(script.contains("MERGE (n:Article"));
    assert!(script.contains("refers_to"));
}

// ============================================================================
// 3. Request shapes and file sources
// ============================================================================

#[tokio::test]
async fn test_unknown_fields_are_rejected() {
    let app = app(None);
    let bodies = [
        ("/ingest", json!({ "name": "a.txt", "content": "Article 5.", "encoding": "utf-8" })),
        ("/ingest", json!({ "path": "a.txt", "content": "Article 5." })),
        ("/ingest", json!({ "uri": "file:///a.txt", "recursive": true })),
        ("/query", json!({ "text": "MATCH Article", "depth": 1 })),
        ("/query", json!({ "entityType": "Article", "follow": ["requires"] })),
    ];
    for (uri, body) in bodies {
        let (code, response) = send(&app, post(uri, body.clone())).await;
        assert_eq!(code, StatusCode::BAD_REQUEST, "{uri} {body}");
        assert_eq!(response["error"], "bad_request");
    }
    let (_, health) = send(&app, get("/health")).await;
    assert_eq!(health["snapshot_version"], 0);
}

#[tokio::test]
async fn test_file_sources_disabled_without_root() {
    let dir = tempfile::tempdir().unwrap();
    let secret = dir.path().join("secret.txt");
    std::fs::write(&secret, "Article 9 prohibits social scoring.").unwrap();

    // an admin token guards /admin, not file reads
    let app = app(Some(TOKEN));
    for body in [
        json!({ "path": secret }),
        json!({ "uri": format!("file://{}", secret.display()) }),
    ] {
        let (code, response) = send(&app, post("/ingest", body)).await;
        assert_eq!(code, StatusCode::FORBIDDEN);
        assert_eq!(response["error"], "forbidden");
    }
    let (_, body) = send(&app, post("/query", json!({ "text": "MATCH Article" }))).await;
    assert!(body["rows"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_file_sources_confined_to_root() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("art5.txt"), "Article 5 requires human oversight.").unwrap();
    let outside = tempfile::tempdir().unwrap();
    let secret = outside.path().join("secret.txt");
    std::fs::write(&secret, "Article 9 prohibits social scoring.").unwrap();
    let app = rooted_app(root.path());

    let status = submit_and_wait(&app, json!({ "path": "art5.txt" })).await;
    assert_eq!(status["stage"], "committed", "{status}");

    let sibling = outside.path().file_name().unwrap().to_string_lossy().into_owned();
    for request in [
        json!({ "path": secret }),
        json!({ "uri": format!("file://{}", secret.display()) }),
        json!({ "path": format!("../{sibling}/secret.txt") }),
    ] {
        let status = submit_and_wait(&app, request).await;
        assert_eq!(status["stage"], "failed");
        assert!(status["error"].as_str().unwrap().contains("outside the document root"));
    }

    let (_, body) = send(&app, post("/query", json!({ "text": "MATCH Article" }))).await;
    let labels: Vec<&str> = body["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["root"]["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["Article 5"]);
}
