//! HTTP tests for the dashboard API.
//!
//! Drives the router directly with `tower::ServiceExt::oneshot` over an
//! in-memory store and a scripted extractor.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use csrd_extraction::{
    testing::MockExtractor, AggregatedResult, IndicatorCatalog, IndicatorDefinition,
    MemoryStore, Orchestrator, ResultStatus, ResultStore,
};
use csrd_server::server::{build_app, AppState};
use serde_json::Value;
use tower::ServiceExt;

fn state(store: Arc<MemoryStore>, extractor: MockExtractor, raw_dir: &Path) -> AppState {
    let orchestrator = Orchestrator::new(
        Arc::new(extractor),
        store.clone(),
        Arc::new(IndicatorCatalog::builtin()),
    );
    AppState::new(store, orchestrator, raw_dir, 2024, 0.6)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn post(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn seed(store: &MemoryStore) {
    let def = IndicatorDefinition::new(
        "E1",
        "Scope 1 GHG Emissions",
        csrd_extraction::Category::Environmental,
        "tCO2e",
    );
    let mut extracted =
        AggregatedResult::not_extracted("Acme", 2024, &def, ResultStatus::Extracted);
    extracted.value = Some(1234.0);
    extracted.confidence = 0.95;
    extracted.source_page = Some(12);
    store.upsert(&extracted).await.unwrap();

    let missing = AggregatedResult::not_extracted("Globex", 2024, &def, ResultStatus::NotMentioned);
    store.upsert(&missing).await.unwrap();
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(state(Arc::new(MemoryStore::new()), MockExtractor::new(), dir.path()));

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["extraction_running"], false);
}

#[tokio::test]
async fn test_stats_and_results() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    seed(&store).await;
    let app = build_app(state(store, MockExtractor::new(), dir.path()));

    let (status, body) = get(&app, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    let stats: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats["total_companies"], 2);
    assert_eq!(stats["extracted"], 1);
    assert_eq!(stats["overall_accuracy_percent"], 50.0);
    assert_eq!(stats["low_confidence"], 1);

    let (status, body) = get(&app, "/api/results?company=Acme&year=2024").await;
    assert_eq!(status, StatusCode::OK);
    let results: Vec<AggregatedResult> = serde_json::from_slice(&body).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, Some(1234.0));

    let (_, body) = get(&app, "/api/low-confidence").await;
    let flagged: Vec<AggregatedResult> = serde_json::from_slice(&body).unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].company, "Globex");
}

#[tokio::test]
async fn test_download_is_csv() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    seed(&store).await;
    let app = build_app(state(store, MockExtractor::new(), dir.path()));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/download").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.contains("Acme,2024,E1,Scope 1 GHG Emissions,1234,tCO2e,0.95,12,"));
}

#[tokio::test]
async fn test_extract_runs_in_background_and_rejects_overlap() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("acme_2024.md"), "Scope 1 emissions: 1,234 tCO2e").unwrap();

    let store = Arc::new(MemoryStore::new());
    let extractor = MockExtractor::new()
        .with_delay(Duration::from_millis(100))
        .with_observation(1, "E1", Some(1234.0), 0.9);
    let state = state(store.clone(), extractor, dir.path());
    let app = build_app(state.clone());

    let (status, body) = post(&app, "/api/extract").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["companies"][0], "acme");

    let (status, _) = post(&app, "/api/extract").await;
    assert_eq!(status, StatusCode::CONFLICT);

    for _ in 0..100 {
        if !state.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!state.is_running());

    let rows = store.results(Some("acme"), Some(2024)).await.unwrap();
    assert_eq!(rows.len(), 20);
}

#[tokio::test]
async fn test_extract_without_documents() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(Arc::new(MemoryStore::new()), MockExtractor::new(), dir.path());
    let app = build_app(state.clone());

    let (status, body) = post(&app, "/api/extract").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("no documents"));
    // the run slot is released
    assert!(!state.is_running());
}

#[tokio::test]
async fn test_events_stream() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(state(Arc::new(MemoryStore::new()), MockExtractor::new(), dir.path()));

    let response = app
        .oneshot(Request::builder().uri("/api/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
}
