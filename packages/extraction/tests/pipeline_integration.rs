//! Integration tests for the extraction pipeline.
//!
//! These tests drive the orchestrator end to end over text documents:
//! 1. Load pages
//! 2. Chunk per indicator group
//! 3. Extract with a scripted mock
//! 4. Aggregate and persist
//! 5. Report progress

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use csrd_extraction::{
    testing::{FailingStore, MockExtractor, MockFailure},
    CompanyJob, CompanyState, FailureKind, IndicatorCatalog, MemoryStore, Orchestrator,
    PipelineConfig, ProgressEvent, ProgressHub, ResultStatus, ResultStore, RetryPolicy,
    Verification,
};
use tokio_util::sync::CancellationToken;

/// Helper to write a text report with one section per page.
fn write_report(dir: &Path, name: &str, pages: usize) -> PathBuf {
    let body: Vec<String> = (1..=pages)
        .map(|n| format!("Page {} of the sustainability statement.", n))
        .collect();
    let path = dir.join(name);
    std::fs::write(&path, body.join("\n---PAGE BREAK---\n")).unwrap();
    path
}

/// Helper to write a text report with the given page texts.
fn write_pages(dir: &Path, name: &str, pages: &[&str]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pages.join("\n---PAGE BREAK---\n")).unwrap();
    path
}

/// One page per chunk, no relevance filter, fast retries.
fn test_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_relevance_filter(false)
        .with_max_pages_per_chunk(1)
        .with_retry(
            RetryPolicy::new(2).with_backoff(Duration::from_millis(1), Duration::from_millis(5)),
        )
        .with_persist_retry(
            RetryPolicy::new(3).with_backoff(Duration::from_millis(1), Duration::from_millis(5)),
        )
}

fn orchestrator(extractor: MockExtractor, store: Arc<dyn ResultStore>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(extractor),
        store,
        Arc::new(IndicatorCatalog::builtin()),
    )
    .with_config(test_config())
}

#[tokio::test]
async fn test_every_indicator_gets_exactly_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 5);
    let store = Arc::new(MemoryStore::new());
    let extractor = MockExtractor::new()
        .with_observation(2, "E1", Some(1234.0), 0.95)
        .with_observation(4, "S1", Some(5200.0), 1.4);

    let report = orchestrator(extractor, store.clone())
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;

    let outcome = report.outcome("Acme").unwrap();
    assert_eq!(outcome.state, CompanyState::Done);
    assert_eq!(outcome.results.len(), 20);
    assert_eq!(outcome.rows_written, 20);
    assert_eq!(store.row_count(), 20);

    let rows = store.results(Some("Acme"), Some(2024)).await.unwrap();
    assert_eq!(rows.len(), 20);
    assert!(rows.iter().all(|r| (0.0..=1.0).contains(&r.confidence)));

    let e1 = rows.iter().find(|r| r.indicator_id == "E1").unwrap();
    assert_eq!(e1.value, Some(1234.0));
    assert_eq!(e1.source_page, Some(2));
    assert_eq!(e1.status, ResultStatus::Extracted);

    // out-of-range confidence is not trusted
    let s1 = rows.iter().find(|r| r.indicator_id == "S1").unwrap();
    assert_eq!(s1.confidence, 0.0);

    let summary = outcome.summary.as_ref().unwrap();
    assert_eq!(summary.total_indicators, 20);
    assert_eq!(summary.extracted_count, 2);
    assert_eq!(summary.accuracy_percent, 10.0);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 3);
    let store = Arc::new(MemoryStore::new());
    let orchestrator = orchestrator(
        MockExtractor::new().with_observation(1, "G1", Some(40.0), 0.8),
        store.clone(),
    );

    let job = CompanyJob::new("Acme", 2024, doc);
    orchestrator.run(vec![job.clone()]).await;
    let first = store.results(None, None).await.unwrap();

    orchestrator.run(vec![job]).await;
    let second = store.results(None, None).await.unwrap();

    assert_eq!(store.row_count(), 20);
    assert_eq!(store.write_count(), 40);
    assert_eq!(first, second);

    let runs = store.runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
}

#[tokio::test]
async fn test_best_observation_wins() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 5);
    let store = Arc::new(MemoryStore::new());
    let extractor = MockExtractor::new()
        .with_observation(2, "E1", Some(100.0), 0.7)
        .with_observation(3, "E1", None, 0.99)
        .with_observation(4, "E1", Some(200.0), 0.9);

    let report = orchestrator(extractor, store.clone())
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;

    let outcome = report.outcome("Acme").unwrap();
    let e1 = outcome.results.iter().find(|r| r.indicator_id == "E1").unwrap();
    assert_eq!(e1.value, Some(200.0));
    assert_eq!(e1.source_page, Some(4));
}

#[tokio::test]
async fn test_failed_chunks_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 5);
    let store = Arc::new(MemoryStore::new());
    let extractor = MockExtractor::new()
        .fail_page(1, MockFailure::Timeout)
        .fail_page(2, MockFailure::Timeout)
        .fail_page(3, MockFailure::InvalidSchema)
        .with_observation(4, "E1", Some(1234.0), 0.95);

    let report = orchestrator(extractor, store.clone())
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;

    let outcome = report.outcome("Acme").unwrap();
    assert_eq!(outcome.state, CompanyState::Done);
    // 3 failing pages in each of 3 groups
    assert_eq!(outcome.failed_chunks.len(), 9);
    assert_eq!(store.row_count(), 20);

    let e1 = outcome.results.iter().find(|r| r.indicator_id == "E1").unwrap();
    assert_eq!(e1.status, ResultStatus::Extracted);

    let e2 = outcome.results.iter().find(|r| r.indicator_id == "E2").unwrap();
    assert_eq!(e2.value, None);
    assert_eq!(e2.status, ResultStatus::Timeout);

    assert!(outcome
        .failed_chunks
        .iter()
        .any(|f| f.reason == FailureKind::InvalidSchema));
}

#[tokio::test]
async fn test_retry_recovers_transient_failure() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 2);
    let store = Arc::new(MemoryStore::new());
    let extractor = MockExtractor::new()
        .fail_page_times(2, MockFailure::InvalidSchema, 1)
        .with_observation(2, "E3", Some(88000.0), 0.9);

    let report = orchestrator(extractor.clone(), store.clone())
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;

    let outcome = report.outcome("Acme").unwrap();
    assert!(outcome.failed_chunks.is_empty());
    let e3 = outcome.results.iter().find(|r| r.indicator_id == "E3").unwrap();
    assert_eq!(e3.value, Some(88000.0));

    // 2 pages x 3 groups, plus one retry
    assert_eq!(extractor.calls().len(), 7);
}

#[tokio::test]
async fn test_raw_replies_go_through_the_parser() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 3);
    let store = Arc::new(MemoryStore::new());
    let reply = r#"```json
{"observations": [
  {"indicator_id": "E1", "value": "1,234", "unit": "tCO2e", "confidence": 0.9, "source_page": 3, "notes": "GHG table"},
  {"indicator_id": "E1", "value": "n/a", "unit": "tCO2e", "confidence": 0.9, "source_page": 3},
  {"indicator_id": "X9", "value": 1, "unit": "", "confidence": 0.9, "source_page": 3}
]}
```"#;
    let extractor = MockExtractor::new().with_raw_reply(3, reply);

    let report = orchestrator(extractor, store.clone())
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;

    let outcome = report.outcome("Acme").unwrap();
    let e1 = outcome.results.iter().find(|r| r.indicator_id == "E1").unwrap();
    assert_eq!(e1.value, Some(1234.0));
    assert_eq!(e1.source_page, Some(3));
    assert_eq!(e1.notes.as_deref(), Some("GHG table"));
    assert_eq!(outcome.results.len(), 20);
}

#[tokio::test]
async fn test_failing_company_does_not_affect_others() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_report(dir.path(), "acme_2024.md", 2);
    let store = Arc::new(MemoryStore::new());

    let report = orchestrator(MockExtractor::new(), store.clone())
        .run(vec![
            CompanyJob::new("Acme", 2024, good),
            CompanyJob::new("Ghost", 2024, dir.path().join("ghost_2024.pdf")),
        ])
        .await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);

    let ghost = report.outcome("Ghost").unwrap();
    assert_eq!(ghost.state, CompanyState::Failed);
    assert!(ghost.error.as_deref().unwrap().contains("not found"));

    assert_eq!(store.results(Some("Acme"), None).await.unwrap().len(), 20);
    assert!(store.results(Some("Ghost"), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancellation_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 3);
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();

    let orchestrator = orchestrator(
        MockExtractor::new()
            .fail_page(1, MockFailure::Hang)
            .with_observation(2, "E1", Some(1.0), 0.9),
        store.clone(),
    )
    .with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = orchestrator.run(vec![CompanyJob::new("Acme", 2024, doc)]).await;

    let outcome = report.outcome("Acme").unwrap();
    assert_eq!(outcome.state, CompanyState::Failed);
    assert_eq!(store.row_count(), 0);
}

#[tokio::test]
async fn test_row_failures_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 2);
    let store = Arc::new(
        FailingStore::new(MemoryStore::new())
            .fail_indicator("G1")
            .fail_indicator_times("E1", 2),
    );

    let report = orchestrator(MockExtractor::new(), store.clone())
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;

    let outcome = report.outcome("Acme").unwrap();
    assert_eq!(outcome.state, CompanyState::Done);
    assert_eq!(outcome.rows_written, 19);
    assert_eq!(outcome.failed_rows.len(), 1);
    assert_eq!(outcome.failed_rows[0].indicator_id, "G1");

    // constraint errors are not retried, connection errors are
    assert_eq!(store.attempts("G1"), 1);
    assert_eq!(store.attempts("E1"), 3);
    assert_eq!(store.inner().row_count(), 19);
}

#[tokio::test]
async fn test_progress_events_follow_the_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 2);
    let hub = ProgressHub::new();
    let mut rx = hub.subscribe();

    orchestrator(MockExtractor::new(), Arc::new(MemoryStore::new()))
        .with_progress(hub)
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let states: Vec<CompanyState> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            CompanyState::Loading,
            CompanyState::Extracting,
            CompanyState::Aggregating,
            CompanyState::Persisting,
            CompanyState::Done,
        ]
    );

    let chunks = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::ChunkCompleted { .. }))
        .count();
    assert_eq!(chunks, 6);

    assert!(matches!(
        events.last(),
        Some(ProgressEvent::RunFinished {
            companies: 1,
            succeeded: 1,
            failed: 0
        })
    ));
}

#[tokio::test]
async fn test_ties_resolve_in_page_order_whatever_answers_first() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 3);
    let store = Arc::new(MemoryStore::new());
    // equal confidence and no page: the first chunk's value must win even
    // though its call answers last
    let extractor = MockExtractor::new()
        .with_unpaged_observation(1, "E1", Some(1.0), 0.9)
        .with_unpaged_observation(2, "E1", Some(2.0), 0.9)
        .with_unpaged_observation(3, "E1", Some(3.0), 0.9)
        .with_page_delay(1, Duration::from_millis(200))
        .with_page_delay(2, Duration::from_millis(100));

    let report = orchestrator(extractor, store.clone())
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;

    let outcome = report.outcome("Acme").unwrap();
    let e1 = outcome.results.iter().find(|r| r.indicator_id == "E1").unwrap();
    assert_eq!(e1.value, Some(1.0));
    assert_eq!(e1.source_page, None);
}

#[tokio::test]
async fn test_hung_calls_are_bounded_by_the_call_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 2);
    let store = Arc::new(MemoryStore::new());
    let extractor = MockExtractor::new()
        .fail_page(1, MockFailure::Hang)
        .with_observation(2, "E1", Some(1234.0), 0.95);

    let orchestrator = orchestrator(extractor.clone(), store.clone())
        .with_config(test_config().with_call_timeout(Duration::from_millis(50)));

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(vec![CompanyJob::new("Acme", 2024, doc)]),
    )
    .await
    .expect("a hung model call must not stall the run");

    let outcome = report.outcome("Acme").unwrap();
    assert_eq!(outcome.state, CompanyState::Done);
    // page 1 in each of 3 groups
    assert_eq!(outcome.failed_chunks.len(), 3);
    assert!(outcome
        .failed_chunks
        .iter()
        .all(|f| f.reason == FailureKind::Timeout));

    let e1 = outcome.results.iter().find(|r| r.indicator_id == "E1").unwrap();
    assert_eq!(e1.value, Some(1234.0));
    let e2 = outcome.results.iter().find(|r| r.indicator_id == "E2").unwrap();
    assert_eq!(e2.status, ResultStatus::Timeout);
    assert_eq!(store.row_count(), 20);

    // 3 hung chunks tried twice each, plus 3 answered chunks
    assert_eq!(extractor.calls().len(), 9);
}

#[tokio::test]
async fn test_chunk_calls_respect_the_concurrency_limit() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 6);
    let extractor = MockExtractor::new().with_delay(Duration::from_millis(20));

    let report = orchestrator(extractor.clone(), Arc::new(MemoryStore::new()))
        .with_config(test_config().with_chunk_concurrency(2))
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(extractor.calls().len(), 18);
    assert_eq!(extractor.peak_in_flight(), 2);
}

#[tokio::test]
async fn test_table_patterns_settle_indicators_before_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_pages(
        dir.path(),
        "acme_2024.md",
        &["Introduction", "| Gross Scope 1 GHG emissions | 48,200 tCO2e | 51,000 tCO2e |"],
    );
    let store = Arc::new(MemoryStore::new());
    let extractor = MockExtractor::new().with_observation(2, "E1", Some(999.0), 0.99);

    let report = orchestrator(extractor.clone(), store.clone())
        .run(vec![CompanyJob::new("Acme", 2024, doc.clone())])
        .await;

    let outcome = report.outcome("Acme").unwrap();
    let e1 = outcome.results.iter().find(|r| r.indicator_id == "E1").unwrap();
    assert_eq!(e1.value, Some(48200.0));
    assert_eq!(e1.confidence, 0.85);
    assert_eq!(e1.source_page, Some(2));
    assert_eq!(e1.unit, "tCO2e");
    assert!(e1.notes.as_deref().unwrap().starts_with("Regex extraction: "));
    assert_eq!(outcome.results.len(), 20);

    // E1 is no longer asked of the model
    let calls = extractor.calls();
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|c| !c.indicator_ids.iter().any(|id| id == "E1")));
    assert!(calls.iter().any(|c| c.indicator_ids.iter().any(|id| id == "E2")));

    // with the scan off the model answers
    let extractor = MockExtractor::new().with_observation(2, "E1", Some(999.0), 0.99);
    let report = orchestrator(extractor, store.clone())
        .with_config(test_config().with_pattern_scan(false))
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;
    let outcome = report.outcome("Acme").unwrap();
    let e1 = outcome.results.iter().find(|r| r.indicator_id == "E1").unwrap();
    assert_eq!(e1.value, Some(999.0));
}

#[tokio::test]
async fn test_middling_confidence_values_are_verified() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 3);
    let store = Arc::new(MemoryStore::new());
    let extractor = MockExtractor::new()
        .with_observation(2, "S1", Some(5000.0), 0.5)
        .with_verification(
            "S1",
            Verification {
                verified: true,
                correct_value: Some(5200.0),
                correct_unit: None,
                confidence: Some(0.9),
                reason: "headcount table".to_string(),
            },
        )
        .with_observation(3, "G1", Some(40.0), 0.6)
        .with_verification(
            "G1",
            Verification {
                verified: false,
                correct_value: None,
                correct_unit: None,
                confidence: Some(0.2),
                reason: "figure is for 2023".to_string(),
            },
        )
        .with_observation(1, "S5", Some(12.0), 0.5)
        .fail_verification("S5")
        .with_observation(1, "E5", Some(50000.0), 0.9);

    let report = orchestrator(extractor.clone(), store.clone())
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;
    let outcome = report.outcome("Acme").unwrap();
    assert_eq!(outcome.state, CompanyState::Done);

    let rows = store.results(Some("Acme"), Some(2024)).await.unwrap();
    let row = |id: &str| rows.iter().find(|r| r.indicator_id == id).unwrap().clone();

    let s1 = row("S1");
    assert_eq!(s1.value, Some(5200.0));
    assert_eq!(s1.confidence, 0.9);
    assert!(s1.notes.as_deref().unwrap().starts_with("Verified: headcount table."));

    let g1 = row("G1");
    assert_eq!(g1.value, Some(40.0));
    assert!((g1.confidence - 0.4).abs() < 1e-9);
    assert!(g1
        .notes
        .as_deref()
        .unwrap()
        .starts_with("Verification uncertain: figure is for 2023."));

    // a failing verifier keeps the aggregated value
    let s5 = row("S5");
    assert_eq!(s5.value, Some(12.0));
    assert_eq!(s5.confidence, 0.5);

    let verifications = extractor.verifications();
    assert!(verifications.iter().all(|v| v.indicator_id != "E5"));
    // S5 is retried once
    assert_eq!(verifications.len(), 4);
    let s1_call = verifications.iter().find(|v| v.indicator_id == "S1").unwrap();
    assert_eq!(s1_call.value, 5000.0);
    assert!(s1_call.excerpt.contains("=== PAGE 2 ==="));
}

#[tokio::test]
async fn test_verification_can_be_turned_off() {
    let dir = tempfile::tempdir().unwrap();
    let doc = write_report(dir.path(), "acme_2024.md", 2);
    let extractor = MockExtractor::new()
        .with_observation(2, "S1", Some(5000.0), 0.5)
        .fail_verification("S1");

    let report = orchestrator(extractor.clone(), Arc::new(MemoryStore::new()))
        .with_config(test_config().with_verification(false))
        .run(vec![CompanyJob::new("Acme", 2024, doc)])
        .await;

    let s1 = report
        .outcome("Acme")
        .unwrap()
        .results
        .iter()
        .find(|r| r.indicator_id == "S1")
        .unwrap()
        .clone();
    assert_eq!(s1.value, Some(5000.0));
    assert_eq!(s1.confidence, 0.5);
    assert!(extractor.verifications().is_empty());
}
