//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::error::PersistenceResult;
use crate::traits::store::ResultStore;
use crate::types::{
    observation::AggregatedResult,
    summary::{CompanySummary, RunRecord},
};

type Key = (String, i32, String);

/// In-memory result store.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
pub struct MemoryStore {
    results: RwLock<BTreeMap<Key, AggregatedResult>>,
    runs: RwLock<Vec<RunRecord>>,
    writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            results: RwLock::new(BTreeMap::new()),
            runs: RwLock::new(Vec::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.results.write().unwrap().clear();
        self.runs.write().unwrap().clear();
        self.writes.store(0, Ordering::SeqCst);
    }

    /// Number of stored result rows.
    pub fn row_count(&self) -> usize {
        self.results.read().unwrap().len()
    }

    /// Number of successful upserts since creation (or `clear`).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn key(result: &AggregatedResult) -> Key {
        (
            result.company.clone(),
            result.report_year,
            result.indicator_id.clone(),
        )
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn upsert(&self, result: &AggregatedResult) -> PersistenceResult<()> {
        self.results
            .write()
            .unwrap()
            .insert(Self::key(result), result.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn summary(&self, company: &str, report_year: i32) -> PersistenceResult<CompanySummary> {
        let results = self.results.read().unwrap();
        let rows = results
            .values()
            .filter(|r| r.company == company && r.report_year == report_year)
            .map(|r| (r.value, r.confidence));

        Ok(CompanySummary::from_rows(company, report_year, rows))
    }

    async fn results(
        &self,
        company: Option<&str>,
        report_year: Option<i32>,
    ) -> PersistenceResult<Vec<AggregatedResult>> {
        // BTreeMap key order is (company, year, indicator_id)
        let mut rows: Vec<AggregatedResult> = self
            .results
            .read()
            .unwrap()
            .values()
            .filter(|r| company.map_or(true, |c| r.company == c))
            .filter(|r| report_year.map_or(true, |y| r.report_year == y))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            a.company
                .cmp(&b.company)
                .then_with(|| a.indicator_id.cmp(&b.indicator_id))
                .then_with(|| a.report_year.cmp(&b.report_year))
        });
        Ok(rows)
    }

    async fn summaries(&self) -> PersistenceResult<Vec<CompanySummary>> {
        let results = self.results.read().unwrap();

        let mut groups: BTreeMap<(String, i32), Vec<(Option<f64>, f64)>> = BTreeMap::new();
        for r in results.values() {
            groups
                .entry((r.company.clone(), r.report_year))
                .or_default()
                .push((r.value, r.confidence));
        }

        Ok(groups
            .into_iter()
            .map(|((company, year), rows)| CompanySummary::from_rows(company, year, rows))
            .collect())
    }

    async fn low_confidence(&self, threshold: f64) -> PersistenceResult<Vec<AggregatedResult>> {
        let mut rows: Vec<AggregatedResult> = self
            .results
            .read()
            .unwrap()
            .values()
            .filter(|r| r.confidence < threshold)
            .cloned()
            .collect();

        rows.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));
        Ok(rows)
    }

    async fn delete_company(&self, company: &str, report_year: Option<i32>) -> PersistenceResult<u64> {
        let mut results = self.results.write().unwrap();
        let before = results.len();
        results.retain(|(c, y, _), _| !(c == company && report_year.map_or(true, |ry| *y == ry)));
        Ok((before - results.len()) as u64)
    }

    async fn record_run(&self, run: &RunRecord) -> PersistenceResult<()> {
        let mut runs = self.runs.write().unwrap();
        match runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => runs.push(run.clone()),
        }
        Ok(())
    }

    async fn runs(&self, limit: usize) -> PersistenceResult<Vec<RunRecord>> {
        let mut runs = self.runs.read().unwrap().clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::indicator::{Category, IndicatorDefinition};
    use crate::types::observation::{Observation, ResultStatus};

    fn result(company: &str, id: &str, value: Option<f64>, confidence: f64) -> AggregatedResult {
        let def = IndicatorDefinition::new(id, id, Category::Environmental, "t");
        match value {
            Some(v) => AggregatedResult::from_observation(
                Observation::new(company, 2024, id, Some(v), "t", confidence),
                &def,
            ),
            None => AggregatedResult::not_extracted(company, 2024, &def, ResultStatus::NotMentioned),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_key() {
        let store = MemoryStore::new();
        store.upsert(&result("Acme", "E1", Some(1.0), 0.5)).await.unwrap();
        store.upsert(&result("Acme", "E1", Some(2.0), 0.9)).await.unwrap();

        assert_eq!(store.row_count(), 1);
        assert_eq!(store.write_count(), 2);
        let rows = store.results(Some("Acme"), Some(2024)).await.unwrap();
        assert_eq!(rows[0].value, Some(2.0));
    }

    #[tokio::test]
    async fn test_summary_and_low_confidence() {
        let store = MemoryStore::new();
        store.upsert(&result("Acme", "E1", Some(1.0), 0.9)).await.unwrap();
        store.upsert(&result("Acme", "E2", Some(1.0), 0.4)).await.unwrap();
        store.upsert(&result("Acme", "E3", None, 0.0)).await.unwrap();
        store.upsert(&result("Globex", "E1", Some(1.0), 1.0)).await.unwrap();

        let summary = store.summary("Acme", 2024).await.unwrap();
        assert_eq!(summary.total_indicators, 3);
        assert_eq!(summary.extracted_count, 2);
        assert_eq!(summary.avg_confidence, 0.433);
        assert_eq!(summary.accuracy_percent, 66.7);

        let low = store.low_confidence(0.6).await.unwrap();
        let ids: Vec<_> = low.iter().map(|r| r.indicator_id.as_str()).collect();
        assert_eq!(ids, vec!["E3", "E2"]);

        let summaries = store.summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].company, "Globex");
    }

    #[tokio::test]
    async fn test_delete_company() {
        let store = MemoryStore::new();
        store.upsert(&result("Acme", "E1", Some(1.0), 0.9)).await.unwrap();
        store.upsert(&result("Acme", "E2", Some(1.0), 0.9)).await.unwrap();
        store.upsert(&result("Globex", "E1", Some(1.0), 0.9)).await.unwrap();

        assert_eq!(store.delete_company("Acme", Some(2023)).await.unwrap(), 0);
        assert_eq!(store.delete_company("Acme", None).await.unwrap(), 2);
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn test_record_run_updates_in_place() {
        let store = MemoryStore::new();
        let run = RunRecord::start("Acme", 2024, 20);
        store.record_run(&run).await.unwrap();
        store.record_run(&run.clone().fail("boom")).await.unwrap();

        let runs = store.runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].error_message.as_deref(), Some("boom"));
    }
}
