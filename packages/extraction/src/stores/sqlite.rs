//! SQLite storage implementation.
//!
//! A file-based storage backend using SQLite. Good for:
//! - Local development
//! - Single-server deployments
//! - Testing with persistent data

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{PersistenceError, PersistenceResult};
use crate::traits::store::ResultStore;
use crate::types::{
    observation::{AggregatedResult, ResultStatus},
    summary::{CompanySummary, RunRecord, RunStatus},
};

/// SQLite-based result store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    /// - `sqlite://csrd.db` - File-based database
    /// - `sqlite://csrd.db?mode=rwc` - Create if not exists
    pub async fn new(database_url: &str) -> PersistenceResult<Self> {
        Self::connect(database_url, 5).await
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Uses a single connection: every connection to `:memory:` is a
    /// separate database.
    pub async fn in_memory() -> PersistenceResult<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(database_url: &str, max_connections: u32) -> PersistenceResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            // an in-memory database lives only as long as its connection
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError::Connection(Box::new(e)))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sustainability_indicators (
                id TEXT PRIMARY KEY,
                company TEXT NOT NULL,
                report_year INTEGER NOT NULL,
                indicator_id TEXT NOT NULL,
                indicator_name TEXT NOT NULL,
                value REAL,
                unit TEXT NOT NULL,
                confidence_score REAL NOT NULL DEFAULT 0.0
                    CHECK (confidence_score >= 0.0 AND confidence_score <= 1.0),
                source_page INTEGER,
                notes TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (company, report_year, indicator_id)
            );

            CREATE INDEX IF NOT EXISTS idx_indicators_company ON sustainability_indicators(company);
            CREATE INDEX IF NOT EXISTS idx_indicators_year ON sustainability_indicators(report_year);
            CREATE INDEX IF NOT EXISTS idx_indicators_confidence ON sustainability_indicators(confidence_score DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE VIEW IF NOT EXISTS indicator_summary AS
            SELECT
                company,
                report_year,
                COUNT(*) AS total_indicators,
                SUM(CASE WHEN value IS NOT NULL THEN 1 ELSE 0 END) AS extracted_count,
                AVG(confidence_score) AS avg_confidence
            FROM sustainability_indicators
            GROUP BY company, report_year;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS extraction_runs (
                id TEXT PRIMARY KEY,
                company TEXT NOT NULL,
                report_year INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT NOT NULL DEFAULT 'running',
                total_indicators INTEGER NOT NULL DEFAULT 0,
                successful_extractions INTEGER NOT NULL DEFAULT 0,
                avg_confidence REAL,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON extraction_runs(started_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Classify a sqlx error so the caller knows whether to retry.
fn map_sqlx_error(e: sqlx::Error) -> PersistenceError {
    use sqlx::error::ErrorKind;

    match e {
        sqlx::Error::Database(ref db)
            if matches!(
                db.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ) =>
        {
            PersistenceError::Constraint(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PersistenceError::Connection(Box::new(e))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            PersistenceError::Decode(e.to_string())
        }
        other => PersistenceError::Query(Box::new(other)),
    }
}

fn parse_time(s: &str) -> PersistenceResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Decode(format!("Invalid date {}: {}", s, e)))
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct ResultRow {
    company: String,
    report_year: i64,
    indicator_id: String,
    indicator_name: String,
    value: Option<f64>,
    unit: String,
    confidence_score: f64,
    source_page: Option<i64>,
    notes: Option<String>,
    status: String,
}

impl ResultRow {
    fn into_result(self) -> PersistenceResult<AggregatedResult> {
        let status = ResultStatus::parse(&self.status)
            .ok_or_else(|| PersistenceError::Decode(format!("Unknown status: {}", self.status)))?;

        let source_page = self
            .source_page
            .map(u32::try_from)
            .transpose()
            .map_err(|e| PersistenceError::Decode(format!("Invalid source_page: {}", e)))?;

        Ok(AggregatedResult {
            company: self.company,
            report_year: self.report_year as i32,
            indicator_id: self.indicator_id,
            indicator_name: self.indicator_name,
            value: self.value,
            unit: self.unit,
            confidence: self.confidence_score,
            source_page,
            notes: self.notes,
            status,
        })
    }
}

const RESULT_COLUMNS: &str = "company, report_year, indicator_id, indicator_name, value, unit, \
     confidence_score, source_page, notes, status";

#[derive(Debug, FromRow)]
struct SummaryRow {
    company: String,
    report_year: i64,
    total_indicators: i64,
    extracted_count: Option<i64>,
    avg_confidence: Option<f64>,
}

impl SummaryRow {
    fn into_summary(self) -> CompanySummary {
        CompanySummary::new(
            self.company,
            self.report_year as i32,
            self.total_indicators.max(0) as usize,
            self.extracted_count.unwrap_or(0).max(0) as usize,
            self.avg_confidence.unwrap_or(0.0),
        )
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    id: String,
    company: String,
    report_year: i64,
    started_at: String,
    completed_at: Option<String>,
    status: String,
    total_indicators: i64,
    successful_extractions: i64,
    avg_confidence: Option<f64>,
    error_message: Option<String>,
}

impl RunRow {
    fn into_run(self) -> PersistenceResult<RunRecord> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| PersistenceError::Decode(format!("Invalid run id: {}", e)))?;
        let status = match self.status.as_str() {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            other => return Err(PersistenceError::Decode(format!("Unknown run status: {}", other))),
        };

        Ok(RunRecord {
            id,
            company: self.company,
            report_year: self.report_year as i32,
            started_at: parse_time(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
            status,
            total_indicators: self.total_indicators.max(0) as usize,
            successful_extractions: self.successful_extractions.max(0) as usize,
            avg_confidence: self.avg_confidence,
            error_message: self.error_message,
        })
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn upsert(&self, result: &AggregatedResult) -> PersistenceResult<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO sustainability_indicators (
                id, company, report_year, indicator_id, indicator_name, value, unit,
                confidence_score, source_page, notes, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(company, report_year, indicator_id) DO UPDATE SET
                indicator_name = excluded.indicator_name,
                value = excluded.value,
                unit = excluded.unit,
                confidence_score = excluded.confidence_score,
                source_page = excluded.source_page,
                notes = excluded.notes,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(&result.company)
        .bind(result.report_year)
        .bind(&result.indicator_id)
        .bind(&result.indicator_name)
        .bind(result.value)
        .bind(&result.unit)
        .bind(result.confidence)
        .bind(result.source_page.map(i64::from))
        .bind(&result.notes)
        .bind(result.status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn summary(&self, company: &str, report_year: i32) -> PersistenceResult<CompanySummary> {
        let row = sqlx::query_as::<_, SummaryRow>(
            "SELECT company, report_year, total_indicators, extracted_count, avg_confidence \
             FROM indicator_summary WHERE company = ? AND report_year = ?",
        )
        .bind(company)
        .bind(report_year)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(match row {
            Some(r) => r.into_summary(),
            None => CompanySummary::new(company, report_year, 0, 0, 0.0),
        })
    }

    async fn results(
        &self,
        company: Option<&str>,
        report_year: Option<i32>,
    ) -> PersistenceResult<Vec<AggregatedResult>> {
        let sql = format!(
            "SELECT {} FROM sustainability_indicators \
             WHERE (?1 IS NULL OR company = ?1) AND (?2 IS NULL OR report_year = ?2) \
             ORDER BY company, indicator_id, report_year",
            RESULT_COLUMNS
        );

        let rows = sqlx::query_as::<_, ResultRow>(&sql)
            .bind(company)
            .bind(report_year)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_result()).collect()
    }

    async fn summaries(&self) -> PersistenceResult<Vec<CompanySummary>> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT company, report_year, total_indicators, extracted_count, avg_confidence \
             FROM indicator_summary ORDER BY company, report_year",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|r| r.into_summary()).collect())
    }

    async fn low_confidence(&self, threshold: f64) -> PersistenceResult<Vec<AggregatedResult>> {
        let sql = format!(
            "SELECT {} FROM sustainability_indicators \
             WHERE confidence_score < ? ORDER BY confidence_score, company, indicator_id",
            RESULT_COLUMNS
        );

        let rows = sqlx::query_as::<_, ResultRow>(&sql)
            .bind(threshold)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_result()).collect()
    }

    async fn delete_company(&self, company: &str, report_year: Option<i32>) -> PersistenceResult<u64> {
        let result = sqlx::query(
            "DELETE FROM sustainability_indicators \
             WHERE company = ?1 AND (?2 IS NULL OR report_year = ?2)",
        )
        .bind(company)
        .bind(report_year)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn record_run(&self, run: &RunRecord) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO extraction_runs (
                id, company, report_year, started_at, completed_at, status,
                total_indicators, successful_extractions, avg_confidence, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                completed_at = excluded.completed_at,
                status = excluded.status,
                total_indicators = excluded.total_indicators,
                successful_extractions = excluded.successful_extractions,
                avg_confidence = excluded.avg_confidence,
                error_message = excluded.error_message
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.company)
        .bind(run.report_year)
        .bind(run.started_at.to_rfc3339())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(run.status.as_str())
        .bind(run.total_indicators as i64)
        .bind(run.successful_extractions as i64)
        .bind(run.avg_confidence)
        .bind(&run.error_message)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn runs(&self, limit: usize) -> PersistenceResult<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT id, company, report_year, started_at, completed_at, status, \
             total_indicators, successful_extractions, avg_confidence, error_message \
             FROM extraction_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(|r| r.into_run()).collect()
    }
}
