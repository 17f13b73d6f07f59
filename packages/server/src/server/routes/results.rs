//! Read-only dashboard endpoints over the result store.

use axum::{
    extract::{Extension, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use csrd_extraction::{to_csv, AggregatedResult, CompanySummary, PersistenceError};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::server::app::AppState;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn store_error(e: PersistenceError) -> ApiError {
    tracing::error!(error = %e, "Store query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

#[derive(Serialize)]
pub struct StatsResponse {
    companies: Vec<CompanySummary>,
    total_companies: usize,
    total_indicators: usize,
    extracted: usize,
    /// Extracted over total across all companies, in percent
    overall_accuracy_percent: f64,
    low_confidence: usize,
}

/// Per-company summaries plus overall accuracy.
pub async fn stats_handler(
    Extension(state): Extension<AppState>,
) -> Result<Json<StatsResponse>, ApiError> {
    let companies = state.store.summaries().await.map_err(store_error)?;
    let low_confidence = state
        .store
        .low_confidence(state.confidence_threshold)
        .await
        .map_err(store_error)?
        .len();

    let total_indicators: usize = companies.iter().map(|s| s.total_indicators).sum();
    let extracted: usize = companies.iter().map(|s| s.extracted_count).sum();
    let overall_accuracy_percent = if total_indicators == 0 {
        0.0
    } else {
        (extracted as f64 / total_indicators as f64 * 1000.0).round() / 10.0
    };

    Ok(Json(StatsResponse {
        total_companies: companies.len(),
        companies,
        total_indicators,
        extracted,
        overall_accuracy_percent,
        low_confidence,
    }))
}

#[derive(Deserialize)]
pub struct ResultsQuery {
    company: Option<String>,
    year: Option<i32>,
}

/// Stored results, optionally filtered by company and year.
pub async fn results_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<AggregatedResult>>, ApiError> {
    let results = state
        .store
        .results(query.company.as_deref(), query.year)
        .await
        .map_err(store_error)?;
    Ok(Json(results))
}

#[derive(Deserialize)]
pub struct LowConfidenceQuery {
    threshold: Option<f64>,
}

/// Rows below the confidence threshold, lowest first.
pub async fn low_confidence_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<LowConfidenceQuery>,
) -> Result<Json<Vec<AggregatedResult>>, ApiError> {
    let threshold = query.threshold.unwrap_or(state.confidence_threshold);
    let results = state
        .store
        .low_confidence(threshold)
        .await
        .map_err(store_error)?;
    Ok(Json(results))
}

/// Every stored result as a CSV attachment.
pub async fn download_handler(
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let results = state.store.results(None, None).await.map_err(store_error)?;
    let csv = to_csv(&results);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"csrd_indicators.csv\"",
            ),
        ],
        csv,
    ))
}
