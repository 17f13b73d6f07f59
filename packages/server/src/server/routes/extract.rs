//! Starting a background extraction run.
//!
//! POST /api/extract
//!
//! Only one run at a time: a second request while a run is in progress gets
//! `409 Conflict`. Progress is streamed on `/api/events`.

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;
use serde_json::json;

use crate::discovery::discover_jobs;
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct ExtractResponse {
    status: &'static str,
    companies: Vec<String>,
}

pub async fn extract_handler(
    Extension(state): Extension<AppState>,
) -> Result<(StatusCode, Json<ExtractResponse>), (StatusCode, Json<serde_json::Value>)> {
    let Some(guard) = state.try_start_run() else {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "an extraction run is already in progress" })),
        ));
    };

    let jobs = discover_jobs(&state.data_raw_dir, state.report_year).map_err(|e| {
        tracing::error!(error = %e, "Failed to discover documents");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
    })?;

    if jobs.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!("no documents found in {}", state.data_raw_dir.display())
            })),
        ));
    }

    let companies = jobs.iter().map(|j| j.company.clone()).collect();
    let orchestrator = state.orchestrator.clone();

    tokio::spawn(async move {
        // held until the run ends
        let _guard = guard;
        let report = orchestrator.run(jobs).await;
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Background extraction finished"
        );
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ExtractResponse {
            status: "started",
            companies,
        }),
    ))
}
