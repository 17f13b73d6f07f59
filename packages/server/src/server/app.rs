//! Application setup and server configuration.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use csrd_extraction::{Orchestrator, ResultStore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::routes::{
    download_handler, events_handler, extract_handler, health_handler, low_confidence_handler,
    results_handler, stats_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResultStore>,
    pub orchestrator: Orchestrator,
    pub data_raw_dir: PathBuf,
    pub report_year: i32,
    pub confidence_threshold: f64,
    running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ResultStore>,
        orchestrator: Orchestrator,
        data_raw_dir: impl Into<PathBuf>,
        report_year: i32,
        confidence_threshold: f64,
    ) -> Self {
        Self {
            store,
            orchestrator,
            data_raw_dir: data_raw_dir.into(),
            report_year,
            confidence_threshold,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a background extraction run is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim the single run slot. `None` if a run is already in progress.
    pub fn try_start_run(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(self.running.clone()))
    }
}

/// Releases the run slot when dropped, even if the run panics.
pub struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    // CORS configuration - allow any origin for the dashboard
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/results", get(results_handler))
        .route("/api/low-confidence", get(low_confidence_handler))
        .route("/api/download", get(download_handler))
        .route("/api/extract", post(extract_handler))
        .route("/api/events", get(events_handler))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
