pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod monitoring;
pub mod ocr;
pub mod routes;
pub mod storage;
pub mod swagger;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::Arc;

use config::Config;
use db::Database;
use monitoring::request_throttler::RequestThrottler;
use ocr::{
    BackgroundJobRunner, ExtractionDispatcher, ExtractionService, JobRegistry, MultiPassArbitrator,
    PdfTextExtractor, RecognitionEngine,
};
use storage::PayloadSource;

#[derive(Clone)]
pub struct AppState {
    pub service: ExtractionService,
    pub config: Config,
    /// Present when jobs are persisted in Postgres
    pub db: Option<Database>,
}

/// Wire the extraction pipeline together from its parts.
pub fn build_extraction_service(
    config: &Config,
    registry: Arc<dyn JobRegistry>,
    payloads: Arc<dyn PayloadSource>,
    engine: Arc<dyn RecognitionEngine>,
) -> ExtractionService {
    let arbitrator = MultiPassArbitrator::new(engine, config.arbitration_config());
    let dispatcher = ExtractionDispatcher::new(Arc::new(PdfTextExtractor::new()), arbitrator)
        .with_native_confidence(config.native_text_confidence);
    let throttler = RequestThrottler::new(
        config.max_concurrent_jobs.max(1),
        config.job_permit_wait(),
        "extraction",
    );
    let runner = BackgroundJobRunner::new(registry.clone(), payloads, dispatcher, throttler);
    ExtractionService::new(registry, runner).with_stale_after(config.stale_job_after())
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/extraction", routes::extraction::router())
        .nest("/api/ocr", routes::ocr::router())
        .merge(swagger::create_swagger_router())
        .with_state(state)
}

/// Health check endpoint for monitoring
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let throttler = state.service.throttler();
    let mut body = serde_json::json!({
        "status": "ok",
        "extraction_slots_in_use": throttler.in_use(),
        "extraction_slots_free": throttler.available_permits(),
    });

    if let Some(db) = &state.db {
        if !db.check_pool_health().await {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        body["database"] = serde_json::json!(db.get_pool_health());
    }

    Ok(Json(body))
}
