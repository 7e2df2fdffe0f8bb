use axum::Router;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    models::{
        DocumentCategory, ExtractionJob, ExtractionResultResponse, ExtractionSettings,
        ExtractionStrategy, JobHandle, JobStatus, JobStatusResponse, QualityHint,
    },
    routes::ocr::{AvailableLanguagesResponse, EngineHealthResponse, LanguageInfo},
    AppState,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        // Extraction endpoints
        crate::routes::extraction::submit_extraction,
        crate::routes::extraction::get_extraction_status,
        crate::routes::extraction::get_extraction_result,
        crate::routes::extraction::get_extraction_history,
        // Engine endpoints
        crate::routes::ocr::engine_health,
        crate::routes::ocr::get_available_languages,
    ),
    components(
        schemas(
            ExtractionSettings, DocumentCategory, QualityHint, ExtractionStrategy, JobStatus,
            JobHandle, JobStatusResponse, ExtractionResultResponse, ExtractionJob,
            AvailableLanguagesResponse, LanguageInfo, EngineHealthResponse
        )
    ),
    tags(
        (name = "extraction", description = "Document text extraction jobs"),
        (name = "ocr", description = "Recognition engine information"),
    ),
    info(
        title = "Docvault Extraction API",
        version = "0.4.0",
        description = "Text extraction for stored documents"
    )
)]
pub struct ApiDoc;

pub fn create_swagger_router() -> Router<Arc<AppState>> {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into()
}
