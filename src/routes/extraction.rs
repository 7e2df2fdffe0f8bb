use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    models::{ExtractionJob, ExtractionResultResponse, ExtractionSettings, JobHandle, JobStatusResponse},
    ocr::error::OcrError,
    AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{document_id}", post(submit_extraction))
        .route("/{document_id}/status", get(get_extraction_status))
        .route("/{document_id}/result", get(get_extraction_result))
        .route("/{document_id}/history", get(get_extraction_history))
}

#[utoipa::path(
    post,
    path = "/api/extraction/{document_id}",
    tag = "extraction",
    params(
        ("document_id" = Uuid, Path, description = "Document to extract text from")
    ),
    request_body = ExtractionSettings,
    responses(
        (status = 202, description = "Extraction job started", body = JobHandle),
        (status = 200, description = "An extraction job was already in flight and is returned unchanged", body = JobHandle),
        (status = 400, description = "Language data is not installed"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn submit_extraction(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
    Json(settings): Json<ExtractionSettings>,
) -> Result<(StatusCode, Json<JobHandle>), OcrError> {
    let handle = state.service.submit(document_id, settings).await?;
    let status = if handle.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(handle)))
}

#[utoipa::path(
    get,
    path = "/api/extraction/{document_id}/status",
    tag = "extraction",
    params(
        ("document_id" = Uuid, Path, description = "Document ID")
    ),
    responses(
        (status = 200, description = "Status of the latest extraction job", body = JobStatusResponse),
        (status = 404, description = "No extraction job exists for this document")
    )
)]
pub async fn get_extraction_status(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, OcrError> {
    Ok(Json(state.service.status(document_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/extraction/{document_id}/result",
    tag = "extraction",
    params(
        ("document_id" = Uuid, Path, description = "Document ID")
    ),
    responses(
        (status = 200, description = "Extracted text of the completed job", body = ExtractionResultResponse),
        (status = 404, description = "No extraction job exists for this document"),
        (status = 409, description = "The latest job has not completed")
    )
)]
pub async fn get_extraction_result(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<ExtractionResultResponse>, OcrError> {
    Ok(Json(state.service.result(document_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/extraction/{document_id}/history",
    tag = "extraction",
    params(
        ("document_id" = Uuid, Path, description = "Document ID")
    ),
    responses(
        (status = 200, description = "Every extraction job for the document, newest first", body = [ExtractionJob])
    )
)]
pub async fn get_extraction_history(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<Vec<ExtractionJob>>, OcrError> {
    Ok(Json(state.service.history(document_id).await?))
}
