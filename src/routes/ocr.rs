use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    errors::ApiError,
    ocr::error::OcrError,
    ocr::health::{get_language_display_name, OcrHealthChecker},
    AppState,
};

#[derive(Serialize, ToSchema)]
pub struct AvailableLanguagesResponse {
    pub available_languages: Vec<LanguageInfo>,
    pub default_language: String,
}

#[derive(Serialize, ToSchema)]
pub struct LanguageInfo {
    pub code: String,
    pub name: String,
    pub installed: bool,
}

#[derive(Serialize, ToSchema)]
pub struct EngineHealthResponse {
    pub status: String,
    pub version: String,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(engine_health))
        .route("/languages", get(get_available_languages))
}

fn checker(state: &AppState) -> OcrHealthChecker {
    OcrHealthChecker::new(state.config.tessdata_path.as_ref().map(PathBuf::from))
}

#[utoipa::path(
    get,
    path = "/api/ocr/health",
    tag = "ocr",
    responses(
        (status = 200, description = "Tesseract is installed", body = EngineHealthResponse),
        (status = 503, description = "Tesseract is not available")
    )
)]
pub async fn engine_health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<EngineHealthResponse>, OcrError> {
    let checker = checker(&state);
    let version = tokio::task::spawn_blocking(move || checker.check_tesseract_installation())
        .await
        .map_err(|e| OcrError::Io(std::io::Error::other(e)))??;

    Ok(Json(EngineHealthResponse {
        status: "ok".to_string(),
        version,
    }))
}

#[utoipa::path(
    get,
    path = "/api/ocr/languages",
    tag = "ocr",
    responses(
        (status = 200, description = "Installed recognition languages", body = AvailableLanguagesResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_available_languages(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AvailableLanguagesResponse>, ApiError> {
    let known = state.service.known_languages().map(|l| l.to_vec());
    let codes = match known {
        Some(codes) => codes,
        None => {
            let checker = checker(&state);
            let probed = tokio::task::spawn_blocking(move || checker.get_available_languages())
                .await
                .map_err(|e| ApiError::internal_server_error(e.to_string()))?;
            match probed {
                Ok(codes) => codes,
                Err(e) => {
                    // Fall back to the configured default when detection fails
                    warn!("Could not list installed languages: {}", e);
                    vec![state.config.default_language.clone()]
                }
            }
        }
    };

    let available_languages = codes
        .into_iter()
        .map(|code| LanguageInfo {
            name: get_language_display_name(&code),
            installed: true,
            code,
        })
        .collect();

    Ok(Json(AvailableLanguagesResponse {
        available_languages,
        default_language: state.config.default_language.clone(),
    }))
}
