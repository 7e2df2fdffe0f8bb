use axum::http::StatusCode;

use super::AppError;
use crate::ocr::error::OcrError;

impl AppError for OcrError {
    fn status_code(&self) -> StatusCode {
        match self {
            OcrError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            OcrError::ResultNotReady { .. } | OcrError::InvalidTransition { .. } => StatusCode::CONFLICT,
            OcrError::LanguageDataNotFound { .. } => StatusCode::BAD_REQUEST,
            OcrError::UnsupportedCategory { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            OcrError::PayloadRetrievalFailure { .. } => StatusCode::BAD_GATEWAY,
            OcrError::TesseractNotInstalled => StatusCode::SERVICE_UNAVAILABLE,
            OcrError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            OcrError::EngineInitFailure { .. }
            | OcrError::RecognitionFailed { .. }
            | OcrError::EmptyExtraction
            | OcrError::PermanentFailure { .. }
            | OcrError::Registry { .. }
            | OcrError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn user_message(&self) -> String {
        match self {
            OcrError::Registry { .. } | OcrError::Io(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }

    fn error_code(&self) -> &'static str {
        OcrError::error_code(self)
    }

    fn suggested_action(&self) -> Option<String> {
        match self {
            OcrError::ResultNotReady { status, .. } if status.is_in_flight() => {
                Some("Poll the status endpoint until the job completes".to_string())
            }
            OcrError::ResultNotReady { .. } => Some("Resubmit the document to retry extraction".to_string()),
            OcrError::LanguageDataNotFound { .. } => {
                Some("Pick a language listed by /api/ocr/languages".to_string())
            }
            OcrError::JobNotFound { .. } => Some("Submit the document for extraction first".to_string()),
            _ => None,
        }
    }
}

impl_into_response!(OcrError);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use axum::response::IntoResponse;
    use uuid::Uuid;

    #[test]
    fn test_status_codes() {
        let document_id = Uuid::new_v4();
        assert_eq!(
            OcrError::JobNotFound { document_id }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            OcrError::ResultNotReady {
                document_id,
                status: JobStatus::Processing
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            OcrError::LanguageDataNotFound { lang: "xx".to_string() }.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = OcrError::Registry {
            details: "password authentication failed for user".to_string(),
        };
        assert_eq!(err.user_message(), "An internal error occurred");
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
