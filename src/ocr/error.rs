use thiserror::Error;
use uuid::Uuid;

use crate::models::{DocumentCategory, JobStatus};

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Could not retrieve payload for document {document_id}: {details}")]
    PayloadRetrievalFailure { document_id: Uuid, details: String },

    #[error("No extraction path for document category '{category}'")]
    UnsupportedCategory { category: DocumentCategory },

    #[error("Recognition engine failed to initialize for language '{language}': {details}")]
    EngineInitFailure { language: String, details: String },

    #[error("Recognition engine failed while reading the document: {details}")]
    RecognitionFailed { details: String },

    #[error("No text recognized after exhausting all strategies")]
    EmptyExtraction,

    #[error("Extraction did not finish after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error("Extraction failed permanently: {message}")]
    PermanentFailure { message: String },

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition { job_id: Uuid, from: JobStatus, to: JobStatus },

    #[error("No extraction job found for document {document_id}")]
    JobNotFound { document_id: Uuid },

    #[error("Extraction for document {document_id} is {status}, no result yet")]
    ResultNotReady { document_id: Uuid, status: JobStatus },

    #[error("Job registry error: {details}")]
    Registry { details: String },

    #[error("Tesseract language data not found for '{lang}'. Please install tesseract-ocr-{lang}")]
    LanguageDataNotFound { lang: String },

    #[error("Tesseract is not installed on the system")]
    TesseractNotInstalled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OcrError {
    /// Whether resubmitting the same document could plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OcrError::PayloadRetrievalFailure { .. }
                | OcrError::EngineInitFailure { .. }
                | OcrError::RecognitionFailed { .. }
                | OcrError::Timeout { .. }
                | OcrError::PermanentFailure { .. }
                | OcrError::Registry { .. }
                | OcrError::Io(_)
        )
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            OcrError::TesseractNotInstalled | OcrError::LanguageDataNotFound { .. }
        )
    }

    /// Terminal job status a failure of this kind is recorded as.
    ///
    /// Infrastructure problems are `Errored`; extraction problems are `Failed`.
    pub fn job_status(&self) -> JobStatus {
        match self {
            OcrError::PayloadRetrievalFailure { .. }
            | OcrError::UnsupportedCategory { .. }
            | OcrError::Registry { .. }
            | OcrError::Io(_)
            | OcrError::TesseractNotInstalled
            | OcrError::JobNotFound { .. }
            | OcrError::ResultNotReady { .. }
            | OcrError::InvalidTransition { .. } => JobStatus::Errored,
            OcrError::EngineInitFailure { .. }
            | OcrError::RecognitionFailed { .. }
            | OcrError::EmptyExtraction
            | OcrError::Timeout { .. }
            | OcrError::PermanentFailure { .. }
            | OcrError::LanguageDataNotFound { .. } => JobStatus::Failed,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            OcrError::PayloadRetrievalFailure { .. } => "OCR_PAYLOAD_UNAVAILABLE",
            OcrError::UnsupportedCategory { .. } => "OCR_UNSUPPORTED_CATEGORY",
            OcrError::EngineInitFailure { .. } => "OCR_INIT_FAILED",
            OcrError::RecognitionFailed { .. } => "OCR_RECOGNITION_FAILED",
            OcrError::EmptyExtraction => "OCR_EMPTY_EXTRACTION",
            OcrError::Timeout { .. } => "OCR_TIMEOUT",
            OcrError::PermanentFailure { .. } => "OCR_PERMANENT_FAILURE",
            OcrError::InvalidTransition { .. } => "OCR_INVALID_TRANSITION",
            OcrError::JobNotFound { .. } => "OCR_JOB_NOT_FOUND",
            OcrError::ResultNotReady { .. } => "OCR_RESULT_NOT_READY",
            OcrError::Registry { .. } => "OCR_REGISTRY_ERROR",
            OcrError::LanguageDataNotFound { .. } => "OCR_LANG_MISSING",
            OcrError::TesseractNotInstalled => "OCR_NOT_INSTALLED",
            OcrError::Io(_) => "OCR_IO_ERROR",
        }
    }
}

impl From<sqlx::Error> for OcrError {
    fn from(err: sqlx::Error) -> Self {
        OcrError::Registry {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_errors_map_to_errored() {
        let err = OcrError::PayloadRetrievalFailure {
            document_id: Uuid::new_v4(),
            details: "bucket offline".to_string(),
        };
        assert_eq!(err.job_status(), JobStatus::Errored);
        assert_eq!(err.error_code(), "OCR_PAYLOAD_UNAVAILABLE");
        assert!(err.is_recoverable());

        let err = OcrError::UnsupportedCategory {
            category: DocumentCategory::Unsupported,
        };
        assert_eq!(err.job_status(), JobStatus::Errored);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_extraction_errors_map_to_failed() {
        let err = OcrError::PermanentFailure {
            message: "all languages failed".to_string(),
        };
        assert_eq!(err.job_status(), JobStatus::Failed);
        assert!(err.to_string().contains("all languages failed"));
    }

    #[test]
    fn test_configuration_errors() {
        let err = OcrError::LanguageDataNotFound { lang: "deu".to_string() };
        assert!(err.to_string().contains("deu"));
        assert!(err.is_configuration_error());
        assert!(!OcrError::EmptyExtraction.is_configuration_error());
    }
}
