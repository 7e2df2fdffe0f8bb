use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ExtractionResultResponse, ExtractionSettings, JobHandle, JobStatusResponse};
use crate::ocr::error::OcrError;
use crate::ocr::service::ExtractionService;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Server returned {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Service(#[from] OcrError),

    #[error("Invalid server URL '{url}': {details}")]
    InvalidUrl { url: String, details: String },
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::Http { status, .. } => *status == 404,
            ClientError::Service(OcrError::JobNotFound { .. }) => true,
            _ => false,
        }
    }
}

/// The server-side extraction contract as seen by a caller.
#[async_trait]
pub trait ExtractionApi: Send + Sync {
    async fn submit(
        &self,
        document_id: Uuid,
        settings: &ExtractionSettings,
    ) -> Result<JobHandle, ClientError>;

    async fn status(&self, document_id: Uuid) -> Result<JobStatusResponse, ClientError>;

    async fn result(&self, document_id: Uuid) -> Result<ExtractionResultResponse, ClientError>;
}

/// In-process access, for callers embedded in the server.
#[async_trait]
impl ExtractionApi for ExtractionService {
    async fn submit(
        &self,
        document_id: Uuid,
        settings: &ExtractionSettings,
    ) -> Result<JobHandle, ClientError> {
        Ok(ExtractionService::submit(self, document_id, settings.clone()).await?)
    }

    async fn status(&self, document_id: Uuid) -> Result<JobStatusResponse, ClientError> {
        Ok(ExtractionService::status(self, document_id).await?)
    }

    async fn result(&self, document_id: Uuid) -> Result<ExtractionResultResponse, ClientError> {
        Ok(ExtractionService::result(self, document_id).await?)
    }
}
