use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::api::{ClientError, ExtractionApi};
use crate::models::{ExtractionResultResponse, ExtractionSettings, JobHandle, JobStatusResponse};

/// Error body produced by the server's `AppError` responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    code: Option<String>,
}

/// reqwest client for the extraction endpoints.
#[derive(Clone, Debug)]
pub struct HttpExtractionApi {
    client: Client,
    base_url: String,
}

impl HttpExtractionApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl {
                url: base_url,
                details: "expected an http:// or https:// URL".to_string(),
            });
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, document_id: Uuid, suffix: &str) -> String {
        format!("{}/api/extraction/{}{}", self.base_url, document_id, suffix)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let (message, code) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => (parsed.error, parsed.code),
            Err(_) if !body.is_empty() => (body, None),
            Err(_) => (status.canonical_reason().unwrap_or("error").to_string(), None),
        };
        debug!("Extraction API answered {}: {}", status, message);

        Err(ClientError::Http {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl ExtractionApi for HttpExtractionApi {
    async fn submit(
        &self,
        document_id: Uuid,
        settings: &ExtractionSettings,
    ) -> Result<JobHandle, ClientError> {
        let response = self
            .client
            .post(self.endpoint(document_id, ""))
            .json(settings)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn status(&self, document_id: Uuid) -> Result<JobStatusResponse, ClientError> {
        let response = self.client.get(self.endpoint(document_id, "/status")).send().await?;
        Self::decode(response).await
    }

    async fn result(&self, document_id: Uuid) -> Result<ExtractionResultResponse, ClientError> {
        let response = self.client.get(self.endpoint(document_id, "/result")).send().await?;
        Self::decode(response).await
    }
}
