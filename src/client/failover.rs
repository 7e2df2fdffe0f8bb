//! Local (in-caller) execution after a server-side failure.
//!
//! Only raster images can be extracted locally: the local path runs the
//! recognition engine, not the structured-document native extraction. The
//! local run never touches the shared job registry; its outcome goes straight
//! back to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{DocumentCategory, ExtractionOutcome, ExtractionSettings, ExtractionStrategy};
use crate::ocr::arbitrator::{MultiPassArbitrator, NO_TEXT_PLACEHOLDER};
use crate::ocr::engine::{recognize_once, RecognitionOptions};
use crate::ocr::error::OcrError;
use crate::storage::MAX_PAYLOAD_SIZE;

/// Where the caller can get the document bytes without the server.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Bytes(Arc<[u8]>),
    Url(String),
}

#[derive(Debug, Clone)]
pub struct LocalDocument {
    pub document_id: Uuid,
    pub category: DocumentCategory,
    pub source: DocumentSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverDecision {
    Eligible,
    Ineligible { reason: String },
}

impl FailoverDecision {
    pub fn for_category(category: DocumentCategory) -> Self {
        match category {
            DocumentCategory::RasterImage => FailoverDecision::Eligible,
            other => FailoverDecision::Ineligible {
                reason: format!(
                    "local extraction only handles raster images, this document is {}",
                    other
                ),
            },
        }
    }

    pub fn is_eligible(&self) -> bool {
        matches!(self, FailoverDecision::Eligible)
    }
}

#[derive(Error, Debug)]
pub enum FailoverError {
    #[error("{server_error}. No local fallback is available ({reason}); retry extraction on the server")]
    Ineligible { server_error: String, reason: String },

    #[error("Could not download document from {url}: {details}")]
    Fetch { url: String, details: String },

    #[error("Local extraction failed: {0}")]
    Extraction(#[from] OcrError),
}

#[derive(Clone)]
pub struct HybridFailoverController {
    arbitrator: MultiPassArbitrator,
    http: reqwest::Client,
    multi_pass: bool,
    max_download: u64,
}

impl HybridFailoverController {
    pub fn new(arbitrator: MultiPassArbitrator) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            arbitrator,
            http,
            multi_pass: true,
            max_download: MAX_PAYLOAD_SIZE,
        }
    }

    /// Largest document accepted from a URL source, in bytes.
    pub fn with_max_download(mut self, max_download: u64) -> Self {
        self.max_download = max_download;
        self
    }

    /// Run a single recognition pass with the requested language instead of
    /// the full multi-language arbitration.
    pub fn single_pass(mut self) -> Self {
        self.multi_pass = false;
        self
    }

    pub fn decide(&self, document: &LocalDocument) -> FailoverDecision {
        FailoverDecision::for_category(document.category)
    }

    /// Handle a terminal server-side failure: run locally if the document allows it,
    /// otherwise hand back the server error with guidance.
    pub async fn handle_failure(
        &self,
        document: &LocalDocument,
        settings: &ExtractionSettings,
        server_error: &str,
    ) -> Result<ExtractionOutcome, FailoverError> {
        match self.decide(document) {
            FailoverDecision::Eligible => {
                info!(
                    "Server extraction for document {} failed ({}), switching to local execution",
                    document.document_id, server_error
                );
                self.run_locally(document, settings).await
            }
            FailoverDecision::Ineligible { reason } => {
                warn!(
                    "Server extraction for document {} failed and it cannot run locally: {}",
                    document.document_id, reason
                );
                Err(FailoverError::Ineligible {
                    server_error: server_error.to_string(),
                    reason,
                })
            }
        }
    }

    /// Extract in this process. Nothing is written to the job registry.
    pub async fn run_locally(
        &self,
        document: &LocalDocument,
        settings: &ExtractionSettings,
    ) -> Result<ExtractionOutcome, FailoverError> {
        if let FailoverDecision::Ineligible { reason } = self.decide(document) {
            return Err(FailoverError::Ineligible {
                server_error: "local extraction requested".to_string(),
                reason,
            });
        }

        let start = Instant::now();
        let payload = self.load(document).await?;

        let (text, confidence, language, strategy) = if self.multi_pass {
            let arbitrated = self
                .arbitrator
                .arbitrate(payload, &settings.language, settings.quality_hint, settings.advanced_mode)
                .await?;
            let strategy = if arbitrated.is_placeholder() {
                ExtractionStrategy::Placeholder
            } else {
                ExtractionStrategy::Recognition
            };
            (arbitrated.text, arbitrated.confidence, arbitrated.language, strategy)
        } else {
            let recognition = recognize_once(
                self.arbitrator.engine(),
                payload,
                RecognitionOptions::new(settings.language.clone(), settings.quality_hint),
            )
            .await?;
            if recognition.text.trim().is_empty() {
                (NO_TEXT_PLACEHOLDER.to_string(), 0.0, None, ExtractionStrategy::Placeholder)
            } else {
                (
                    recognition.text,
                    recognition.confidence,
                    Some(settings.language.clone()),
                    ExtractionStrategy::Recognition,
                )
            }
        };

        let outcome = ExtractionOutcome {
            text,
            confidence,
            page_count: 1,
            processing_time_ms: start.elapsed().as_millis() as u64,
            strategy,
            language,
        };
        info!(
            "✅ Local extraction for document {} finished: {:.1}% confidence in {}ms",
            document.document_id, outcome.confidence, outcome.processing_time_ms
        );
        Ok(outcome)
    }

    async fn load(&self, document: &LocalDocument) -> Result<Arc<[u8]>, FailoverError> {
        match &document.source {
            DocumentSource::Bytes(bytes) => Ok(bytes.clone()),
            DocumentSource::Url(url) => {
                let fetch_error = |details: String| FailoverError::Fetch {
                    url: url.clone(),
                    details,
                };
                let mut response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| fetch_error(e.to_string()))?;

                let too_large = || fetch_error(format!("document is larger than {} bytes", self.max_download));
                if response.content_length().unwrap_or(0) > self.max_download {
                    return Err(too_large());
                }

                // Chunked responses carry no length up front, so count as we read
                let mut bytes = Vec::new();
                while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(e.to_string()))? {
                    if (bytes.len() + chunk.len()) as u64 > self.max_download {
                        return Err(too_large());
                    }
                    bytes.extend_from_slice(&chunk);
                }
                Ok(Arc::from(bytes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::arbitrator::ArbitrationConfig;
    use crate::test_utils::ScriptedEngine;
    use axum::body::{Body, Bytes};
    use axum::{routing::get, Router};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn document(category: DocumentCategory) -> LocalDocument {
        LocalDocument {
            document_id: Uuid::new_v4(),
            category,
            source: DocumentSource::Bytes(Arc::from(&b"pixels"[..])),
        }
    }

    fn controller(engine: Arc<ScriptedEngine>) -> HybridFailoverController {
        HybridFailoverController::new(MultiPassArbitrator::new(engine, ArbitrationConfig::default()))
    }

    #[test]
    fn test_only_raster_images_are_eligible() {
        assert!(FailoverDecision::for_category(DocumentCategory::RasterImage).is_eligible());
        assert!(!FailoverDecision::for_category(DocumentCategory::StructuredText).is_eligible());
        assert!(!FailoverDecision::for_category(DocumentCategory::Unsupported).is_eligible());
    }

    #[tokio::test]
    async fn test_raster_failure_runs_locally() {
        let engine = Arc::new(ScriptedEngine::new().with_result("eng", "local words", 77.0));
        let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);

        let outcome = controller(engine.clone())
            .handle_failure(&document(DocumentCategory::RasterImage), &settings, "server overloaded")
            .await
            .unwrap();

        assert_eq!(outcome.text, "local words");
        assert_eq!(outcome.strategy, ExtractionStrategy::Recognition);
        assert_eq!(engine.acquisitions(), 1);
    }

    #[tokio::test]
    async fn test_structured_failure_is_not_offered_failover() {
        let engine = Arc::new(ScriptedEngine::new().with_result("eng", "unused", 90.0));
        let settings = ExtractionSettings::new("eng", DocumentCategory::StructuredText);

        let err = controller(engine.clone())
            .handle_failure(&document(DocumentCategory::StructuredText), &settings, "engine crashed")
            .await
            .unwrap_err();

        assert!(matches!(err, FailoverError::Ineligible { .. }));
        let message = err.to_string();
        assert!(message.contains("engine crashed"));
        assert!(message.contains("retry extraction on the server"));
        assert_eq!(engine.acquisitions(), 0);
    }

    #[tokio::test]
    async fn test_single_pass_mode_uses_requested_language_only() {
        let engine = Arc::new(ScriptedEngine::new().with_result("deu", "kurz", 12.0));
        let settings = ExtractionSettings::new("deu", DocumentCategory::RasterImage);

        let outcome = controller(engine.clone())
            .single_pass()
            .run_locally(&document(DocumentCategory::RasterImage), &settings)
            .await
            .unwrap();

        assert_eq!(outcome.text, "kurz");
        assert_eq!(engine.recognized_languages(), vec!["deu"]);
    }

    #[tokio::test]
    async fn test_single_pass_without_text_gives_placeholder() {
        let engine = Arc::new(ScriptedEngine::new().with_result("eng", "  \n", 64.0));
        let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);

        let outcome = controller(engine)
            .single_pass()
            .run_locally(&document(DocumentCategory::RasterImage), &settings)
            .await
            .unwrap();

        assert_eq!(outcome.text, NO_TEXT_PLACEHOLDER);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.strategy, ExtractionStrategy::Placeholder);
        assert_eq!(outcome.language, None);
    }

    fn url_document(url: String) -> LocalDocument {
        LocalDocument {
            document_id: Uuid::new_v4(),
            category: DocumentCategory::RasterImage,
            source: DocumentSource::Url(url),
        }
    }

    #[tokio::test]
    async fn test_url_source_is_downloaded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/scans/receipt.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(&b"\x89PNG\r\n\x1a\n"[..]))
            .expect(1)
            .mount(&server)
            .await;
        let engine = Arc::new(ScriptedEngine::new().with_result("eng", "downloaded words", 79.0));
        let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);

        let outcome = controller(engine.clone())
            .run_locally(&url_document(format!("{}/scans/receipt.png", server.uri())), &settings)
            .await
            .unwrap();

        assert_eq!(outcome.text, "downloaded words");
        assert_eq!(engine.acquisitions(), 1);
    }

    #[tokio::test]
    async fn test_url_error_status_is_a_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let engine = Arc::new(ScriptedEngine::new());
        let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);

        let err = controller(engine.clone())
            .run_locally(&url_document(format!("{}/gone.png", server.uri())), &settings)
            .await
            .unwrap_err();

        assert!(matches!(err, FailoverError::Fetch { .. }));
        assert_eq!(engine.acquisitions(), 0);
    }

    #[tokio::test]
    async fn test_oversized_download_with_length_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;
        let engine = Arc::new(ScriptedEngine::new());
        let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);

        let err = controller(engine.clone())
            .with_max_download(1024)
            .run_locally(&url_document(format!("{}/huge.png", server.uri())), &settings)
            .await
            .unwrap_err();

        assert!(matches!(err, FailoverError::Fetch { ref details, .. } if details.contains("1024 bytes")));
        assert_eq!(engine.acquisitions(), 0);
    }

    #[tokio::test]
    async fn test_oversized_chunked_download_is_cut_off() {
        // A streamed body is sent chunked, without a Content-Length
        let chunks = vec![Bytes::from(vec![0u8; 512]); 8];
        let app = Router::new().route(
            "/stream.png",
            get(move || {
                let chunks = chunks.clone();
                async move {
                    Body::from_stream(futures::stream::iter(
                        chunks.into_iter().map(Ok::<_, std::io::Error>),
                    ))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let engine = Arc::new(ScriptedEngine::new());
        let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);

        let err = controller(engine.clone())
            .with_max_download(1024)
            .run_locally(&url_document(format!("http://{}/stream.png", addr)), &settings)
            .await
            .unwrap_err();

        assert!(matches!(err, FailoverError::Fetch { ref details, .. } if details.contains("1024 bytes")));
        assert_eq!(engine.acquisitions(), 0);
    }
}
