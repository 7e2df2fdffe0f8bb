use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::models::{DocumentCategory, ExtractionOutcome, ExtractionSettings, ExtractionStrategy};
use crate::ocr::arbitrator::MultiPassArbitrator;
use crate::ocr::error::OcrError;
use crate::ocr::native::{NativeText, NativeTextExtractor};

/// Confidence assigned to embedded document text.
pub const DEFAULT_NATIVE_CONFIDENCE: f32 = 95.0;

/// Picks the extraction path for a document category.
#[derive(Clone)]
pub struct ExtractionDispatcher {
    native: Arc<dyn NativeTextExtractor>,
    arbitrator: MultiPassArbitrator,
    native_confidence: f32,
}

impl ExtractionDispatcher {
    pub fn new(native: Arc<dyn NativeTextExtractor>, arbitrator: MultiPassArbitrator) -> Self {
        Self {
            native,
            arbitrator,
            native_confidence: DEFAULT_NATIVE_CONFIDENCE,
        }
    }

    pub fn with_native_confidence(mut self, confidence: f32) -> Self {
        self.native_confidence = confidence.clamp(0.0, 100.0);
        self
    }

    pub fn arbitrator(&self) -> &MultiPassArbitrator {
        &self.arbitrator
    }

    pub async fn dispatch(
        &self,
        category: DocumentCategory,
        payload: Arc<[u8]>,
        settings: &ExtractionSettings,
    ) -> Result<ExtractionOutcome, OcrError> {
        let start = Instant::now();

        let page_count = match category {
            DocumentCategory::StructuredText => {
                match self.extract_native(payload.clone()).await {
                    Ok(native) if !native.is_empty() => {
                        info!(
                            "Native extraction found {} chars across {} pages",
                            native.text.len(),
                            native.page_count
                        );
                        return Ok(ExtractionOutcome {
                            text: native.text,
                            confidence: self.native_confidence,
                            page_count: native.page_count.max(1),
                            processing_time_ms: start.elapsed().as_millis() as u64,
                            strategy: ExtractionStrategy::Native,
                            language: None,
                        });
                    }
                    Ok(native) => {
                        info!(
                            "No embedded text in {}-page document, treating it as scanned",
                            native.page_count
                        );
                        native.page_count.max(1)
                    }
                    Err(e) => {
                        warn!("Native extraction failed, falling back to recognition: {}", e);
                        1
                    }
                }
            }
            DocumentCategory::RasterImage => 1,
            DocumentCategory::Unsupported => {
                return Err(OcrError::UnsupportedCategory { category });
            }
        };

        debug!(
            "Running recognition on {} byte payload, primary language '{}'",
            payload.len(),
            settings.language
        );
        let arbitrated = self
            .arbitrator
            .arbitrate(
                payload,
                &settings.language,
                settings.quality_hint,
                settings.advanced_mode,
            )
            .await?;

        let strategy = if arbitrated.is_placeholder() {
            ExtractionStrategy::Placeholder
        } else {
            ExtractionStrategy::Recognition
        };

        Ok(ExtractionOutcome {
            text: arbitrated.text,
            confidence: arbitrated.confidence,
            page_count,
            processing_time_ms: start.elapsed().as_millis() as u64,
            strategy,
            language: arbitrated.language,
        })
    }

    async fn extract_native(&self, payload: Arc<[u8]>) -> Result<NativeText, OcrError> {
        let native = self.native.clone();
        tokio::task::spawn_blocking(move || native.extract(&payload))
            .await
            .map_err(|e| OcrError::RecognitionFailed {
                details: format!("native extraction task aborted: {}", e),
            })?
    }
}
