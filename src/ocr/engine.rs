//! Extraction engine adapter.
//!
//! A recognition worker is single-use: it is acquired, configured, run once on
//! a payload and released. Workers are never pooled or shared between jobs, so
//! one job's engine state can never leak into another's. [`EngineSession`]
//! ties the release to scope exit.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::QualityHint;
use crate::ocr::error::OcrError;

#[cfg(feature = "ocr")]
use image::GenericImageView;
#[cfg(feature = "ocr")]
use tesseract::Tesseract;

/// Explicit engine configuration. Nothing is read from the environment inside the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Directory holding `*.traineddata` files. `None` uses the engine's compiled-in default.
    pub tessdata_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOptions {
    pub language: String,
    pub quality_hint: QualityHint,
}

impl RecognitionOptions {
    pub fn new(language: impl Into<String>, quality_hint: QualityHint) -> Self {
        Self {
            language: language.into(),
            quality_hint,
        }
    }
}

/// Text and self-reported confidence (0-100) from one recognition pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f32,
}

/// Factory for single-use recognition workers.
pub trait RecognitionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hand out a fresh, unconfigured worker.
    fn acquire(&self) -> Result<Box<dyn EngineWorker>, OcrError>;
}

/// A worker lives on the blocking thread that acquired it and is dropped there.
pub trait EngineWorker {
    fn configure(&mut self, options: &RecognitionOptions) -> Result<(), OcrError>;

    fn recognize(&mut self, payload: &[u8]) -> Result<Recognition, OcrError>;
}

/// Scoped acquisition of a configured worker. Dropping the session releases the worker.
pub struct EngineSession {
    worker: Option<Box<dyn EngineWorker>>,
    engine: &'static str,
    language: String,
}

impl EngineSession {
    /// Acquire and configure a worker.
    pub fn open(engine: &dyn RecognitionEngine, options: &RecognitionOptions) -> Result<Self, OcrError> {
        let mut worker = engine.acquire()?;
        worker.configure(options)?;
        debug!("Acquired {} worker for language '{}'", engine.name(), options.language);

        Ok(Self {
            worker: Some(worker),
            engine: engine.name(),
            language: options.language.clone(),
        })
    }

    /// Run the worker once. The session is consumed, so a worker can never run twice.
    pub fn run(mut self, payload: &[u8]) -> Result<Recognition, OcrError> {
        let worker = self.worker.as_mut().ok_or_else(|| OcrError::EngineInitFailure {
            language: self.language.clone(),
            details: "worker already released".to_string(),
        })?;

        let recognition = worker.recognize(payload)?;
        Ok(Recognition {
            text: recognition.text.trim().to_string(),
            confidence: recognition.confidence.clamp(0.0, 100.0),
        })
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        if self.worker.take().is_some() {
            debug!("Released {} worker for language '{}'", self.engine, self.language);
        }
    }
}

/// Run one full acquire/configure/run/release cycle on the blocking thread pool.
pub async fn recognize_once(
    engine: Arc<dyn RecognitionEngine>,
    payload: Arc<[u8]>,
    options: RecognitionOptions,
) -> Result<Recognition, OcrError> {
    let language = options.language.clone();
    tokio::task::spawn_blocking(move || {
        let session = EngineSession::open(engine.as_ref(), &options)?;
        session.run(&payload)
    })
    .await
    .map_err(|e| {
        warn!("Recognition worker for '{}' did not finish: {}", language, e);
        OcrError::RecognitionFailed {
            details: format!("recognition worker aborted: {}", e),
        }
    })?
}

/// Tesseract-backed engine.
pub struct TesseractEngine {
    config: EngineConfig,
}

impl TesseractEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    #[cfg(feature = "ocr")]
    fn acquire(&self) -> Result<Box<dyn EngineWorker>, OcrError> {
        Ok(Box::new(TesseractWorker {
            tessdata_path: self
                .config
                .tessdata_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            tesseract: None,
            options: None,
        }))
    }

    #[cfg(not(feature = "ocr"))]
    fn acquire(&self) -> Result<Box<dyn EngineWorker>, OcrError> {
        let _ = &self.config;
        Err(OcrError::TesseractNotInstalled)
    }
}

#[cfg(feature = "ocr")]
struct TesseractWorker {
    tessdata_path: Option<String>,
    tesseract: Option<Tesseract>,
    options: Option<RecognitionOptions>,
}

#[cfg(feature = "ocr")]
impl EngineWorker for TesseractWorker {
    fn configure(&mut self, options: &RecognitionOptions) -> Result<(), OcrError> {
        if options.language.trim().is_empty() {
            return Err(OcrError::EngineInitFailure {
                language: options.language.clone(),
                details: "empty language".to_string(),
            });
        }

        let init_failure = |details: String| OcrError::EngineInitFailure {
            language: options.language.clone(),
            details,
        };

        let tesseract = Tesseract::new(self.tessdata_path.as_deref(), Some(&options.language))
            .map_err(|e| init_failure(e.to_string()))?
            .set_variable("user_defined_dpi", &options.quality_hint.source_dpi().to_string())
            .map_err(|e| init_failure(e.to_string()))?;

        self.tesseract = Some(tesseract);
        self.options = Some(options.clone());
        Ok(())
    }

    fn recognize(&mut self, payload: &[u8]) -> Result<Recognition, OcrError> {
        let (tesseract, options) = match (self.tesseract.take(), self.options.as_ref()) {
            (Some(t), Some(o)) => (t, o),
            _ => {
                return Err(OcrError::EngineInitFailure {
                    language: String::new(),
                    details: "worker used before configure".to_string(),
                })
            }
        };

        let image_bytes = prepare_image(payload, options.quality_hint);
        let mut tesseract = tesseract
            .set_image_from_mem(&image_bytes)
            .map_err(|e| OcrError::RecognitionFailed {
                details: format!("failed to load image: {}", e),
            })?;

        let text = tesseract.get_text().map_err(|e| OcrError::RecognitionFailed {
            details: format!("failed to extract text: {}", e),
        })?;
        let confidence = tesseract.mean_text_conf() as f32;
        debug!(
            "Tesseract '{}' pass: {} chars, {:.1}% confidence",
            options.language,
            text.len(),
            confidence
        );

        Ok(Recognition { text, confidence })
    }
}

/// Decode, resize for the quality hint and re-encode as PNG. Undecodable
/// payloads are passed through untouched and left to the engine.
#[cfg(feature = "ocr")]
fn prepare_image(payload: &[u8], hint: QualityHint) -> Vec<u8> {
    let img = match image::load_from_memory(payload) {
        Ok(img) => img,
        Err(e) => {
            debug!("Payload is not a decodable image ({}), passing through", e);
            return payload.to_vec();
        }
    };

    let (width, height) = img.dimensions();
    let max_dimension = width.max(height);
    let min_dimension = width.min(height).max(1);

    let scale = if max_dimension > 2048 {
        2048.0 / max_dimension as f32
    } else if min_dimension < hint.min_edge_px() {
        hint.min_edge_px() as f32 / min_dimension as f32
    } else {
        1.0
    };

    let img = if (scale - 1.0).abs() > f32::EPSILON {
        let new_width = ((width as f32 * scale) as u32).max(1);
        let new_height = ((height as f32 * scale) as u32).max(1);
        debug!(
            "Resizing {}x{} to {}x{} for {} quality",
            width,
            height,
            new_width,
            new_height,
            hint.as_str()
        );
        img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let mut png = Vec::new();
    match img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png) {
        Ok(()) => png,
        Err(e) => {
            warn!("Failed to re-encode image for recognition: {}", e);
            payload.to_vec()
        }
    }
}
