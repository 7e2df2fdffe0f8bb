//! Multi-pass confidence arbitration.
//!
//! Recognition quality varies sharply by language model and document noise, so
//! the arbitrator runs the engine across an ordered list of languages and keeps
//! the best result it sees:
//!
//! 1. The primary language always runs first. Fallback languages are appended
//!    up front in advanced mode, or after a first pass that is empty or below
//!    the low-confidence threshold.
//! 2. A candidate replaces the current best when its confidence is higher, or
//!    when it recovered substantially more text (`len > best_len * length_multiplier`)
//!    at a confidence that is still acceptable (`conf > best_conf * confidence_multiplier`).
//! 3. After any pass but the first, a best confidence above the early-exit
//!    threshold stops the search.
//! 4. If nothing produced text, one last pass runs with the base configuration.
//!    Still nothing gives a placeholder result with confidence 0, which is not an error.
//!
//! Individual pass failures are absorbed. Only when every pass failed is an
//! error returned.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::QualityHint;
use crate::ocr::engine::{recognize_once, Recognition, RecognitionEngine, RecognitionOptions};
use crate::ocr::error::OcrError;

/// Text stored when no pass recognized anything.
pub const NO_TEXT_PLACEHOLDER: &str = "[No extractable text found in document]";

/// Tunable thresholds. The defaults are empirical, not derived.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationConfig {
    /// Ordered fallback languages tried after the primary one.
    pub fallback_languages: Vec<String>,
    /// First-pass confidence below which fallbacks are added.
    pub low_confidence_threshold: f32,
    /// Best confidence above which no further candidates are tried.
    pub early_exit_confidence: f32,
    pub length_multiplier: f32,
    pub confidence_multiplier: f32,
    /// Language of the last-resort pass.
    pub base_language: String,
    pub base_quality_hint: QualityHint,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            fallback_languages: ["eng", "spa", "fra", "deu", "ita", "por"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            low_confidence_threshold: 40.0,
            early_exit_confidence: 75.0,
            length_multiplier: 1.2,
            confidence_multiplier: 0.8,
            base_language: "eng".to_string(),
            base_quality_hint: QualityHint::Balanced,
        }
    }
}

/// Best recognition kept by the arbitrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitratedText {
    pub text: String,
    pub confidence: f32,
    /// Language of the winning pass. `None` for the placeholder.
    pub language: Option<String>,
    pub passes: u32,
}

impl ArbitratedText {
    pub fn is_placeholder(&self) -> bool {
        self.language.is_none()
    }

    fn placeholder(passes: u32) -> Self {
        Self {
            text: NO_TEXT_PLACEHOLDER.to_string(),
            confidence: 0.0,
            language: None,
            passes,
        }
    }
}

#[derive(Clone)]
pub struct MultiPassArbitrator {
    engine: Arc<dyn RecognitionEngine>,
    config: ArbitrationConfig,
}

impl MultiPassArbitrator {
    pub fn new(engine: Arc<dyn RecognitionEngine>, config: ArbitrationConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &ArbitrationConfig {
        &self.config
    }

    pub fn engine(&self) -> Arc<dyn RecognitionEngine> {
        self.engine.clone()
    }

    /// Whether `candidate` should replace `best`.
    pub fn should_replace(&self, best: Option<&Recognition>, candidate: &Recognition) -> bool {
        let best = match best {
            Some(best) => best,
            None => return true,
        };

        if candidate.confidence > best.confidence {
            return true;
        }

        let candidate_len = candidate.text.chars().count() as f32;
        let best_len = best.text.chars().count() as f32;
        candidate_len > best_len * self.config.length_multiplier
            && candidate.confidence > best.confidence * self.config.confidence_multiplier
    }

    /// Append the fallback languages to `candidates`, skipping any already present.
    fn extend_with_fallbacks(&self, candidates: &mut Vec<String>) {
        for lang in &self.config.fallback_languages {
            if !candidates.iter().any(|c| c == lang) {
                candidates.push(lang.clone());
            }
        }
    }

    pub async fn arbitrate(
        &self,
        payload: Arc<[u8]>,
        primary_language: &str,
        quality_hint: QualityHint,
        advanced_mode: bool,
    ) -> Result<ArbitratedText, OcrError> {
        let mut candidates = vec![primary_language.to_string()];
        if advanced_mode {
            self.extend_with_fallbacks(&mut candidates);
        }

        let mut best: Option<(Recognition, String)> = None;
        let mut passes = 0u32;
        let mut failures: Vec<OcrError> = Vec::new();
        let mut fallbacks_added = advanced_mode;
        let mut index = 0;

        while index < candidates.len() {
            let language = candidates[index].clone();
            passes += 1;

            match recognize_once(
                self.engine.clone(),
                payload.clone(),
                RecognitionOptions::new(language.clone(), quality_hint),
            )
            .await
            {
                Ok(recognition) if !recognition.text.is_empty() => {
                    let replace = self.should_replace(best.as_ref().map(|(r, _)| r), &recognition);
                    debug!(
                        "Pass {} ({}): {:.1}% confidence, {} chars, replace_best={}",
                        passes,
                        language,
                        recognition.confidence,
                        recognition.text.chars().count(),
                        replace
                    );
                    if replace {
                        best = Some((recognition, language.clone()));
                    }
                }
                Ok(_) => {
                    debug!("Pass {} ({}): no text recognized", passes, language);
                }
                Err(e) => {
                    warn!("Pass {} ({}) failed, skipping: {}", passes, language, e);
                    failures.push(e);
                }
            }

            let best_confidence = best.as_ref().map(|(r, _)| r.confidence);

            if index == 0 && !fallbacks_added {
                let weak = best_confidence.map_or(true, |c| c < self.config.low_confidence_threshold);
                if weak {
                    info!(
                        "First pass with '{}' was weak ({:?}), trying fallback languages",
                        language, best_confidence
                    );
                    self.extend_with_fallbacks(&mut candidates);
                    fallbacks_added = true;
                }
            } else if index > 0 {
                if let Some(confidence) = best_confidence {
                    if confidence > self.config.early_exit_confidence {
                        debug!(
                            "Stopping after {} passes: {:.1}% confidence exceeds {:.1}%",
                            passes, confidence, self.config.early_exit_confidence
                        );
                        break;
                    }
                }
            }

            index += 1;
        }

        if best.is_none() {
            passes += 1;
            let base = RecognitionOptions::new(
                self.config.base_language.clone(),
                self.config.base_quality_hint,
            );
            debug!("No candidate produced text, running base pass with '{}'", base.language);
            match recognize_once(self.engine.clone(), payload.clone(), base.clone()).await {
                Ok(recognition) if !recognition.text.is_empty() => {
                    best = Some((recognition, base.language));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Base pass failed: {}", e);
                    failures.push(e);
                }
            }
        }

        match best {
            Some((recognition, language)) => {
                info!(
                    "Arbitration picked '{}' at {:.1}% confidence after {} passes",
                    language, recognition.confidence, passes
                );
                Ok(ArbitratedText {
                    text: recognition.text,
                    confidence: recognition.confidence,
                    language: Some(language),
                    passes,
                })
            }
            None if failures.len() as u32 == passes => {
                let last = failures
                    .pop()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no recognition pass ran".to_string());
                Err(OcrError::PermanentFailure {
                    message: format!("all {} recognition passes failed, last error: {}", passes, last),
                })
            }
            None => {
                info!("No text recognized after {} passes, returning placeholder", passes);
                Ok(ArbitratedText::placeholder(passes))
            }
        }
    }
}
