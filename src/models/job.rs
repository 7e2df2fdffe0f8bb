use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle state of an extraction job.
///
/// Transitions only move forward: `Pending -> Processing -> {Completed | Failed | Errored}`.
/// A terminal job is never reopened; resubmission starts a new job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Errored,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Errored => "errored",
        }
    }

    /// Pending or Processing.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }

    /// Statuses a job may hold immediately before moving to `self`.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[],
            JobStatus::Processing => &[JobStatus::Pending],
            JobStatus::Completed | JobStatus::Failed | JobStatus::Errored => {
                &[JobStatus::Pending, JobStatus::Processing]
            }
        }
    }

    /// Whether a stored job in `self` may be overwritten with a record in `next`.
    /// Rewriting the same status is allowed so that repeated writes stay idempotent.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        *self == next || next.predecessors().contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "errored" => Ok(JobStatus::Errored),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// What kind of document the payload is, which decides the extraction path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentCategory {
    /// PDFs and similar documents that may carry embedded text.
    StructuredText,
    /// Scans and photos; only optical recognition applies.
    RasterImage,
    /// Anything else. Has no extraction path.
    Unsupported,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::StructuredText => "structured-text",
            DocumentCategory::RasterImage => "raster-image",
            DocumentCategory::Unsupported => "unsupported",
        }
    }

    pub fn from_mime_type(mime_type: &str) -> Self {
        match mime_type {
            "application/pdf" => DocumentCategory::StructuredText,
            mime if mime.starts_with("image/") => DocumentCategory::RasterImage,
            _ => DocumentCategory::Unsupported,
        }
    }
}

impl fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structured-text" => Ok(DocumentCategory::StructuredText),
            "raster-image" => Ok(DocumentCategory::RasterImage),
            "unsupported" => Ok(DocumentCategory::Unsupported),
            other => Err(format!("unknown document category '{}'", other)),
        }
    }
}

/// Resolution/quality hint handed to the recognition engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QualityHint {
    Fast,
    #[default]
    Balanced,
    High,
}

impl QualityHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityHint::Fast => "fast",
            QualityHint::Balanced => "balanced",
            QualityHint::High => "high",
        }
    }

    /// Source resolution reported to the engine.
    pub fn source_dpi(&self) -> u32 {
        match self {
            QualityHint::Fast => 150,
            QualityHint::Balanced => 300,
            QualityHint::High => 400,
        }
    }

    /// Images whose shorter edge is below this are upscaled before recognition.
    pub fn min_edge_px(&self) -> u32 {
        match self {
            QualityHint::Fast => 0,
            QualityHint::Balanced => 300,
            QualityHint::High => 600,
        }
    }
}

impl FromStr for QualityHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(QualityHint::Fast),
            "balanced" => Ok(QualityHint::Balanced),
            "high" => Ok(QualityHint::High),
            other => Err(format!("unknown quality hint '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ExtractionSettings {
    pub language: String,
    #[serde(default)]
    pub quality_hint: QualityHint,
    pub document_category: DocumentCategory,
    #[serde(default)]
    pub advanced_mode: bool,
}

impl ExtractionSettings {
    pub fn new(language: impl Into<String>, document_category: DocumentCategory) -> Self {
        Self {
            language: language.into(),
            quality_hint: QualityHint::default(),
            document_category,
            advanced_mode: false,
        }
    }
}

/// How the final text of a job was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Native,
    Recognition,
    Placeholder,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStrategy::Native => "native",
            ExtractionStrategy::Recognition => "recognition",
            ExtractionStrategy::Placeholder => "placeholder",
        }
    }
}

impl FromStr for ExtractionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(ExtractionStrategy::Native),
            "recognition" => Ok(ExtractionStrategy::Recognition),
            "placeholder" => Ok(ExtractionStrategy::Placeholder),
            other => Err(format!("unknown extraction strategy '{}'", other)),
        }
    }
}

/// Output of the dispatcher for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    pub text: String,
    pub confidence: f32,
    pub page_count: u32,
    pub processing_time_ms: u64,
    pub strategy: ExtractionStrategy,
    /// Recognition language that produced the text, if any.
    pub language: Option<String>,
}

/// One extraction lifecycle for a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ExtractionJob {
    pub id: Uuid,
    pub document_id: Uuid,
    pub status: JobStatus,
    pub extracted_text: String,
    pub confidence: f32,
    pub page_count: u32,
    pub processing_time_ms: u64,
    pub error_message: Option<String>,
    pub strategy: Option<ExtractionStrategy>,
    pub language: Option<String>,
    pub settings: ExtractionSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionJob {
    pub fn new(document_id: Uuid, settings: ExtractionSettings, status: JobStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document_id,
            status,
            extracted_text: String::new(),
            confidence: 0.0,
            page_count: 1,
            processing_time_ms: 0,
            error_message: None,
            strategy: None,
            language: None,
            settings,
            created_at: now,
            updated_at: now,
        }
    }

    /// A worker picked the job up.
    pub fn start(&mut self) {
        self.status = JobStatus::Processing;
        self.updated_at = Utc::now();
    }

    /// In flight with no recorded progress for longer than `stale_after`.
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.status.is_in_flight() && self.updated_at < stale_cutoff(stale_after)
    }

    /// Record a successful extraction.
    pub fn complete(&mut self, outcome: ExtractionOutcome) {
        self.status = JobStatus::Completed;
        self.extracted_text = outcome.text;
        self.confidence = outcome.confidence.clamp(0.0, 100.0);
        self.page_count = outcome.page_count.max(1);
        self.processing_time_ms = outcome.processing_time_ms;
        self.error_message = None;
        self.strategy = Some(outcome.strategy);
        self.language = outcome.language;
        self.updated_at = Utc::now();
    }

    /// Record a terminal failure. The text field gets a displayable explanation.
    pub fn fail(&mut self, status: JobStatus, message: String, processing_time_ms: u64) {
        debug_assert!(status.is_terminal() && status != JobStatus::Completed);
        self.status = status;
        self.extracted_text = failure_text(&message);
        self.confidence = 0.0;
        self.processing_time_ms = processing_time_ms;
        self.error_message = Some(message);
        self.strategy = None;
        self.language = None;
        self.updated_at = Utc::now();
    }
}

/// Displayable text stored on a job that did not complete.
pub fn failure_text(message: &str) -> String {
    format!("[Text extraction failed: {}]", message)
}

/// In-flight jobs last updated before this instant are considered lost.
pub fn stale_cutoff(stale_after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Returned by submitExtraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub status: JobStatus,
    /// False when an in-flight job already existed and was returned instead.
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct JobStatusResponse {
    pub document_id: Uuid,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ExtractionJob> for JobStatusResponse {
    fn from(job: &ExtractionJob) -> Self {
        let (progress_hint, message) = match job.status {
            JobStatus::Pending => ("queued", "Waiting for an extraction worker"),
            JobStatus::Processing => ("extracting", "Extracting text from document"),
            JobStatus::Completed => ("done", "Text extraction completed"),
            JobStatus::Failed => ("done", "Text extraction failed, resubmit to retry"),
            JobStatus::Errored => ("done", "Text extraction could not run, resubmit to retry"),
        };
        Self {
            document_id: job.document_id,
            status: job.status,
            progress_hint: Some(progress_hint.to_string()),
            message: Some(message.to_string()),
            error: job.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ExtractionResultResponse {
    pub document_id: Uuid,
    pub text: String,
    pub confidence: f32,
    pub page_count: u32,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExtractionStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl From<&ExtractionJob> for ExtractionResultResponse {
    fn from(job: &ExtractionJob) -> Self {
        Self {
            document_id: job.document_id,
            text: job.extracted_text.clone(),
            confidence: job.confidence,
            page_count: job.page_count,
            processing_time_ms: job.processing_time_ms,
            strategy: job.strategy,
            language: job.language.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_forward_only() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Errored));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Errored.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_same_status_rewrite_is_allowed() {
        for status in [JobStatus::Processing, JobStatus::Completed, JobStatus::Failed] {
            assert!(status.can_transition_to(status));
        }
    }

    #[test]
    fn test_status_string_roundtrip_matches_serde() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Errored,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_category_from_mime_type() {
        assert_eq!(DocumentCategory::from_mime_type("application/pdf"), DocumentCategory::StructuredText);
        assert_eq!(DocumentCategory::from_mime_type("image/png"), DocumentCategory::RasterImage);
        assert_eq!(DocumentCategory::from_mime_type("image/tiff"), DocumentCategory::RasterImage);
        assert_eq!(DocumentCategory::from_mime_type("text/plain"), DocumentCategory::Unsupported);
        assert_eq!(
            serde_json::to_string(&DocumentCategory::RasterImage).unwrap(),
            "\"raster-image\""
        );
    }

    #[test]
    fn test_failed_job_keeps_displayable_text() {
        let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);
        let mut job = ExtractionJob::new(Uuid::new_v4(), settings, JobStatus::Processing);
        job.fail(JobStatus::Errored, "storage offline".to_string(), 12);

        assert_eq!(job.status, JobStatus::Errored);
        assert_eq!(job.confidence, 0.0);
        assert!(job.extracted_text.contains("storage offline"));
        assert_eq!(job.error_message.as_deref(), Some("storage offline"));
    }

    #[test]
    fn test_complete_clamps_confidence_and_page_count() {
        let settings = ExtractionSettings::new("eng", DocumentCategory::StructuredText);
        let mut job = ExtractionJob::new(Uuid::new_v4(), settings, JobStatus::Processing);
        job.complete(ExtractionOutcome {
            text: "hello".to_string(),
            confidence: 130.0,
            page_count: 0,
            processing_time_ms: 5,
            strategy: ExtractionStrategy::Native,
            language: None,
        });

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.confidence, 100.0);
        assert_eq!(job.page_count, 1);
    }

    #[test]
    fn test_staleness_only_applies_to_in_flight_jobs() {
        let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);
        let mut job = ExtractionJob::new(Uuid::new_v4(), settings, JobStatus::Pending);
        job.updated_at = Utc::now() - chrono::Duration::minutes(10);

        assert!(job.is_stale(Duration::from_secs(60)));
        assert!(!job.is_stale(Duration::from_secs(3600)));

        job.start();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(!job.is_stale(Duration::from_secs(60)));

        job.updated_at = Utc::now() - chrono::Duration::minutes(10);
        job.fail(JobStatus::Errored, "lost".to_string(), 0);
        job.updated_at = Utc::now() - chrono::Duration::minutes(10);
        assert!(!job.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_settings_defaults_when_deserializing() {
        let settings: ExtractionSettings = serde_json::from_str(
            r#"{"language":"deu","document_category":"structured-text"}"#,
        )
        .unwrap();
        assert_eq!(settings.quality_hint, QualityHint::Balanced);
        assert!(!settings.advanced_mode);
    }
}
