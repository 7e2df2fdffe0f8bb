use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    ExtractionJob, ExtractionResultResponse, ExtractionSettings, JobHandle, JobStatus,
    JobStatusResponse,
};
use crate::ocr::error::OcrError;
use crate::ocr::health::validate_language_combination;
use crate::ocr::registry::{stale_job_message, JobRegistry, Registration};
use crate::monitoring::request_throttler::RequestThrottler;
use crate::ocr::runner::BackgroundJobRunner;

/// Server-side entry point: submitExtraction, getStatus, getResult.
#[derive(Clone)]
pub struct ExtractionService {
    registry: Arc<dyn JobRegistry>,
    runner: BackgroundJobRunner,
    /// Installed recognition languages. `None` skips validation.
    languages: Option<Arc<Vec<String>>>,
    /// In-flight jobs untouched for this long are presumed lost.
    stale_after: Duration,
}

pub const DEFAULT_STALE_JOB_AFTER: Duration = Duration::from_secs(30 * 60);

impl ExtractionService {
    pub fn new(registry: Arc<dyn JobRegistry>, runner: BackgroundJobRunner) -> Self {
        Self {
            registry,
            runner,
            languages: None,
            stale_after: DEFAULT_STALE_JOB_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_known_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = Some(Arc::new(languages));
        self
    }

    pub fn known_languages(&self) -> Option<&[String]> {
        self.languages.as_deref().map(|l| l.as_slice())
    }

    pub fn throttler(&self) -> &RequestThrottler {
        self.runner.throttler()
    }

    /// Idempotent while a job is in flight: the existing job is returned untouched,
    /// unless it has gone stale, in which case it is marked `Errored` and replaced.
    /// A new job starts in `Pending` and runs in the background.
    pub async fn submit(
        &self,
        document_id: Uuid,
        settings: ExtractionSettings,
    ) -> Result<JobHandle, OcrError> {
        if let Some(languages) = &self.languages {
            validate_language_combination(languages, &settings.language)?;
        }

        let mut registration = self
            .registry
            .create_if_absent(document_id, settings.clone(), JobStatus::Pending)
            .await?;
        if let Registration::Existing(existing) = &registration {
            if existing.is_stale(self.stale_after) {
                self.expire(existing.clone()).await;
                registration = self
                    .registry
                    .create_if_absent(document_id, settings, JobStatus::Pending)
                    .await?;
            }
        }
        let created = registration.is_created();
        let job = registration.into_job();

        if created {
            info!(
                "Submitted extraction job {} for document {} ({}, language '{}')",
                job.id, document_id, job.settings.document_category, job.settings.language
            );
            self.runner.spawn(job.clone());
        } else {
            debug!(
                "Extraction for document {} already in flight as job {}",
                document_id, job.id
            );
        }

        Ok(JobHandle {
            job_id: job.id,
            document_id,
            status: job.status,
            created,
        })
    }

    pub async fn status(&self, document_id: Uuid) -> Result<JobStatusResponse, OcrError> {
        let job = self.latest(document_id).await?;
        Ok(JobStatusResponse::from(&job))
    }

    /// Only valid once the latest job is `Completed`.
    pub async fn result(&self, document_id: Uuid) -> Result<ExtractionResultResponse, OcrError> {
        let job = self.latest(document_id).await?;
        if job.status != JobStatus::Completed {
            return Err(OcrError::ResultNotReady {
                document_id,
                status: job.status,
            });
        }
        Ok(ExtractionResultResponse::from(&job))
    }

    pub async fn history(&self, document_id: Uuid) -> Result<Vec<ExtractionJob>, OcrError> {
        self.registry.history(document_id).await
    }

    /// Recover every stale in-flight job, e.g. those orphaned by a restart.
    pub async fn recover_stale_jobs(&self) -> Result<u64, OcrError> {
        self.registry.recover_stale_jobs(self.stale_after).await
    }

    async fn expire(&self, mut job: ExtractionJob) {
        warn!(
            "Job {} for document {} has been {} since {} without progress, marking it errored",
            job.id, job.document_id, job.status, job.updated_at
        );
        let elapsed = job.processing_time_ms;
        job.fail(JobStatus::Errored, stale_job_message(self.stale_after), elapsed);
        // A rejected save means the job finished in the meantime
        if let Err(e) = self.registry.save(&job).await {
            warn!("Could not expire stale job {}: {}", job.id, e);
        }
    }

    async fn latest(&self, document_id: Uuid) -> Result<ExtractionJob, OcrError> {
        self.registry
            .get(document_id)
            .await?
            .ok_or(OcrError::JobNotFound { document_id })
    }
}
