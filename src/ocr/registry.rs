use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{ExtractionJob, ExtractionSettings, JobStatus};
use crate::ocr::error::OcrError;

/// Result of a check-then-create.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Created(ExtractionJob),
    /// An in-flight job already existed and was left unchanged.
    Existing(ExtractionJob),
}

impl Registration {
    pub fn job(&self) -> &ExtractionJob {
        match self {
            Registration::Created(job) | Registration::Existing(job) => job,
        }
    }

    pub fn into_job(self) -> ExtractionJob {
        match self {
            Registration::Created(job) | Registration::Existing(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Registration::Created(_))
    }
}

/// Persisted extraction jobs, keyed by document.
///
/// Implementations must make `create_if_absent` atomic: two concurrent calls
/// for the same document never both create a job.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Create a job in `initial_status` unless one is already in flight.
    async fn create_if_absent(
        &self,
        document_id: Uuid,
        settings: ExtractionSettings,
        initial_status: JobStatus,
    ) -> Result<Registration, OcrError>;

    /// Latest job for the document.
    async fn get(&self, document_id: Uuid) -> Result<Option<ExtractionJob>, OcrError>;

    /// Overwrite the stored record with `job`. Rejected if the stored status
    /// cannot move to the new one.
    async fn save(&self, job: &ExtractionJob) -> Result<(), OcrError>;

    /// All jobs for the document, newest first.
    async fn history(&self, document_id: Uuid) -> Result<Vec<ExtractionJob>, OcrError>;

    /// Mark `Errored` every in-flight job with no recorded progress for
    /// longer than `stale_after`. Returns how many were recovered.
    async fn recover_stale_jobs(&self, stale_after: Duration) -> Result<u64, OcrError>;
}

/// Error message recorded on a job recovered as stale.
pub fn stale_job_message(stale_after: Duration) -> String {
    format!(
        "no progress recorded for {}s, the extraction worker was lost",
        stale_after.as_secs()
    )
}

#[derive(Default)]
pub struct InMemoryJobRegistry {
    jobs: RwLock<HashMap<Uuid, Vec<ExtractionJob>>>,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRegistry for InMemoryJobRegistry {
    async fn create_if_absent(
        &self,
        document_id: Uuid,
        settings: ExtractionSettings,
        initial_status: JobStatus,
    ) -> Result<Registration, OcrError> {
        let mut jobs = self.jobs.write().await;
        let lifecycles = jobs.entry(document_id).or_default();

        if let Some(existing) = lifecycles.iter().find(|j| j.status.is_in_flight()) {
            debug!(
                "Document {} already has in-flight job {} ({})",
                document_id, existing.id, existing.status
            );
            return Ok(Registration::Existing(existing.clone()));
        }

        let job = ExtractionJob::new(document_id, settings, initial_status);
        info!("Created extraction job {} for document {}", job.id, document_id);
        lifecycles.push(job.clone());
        Ok(Registration::Created(job))
    }

    async fn get(&self, document_id: Uuid) -> Result<Option<ExtractionJob>, OcrError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .get(&document_id)
            .and_then(|lifecycles| lifecycles.last().cloned()))
    }

    async fn save(&self, job: &ExtractionJob) -> Result<(), OcrError> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job.document_id)
            .and_then(|lifecycles| lifecycles.iter_mut().find(|j| j.id == job.id))
            .ok_or(OcrError::JobNotFound {
                document_id: job.document_id,
            })?;

        if !stored.status.can_transition_to(job.status) {
            return Err(OcrError::InvalidTransition {
                job_id: job.id,
                from: stored.status,
                to: job.status,
            });
        }

        *stored = job.clone();
        Ok(())
    }

    async fn history(&self, document_id: Uuid) -> Result<Vec<ExtractionJob>, OcrError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .get(&document_id)
            .map(|lifecycles| lifecycles.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn recover_stale_jobs(&self, stale_after: Duration) -> Result<u64, OcrError> {
        let mut jobs = self.jobs.write().await;
        let mut recovered = 0;
        for job in jobs
            .values_mut()
            .flat_map(|lifecycles| lifecycles.iter_mut())
            .filter(|job| job.is_stale(stale_after))
        {
            let elapsed = job.processing_time_ms;
            job.fail(JobStatus::Errored, stale_job_message(stale_after), elapsed);
            recovered += 1;
        }

        if recovered > 0 {
            warn!("Recovered {} stale extraction jobs", recovered);
        }
        Ok(recovered)
    }
}
