use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::models::{ExtractionJob, ExtractionOutcome, JobStatus};
use crate::monitoring::request_throttler::RequestThrottler;
use crate::ocr::dispatcher::ExtractionDispatcher;
use crate::ocr::error::OcrError;
use crate::ocr::registry::JobRegistry;
use crate::storage::PayloadSource;

/// Registry writes attempted per state change before the job is left for
/// stale-job recovery.
const PERSIST_ATTEMPTS: u32 = 4;
const PERSIST_BACKOFF: Duration = Duration::from_millis(100);

/// Executes submitted jobs in the background and records their outcome.
///
/// Each job runs in its own task. The throttler bounds how many run at once;
/// a job stays `Pending` until it holds a permit.
#[derive(Clone)]
pub struct BackgroundJobRunner {
    registry: Arc<dyn JobRegistry>,
    payloads: Arc<dyn PayloadSource>,
    dispatcher: ExtractionDispatcher,
    throttler: RequestThrottler,
}

impl BackgroundJobRunner {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        payloads: Arc<dyn PayloadSource>,
        dispatcher: ExtractionDispatcher,
        throttler: RequestThrottler,
    ) -> Self {
        Self {
            registry,
            payloads,
            dispatcher,
            throttler,
        }
    }

    pub fn throttler(&self) -> &RequestThrottler {
        &self.throttler
    }

    /// Hand the job off without waiting for it.
    pub fn spawn(&self, job: ExtractionJob) -> JoinHandle<ExtractionJob> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(job).await })
    }

    /// Run the job to a terminal state and persist it. Returns the final record.
    pub async fn run(&self, mut job: ExtractionJob) -> ExtractionJob {
        let start = Instant::now();

        let _permit = match self.throttler.acquire_permit().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Failed to acquire throttling permit for job {}: {}", job.id, e);
                job.fail(JobStatus::Errored, e.to_string(), start.elapsed().as_millis() as u64);
                let _ = self.persist(&job).await;
                return job;
            }
        };

        job.start();
        if let Err(OcrError::InvalidTransition { from, .. }) = self.persist(&job).await {
            warn!(
                "Job {} for document {} was already {} when a worker picked it up, skipping",
                job.id, job.document_id, from
            );
            return self.stored(job).await;
        }

        match self.execute(&job).await {
            Ok(mut outcome) => {
                outcome.processing_time_ms = start.elapsed().as_millis() as u64;
                info!(
                    "✅ Extraction completed for document {} | Job: {} | {} | {:.1}% confidence | {} pages | {}ms",
                    job.document_id,
                    job.id,
                    outcome.strategy.as_str(),
                    outcome.confidence,
                    outcome.page_count,
                    outcome.processing_time_ms
                );
                job.complete(outcome);
            }
            Err(e) => {
                let status = e.job_status();
                warn!(
                    "❌ Extraction {} for document {} | Job: {} | Code: {} | Error: {}",
                    status,
                    job.document_id,
                    job.id,
                    e.error_code(),
                    e
                );
                job.fail(status, e.to_string(), start.elapsed().as_millis() as u64);
            }
        }

        if let Err(OcrError::InvalidTransition { .. }) = self.persist(&job).await {
            return self.stored(job).await;
        }
        job
    }

    async fn execute(&self, job: &ExtractionJob) -> Result<ExtractionOutcome, OcrError> {
        let payload = self.payloads.fetch_payload(job.document_id).await?;

        if payload.category != job.settings.document_category {
            warn!(
                "Document {} was submitted as {} but its content is {} ({}), using the content",
                job.document_id, job.settings.document_category, payload.category, payload.mime_type
            );
        }

        self.dispatcher
            .dispatch(payload.category, payload.bytes, &job.settings)
            .await
    }

    /// Save with bounded exponential backoff. A rejected transition or a
    /// vanished record is returned at once.
    async fn persist(&self, job: &ExtractionJob) -> Result<(), OcrError> {
        let mut attempt = 1;
        loop {
            match self.registry.save(job).await {
                Ok(()) => return Ok(()),
                Err(e @ (OcrError::InvalidTransition { .. } | OcrError::JobNotFound { .. })) => {
                    warn!("Registry refused {} for job {}: {}", job.status, job.id, e);
                    return Err(e);
                }
                Err(e) if attempt < PERSIST_ATTEMPTS => {
                    let delay = PERSIST_BACKOFF * 2u32.pow(attempt - 1);
                    warn!(
                        "Failed to record {} for job {} (attempt {}/{}), retrying in {:?}: {}",
                        job.status, job.id, attempt, PERSIST_ATTEMPTS, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Giving up recording {} for job {} after {} attempts: {}",
                        job.status, job.id, PERSIST_ATTEMPTS, e
                    );
                    return Err(e);
                }
            }
        }
    }

    /// The registry's copy of the job, falling back to ours.
    async fn stored(&self, job: ExtractionJob) -> ExtractionJob {
        match self.registry.history(job.document_id).await {
            Ok(history) => history.into_iter().find(|j| j.id == job.id).unwrap_or(job),
            Err(_) => job,
        }
    }
}
