//! Caller-side status polling.
//!
//! The poller asks for a job's status on a fixed interval until the job
//! reaches a terminal state or a bound is hit. All bookkeeping lives in an
//! explicit [`PollState`] owned by the loop. A [`CancellationToken`] stops the
//! loop at any await point.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::api::{ClientError, ExtractionApi};
use crate::models::{ExtractionResultResponse, ExtractionSettings, JobStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Hard ceiling on status queries.
    pub max_attempts: u32,
    /// Consecutive failed queries before giving up.
    pub max_consecutive_errors: u32,
    /// Consecutive `Pending` answers before the job is resubmitted, once.
    pub stall_restart_after: u32,
    /// Attempts after which the "taking too long" signal fires, once.
    pub slow_after: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 60,
            max_consecutive_errors: 3,
            stall_restart_after: 10,
            slow_after: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollState {
    pub attempt: u32,
    pub consecutive_errors: u32,
    pub last_status: Option<JobStatus>,
    pub pending_streak: u32,
    pub restarted: bool,
    pub slow_signalled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Status { attempt: u32, status: JobStatus },
    QueryFailed { attempt: u32, consecutive_errors: u32, error: String },
    /// The job looked stalled in `Pending` and was resubmitted.
    StallRestart { attempt: u32 },
    /// The job is taking longer than expected. It may still complete.
    Slow { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(ExtractionResultResponse),
    /// Terminal failure on the server. Resubmitting starts a new job.
    Failed { status: JobStatus, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutReason {
    AttemptCeiling,
    ConsecutiveErrors,
}

#[derive(Error, Debug)]
pub enum PollError {
    /// The background job may still be running.
    #[error("Gave up waiting for extraction after {attempts} status checks ({reason:?})")]
    Timeout { attempts: u32, reason: TimeoutReason },

    #[error("Polling cancelled after {attempts} status checks")]
    Cancelled { attempts: u32 },

    #[error("Could not fetch the extraction result: {0}")]
    Api(#[from] ClientError),
}

#[derive(Clone)]
pub struct StatusPoller {
    api: Arc<dyn ExtractionApi>,
    config: PollerConfig,
    events: Option<UnboundedSender<PollEvent>>,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn ExtractionApi>, config: PollerConfig) -> Self {
        Self {
            api,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<PollEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    fn emit(&self, event: PollEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver just means nobody is listening
            let _ = events.send(event);
        }
    }

    pub async fn poll(
        &self,
        document_id: Uuid,
        settings: &ExtractionSettings,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, PollError> {
        let mut state = PollState::default();

        while state.attempt < self.config.max_attempts {
            if state.attempt > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(PollError::Cancelled { attempts: state.attempt });
                    }
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            } else if cancel.is_cancelled() {
                return Err(PollError::Cancelled { attempts: 0 });
            }

            state.attempt += 1;
            let query = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(PollError::Cancelled { attempts: state.attempt });
                }
                query = self.api.status(document_id) => query,
            };

            match query {
                Err(e) => {
                    state.consecutive_errors += 1;
                    warn!(
                        "Status check {} for document {} failed ({} in a row): {}",
                        state.attempt, document_id, state.consecutive_errors, e
                    );
                    self.emit(PollEvent::QueryFailed {
                        attempt: state.attempt,
                        consecutive_errors: state.consecutive_errors,
                        error: e.to_string(),
                    });
                    if state.consecutive_errors >= self.config.max_consecutive_errors {
                        return Err(PollError::Timeout {
                            attempts: state.attempt,
                            reason: TimeoutReason::ConsecutiveErrors,
                        });
                    }
                }
                Ok(response) => {
                    state.consecutive_errors = 0;
                    state.last_status = Some(response.status);
                    debug!(
                        "Status check {} for document {}: {}",
                        state.attempt, document_id, response.status
                    );
                    self.emit(PollEvent::Status {
                        attempt: state.attempt,
                        status: response.status,
                    });

                    match response.status {
                        JobStatus::Completed => {
                            let result = self.api.result(document_id).await?;
                            return Ok(PollOutcome::Completed(result));
                        }
                        JobStatus::Failed | JobStatus::Errored => {
                            let message = response
                                .error
                                .or(response.message)
                                .unwrap_or_else(|| format!("extraction {}", response.status));
                            return Ok(PollOutcome::Failed {
                                status: response.status,
                                message,
                            });
                        }
                        JobStatus::Pending => {
                            state.pending_streak += 1;
                            if !state.restarted && state.pending_streak >= self.config.stall_restart_after {
                                state.restarted = true;
                                self.restart(document_id, settings, state.attempt).await;
                            }
                        }
                        JobStatus::Processing => state.pending_streak = 0,
                    }
                }
            }

            if !state.slow_signalled && state.attempt >= self.config.slow_after {
                state.slow_signalled = true;
                info!(
                    "Extraction for document {} still running after {} status checks",
                    document_id, state.attempt
                );
                self.emit(PollEvent::Slow {
                    attempt: state.attempt,
                });
            }
        }

        Err(PollError::Timeout {
            attempts: state.attempt,
            reason: TimeoutReason::AttemptCeiling,
        })
    }

    /// Resubmit a job that looks stuck. Submission is idempotent, so this
    /// only starts new work once the server has written the job off as stale.
    async fn restart(&self, document_id: Uuid, settings: &ExtractionSettings, attempt: u32) {
        info!(
            "Document {} still pending after {} status checks, resubmitting",
            document_id, attempt
        );
        self.emit(PollEvent::StallRestart { attempt });
        if let Err(e) = self.api.submit(document_id, settings).await {
            warn!("Resubmission of stalled document {} failed: {}", document_id, e);
        }
    }

    /// Poll on a separate task. Dropping the handle stops the loop.
    pub fn spawn(&self, document_id: Uuid, settings: ExtractionSettings) -> PollHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let poller = self.clone();
        let task = tokio::spawn(async move { poller.poll(document_id, &settings, &task_token).await });
        PollHandle {
            guard: token.clone().drop_guard(),
            token,
            task,
        }
    }
}

/// A background poll. Cancelled on drop.
pub struct PollHandle {
    guard: DropGuard,
    token: CancellationToken,
    task: JoinHandle<Result<PollOutcome, PollError>>,
}

impl PollHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn outcome(self) -> Result<PollOutcome, PollError> {
        let PollHandle { guard, task, .. } = self;
        let result = task.await;
        // the task is done, nothing left to cancel
        guard.disarm();
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Background poll task ended abnormally: {}", e);
                Err(PollError::Cancelled { attempts: 0 })
            }
        }
    }
}
