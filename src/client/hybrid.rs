//! Server-first extraction with local failover.
//!
//! [`HybridExtractionClient`] submits the document to the server and polls.
//! When the server path ends badly (a terminal failure, a timeout, or an
//! unreachable server) and the document can be extracted in-process, the
//! [`HybridFailoverController`] takes over.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::api::{ClientError, ExtractionApi};
use super::failover::{FailoverError, HybridFailoverController, LocalDocument};
use super::poller::{PollError, PollEvent, PollOutcome, PollerConfig, StatusPoller};
use crate::models::{
    ExtractionOutcome, ExtractionResultResponse, ExtractionSettings, ExtractionStrategy, JobStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionLocus {
    Server,
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HybridResult {
    pub locus: ExtractionLocus,
    pub text: String,
    pub confidence: f32,
    pub page_count: u32,
    pub processing_time_ms: u64,
    pub strategy: Option<ExtractionStrategy>,
    pub language: Option<String>,
    /// Why the server path was abandoned, for local results.
    pub failover_reason: Option<String>,
}

impl HybridResult {
    fn from_server(result: ExtractionResultResponse) -> Self {
        Self {
            locus: ExtractionLocus::Server,
            text: result.text,
            confidence: result.confidence,
            page_count: result.page_count,
            processing_time_ms: result.processing_time_ms,
            strategy: result.strategy,
            language: result.language,
            failover_reason: None,
        }
    }

    fn from_local(outcome: ExtractionOutcome, reason: String) -> Self {
        Self {
            locus: ExtractionLocus::Local,
            text: outcome.text,
            confidence: outcome.confidence,
            page_count: outcome.page_count,
            processing_time_ms: outcome.processing_time_ms,
            strategy: Some(outcome.strategy),
            language: outcome.language,
            failover_reason: Some(reason),
        }
    }
}

#[derive(Error, Debug)]
pub enum HybridError {
    #[error("Could not submit document for extraction: {0}")]
    Submit(ClientError),

    #[error(transparent)]
    Poll(PollError),

    #[error("Server extraction ended as {status}: {message}")]
    ServerFailed { status: JobStatus, message: String },

    #[error(transparent)]
    Failover(#[from] FailoverError),

    #[error("Extraction cancelled")]
    Cancelled,
}

/// Why the server path was given up on.
enum ServerSetback {
    Unreachable(ClientError),
    Failed { status: JobStatus, message: String },
    TimedOut(PollError),
    Slow { attempt: u32 },
}

impl ServerSetback {
    fn describe(&self) -> String {
        match self {
            ServerSetback::Unreachable(e) => e.to_string(),
            ServerSetback::Failed { status, message } => format!("server job {}: {}", status, message),
            ServerSetback::TimedOut(e) => e.to_string(),
            ServerSetback::Slow { attempt } => {
                format!("server still busy after {} status checks", attempt)
            }
        }
    }

    fn into_error(self) -> HybridError {
        match self {
            ServerSetback::Unreachable(e) => HybridError::Submit(e),
            ServerSetback::Failed { status, message } => HybridError::ServerFailed { status, message },
            ServerSetback::TimedOut(e) => HybridError::Poll(e),
            // only raised when failover is possible
            ServerSetback::Slow { attempt } => HybridError::Poll(PollError::Cancelled { attempts: attempt }),
        }
    }
}

pub struct HybridExtractionClient {
    api: Arc<dyn ExtractionApi>,
    poller_config: PollerConfig,
    failover: Option<HybridFailoverController>,
    failover_on_slow: bool,
    events: Option<UnboundedSender<PollEvent>>,
}

impl HybridExtractionClient {
    pub fn new(api: Arc<dyn ExtractionApi>, poller_config: PollerConfig) -> Self {
        Self {
            api,
            poller_config,
            failover: None,
            failover_on_slow: false,
            events: None,
        }
    }

    pub fn with_failover(mut self, failover: HybridFailoverController) -> Self {
        self.failover = Some(failover);
        self
    }

    /// Abandon the server as soon as the poller reports it is slow, for
    /// documents that can run locally.
    pub fn failover_on_slow(mut self, enabled: bool) -> Self {
        self.failover_on_slow = enabled;
        self
    }

    /// Forward every poll event to `events`.
    pub fn with_events(mut self, events: UnboundedSender<PollEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn can_fail_over(&self, document: &LocalDocument) -> bool {
        self.failover
            .as_ref()
            .map(|f| f.decide(document).is_eligible())
            .unwrap_or(false)
    }

    pub async fn extract(
        &self,
        document: &LocalDocument,
        settings: &ExtractionSettings,
        cancel: &CancellationToken,
    ) -> Result<HybridResult, HybridError> {
        let setback = match self.run_on_server(document, settings, cancel).await? {
            Ok(result) => return Ok(HybridResult::from_server(result)),
            Err(setback) => setback,
        };

        let failover = match &self.failover {
            Some(failover) => failover,
            None => return Err(setback.into_error()),
        };

        // timeouts only fail over when the document can actually run here
        if matches!(setback, ServerSetback::TimedOut(_)) && !failover.decide(document).is_eligible() {
            return Err(setback.into_error());
        }

        let reason = setback.describe();
        let local = tokio::select! {
            _ = cancel.cancelled() => return Err(HybridError::Cancelled),
            local = failover.handle_failure(document, settings, &reason) => local?,
        };
        Ok(HybridResult::from_local(local, reason))
    }

    /// Submit and poll. The outer `Result` only carries cancellation.
    async fn run_on_server(
        &self,
        document: &LocalDocument,
        settings: &ExtractionSettings,
        cancel: &CancellationToken,
    ) -> Result<Result<ExtractionResultResponse, ServerSetback>, HybridError> {
        let submitted = tokio::select! {
            _ = cancel.cancelled() => return Err(HybridError::Cancelled),
            submitted = self.api.submit(document.document_id, settings) => submitted,
        };
        if let Err(e) = submitted {
            warn!("Submitting document {} failed: {}", document.document_id, e);
            return Ok(Err(ServerSetback::Unreachable(e)));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let poller = StatusPoller::new(self.api.clone(), self.poller_config.clone()).with_events(tx);
        let poll_token = cancel.child_token();
        let watch_slow = self.failover_on_slow && self.can_fail_over(document);

        let poll = poller.poll(document.document_id, settings, &poll_token);
        tokio::pin!(poll);

        let polled = loop {
            tokio::select! {
                polled = &mut poll => break polled,
                Some(event) = rx.recv() => {
                    if let Some(events) = &self.events {
                        let _ = events.send(event.clone());
                    }
                    if let PollEvent::Slow { attempt } = event {
                        if watch_slow {
                            info!(
                                "Document {} is slow on the server, extracting locally instead",
                                document.document_id
                            );
                            poll_token.cancel();
                            return Ok(Err(ServerSetback::Slow { attempt }));
                        }
                    }
                }
            }
        };

        // events sent just before the poll finished
        if let Some(events) = &self.events {
            while let Ok(event) = rx.try_recv() {
                let _ = events.send(event);
            }
        }

        match polled {
            Ok(PollOutcome::Completed(result)) => Ok(Ok(result)),
            Ok(PollOutcome::Failed { status, message }) => {
                Ok(Err(ServerSetback::Failed { status, message }))
            }
            Err(PollError::Cancelled { .. }) => Err(HybridError::Cancelled),
            Err(PollError::Api(e)) => Ok(Err(ServerSetback::Unreachable(e))),
            Err(timeout @ PollError::Timeout { .. }) => Ok(Err(ServerSetback::TimedOut(timeout))),
        }
    }
}
