//! The caller-side stack running against an in-process server.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docvault::client::{
    DocumentSource, ExtractionApi, ExtractionLocus, HybridExtractionClient, HybridFailoverController,
    LocalDocument, PollEvent, PollOutcome, PollerConfig, StatusPoller,
};
use docvault::models::{DocumentCategory, ExtractionSettings, JobStatus};
use docvault::ocr::{ArbitrationConfig, JobRegistry, MultiPassArbitrator};
use docvault::test_utils::{ScriptedEngine, ScriptedNativeExtractor, TestContext};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

fn poller_config() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_millis(10),
        max_attempts: 200,
        max_consecutive_errors: 3,
        stall_restart_after: 50,
        slow_after: 150,
    }
}

#[tokio::test]
async fn test_poller_follows_in_process_job_to_completion() {
    let ctx = TestContext::new(
        ScriptedEngine::new()
            .with_result("eng", "packing slip", 79.0)
            .with_delay(Duration::from_millis(50)),
        ScriptedNativeExtractor::with_text("", 1),
    );
    let document_id = Uuid::new_v4();
    ctx.store(document_id, PNG, "slip.png").await;

    let api: Arc<dyn ExtractionApi> = Arc::new(ctx.service().clone());
    let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);
    api.submit(document_id, &settings).await.unwrap();

    let outcome = StatusPoller::new(api, poller_config())
        .poll(document_id, &settings, &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        PollOutcome::Completed(result) => assert_eq!(result.text, "packing slip"),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_payload_on_server_fails_over_to_local_copy() {
    // The server has no stored bytes, so its job ends Errored
    let ctx = TestContext::new(ScriptedEngine::new(), ScriptedNativeExtractor::with_text("", 1));
    let document_id = Uuid::new_v4();
    let api: Arc<dyn ExtractionApi> = Arc::new(ctx.service().clone());

    let local_engine = Arc::new(ScriptedEngine::new().with_result("eng", "read on the client", 81.0));
    let failover =
        HybridFailoverController::new(MultiPassArbitrator::new(local_engine.clone(), ArbitrationConfig::default()));
    let client = HybridExtractionClient::new(api, poller_config()).with_failover(failover);

    let document = LocalDocument {
        document_id,
        category: DocumentCategory::RasterImage,
        source: DocumentSource::Bytes(Arc::from(PNG)),
    };
    let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);
    let result = client
        .extract(&document, &settings, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.locus, ExtractionLocus::Local);
    assert_eq!(result.text, "read on the client");
    assert_eq!(local_engine.acquisitions(), 1);

    // The local run leaves the server's record alone
    let server_job = ctx.wait_for_terminal(document_id).await;
    assert_eq!(server_job.status, JobStatus::Errored);
    assert_eq!(ctx.service().history(document_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stall_restart_replaces_job_stuck_in_pending() {
    let ctx = TestContext::new(
        ScriptedEngine::new().with_result("eng", "picked up again", 83.0),
        ScriptedNativeExtractor::with_text("", 1),
    );
    let document_id = Uuid::new_v4();
    ctx.store(document_id, PNG, "stuck.png").await;
    let settings = ExtractionSettings::new("eng", DocumentCategory::RasterImage);

    // A queued job whose worker never started, left over from an earlier run
    let mut stuck = ctx
        .registry
        .create_if_absent(document_id, settings.clone(), JobStatus::Pending)
        .await
        .unwrap()
        .into_job();
    stuck.updated_at = chrono::Utc::now() - chrono::Duration::hours(1);
    ctx.registry.save(&stuck).await.unwrap();

    let api: Arc<dyn ExtractionApi> = Arc::new(ctx.service().clone());
    let config = PollerConfig {
        stall_restart_after: 3,
        ..poller_config()
    };
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let outcome = StatusPoller::new(api, config)
        .with_events(tx)
        .poll(document_id, &settings, &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        PollOutcome::Completed(result) => assert_eq!(result.text, "picked up again"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    let mut restarts = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, PollEvent::StallRestart { .. }) {
            restarts += 1;
        }
    }
    assert_eq!(restarts, 1);

    let history = ctx.service().history(document_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].id, stuck.id);
    assert_eq!(history[1].status, JobStatus::Errored);
}
