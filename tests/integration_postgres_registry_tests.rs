//! Postgres-backed job registry. Needs Docker for the throwaway database.

#![cfg(feature = "test-utils")]

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use docvault::models::{DocumentCategory, ExtractionOutcome, ExtractionSettings, ExtractionStrategy, JobStatus};
use docvault::ocr::{JobRegistry, OcrError};
use docvault::test_utils::start_postgres;

fn settings() -> ExtractionSettings {
    ExtractionSettings::new("eng", DocumentCategory::RasterImage)
}

#[tokio::test]
async fn test_concurrent_submissions_create_one_job() {
    let (db, _container) = start_postgres().await;
    let registry: Arc<dyn JobRegistry> = Arc::new(db);
    let document_id = Uuid::new_v4();

    let attempts = (0..12).map(|_| {
        let registry = registry.clone();
        async move {
            registry
                .create_if_absent(document_id, settings(), JobStatus::Pending)
                .await
        }
    });
    let registrations: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.expect("registration failed"))
        .collect();

    let created = registrations.iter().filter(|r| r.is_created()).count();
    assert_eq!(created, 1);
    let job_id = registrations[0].job().id;
    assert!(registrations.iter().all(|r| r.job().id == job_id));
    assert_eq!(registry.history(document_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_save_round_trip_and_terminal_guard() {
    let (db, _container) = start_postgres().await;
    let document_id = Uuid::new_v4();

    let mut job = db
        .create_if_absent(document_id, settings(), JobStatus::Pending)
        .await
        .unwrap()
        .into_job();
    job.complete(ExtractionOutcome {
        text: "stored text".to_string(),
        confidence: 87.5,
        page_count: 2,
        processing_time_ms: 640,
        strategy: ExtractionStrategy::Recognition,
        language: Some("eng".to_string()),
    });
    db.save(&job).await.unwrap();

    let stored = db.get(document_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.extracted_text, "stored text");
    assert_eq!(stored.page_count, 2);
    assert_eq!(stored.strategy, Some(ExtractionStrategy::Recognition));
    assert_eq!(stored.settings, settings());

    // A completed job cannot be moved back
    let mut reopened = stored.clone();
    reopened.status = JobStatus::Processing;
    let err = db.save(&reopened).await.unwrap_err();
    assert!(matches!(err, OcrError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_new_job_allowed_after_terminal() {
    let (db, _container) = start_postgres().await;
    let document_id = Uuid::new_v4();

    let mut first = db
        .create_if_absent(document_id, settings(), JobStatus::Pending)
        .await
        .unwrap()
        .into_job();
    first.fail(JobStatus::Failed, "engine crashed".to_string(), 10);
    db.save(&first).await.unwrap();

    let second = db
        .create_if_absent(document_id, settings(), JobStatus::Pending)
        .await
        .unwrap();
    assert!(second.is_created());
    assert_ne!(second.job().id, first.id);

    let history = db.history(document_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, second.job().id);
    assert_eq!(history[1].status, JobStatus::Failed);
}

#[tokio::test]
async fn test_saving_unknown_job_is_not_found() {
    let (db, _container) = start_postgres().await;
    let job = docvault::models::ExtractionJob::new(Uuid::new_v4(), settings(), JobStatus::Processing);
    let err = db.save(&job).await.unwrap_err();
    assert!(matches!(err, OcrError::JobNotFound { .. }));
}

#[tokio::test]
async fn test_recover_stale_jobs_errors_abandoned_rows() {
    let (db, _container) = start_postgres().await;
    let abandoned = Uuid::new_v4();
    let active = Uuid::new_v4();

    for document_id in [abandoned, active] {
        db.create_if_absent(document_id, settings(), JobStatus::Pending)
            .await
            .unwrap();
    }
    sqlx::query("UPDATE extraction_jobs SET status = 'processing', updated_at = NOW() - INTERVAL '2 hours' WHERE document_id = $1")
        .bind(abandoned)
        .execute(&db.pool)
        .await
        .unwrap();

    let recovered = db.recover_stale_jobs(Duration::from_secs(30 * 60)).await.unwrap();
    assert_eq!(recovered, 1);

    let stored = db.get(abandoned).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Errored);
    assert!(stored.extracted_text.starts_with("[Text extraction failed:"));
    assert_eq!(db.get(active).await.unwrap().unwrap().status, JobStatus::Pending);

    // The partial unique index no longer blocks a new job
    let next = db
        .create_if_absent(abandoned, settings(), JobStatus::Pending)
        .await
        .unwrap();
    assert!(next.is_created());
}
