use serde_json::json;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use docvault::client::{ClientError, ExtractionApi, HttpExtractionApi};
use docvault::models::{DocumentCategory, ExtractionSettings, JobStatus};

fn client(server: &MockServer) -> HttpExtractionApi {
    HttpExtractionApi::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_submit_posts_settings() {
    let server = MockServer::start().await;
    let document_id = Uuid::new_v4();
    let job_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path(format!("/api/extraction/{}", document_id)))
        .and(body_partial_json(json!({
            "language": "deu",
            "document_category": "raster-image"
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "job_id": job_id,
            "document_id": document_id,
            "status": "pending",
            "created": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let handle = client(&server)
        .submit(document_id, &ExtractionSettings::new("deu", DocumentCategory::RasterImage))
        .await
        .unwrap();

    assert_eq!(handle.job_id, job_id);
    assert_eq!(handle.status, JobStatus::Pending);
    assert!(handle.created);
}

#[tokio::test]
async fn test_status_and_result_decode() {
    let server = MockServer::start().await;
    let document_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(format!("/api/extraction/{}/status", document_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "document_id": document_id,
            "status": "completed",
            "progress_hint": "done"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/extraction/{}/result", document_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "document_id": document_id,
            "text": "Bon de livraison",
            "confidence": 84.5,
            "page_count": 1,
            "processing_time_ms": 1200,
            "strategy": "recognition",
            "language": "fra"
        })))
        .mount(&server)
        .await;

    let api = client(&server);
    let status = api.status(document_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);

    let result = api.result(document_id).await.unwrap();
    assert_eq!(result.text, "Bon de livraison");
    assert_eq!(result.language.as_deref(), Some("fra"));
}

#[tokio::test]
async fn test_error_body_is_surfaced() {
    let server = MockServer::start().await;
    let document_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(format!("/api/extraction/{}/status", document_id)))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "No extraction job exists for this document",
            "code": "OCR_JOB_NOT_FOUND",
            "status": 404
        })))
        .mount(&server)
        .await;

    let err = client(&server).status(document_id).await.unwrap_err();

    assert!(err.is_not_found());
    match err {
        ClientError::Http { status, code, message } => {
            assert_eq!(status, 404);
            assert_eq!(code.as_deref(), Some("OCR_JOB_NOT_FOUND"));
            assert!(message.contains("No extraction job"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_plain_text_error_body() {
    let server = MockServer::start().await;
    let document_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(format!("/api/extraction/{}/result", document_id)))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream went away"))
        .mount(&server)
        .await;

    let err = client(&server).result(document_id).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Http { status: 502, code: None, ref message } if message == "upstream went away"
    ));
}

#[test]
fn test_non_http_base_url_is_rejected() {
    let err = HttpExtractionApi::new("ftp://example.com", Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, ClientError::InvalidUrl { .. }));
}
