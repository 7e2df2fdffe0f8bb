use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use crate::models::JobHandle;
use crate::test_utils::{ScriptedEngine, ScriptedNativeExtractor, TestContext};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn submit_request(document_id: Uuid, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/extraction/{}", document_id))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: String) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let ctx = TestContext::new(ScriptedEngine::new(), ScriptedNativeExtractor::with_text("", 1));
    let response = ctx.app().oneshot(get("/api/health".to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["extraction_slots_free"], 2);
}

#[tokio::test]
async fn test_submit_then_fetch_result() {
    let ctx = TestContext::new(
        ScriptedEngine::new().with_result("eng", "hello from a scan", 86.0),
        ScriptedNativeExtractor::with_text("", 1),
    );
    let document_id = Uuid::new_v4();
    ctx.store(document_id, PNG, "scan.png").await;

    let response = ctx
        .app()
        .oneshot(submit_request(
            document_id,
            json!({"language": "eng", "document_category": "raster-image"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let handle: JobHandle = serde_json::from_value(body_json(response).await).unwrap();
    assert!(handle.created);
    assert_eq!(handle.document_id, document_id);

    ctx.wait_for_terminal(document_id).await;

    let status = ctx
        .app()
        .oneshot(get(format!("/api/extraction/{}/status", document_id)))
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    assert_eq!(body_json(status).await["status"], "completed");

    let result = ctx
        .app()
        .oneshot(get(format!("/api/extraction/{}/result", document_id)))
        .await
        .unwrap();
    assert_eq!(result.status(), StatusCode::OK);
    let body = body_json(result).await;
    assert_eq!(body["text"], "hello from a scan");
    assert_eq!(body["strategy"], "recognition");
}

#[tokio::test]
async fn test_unknown_document_is_404_with_error_code() {
    let ctx = TestContext::new(ScriptedEngine::new(), ScriptedNativeExtractor::with_text("", 1));
    let response = ctx
        .app()
        .oneshot(get(format!("/api/extraction/{}/status", Uuid::new_v4())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "OCR_JOB_NOT_FOUND");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_uninstalled_language_is_400() {
    let ctx = TestContext::new(ScriptedEngine::new(), ScriptedNativeExtractor::with_text("", 1))
        .with_known_languages(&["eng"]);

    let response = ctx
        .app()
        .oneshot(submit_request(
            Uuid::new_v4(),
            json!({"language": "klingon", "document_category": "raster-image"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "OCR_LANG_MISSING");
}

#[tokio::test]
async fn test_history_lists_jobs() {
    let ctx = TestContext::new(ScriptedEngine::new(), ScriptedNativeExtractor::with_text("", 1));
    let document_id = Uuid::new_v4();
    ctx.store(document_id, PNG, "blank.png").await;

    ctx.app()
        .oneshot(submit_request(
            document_id,
            json!({"language": "eng", "document_category": "raster-image"}),
        ))
        .await
        .unwrap();
    ctx.wait_for_terminal(document_id).await;

    let response = ctx
        .app()
        .oneshot(get(format!("/api/extraction/{}/history", document_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().map(|a| a.len()), Some(1));
    assert_eq!(body[0]["strategy"], "placeholder");
}

#[tokio::test]
async fn test_languages_endpoint_uses_known_languages() {
    let ctx = TestContext::new(ScriptedEngine::new(), ScriptedNativeExtractor::with_text("", 1))
        .with_known_languages(&["eng", "deu"]);

    let response = ctx
        .app()
        .oneshot(get("/api/ocr/languages".to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["default_language"], "eng");
    assert_eq!(body["available_languages"][1]["name"], "German");
}
