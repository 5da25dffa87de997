//! Integration tests for kitaba-ui HTTP endpoints
//!
//! Tests cover:
//! - Health, index page, build info
//! - View snapshot with persistence disabled
//! - Multipart image upload and validation
//! - Detect gating and missing API key
//! - Correction endpoints refused for unprivileged subjects
//! - Full round trip with the local auth provider and store

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{fast_options, wait_for, LocalStack, StubBackend};
use kitaba_common::models::NewDetection;
use kitaba_ui::store::DocumentStore;
use kitaba_ui::{build_router, AppContext, AppOptions, Backends};
use serde_json::{json, Value};
use tower::util::ServiceExt; // for `oneshot` method

const BOUNDARY: &str = "kitaba-test-boundary";

/// Test helper: app with no auth, store or inference backend
fn setup_disabled_app() -> (AppContext, axum::Router) {
    let ctx = AppContext::new(Backends::default(), AppOptions::default());
    let app = build_router(ctx.clone());
    (ctx, app)
}

fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Test helper: multipart upload with one field
fn upload_request(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/image")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

// =============================================================================
// Ambient endpoints
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (_ctx, app) = setup_disabled_app();

    let response = app.oneshot(test_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "kitaba-ui");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_index_page_served() {
    let (_ctx, app) = setup_disabled_app();

    let response = app.oneshot(test_request("GET", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("Historical Arabic Text Detector"));
    assert!(html.contains("/api/events"));
    // Typed text is only carried over into the same record's editor
    assert!(html.contains("typed.id === item.id"));
}

#[tokio::test]
async fn test_build_info() {
    let (_ctx, app) = setup_disabled_app();

    let response = app
        .oneshot(test_request("GET", "/api/buildinfo"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["git_hash"].is_string());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (_ctx, app) = setup_disabled_app();
    let response = app
        .oneshot(test_request("GET", "/api/nonexistent"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Disabled persistence
// =============================================================================

#[tokio::test]
async fn test_state_with_persistence_disabled() {
    let (_ctx, app) = setup_disabled_app();

    let response = app.oneshot(test_request("GET", "/api/state")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let view = extract_json(response.into_body()).await;
    assert_eq!(view["session"]["ready"], true);
    assert_eq!(view["session"]["subject_id"], Value::Null);
    assert_eq!(
        view["banners"],
        json!(["Could not connect to the database. History is disabled."])
    );
    assert_eq!(view["detection"]["detect_enabled"], false);
    assert_eq!(view["detection"]["detect_label"], "Detect Arabic Text");
    assert_eq!(view["detection"]["result"]["kind"], "placeholder");
    assert_eq!(
        view["history"]["placeholder"],
        "No history yet. Detections will be saved here."
    );
}

#[tokio::test]
async fn test_sign_out_without_provider_conflicts() {
    let (_ctx, app) = setup_disabled_app();
    let response = app
        .oneshot(test_request("POST", "/api/session/sign-out"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = extract_json(response.into_body()).await;
    assert!(body["error"].as_str().unwrap().contains("disabled"));
}

// =============================================================================
// Image upload and detect
// =============================================================================

#[tokio::test]
async fn test_upload_selects_image() {
    let (ctx, app) = setup_disabled_app();

    let response = app
        .clone()
        .oneshot(upload_request("file", "coin1.jpg", "image/jpeg", &[0xFF, 0xD8, 0xFF]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let summary = extract_json(response.into_body()).await;
    assert_eq!(summary["file_name"], "coin1.jpg");
    assert_eq!(summary["media_type"], "image/jpeg");
    assert_eq!(summary["size_bytes"], 3);

    let view = ctx.view();
    assert!(view.detection.detect_enabled);
    assert_eq!(view.detection.image.unwrap().file_name, "coin1.jpg");
}

#[tokio::test]
async fn test_upload_rejects_unsupported_type() {
    let (_ctx, app) = setup_disabled_app();
    let response = app
        .oneshot(upload_request("file", "anim.gif", "image/gif", b"GIF89a"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_requires_file_field() {
    let (_ctx, app) = setup_disabled_app();
    let response = app
        .oneshot(upload_request("other", "coin1.jpg", "image/jpeg", &[1, 2]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_detect_without_image_is_ignored() {
    let (ctx, app) = setup_disabled_app();
    let before = ctx.view();

    let response = app.oneshot(test_request("POST", "/api/detect")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body, json!({"outcome": "ignored", "reason": "no_image"}));
    assert_eq!(ctx.view(), before);
}

#[tokio::test]
async fn test_detect_without_api_key() {
    let (ctx, app) = setup_disabled_app();

    app.clone()
        .oneshot(upload_request("file", "coin1.jpg", "image/jpeg", &[1, 2, 3]))
        .await
        .unwrap();
    let response = app.oneshot(test_request("POST", "/api/detect")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["outcome"], "failed");
    assert_eq!(
        body["error"],
        "Gemini API key is not configured. Please set it in your configuration."
    );

    let view = serde_json::to_value(ctx.view()).unwrap();
    assert_eq!(view["detection"]["result"]["kind"], "error");
}

// =============================================================================
// Corrections
// =============================================================================

#[tokio::test]
async fn test_corrections_forbidden_for_unprivileged_subject() {
    let (_ctx, app) = setup_disabled_app();

    let response = app
        .clone()
        .oneshot(test_request("POST", "/api/history/42/edit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/history/42/draft",
            json!({"text": "Corrected text"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(test_request("DELETE", "/api/history/42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// =============================================================================
// Full stack
// =============================================================================

#[tokio::test]
async fn test_detect_and_correct_over_http() {
    let stack = LocalStack::new().await;
    let curator = stack.auth.register_token_subject("curator").await.unwrap();
    stack.store.grant_privilege(&curator).await.unwrap();

    let ctx = common::start(
        stack.backends(Some(StubBackend::text("Text: \"...\""))),
        fast_options(Some("curator")),
    );
    let app = build_router(ctx.clone());

    let mut session_rx = ctx.session.subscribe();
    let session = wait_for(&mut session_rx, |s| s.ready && s.subject_id.is_some()).await;
    assert!(session.privileged);

    app.clone()
        .oneshot(upload_request("file", "coin1.jpg", "image/jpeg", &[1, 2, 3]))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(test_request("POST", "/api/detect"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body, json!({"outcome": "completed", "text": "Text: \"...\""}));

    let mut history_rx = ctx.history.subscribe();
    let history = wait_for(&mut history_rx, |h| h.entries.len() == 1).await;
    let id = history.entries[0].record.id.to_string();

    let response = app
        .clone()
        .oneshot(test_request("POST", &format!("/api/history/{}/edit", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let correction = extract_json(response.into_body()).await;
    assert_eq!(correction["editing"], id.as_str());
    assert_eq!(correction["draft"], "Text: \"...\"");

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/history/{}/draft", id),
            json!({"text": "Corrected text"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(test_request("POST", &format!("/api/history/{}/save", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        extract_json(response.into_body()).await,
        json!({"outcome": "saved"})
    );

    let history = wait_for(&mut history_rx, |h| {
        h.entries.first().map(|e| e.record.is_corrected) == Some(true)
    })
    .await;
    assert_eq!(history.entries[0].display_text(), "Corrected text");

    let response = app
        .clone()
        .oneshot(test_request("DELETE", &format!("/api/history/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    wait_for(&mut history_rx, |h| h.entries.is_empty()).await;

    // Repeating the delete is not an error
    let response = app
        .oneshot(test_request("DELETE", &format!("/api/history/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_switching_editor_starts_from_target_record_text() {
    let stack = LocalStack::new().await;
    let curator = stack.auth.register_token_subject("curator").await.unwrap();
    stack.store.grant_privilege(&curator).await.unwrap();
    for (text, image) in [("first text", "a.jpg"), ("second text", "b.jpg")] {
        stack
            .store
            .create(
                &curator,
                &curator,
                NewDetection {
                    text: text.into(),
                    image_name: image.into(),
                },
            )
            .await
            .unwrap();
    }

    let ctx = common::start(stack.backends(None), fast_options(Some("curator")));
    let app = build_router(ctx.clone());
    wait_for(&mut ctx.session.subscribe(), |s| s.privileged).await;
    let history = wait_for(&mut ctx.history.subscribe(), |h| h.entries.len() == 2).await;
    let id_of = |image: &str| {
        history
            .entries
            .iter()
            .find(|e| e.record.image_name == image)
            .map(|e| e.record.id.to_string())
            .unwrap()
    };
    let (a, b) = (id_of("a.jpg"), id_of("b.jpg"));

    app.clone()
        .oneshot(test_request("POST", &format!("/api/history/{}/edit", a)))
        .await
        .unwrap();
    app.clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/history/{}/draft", a),
            json!({"text": "unsaved edit of a"}),
        ))
        .await
        .unwrap();
    let response = app
        .clone()
        .oneshot(test_request("POST", &format!("/api/history/{}/edit", b)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(test_request("GET", "/api/state")).await.unwrap();
    let view = extract_json(response.into_body()).await;
    let items = view["history"]["items"].as_array().unwrap();
    let item = |id: &str| items.iter().find(|i| i["id"] == id).unwrap().clone();

    assert_eq!(item(&b)["editing"], true);
    assert_eq!(item(&b)["draft"], "second text");
    assert_eq!(item(&a)["editing"], false);
}

#[tokio::test]
async fn test_sign_in_with_unknown_token_is_unauthorized() {
    let stack = LocalStack::new().await;
    let ctx = common::start(stack.backends(None), fast_options(None));
    let app = build_router(ctx);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/session/sign-in",
            json!({"token": "nope"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(json_request("POST", "/api/session/sign-in", json!({"token": " "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
