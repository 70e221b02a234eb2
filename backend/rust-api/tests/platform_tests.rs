mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn test_health_reports_in_memory_storage() {
    let app = common::create_test_app();

    let (status, body) = common::send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "rootslegacy-api");
}

#[tokio::test]
async fn test_metrics_require_basic_auth() {
    let app = common::create_test_app();

    let (status, _) = common::send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Generate at least one request sample first.
    common::send(&app, "GET", "/health", None, None).await;

    let credentials = general_purpose::STANDARD.encode(common::METRICS_AUTH);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .header("authorization", format!("Basic {}", credentials))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("http_requests_total"));
}

#[tokio::test]
async fn test_tokens_with_wrong_audience_are_rejected() {
    let app = common::create_test_app();
    let now = chrono::Utc::now().timestamp() as usize;
    let token = rootslegacy_api::middlewares::auth::JwtService::new(
        common::JWT_SECRET,
        "anon",
    )
    .generate_token(rootslegacy_api::middlewares::auth::JwtClaims {
        sub: "user".to_string(),
        role: "anon".to_string(),
        aud: "anon".to_string(),
        exp: now + 60,
        iat: now,
    })
    .unwrap();

    let (status, _) = common::send(&app, "GET", "/api/v1/quiz/progress", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_whatsapp_import_extracts_contacts() {
    let app = common::create_test_app();
    let token = common::user_token("importer");

    let text = "[12/03/2024, 18:42:07] Mamie Jeanne: Coucou\n\
                12/03/2024 18:43 - Paul: Mon numéro +33 6 12 34 56 78";
    let (status, body) = common::send(
        &app,
        "POST",
        "/api/v1/imports/whatsapp",
        Some(&token),
        Some(json!({ "text": text })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let contacts = body["contacts"].as_array().unwrap();
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0]["name"], "Mamie Jeanne");
    assert!(contacts[0]["phone"].is_null());
    assert_eq!(contacts[1]["name"], "Paul");
    assert_eq!(contacts[1]["phone"], "+33612345678");
}

#[tokio::test]
async fn test_whatsapp_import_rejects_empty_text() {
    let app = common::create_test_app();
    let token = common::user_token("importer");

    let (status, body) = common::send(
        &app,
        "POST",
        "/api/v1/imports/whatsapp",
        Some(&token),
        Some(json!({ "text": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_responses_carry_trace_id() {
    let app = common::create_test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-trace-id", "trace-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-trace-id"], "trace-42");
}
