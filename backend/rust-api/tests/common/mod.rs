#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use rootslegacy_api::{
    config::{Config, QuizConfig, ReferralConfig},
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    services::AppState,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const JWT_SECRET: &str = "test-secret";
pub const JWT_AUDIENCE: &str = "authenticated";
pub const METRICS_AUTH: &str = "metrics:secret";

pub fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".to_string(),
        mongo_uri: "mongodb://unused".to_string(),
        redis_uri: "redis://unused".to_string(),
        mongo_database: "rootslegacy_test".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        jwt_audience: JWT_AUDIENCE.to_string(),
        metrics_auth: METRICS_AUTH.to_string(),
        quiz: QuizConfig::default(),
        referral: ReferralConfig::default(),
    }
}

/// Full router on in-memory storage; no MongoDB or Redis needed.
pub fn create_test_app() -> Router {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    create_router(Arc::new(AppState::in_memory(test_config())))
}

pub fn token_for(user_id: &str, role: &str) -> String {
    let now = chrono::Utc::now().timestamp() as usize;
    JwtService::new(JWT_SECRET, JWT_AUDIENCE)
        .generate_token(JwtClaims {
            sub: user_id.to_string(),
            role: role.to_string(),
            aud: JWT_AUDIENCE.to_string(),
            exp: now + 3600,
            iat: now,
        })
        .unwrap()
}

pub fn user_token(user_id: &str) -> String {
    token_for(user_id, "authenticated")
}

pub fn admin_token() -> String {
    token_for("backend", "service_role")
}

/// Sends one request and returns the status with the decoded JSON body
/// (`Value::Null` for empty or non-JSON bodies).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}
