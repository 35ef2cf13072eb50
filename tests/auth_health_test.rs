mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::TestApp;

#[tokio::test]
async fn test_health_endpoints() {
    let app = TestApp::new().await;

    let (status, body) = app.send(Method::GET, "/health/ping", None, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = app.send(Method::GET, "/health/live", None, None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.send(Method::GET, "/health/ready", None, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    let (status, body) = app.send(Method::GET, "/health/status", None, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["database"]["status"], "ok");
    assert_eq!(body["checks"]["cache"]["status"], "ok");
    assert_eq!(body["checks"]["storage"]["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = TestApp::new().await;
    let owner = app.register("Owner@Example.com", "Shop").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/login",
            None,
            None,
            Some(json!({ "email": "owner@example.com", "password": "password123" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["token_type"], "Bearer");
    let token = body["access_token"].as_str().unwrap();

    let (status, me) = app.get("/auth/me", token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user"]["email"], "owner@example.com");
    assert_eq!(me["user"]["current_business_id"], owner.business_id.to_string());
    assert_eq!(me["role"], "owner");
    assert!(me["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_duplicate_email_is_a_conflict() {
    let app = TestApp::new().await;
    app.register("owner@example.com", "Shop").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/auth/register",
            None,
            None,
            Some(json!({
                "name": "Someone",
                "email": "owner@example.com",
                "password": "password123",
                "business_name": "Another",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "CONFLICT");
}

#[tokio::test]
async fn test_login_is_rate_limited() {
    let app = TestApp::new().await;
    app.register("owner@example.com", "Shop").await;

    let attempt = || {
        app.send(
            Method::POST,
            "/auth/login",
            None,
            None,
            Some(json!({ "email": "owner@example.com", "password": "wrong-password" })),
        )
    };
    for _ in 0..5 {
        let (status, _) = attempt().await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, body) = attempt().await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error_code"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_counters() {
    let app = TestApp::new().await;
    app.register("owner@example.com", "Shop").await;
    app.send(
        Method::POST,
        "/auth/login",
        None,
        None,
        Some(json!({ "email": "owner@example.com", "password": "password123" })),
    )
    .await;

    let (status, body) = app.send(Method::GET, "/metrics", None, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("api_logins_total"));
}
