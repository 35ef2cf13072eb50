mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};
use uuid::Uuid;

use biznespilot_api::{
    db::{Repository, TenantScope, Trashed},
    models::call::{AnalysisStatus, CallLog},
};
use common::TestApp;

async fn record_call(app: &TestApp, token: &str, seconds: i32) -> String {
    let (status, call) = app
        .post(
            "/api/v1/calls",
            token,
            json!({ "duration": seconds, "recording_url": "https://cdn.example.com/rec.mp3" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{call}");
    call["id"].as_str().unwrap().to_string()
}

/// Marks a call as analysed so its minutes count towards the month.
async fn complete_call(app: &TestApp, business_id: Uuid, call_id: &str) {
    let scope = TenantScope::for_business(business_id);
    let mut call = Repository::<CallLog>::find(app.store(), &scope, call_id.parse().unwrap(), Trashed::Exclude)
        .await
        .unwrap()
        .unwrap();
    call.set_analysis(AnalysisStatus::Completed);
    Repository::<CallLog>::update(app.store(), &scope, call).await.unwrap();
}

fn usage_of<'a>(stats: &'a Value, resource: &str) -> &'a Value {
    stats
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["resource"] == resource)
        .unwrap_or_else(|| panic!("no usage row for {resource}"))
}

#[tokio::test]
async fn test_team_member_limit() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;
    for i in 0..3 {
        app.register(&format!("staff{i}@example.com"), &format!("Side {i}")).await;
    }

    // The trial plan allows two members besides the owner.
    for i in 0..2 {
        let (status, body) = app
            .post(
                "/api/v1/team",
                &owner.token,
                json!({ "email": format!("staff{i}@example.com"), "role": "operator" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let (status, body) = app
        .post("/api/v1/team", &owner.token, json!({ "email": "staff2@example.com", "role": "operator" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "FEATURE_LIMIT_EXCEEDED");
    assert_eq!(body["resource"], "team_members");
    assert_eq!(body["used"], 2);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["remaining"], 0);
    assert_eq!(body["upgrade_required"], true);

    let (_, team) = app.get("/api/v1/team", &owner.token).await;
    assert_eq!(team.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_audio_minutes_must_fit_entirely() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;

    let long_call = record_call(&app, &owner.token, 59 * 60).await;
    complete_call(&app, owner.business_id, &long_call).await;

    let (_, stats) = app.get("/api/v1/billing/usage", &owner.token).await;
    assert_eq!(usage_of(&stats, "audio_minutes")["current"], 59);

    let short_call = record_call(&app, &owner.token, 2 * 60).await;
    let (status, body) = app
        .post(&format!("/api/v1/calls/{short_call}/analyze"), &owner.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(body["error_code"], "FEATURE_LIMIT_EXCEEDED");
    assert_eq!(body["resource"], "audio_minutes");
    assert_eq!(body["used"], 59);
    assert_eq!(body["requested"], 2);
    assert_eq!(body["remaining"], 1);

    let fitting_call = record_call(&app, &owner.token, 45).await;
    let (status, call) = app
        .post(&format!("/api/v1/calls/{fitting_call}/analyze"), &owner.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(call["analysis_status"], "queued");
}

#[tokio::test]
async fn test_free_plan_has_no_audio_minutes() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;
    app.set_plan(owner.business_id, "free").await;

    let call = record_call(&app, &owner.token, 60).await;
    let (status, body) = app
        .post(&format!("/api/v1/calls/{call}/analyze"), &owner.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["limit"], 0);
    assert_eq!(body["remaining"], 0);
}

#[tokio::test]
async fn test_analyze_rejects_in_progress_and_short_calls() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;

    let call = record_call(&app, &owner.token, 120).await;
    let uri = format!("/api/v1/calls/{call}/analyze");
    let (status, _) = app.post(&uri, &owner.token, json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, body) = app.post(&uri, &owner.token, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "CONFLICT");

    let short = record_call(&app, &owner.token, 10).await;
    let (status, body) = app
        .post(&format!("/api/v1/calls/{short}/analyze"), &owner.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_bulk_analysis_counts_minutes_already_reserved() {
    let mut app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;

    let first = record_call(&app, &owner.token, 30 * 60).await;
    let second = record_call(&app, &owner.token, 25 * 60).await;
    let third = record_call(&app, &owner.token, 10 * 60).await;
    let missing = Uuid::new_v4();

    let (status, report) = app
        .post(
            "/api/v1/calls/analyze-bulk",
            &owner.token,
            json!({ "call_ids": [first, second, third, missing] }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{report}");
    assert_eq!(report["queued"], json!([first, second]));
    assert_eq!(report["requested_minutes"], 55);

    let skipped = report["skipped"].as_array().unwrap();
    assert_eq!(skipped.len(), 2);
    assert_eq!(skipped[0]["call_id"], third);
    assert_eq!(skipped[0]["reason"], "Audio minutes limit");
    assert_eq!(skipped[1]["reason"], "Call not found");

    assert_eq!(app.analysis_rx.try_recv().unwrap().call_id.to_string(), first);
    assert_eq!(app.analysis_rx.try_recv().unwrap().call_id.to_string(), second);
    assert!(app.analysis_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_bulk_analysis_batch_size() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;

    let ids: Vec<Uuid> = (0..11).map(|_| Uuid::new_v4()).collect();
    let (status, _) = app
        .post("/api/v1/calls/analyze-bulk", &owner.token, json!({ "call_ids": ids }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .post("/api/v1/calls/analyze-bulk", &owner.token, json!({ "call_ids": [] }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_downgrade_blocked_by_current_usage() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;
    app.register("staff0@example.com", "Side 0").await;
    app.register("staff1@example.com", "Side 1").await;
    for i in 0..2 {
        app.post(
            "/api/v1/team",
            &owner.token,
            json!({ "email": format!("staff{i}@example.com"), "role": "member" }),
        )
        .await;
    }

    let (status, body) = app
        .post("/api/v1/billing/change-plan", &owner.token, json!({ "plan": "free" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_code"], "DOWNGRADE_BLOCKED");
    assert_eq!(body["issues"][0]["resource"], "team_members");

    let (status, body) = app
        .post("/api/v1/billing/change-plan", &owner.token, json!({ "plan": "business" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["plan"]["slug"], "business");
    assert_eq!(body["subscription"]["status"], "active");

    let (_, current) = app.get("/api/v1/billing/subscription", &owner.token).await;
    assert_eq!(current["plan"]["slug"], "business");
}

#[tokio::test]
async fn test_new_business_starts_on_trial() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;

    let (status, current) = app.get("/api/v1/billing/subscription", &owner.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current["subscription"]["status"], "trialing");
    assert_eq!(current["plan"]["slug"], "start");

    let (_, stats) = app.get("/api/v1/billing/usage", &owner.token).await;
    let leads = usage_of(&stats, "monthly_leads");
    assert_eq!(leads["current"], 0);
    assert_eq!(leads["limit"], 500);
    assert_eq!(leads["is_exceeded"], false);

    let (status, plans) = app.get("/api/v1/billing/plans", &owner.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plans.as_array().unwrap().len(), 4);
}
