mod common;

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use common::{Owner, TestApp};

const ACCOUNT_ID: &str = "17841400000000001";

async fn connect(app: &TestApp, owner: &Owner) -> Value {
    let (status, account) = app
        .post(
            "/api/v1/chatbot/accounts",
            &owner.token,
            json!({
                "instagram_id": ACCOUNT_ID,
                "username": "alpha_shop",
                "access_token": "page-token",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{account}");
    account
}

fn dm(sender: &str, mid: &str, text: &str) -> Value {
    json!({
        "object": "instagram",
        "entry": [{
            "id": ACCOUNT_ID,
            "messaging": [{
                "sender": { "id": sender },
                "recipient": { "id": ACCOUNT_ID },
                "message": { "mid": mid, "text": text },
            }],
        }],
    })
}

async fn deliver(app: &TestApp, payload: Value) -> Value {
    let (status, summary) = app
        .send(Method::POST, "/webhooks/instagram", None, None, Some(payload))
        .await;
    assert_eq!(status, StatusCode::OK, "{summary}");
    summary
}

#[tokio::test]
async fn test_price_question_creates_one_lead_per_conversation() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Alpha Shop").await;
    connect(&app, &owner).await;

    let summary = deliver(&app, dm("user-1", "mid-1", "Assalomu alaykum, narxi qancha?")).await;
    assert_eq!(summary["processed"], 1);
    assert_eq!(summary["leads_created"], 1);

    let summary = deliver(&app, dm("user-1", "mid-2", "Buyurtma bermoqchiman")).await;
    assert_eq!(summary["processed"], 1);
    assert_eq!(summary["leads_created"], 0);

    let (_, leads) = app.get("/api/v1/leads", &owner.token).await;
    let leads = leads.as_array().unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0]["source"], "instagram_chatbot_auto");
    assert_eq!(leads[0]["chatbot_detected_intent"], "price_inquiry");
    assert_eq!(leads[0]["chatbot_first_message"], "Assalomu alaykum, narxi qancha?");
    assert_eq!(leads[0]["chatbot_data"]["last_intent"], "order");
}

#[tokio::test]
async fn test_duplicate_delivery_is_ignored() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Alpha Shop").await;
    connect(&app, &owner).await;

    deliver(&app, dm("user-1", "mid-1", "narxi qancha")).await;
    let summary = deliver(&app, dm("user-1", "mid-1", "narxi qancha")).await;
    assert_eq!(summary["processed"], 0);
    assert_eq!(summary["duplicates"], 1);

    let (_, leads) = app.get("/api/v1/leads", &owner.token).await;
    assert_eq!(leads.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_greeting_does_not_create_lead() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Alpha Shop").await;
    connect(&app, &owner).await;

    let summary = deliver(&app, dm("user-1", "mid-1", "Salom!")).await;
    assert_eq!(summary["processed"], 1);
    assert_eq!(summary["leads_created"], 0);

    let (_, conversations) = app.get("/api/v1/chatbot/conversations", &owner.token).await;
    assert_eq!(conversations[0]["last_intent"], "greeting");
    assert_eq!(conversations[0]["status"], "bot");
}

#[tokio::test]
async fn test_operator_request_hands_off_conversation() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Alpha Shop").await;
    connect(&app, &owner).await;

    deliver(&app, dm("user-1", "mid-1", "Operator bilan gaplashmoqchiman")).await;

    let (_, waiting) = app
        .get("/api/v1/chatbot/conversations?status=handoff_requested", &owner.token)
        .await;
    let waiting = waiting.as_array().unwrap();
    assert_eq!(waiting.len(), 1);
    let conversation_id = waiting[0]["id"].as_str().unwrap();

    let (_, leads) = app.get("/api/v1/leads", &owner.token).await;
    assert_eq!(leads[0]["source"], "instagram_chatbot_handoff");
    assert_eq!(leads[0]["chatbot_source_type"], "handoff");

    let (status, assigned) = app
        .post(
            &format!("/api/v1/chatbot/conversations/{conversation_id}/assign"),
            &owner.token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assigned["status"], "live");
    assert_eq!(assigned["assigned_user_id"], owner.user_id.to_string());

    let (status, closed) = app
        .post(
            &format!("/api/v1/chatbot/conversations/{conversation_id}/close"),
            &owner.token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["status"], "closed");
}

#[tokio::test]
async fn test_lead_creation_is_throttled_per_business() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Alpha Shop").await;
    connect(&app, &owner).await;

    let mut created = 0;
    for i in 0..4 {
        let summary = deliver(&app, dm(&format!("user-{i}"), &format!("mid-{i}"), "narxi qancha")).await;
        assert_eq!(summary["processed"], 1);
        created += summary["leads_created"].as_u64().unwrap();
    }
    assert_eq!(created, 3);

    // An operator can still create the lead for the throttled conversation.
    let (_, conversations) = app.get("/api/v1/chatbot/conversations", &owner.token).await;
    let throttled = conversations
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["participant_id"] == "user-3")
        .unwrap();
    let (status, body) = app
        .post(
            &format!("/api/v1/chatbot/conversations/{}/lead", throttled["id"].as_str().unwrap()),
            &owner.token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["outcome"], "created");

    let (status, body) = app
        .post(
            &format!("/api/v1/chatbot/conversations/{}/lead", throttled["id"].as_str().unwrap()),
            &owner.token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "existing");

    let (_, stats) = app.get("/api/v1/chatbot/leads/stats?period=today", &owner.token).await;
    assert_eq!(stats["total"], 4);
    assert_eq!(stats["by_intent"]["price_inquiry"], 4);
    assert_eq!(stats["period"], "today");
}

#[tokio::test]
async fn test_unknown_account_and_echoes_are_skipped() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Alpha Shop").await;
    connect(&app, &owner).await;

    let mut payload = dm("user-1", "mid-1", "narxi qancha");
    payload["entry"][0]["id"] = json!("999");
    let summary = deliver(&app, payload).await;
    assert_eq!(summary["skipped"], 1);

    let mut echo = dm(ACCOUNT_ID, "mid-2", "Narxlar bo'yicha ma'lumot yuboramiz");
    echo["entry"][0]["messaging"][0]["message"]["is_echo"] = json!(true);
    let summary = deliver(&app, echo).await;
    assert_eq!(summary["skipped"], 1);
    assert_eq!(summary["processed"], 0);

    let summary = deliver(&app, json!({ "object": "page", "entry": [] })).await;
    assert_eq!(summary["processed"], 0);
}

#[tokio::test]
async fn test_webhook_verification() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(
            Method::GET,
            "/webhooks/instagram?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=1158201444",
            None,
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(1158201444));

    let (status, _) = app
        .send(
            Method::GET,
            "/webhooks/instagram?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=1",
            None,
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_free_plan_cannot_connect_instagram() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Alpha Shop").await;
    app.set_plan(owner.business_id, "free").await;

    let (status, body) = app
        .post(
            "/api/v1/chatbot/accounts",
            &owner.token,
            json!({ "instagram_id": ACCOUNT_ID, "username": "alpha_shop", "access_token": "t" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "FEATURE_NOT_AVAILABLE");
}

#[tokio::test]
async fn test_account_belongs_to_one_business() {
    let app = TestApp::new().await;
    let alpha = app.register("alpha@example.com", "Alpha Shop").await;
    let beta = app.register("beta@example.com", "Beta Shop").await;
    connect(&app, &alpha).await;

    let (status, body) = app
        .post(
            "/api/v1/chatbot/accounts",
            &beta.token,
            json!({ "instagram_id": ACCOUNT_ID, "username": "copy", "access_token": "t" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (_, accounts) = app.get("/api/v1/chatbot/accounts", &alpha.token).await;
    assert_eq!(accounts[0]["username"], "alpha_shop");
    assert!(accounts[0].get("access_token").is_none());
}

#[tokio::test]
async fn test_classify_preview() {
    let app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Alpha Shop").await;

    let (status, result) = app
        .post("/api/v1/chatbot/classify", &owner.token, json!({ "text": "Mahsulot buzilgan keldi" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["intent"], "complaint");
    assert_eq!(result["requires_handoff"], true);
    assert_eq!(result["creates_lead"], true);
}
