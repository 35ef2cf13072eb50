// Shared harness for the router-level tests: in-memory store and cache,
// test config and a seeded plan catalog.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt; // for oneshot
use uuid::Uuid;

use biznespilot_api::{
    app,
    config::Config,
    db::{MemoryCache, MemoryStore, Store},
    services::{
        calls::{AnalysisJob, AnalysisQueue},
        instagram::InstagramClient,
        subscription::SubscriptionService,
    },
    AppState,
};

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    /// Jobs queued by the analyze endpoints. No worker drains it in tests.
    pub analysis_rx: mpsc::Receiver<AnalysisJob>,
}

/// A registered owner with their first business.
pub struct Owner {
    pub token: String,
    pub user_id: Uuid,
    pub business_id: Uuid,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new())).await
    }

    /// Builds the app over a caller-supplied store.
    pub async fn with_store(store: Arc<dyn Store>) -> Self {
        let config = Arc::new(Config::for_tests());
        SubscriptionService::seed_catalog(store.as_ref())
            .await
            .expect("Failed to seed plan catalog");

        let (analysis, analysis_rx) = AnalysisQueue::new();
        let state = AppState {
            store,
            cache: Arc::new(MemoryCache::new()),
            instagram: Arc::new(InstagramClient::new(&config)),
            config,
            analysis,
        };

        Self {
            router: app::router(state.clone()),
            state,
            analysis_rx,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.state.store.as_ref()
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        business: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(business) = business {
            builder = builder.header("X-Business-Id", business.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(token), None, None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(token), None, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(token), None, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(Method::DELETE, uri, Some(token), None, None).await
    }

    pub async fn register(&self, email: &str, business_name: &str) -> Owner {
        let (status, body) = self
            .send(
                Method::POST,
                "/auth/register",
                None,
                None,
                Some(serde_json::json!({
                    "name": "Test Owner",
                    "email": email,
                    "password": "password123",
                    "business_name": business_name,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");

        Owner {
            token: body["access_token"].as_str().unwrap().to_string(),
            user_id: body["user"]["id"].as_str().unwrap().parse().unwrap(),
            business_id: body["business"]["id"].as_str().unwrap().parse().unwrap(),
        }
    }

    /// Moves the business to another catalog plan, bypassing the HTTP layer.
    pub async fn set_plan(&self, business_id: Uuid, slug: &str) {
        SubscriptionService::change_plan(self.store(), business_id, slug)
            .await
            .unwrap_or_else(|e| panic!("change to {slug} failed: {e}"));
    }
}
