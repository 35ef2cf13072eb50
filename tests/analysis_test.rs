mod common;

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use biznespilot_api::{
    db::{Repository, TenantScope, Trashed},
    models::call::{AnalysisStatus, CallLog},
    services::{
        analysis_provider::{AnalysisProvider, DisabledProvider, ProviderError},
        calls::{self, AnalysisJob},
    },
};
use common::{Owner, TestApp};

/// Fails the first `failures` transcriptions with the given error.
struct FlakyProvider {
    failures: u32,
    error: ProviderError,
    transcribe_calls: AtomicU32,
}

impl FlakyProvider {
    fn new(failures: u32, error: ProviderError) -> Self {
        Self { failures, error, transcribe_calls: AtomicU32::new(0) }
    }

    fn attempts(&self) -> u32 {
        self.transcribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for FlakyProvider {
    async fn transcribe(&self, _recording_url: &str) -> Result<String, ProviderError> {
        let n = self.transcribe_calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(self.error.clone());
        }
        Ok("Assalomu alaykum, buyurtma haqida gaplashamiz".into())
    }

    async fn score(&self, _transcript: &str) -> Result<Option<i32>, ProviderError> {
        Ok(Some(87))
    }
}

async fn queue_call(app: &mut TestApp, owner: &Owner, seconds: i32) -> AnalysisJob {
    let (_, call) = app
        .post(
            "/api/v1/calls",
            &owner.token,
            json!({ "duration": seconds, "recording_url": "https://cdn.example.com/rec.mp3" }),
        )
        .await;
    let id = call["id"].as_str().unwrap();
    let (status, body) = app
        .post(&format!("/api/v1/calls/{id}/analyze"), &owner.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    app.analysis_rx.try_recv().expect("job was not queued")
}

async fn load(app: &TestApp, business_id: Uuid, call_id: Uuid) -> CallLog {
    Repository::<CallLog>::find(app.store(), &TenantScope::for_business(business_id), call_id, Trashed::Exclude)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried() {
    let mut app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;
    let job = queue_call(&mut app, &owner, 300).await;

    let provider = FlakyProvider::new(2, ProviderError::RateLimited);
    let status = calls::process(app.store(), &provider, job, 3).await.unwrap();
    assert_eq!(status, Some(AnalysisStatus::Completed));
    assert_eq!(provider.attempts(), 3);

    let call = load(&app, owner.business_id, job.call_id).await;
    assert_eq!(call.analysis(), AnalysisStatus::Completed);
    assert_eq!(call.overall_score, Some(87));
    assert!(call.transcript.is_some());
    assert!(call.analyzed_at.is_some());
    assert!(call.analysis_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failure_after_last_attempt_is_recorded() {
    let mut app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;
    let job = queue_call(&mut app, &owner, 300).await;

    let provider = FlakyProvider::new(u32::MAX, ProviderError::Transport("connection reset".into()));
    let status = calls::process(app.store(), &provider, job, 3).await.unwrap();
    assert_eq!(status, Some(AnalysisStatus::Failed));
    assert_eq!(provider.attempts(), 3);

    let call = load(&app, owner.business_id, job.call_id).await;
    assert_eq!(call.analysis(), AnalysisStatus::Failed);
    assert!(call.analysis_error.unwrap().contains("connection reset"));

    // A failed call can be queued again.
    let (status, _) = app
        .post(&format!("/api/v1/calls/{}/analyze", job.call_id), &owner.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_disabled_provider_fails_without_retry() {
    let mut app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;
    let job = queue_call(&mut app, &owner, 120).await;

    let status = calls::process(app.store(), &DisabledProvider, job, 3).await.unwrap();
    assert_eq!(status, Some(AnalysisStatus::Failed));

    let call = load(&app, owner.business_id, job.call_id).await;
    assert_eq!(call.analysis_error.as_deref(), Some("call analysis is not configured"));
}

#[tokio::test]
async fn test_quota_is_rechecked_when_job_runs() {
    let mut app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;
    let first = queue_call(&mut app, &owner, 40 * 60).await;
    let second = queue_call(&mut app, &owner, 30 * 60).await;

    let provider = FlakyProvider::new(0, ProviderError::RateLimited);
    let status = calls::process(app.store(), &provider, first, 3).await.unwrap();
    assert_eq!(status, Some(AnalysisStatus::Completed));

    // 40 minutes are used now; the second call no longer fits in 60.
    let status = calls::process(app.store(), &provider, second, 3).await.unwrap();
    assert_eq!(status, Some(AnalysisStatus::Failed));
    assert_eq!(provider.attempts(), 1);

    let call = load(&app, owner.business_id, second.call_id).await;
    assert!(call.analysis_error.is_some());
}

#[tokio::test]
async fn test_stale_jobs_are_dropped() {
    let mut app = TestApp::new().await;
    let owner = app.register("owner@example.com", "Shop").await;
    let job = queue_call(&mut app, &owner, 120).await;

    let provider = FlakyProvider::new(0, ProviderError::RateLimited);
    calls::process(app.store(), &provider, job, 3).await.unwrap();
    // Delivered twice: the call is no longer queued.
    let status = calls::process(app.store(), &provider, job, 3).await.unwrap();
    assert_eq!(status, None);
    assert_eq!(provider.attempts(), 1);

    let missing = AnalysisJob { call_id: Uuid::new_v4(), business_id: owner.business_id };
    assert_eq!(calls::process(app.store(), &provider, missing, 3).await.unwrap(), None);
}
