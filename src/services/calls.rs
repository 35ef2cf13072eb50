use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    db::{Repository, Store, TenantScope, Trashed},
    error::AppError,
    models::{
        call::{AnalysisStatus, CallLog, CreateCallRequest},
        plan::Resource,
    },
    services::{
        analysis_provider::{AnalysisProvider, ProviderError},
        limits::{evaluate, PlanGate},
        metrics::{ANALYSIS_COUNTER, LIMIT_REJECTIONS},
        subscription::SubscriptionService,
    },
};

const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisJob {
    pub call_id: Uuid,
    pub business_id: Uuid,
}

/// Sending half of the analysis worker's queue.
#[derive(Clone)]
pub struct AnalysisQueue {
    tx: mpsc::Sender<AnalysisJob>,
}

impl AnalysisQueue {
    pub fn new() -> (Self, mpsc::Receiver<AnalysisJob>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    pub async fn enqueue(&self, job: AnalysisJob) -> anyhow::Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| anyhow::anyhow!("Call analysis worker is not running"))
    }
}

#[derive(Debug, Serialize)]
pub struct SkippedCall {
    pub call_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct BulkAnalyzeReport {
    pub queued: Vec<Uuid>,
    pub skipped: Vec<SkippedCall>,
    pub requested_minutes: i64,
}

pub struct CallService;

impl CallService {
    pub async fn create(store: &dyn Store, scope: &TenantScope, req: CreateCallRequest) -> Result<CallLog, AppError> {
        if req.duration < 0 {
            return Err(AppError::validation("duration must not be negative"));
        }
        let now = Utc::now();
        let call = CallLog {
            id: Uuid::new_v4(),
            business_id: Uuid::nil(),
            lead_id: req.lead_id,
            provider: req.provider.unwrap_or_else(|| "manual".into()),
            direction: req.direction.unwrap_or_else(|| "outbound".into()),
            from_number: req.from_number,
            to_number: req.to_number,
            duration: req.duration,
            recording_url: req.recording_url,
            status: req.status.unwrap_or_else(|| "completed".into()),
            analysis_status: AnalysisStatus::Pending.as_str().into(),
            analysis_error: None,
            transcript: None,
            overall_score: None,
            analyzed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        Ok(Repository::<CallLog>::insert(store, scope, call).await?)
    }

    /// Why `call` cannot be queued right now, as an API error.
    fn eligibility(call: &CallLog) -> Result<(), AppError> {
        if call.analysis().is_in_progress() {
            return Err(AppError::Conflict("Call analysis is already in progress".into()));
        }
        if let Some(reason) = call.analysis_blocker() {
            return Err(AppError::validation(reason));
        }
        Ok(())
    }

    async fn mark_queued(store: &dyn Store, scope: &TenantScope, mut call: CallLog) -> Result<CallLog, AppError> {
        call.set_analysis(AnalysisStatus::Queued);
        call.analysis_error = None;
        call.updated_at = Utc::now();
        Ok(Repository::<CallLog>::update(store, scope, call).await?)
    }

    pub async fn analyze(
        store: &dyn Store,
        queue: &AnalysisQueue,
        business_id: Uuid,
        call_id: Uuid,
    ) -> Result<CallLog, AppError> {
        let scope = TenantScope::for_business(business_id);
        let call = Repository::<CallLog>::find(store, &scope, call_id, Trashed::Exclude)
            .await?
            .ok_or_else(|| AppError::not_found("Call"))?;
        Self::eligibility(&call)?;
        PlanGate::check_quota(store, business_id, Resource::AudioMinutes, call.minutes()).await?;

        let call = Self::mark_queued(store, &scope, call).await?;
        queue.enqueue(AnalysisJob { call_id, business_id }).await?;
        info!("Call {call_id} queued for analysis ({} min)", call.minutes());
        Ok(call)
    }

    /// Queues every eligible call while the month's audio quota allows,
    /// counting minutes already reserved by earlier calls of the same batch.
    pub async fn analyze_bulk(
        store: &dyn Store,
        queue: &AnalysisQueue,
        business_id: Uuid,
        call_ids: &[Uuid],
        max_batch: usize,
    ) -> Result<BulkAnalyzeReport, AppError> {
        if call_ids.is_empty() || call_ids.len() > max_batch {
            return Err(AppError::validation(format!(
                "call_ids must contain between 1 and {max_batch} ids"
            )));
        }

        let now = Utc::now();
        let (_, plan) = SubscriptionService::active_plan(store, business_id, now).await?;
        let limit = plan.limits.ceiling(Resource::AudioMinutes);
        let used = PlanGate::usage(store, business_id, Resource::AudioMinutes, now).await?;
        let scope = TenantScope::for_business(business_id);

        let mut report = BulkAnalyzeReport::default();
        let mut seen = HashSet::new();
        for &call_id in call_ids {
            if !seen.insert(call_id) {
                continue;
            }
            let skip = |reason: &str| SkippedCall { call_id, reason: reason.to_string() };

            let Some(call) = Repository::<CallLog>::find(store, &scope, call_id, Trashed::Exclude).await? else {
                report.skipped.push(skip("Call not found"));
                continue;
            };
            if let Err(e) = Self::eligibility(&call) {
                report.skipped.push(skip(&e.to_string()));
                continue;
            }
            let minutes = call.minutes();
            let decision = evaluate(Resource::AudioMinutes, limit, used + report.requested_minutes, minutes);
            if !decision.allowed {
                LIMIT_REJECTIONS.with_label_values(&[Resource::AudioMinutes.as_str()]).inc();
                report.skipped.push(skip(Resource::AudioMinutes.label()));
                continue;
            }

            Self::mark_queued(store, &scope, call).await?;
            queue.enqueue(AnalysisJob { call_id, business_id }).await?;
            report.requested_minutes += minutes;
            report.queued.push(call_id);
        }

        info!(
            "Bulk analysis for business {business_id}: {} queued, {} skipped",
            report.queued.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Delay before retry number `attempt` (1-based): 2, 4, 8... seconds.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

async fn with_retry<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff(attempt);
                warn!("Analysis provider error (attempt {attempt}/{max_attempts}): {e}; retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Spawn the worker draining the analysis queue.
pub fn start_worker(
    store: Arc<dyn Store>,
    provider: Arc<dyn AnalysisProvider>,
    mut rx: mpsc::Receiver<AnalysisJob>,
    max_attempts: u32,
) {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            if let Err(e) = process(store.as_ref(), provider.as_ref(), job, max_attempts).await {
                warn!("Analysis of call {} aborted: {e:#}", job.call_id);
            }
        }
        info!("Call analysis worker stopped");
    });
}

/// Runs one job to completion. Returns the call's final analysis status,
/// or `None` when the job was stale.
pub async fn process(
    store: &dyn Store,
    provider: &dyn AnalysisProvider,
    job: AnalysisJob,
    max_attempts: u32,
) -> anyhow::Result<Option<AnalysisStatus>> {
    let scope = TenantScope::for_business(job.business_id);
    let Some(mut call) = Repository::<CallLog>::find(store, &scope, job.call_id, Trashed::Exclude).await? else {
        warn!("Analysis job for missing call {}", job.call_id);
        return Ok(None);
    };
    if call.analysis() != AnalysisStatus::Queued {
        return Ok(None);
    }

    // Usage may have grown since the call was queued.
    match PlanGate::check_quota(store, job.business_id, Resource::AudioMinutes, call.minutes()).await {
        Ok(_) => {}
        Err(e @ (AppError::LimitExceeded(_) | AppError::NoActiveSubscription)) => {
            return fail(store, &scope, call, e.to_string()).await.map(Some);
        }
        Err(e) => return Err(e.into()),
    }

    call.set_analysis(AnalysisStatus::Transcribing);
    call.updated_at = Utc::now();
    let mut call = Repository::<CallLog>::update(store, &scope, call).await?;

    let recording = call.recording_url.clone().unwrap_or_default();
    let recording = recording.as_str();
    let transcript = match with_retry(max_attempts, move || provider.transcribe(recording)).await {
        Ok(t) => t,
        Err(e) => return fail(store, &scope, call, e.to_string()).await.map(Some),
    };

    call.set_analysis(AnalysisStatus::Analyzing);
    call.transcript = Some(transcript);
    call.updated_at = Utc::now();
    let mut call = Repository::<CallLog>::update(store, &scope, call).await?;

    let transcript = call.transcript.clone().unwrap_or_default();
    let transcript = transcript.as_str();
    let score = match with_retry(max_attempts, move || provider.score(transcript)).await {
        Ok(s) => s,
        Err(e) => return fail(store, &scope, call, e.to_string()).await.map(Some),
    };

    let now = Utc::now();
    call.set_analysis(AnalysisStatus::Completed);
    call.overall_score = score;
    call.analyzed_at = Some(now);
    call.analysis_error = None;
    call.updated_at = now;
    Repository::<CallLog>::update(store, &scope, call).await?;

    ANALYSIS_COUNTER.with_label_values(&[AnalysisStatus::Completed.as_str()]).inc();
    info!("Call {} analyzed", job.call_id);
    Ok(Some(AnalysisStatus::Completed))
}

async fn fail(
    store: &dyn Store,
    scope: &TenantScope,
    mut call: CallLog,
    error: String,
) -> anyhow::Result<AnalysisStatus> {
    warn!("Analysis of call {} failed: {error}", call.id);
    call.set_analysis(AnalysisStatus::Failed);
    call.analysis_error = Some(error);
    call.updated_at = Utc::now();
    Repository::<CallLog>::update(store, scope, call).await?;
    ANALYSIS_COUNTER.with_label_values(&[AnalysisStatus::Failed.as_str()]).inc();
    Ok(AnalysisStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(2), Duration::from_secs(4));
        assert_eq!(backoff(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_attempts_run_out() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(3, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::RateLimited)
        })
        .await;
        assert!(matches!(result, Err(ProviderError::RateLimited)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_requests_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(3, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Rejected("unsupported codec".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
