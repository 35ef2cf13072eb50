use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("analysis provider is rate limiting requests")]
    RateLimited,
    #[error("analysis provider unreachable: {0}")]
    Transport(String),
    #[error("analysis provider rejected the request: {0}")]
    Rejected(String),
    #[error("call analysis is not configured")]
    Disabled,
}

impl ProviderError {
    /// Worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::RateLimited | ProviderError::Transport(_))
    }
}

/// Speech-to-text plus scoring backend used by the analysis worker.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn transcribe(&self, recording_url: &str) -> Result<String, ProviderError>;
    /// Overall call score (0..=100), if the provider produces one.
    async fn score(&self, transcript: &str) -> Result<Option<i32>, ProviderError>;
}

pub struct HttpAnalysisProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptResponse {
    transcript: String,
}

#[derive(Deserialize)]
struct ScoreResponse {
    overall_score: Option<i32>,
}

impl HttpAnalysisProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let mut req = self.client.post(format!("{}{path}", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ProviderError::Transport(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!("HTTP {status}: {text}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Rejected(format!("invalid response: {e}")))
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    async fn transcribe(&self, recording_url: &str) -> Result<String, ProviderError> {
        let resp: TranscriptResponse = self
            .post("/transcribe", json!({ "recording_url": recording_url }))
            .await?;
        Ok(resp.transcript)
    }

    async fn score(&self, transcript: &str) -> Result<Option<i32>, ProviderError> {
        let resp: ScoreResponse = self.post("/analyze", json!({ "transcript": transcript })).await?;
        Ok(resp.overall_score.map(|s| s.clamp(0, 100)))
    }
}

/// Used when no provider is configured; every job fails fast.
pub struct DisabledProvider;

#[async_trait]
impl AnalysisProvider for DisabledProvider {
    async fn transcribe(&self, _recording_url: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled)
    }

    async fn score(&self, _transcript: &str) -> Result<Option<i32>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_throttling_and_transport_errors_retry() {
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::Transport("timeout".into()).is_retryable());
        assert!(!ProviderError::Rejected("bad audio".into()).is_retryable());
        assert!(!ProviderError::Disabled.is_retryable());
    }
}
