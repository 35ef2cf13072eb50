use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;

/// Thin client over the Instagram Graph API.
pub struct InstagramClient {
    client: Client,
    graph_url: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    /// Seconds.
    expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl InstagramClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            graph_url: config.instagram_graph_url.trim_end_matches('/').to_string(),
        }
    }

    /// Send a text DM from the account owning `access_token`.
    pub async fn send_text(&self, access_token: &str, recipient_id: &str, text: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(format!("{}/me/messages", self.graph_url))
            .bearer_auth(access_token)
            .json(&json!({
                "recipient": { "id": recipient_id },
                "message": { "text": text },
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Graph API send failed ({status}): {body}");
        }
        Ok(())
    }

    /// Exchange a long-lived token for a fresh one.
    pub async fn refresh_token(&self, access_token: &str) -> anyhow::Result<RefreshedToken> {
        let resp = self
            .client
            .get(format!("{}/refresh_access_token", self.graph_url))
            .query(&[("grant_type", "ig_refresh_token"), ("access_token", access_token)])
            .send()
            .await?
            .error_for_status()?;

        let body: RefreshResponse = resp.json().await?;
        Ok(RefreshedToken {
            access_token: body.access_token,
            expires_at: Utc::now() + Duration::seconds(body.expires_in),
        })
    }
}
