use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::{tenant_row_accessors, PgQueryAs, TenantOwned};

/// A connected Instagram business account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstagramAccount {
    pub id: Uuid,
    pub business_id: Uuid,
    pub instagram_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TenantOwned for InstagramAccount {
    const TABLE: &'static str = "instagram_accounts";
    const COLUMNS: &'static [&'static str] =
        &["instagram_id", "username", "access_token", "token_expires_at", "is_active"];

    tenant_row_accessors!();

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.instagram_id)
            .bind(&self.username)
            .bind(&self.access_token)
            .bind(self.token_expires_at)
            .bind(self.is_active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Bot,
    HandoffRequested,
    Live,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Bot => "bot",
            ConversationStatus::HandoffRequested => "handoff_requested",
            ConversationStatus::Live => "live",
            ConversationStatus::Closed => "closed",
        }
    }

    /// An operator owns the thread; the bot stays silent.
    pub fn is_with_operator(self) -> bool {
        matches!(self, ConversationStatus::HandoffRequested | ConversationStatus::Live)
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bot" => Ok(ConversationStatus::Bot),
            "handoff_requested" => Ok(ConversationStatus::HandoffRequested),
            "live" => Ok(ConversationStatus::Live),
            "closed" => Ok(ConversationStatus::Closed),
            _ => Err(anyhow::anyhow!("Unknown conversation status: {s}")),
        }
    }
}

/// DM thread between an account and one participant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InstagramConversation {
    pub id: Uuid,
    pub business_id: Uuid,
    pub account_id: Uuid,
    pub participant_id: String,
    pub participant_username: Option<String>,
    pub participant_name: Option<String>,
    pub status: String,
    pub assigned_user_id: Option<Uuid>,
    pub last_intent: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl InstagramConversation {
    pub fn new(business_id: Uuid, account_id: Uuid, participant_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            business_id,
            account_id,
            participant_id: participant_id.to_string(),
            participant_username: None,
            participant_name: None,
            status: ConversationStatus::Bot.as_str().to_string(),
            assigned_user_id: None,
            last_intent: None,
            last_message_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn conversation_status(&self) -> ConversationStatus {
        self.status.parse().unwrap_or(ConversationStatus::Bot)
    }

    pub fn set_status(&mut self, status: ConversationStatus) {
        self.status = status.as_str().to_string();
    }
}

impl TenantOwned for InstagramConversation {
    const TABLE: &'static str = "instagram_conversations";
    const COLUMNS: &'static [&'static str] = &[
        "account_id",
        "participant_id",
        "participant_username",
        "participant_name",
        "status",
        "assigned_user_id",
        "last_intent",
        "last_message_at",
    ];

    tenant_row_accessors!();

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(self.account_id)
            .bind(&self.participant_id)
            .bind(&self.participant_username)
            .bind(&self.participant_name)
            .bind(&self.status)
            .bind(self.assigned_user_id)
            .bind(&self.last_intent)
            .bind(self.last_message_at)
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectAccountRequest {
    pub instagram_id: String,
    pub username: String,
    pub access_token: String,
    pub token_expires_at: Option<DateTime<Utc>>,
}

// Webhook payloads (Graph API "instagram" object)
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    /// Instagram id of the receiving business account.
    pub id: String,
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Deserialize)]
pub struct MessagingEvent {
    pub sender: Participant,
    pub recipient: Participant,
    pub message: Option<InboundMessage>,
}

#[derive(Debug, Deserialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub mid: String,
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}
