use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::{tenant_row_accessors, PgQueryAs, TenantOwned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Proposal => "proposal",
            LeadStatus::Negotiation => "negotiation",
            LeadStatus::Won => "won",
            LeadStatus::Lost => "lost",
        }
    }
}

/// How a chatbot lead entered the funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatSourceType {
    Dm,
    Handoff,
    Comment,
    StoryReply,
    StoryMention,
}

impl ChatSourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatSourceType::Dm => "dm",
            ChatSourceType::Handoff => "handoff",
            ChatSourceType::Comment => "comment",
            ChatSourceType::StoryReply => "story_reply",
            ChatSourceType::StoryMention => "story_mention",
        }
    }

    /// Value written to `leads.source`.
    pub fn source_code(self) -> &'static str {
        match self {
            ChatSourceType::Dm => "instagram_chatbot_auto",
            ChatSourceType::Handoff => "instagram_chatbot_handoff",
            ChatSourceType::Comment => "instagram_comment",
            ChatSourceType::StoryReply => "instagram_story_reply",
            ChatSourceType::StoryMention => "instagram_story_mention",
        }
    }
}

/// Placeholder name used when the chat participant is anonymous.
pub const ANONYMOUS_LEAD_NAME: &str = "Instagram Foydalanuvchi";

/// Structured chatbot context kept on a lead (JSONB).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadChatData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_intent: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl LeadChatData {
    /// Values present in `newer` replace the current ones.
    pub fn merge(&mut self, newer: LeadChatData) {
        if newer.participant_id.is_some() {
            self.participant_id = newer.participant_id;
        }
        if newer.participant_username.is_some() {
            self.participant_username = newer.participant_username;
        }
        if newer.last_message.is_some() {
            self.last_message = newer.last_message;
        }
        if newer.last_intent.is_some() {
            self.last_intent = newer.last_intent;
        }
        self.extra.extend(newer.extra);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lead {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: String,
    pub source: String,
    pub estimated_value: Option<i64>,
    pub instagram_conversation_id: Option<Uuid>,
    pub chatbot_source_type: Option<String>,
    pub chatbot_detected_intent: Option<String>,
    pub chatbot_first_message: Option<String>,
    #[sqlx(json)]
    pub chatbot_data: LeadChatData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Lead {
    /// A blank lead owned by whatever business the insert scope stamps.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            business_id: Uuid::nil(),
            name: name.into(),
            phone: None,
            email: None,
            status: LeadStatus::New.as_str().to_string(),
            source: source.into(),
            estimated_value: None,
            instagram_conversation_id: None,
            chatbot_source_type: None,
            chatbot_detected_intent: None,
            chatbot_first_message: None,
            chatbot_data: LeadChatData::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn has_placeholder_name(&self) -> bool {
        self.name.trim().is_empty() || self.name == ANONYMOUS_LEAD_NAME
    }
}

impl TenantOwned for Lead {
    const TABLE: &'static str = "leads";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "phone",
        "email",
        "status",
        "source",
        "estimated_value",
        "instagram_conversation_id",
        "chatbot_source_type",
        "chatbot_detected_intent",
        "chatbot_first_message",
        "chatbot_data",
    ];

    tenant_row_accessors!();

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.name)
            .bind(&self.phone)
            .bind(&self.email)
            .bind(&self.status)
            .bind(&self.source)
            .bind(self.estimated_value)
            .bind(self.instagram_conversation_id)
            .bind(&self.chatbot_source_type)
            .bind(&self.chatbot_detected_intent)
            .bind(&self.chatbot_first_message)
            .bind(sqlx::types::Json(&self.chatbot_data))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLeadRequest {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: Option<LeadStatus>,
    pub source: Option<String>,
    pub estimated_value: Option<i64>,
    /// Honoured only for cross-tenant callers; a business scope always wins.
    pub business_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLeadRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: Option<LeadStatus>,
    pub estimated_value: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_keeps_values_missing_from_newer_data() {
        let mut data = LeadChatData {
            participant_username: Some("dilnoza".into()),
            last_intent: Some("price_inquiry".into()),
            ..Default::default()
        };
        let mut extra = BTreeMap::new();
        extra.insert("size".to_string(), json!("M"));
        data.merge(LeadChatData {
            last_intent: Some("order".into()),
            extra,
            ..Default::default()
        });

        assert_eq!(data.participant_username.as_deref(), Some("dilnoza"));
        assert_eq!(data.last_intent.as_deref(), Some("order"));
        assert_eq!(data.extra.get("size"), Some(&json!("M")));
    }

    #[test]
    fn unknown_chat_keys_survive_a_json_round_trip() {
        let raw = json!({ "participant_id": "17841", "budget": 500000 });
        let data: LeadChatData = serde_json::from_value(raw).unwrap();
        assert_eq!(data.participant_id.as_deref(), Some("17841"));
        assert_eq!(serde_json::to_value(&data).unwrap()["budget"], json!(500000));
    }
}
