use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    db::{ChatStore, Repository, Store, TenantScope, Trashed},
    error::AppError,
    models::{
        instagram::{
            ConnectAccountRequest, ConversationStatus, InstagramAccount, InstagramConversation,
            MessagingEvent, WebhookPayload,
        },
        lead::{ChatSourceType, LeadChatData},
        plan::{Feature, Resource},
    },
    services::{
        intent::{Intent, IntentMatcher},
        limits::PlanGate,
        metrics::INTENTS_COUNTER,
        tickets::{LeadDraft, LeadOutcome, TicketService},
    },
    AppState,
};

/// Tally of one webhook delivery.
#[derive(Debug, Default, Serialize)]
pub struct WebhookSummary {
    pub processed: usize,
    pub duplicates: usize,
    pub skipped: usize,
    /// Events that hit an error. Their message ids are not kept, so a
    /// redelivery processes them again.
    pub failed: usize,
    pub leads_created: usize,
}

enum EventOutcome {
    Processed { lead_created: bool },
    Duplicate,
    Skipped,
}

pub struct ChatbotService;

impl ChatbotService {
    pub async fn handle_webhook(state: &AppState, payload: WebhookPayload) -> Result<WebhookSummary, AppError> {
        let mut summary = WebhookSummary::default();
        if payload.object != "instagram" {
            warn!("Webhook: ignoring object '{}'", payload.object);
            return Ok(summary);
        }

        for entry in payload.entry {
            let account = match state.store.find_account_by_instagram_id(&entry.id).await {
                Ok(Some(account)) if account.is_active => account,
                Ok(_) => {
                    warn!("Webhook: no active account for instagram id {}", entry.id);
                    summary.skipped += entry.messaging.len();
                    continue;
                }
                Err(e) => {
                    error!("Webhook: account lookup for instagram id {} failed: {e}", entry.id);
                    summary.failed += entry.messaging.len();
                    continue;
                }
            };

            for event in entry.messaging {
                match Self::handle_event(state, &account, event).await {
                    Ok(EventOutcome::Processed { lead_created }) => {
                        summary.processed += 1;
                        if lead_created {
                            summary.leads_created += 1;
                        }
                    }
                    Ok(EventOutcome::Duplicate) => summary.duplicates += 1,
                    Ok(EventOutcome::Skipped) => summary.skipped += 1,
                    Err(e) => {
                        error!("Webhook: event for account {} failed: {e}", account.id);
                        summary.failed += 1;
                    }
                }
            }
        }
        Ok(summary)
    }

    async fn handle_event(
        state: &AppState,
        account: &InstagramAccount,
        event: MessagingEvent,
    ) -> Result<EventOutcome, AppError> {
        let store = state.store.as_ref();
        let Some(message) = event.message else {
            return Ok(EventOutcome::Skipped);
        };
        if message.is_echo || event.sender.id == account.instagram_id {
            return Ok(EventOutcome::Skipped);
        }

        let scope = TenantScope::for_business(account.business_id);
        let conversation = store
            .find_or_create_conversation(&scope, account, &event.sender.id, None)
            .await?;

        let text = message.text.unwrap_or_default();
        if !store.record_message_once(&conversation, &message.mid, &text).await? {
            info!("Webhook: duplicate delivery of message {}", message.mid);
            return Ok(EventOutcome::Duplicate);
        }

        match Self::respond(state, account, &scope, conversation, text).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(forget) = store.forget_message(&message.mid).await {
                    warn!("Webhook: could not release message {}: {forget}", message.mid);
                }
                Err(e)
            }
        }
    }

    /// Handles an inbound message that was recorded for the first time.
    async fn respond(
        state: &AppState,
        account: &InstagramAccount,
        scope: &TenantScope,
        mut conversation: InstagramConversation,
        text: String,
    ) -> Result<EventOutcome, AppError> {
        let store = state.store.as_ref();
        let result = IntentMatcher::classify(&text);
        INTENTS_COUNTER.with_label_values(&[result.intent.as_str()]).inc();

        let was_with_operator = conversation.conversation_status().is_with_operator();
        let now = Utc::now();
        conversation.last_intent = Some(result.intent.as_str().to_string());
        conversation.last_message_at = Some(now);
        conversation.updated_at = now;
        if conversation.conversation_status() == ConversationStatus::Closed {
            conversation.set_status(ConversationStatus::Bot);
        }
        if result.requires_handoff && !was_with_operator {
            conversation.set_status(ConversationStatus::HandoffRequested);
            info!("Conversation {} handed off to an operator", conversation.id);
        }
        let conversation = Repository::<InstagramConversation>::update(store, scope, conversation).await?;

        let mut lead_created = false;
        if result.creates_lead {
            let source = if result.requires_handoff {
                ChatSourceType::Handoff
            } else {
                ChatSourceType::Dm
            };
            let draft = LeadDraft {
                intent: Some(result.intent.as_str().to_string()),
                first_message: Some(text.clone()),
                chat_data: LeadChatData {
                    participant_id: Some(conversation.participant_id.clone()),
                    participant_username: conversation.participant_username.clone(),
                    last_message: Some(text.clone()),
                    last_intent: Some(result.intent.as_str().to_string()),
                    ..Default::default()
                },
                ..LeadDraft::new(source)
            };
            let outcome = TicketService::create_from_chatbot(
                store,
                state.cache.as_ref(),
                &state.config,
                &conversation,
                draft,
            )
            .await?;
            lead_created = matches!(outcome, LeadOutcome::Created(_));
        }

        if !was_with_operator {
            let client = state.instagram.clone();
            let token = account.access_token.clone();
            let recipient = conversation.participant_id.clone();
            let reply = result.reply;
            tokio::spawn(async move {
                if let Err(e) = client.send_text(&token, &recipient, reply).await {
                    warn!("Chatbot reply to {recipient} failed: {e}");
                }
            });
        }

        Ok(EventOutcome::Processed { lead_created })
    }

    /// Connects an Instagram account to the business.
    pub async fn connect_account(
        store: &dyn Store,
        business_id: Uuid,
        req: ConnectAccountRequest,
    ) -> Result<InstagramAccount, AppError> {
        if req.instagram_id.trim().is_empty() || req.access_token.trim().is_empty() {
            return Err(AppError::validation("instagram_id and access_token are required"));
        }
        PlanGate::check_feature(store, business_id, Feature::Instagram).await?;
        if store.find_account_by_instagram_id(req.instagram_id.trim()).await?.is_some() {
            return Err(AppError::Conflict("Instagram account is already connected".into()));
        }
        PlanGate::check_quota(store, business_id, Resource::InstagramAccounts, 1).await?;

        let now = Utc::now();
        let account = InstagramAccount {
            id: Uuid::new_v4(),
            business_id,
            instagram_id: req.instagram_id.trim().to_string(),
            username: req.username.trim().trim_start_matches('@').to_string(),
            access_token: req.access_token,
            token_expires_at: req.token_expires_at,
            is_active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let scope = TenantScope::for_business(business_id);
        Ok(Repository::<InstagramAccount>::insert(store, &scope, account).await?)
    }

    pub async fn list_conversations(
        store: &dyn Store,
        scope: &TenantScope,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<InstagramConversation>, AppError> {
        let mut conversations =
            Repository::<InstagramConversation>::list(store, scope, Trashed::Exclude).await?;
        if let Some(status) = status {
            conversations.retain(|c| c.conversation_status() == status);
        }
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(conversations)
    }

    async fn conversation(
        store: &dyn Store,
        scope: &TenantScope,
        id: Uuid,
    ) -> Result<InstagramConversation, AppError> {
        Repository::<InstagramConversation>::find(store, scope, id, Trashed::Exclude)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation"))
    }

    /// An operator takes over the thread; the bot goes quiet.
    pub async fn assign(
        store: &dyn Store,
        scope: &TenantScope,
        id: Uuid,
        operator_id: Uuid,
    ) -> Result<InstagramConversation, AppError> {
        let mut conversation = Self::conversation(store, scope, id).await?;
        conversation.assigned_user_id = Some(operator_id);
        conversation.set_status(ConversationStatus::Live);
        conversation.updated_at = Utc::now();
        Ok(Repository::<InstagramConversation>::update(store, scope, conversation).await?)
    }

    pub async fn close(
        store: &dyn Store,
        scope: &TenantScope,
        id: Uuid,
    ) -> Result<InstagramConversation, AppError> {
        let mut conversation = Self::conversation(store, scope, id).await?;
        conversation.set_status(ConversationStatus::Closed);
        conversation.updated_at = Utc::now();
        Ok(Repository::<InstagramConversation>::update(store, scope, conversation).await?)
    }

    /// Creates the conversation's lead on an operator's request.
    pub async fn force_lead(store: &dyn Store, scope: &TenantScope, id: Uuid) -> Result<LeadOutcome, AppError> {
        let conversation = Self::conversation(store, scope, id).await?;
        let source = if conversation.conversation_status().is_with_operator() {
            ChatSourceType::Handoff
        } else {
            ChatSourceType::Dm
        };
        let draft = LeadDraft {
            intent: conversation
                .last_intent
                .clone()
                .filter(|i| i != Intent::Unknown.as_str()),
            chat_data: LeadChatData {
                participant_id: Some(conversation.participant_id.clone()),
                participant_username: conversation.participant_username.clone(),
                ..Default::default()
            },
            ..LeadDraft::new(source)
        };
        TicketService::force_create(store, &conversation, draft).await
    }
}
