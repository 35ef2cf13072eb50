use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::Config,
    db::{Cache, Repository, Store, TenantScope, Trashed},
    error::AppError,
    models::{
        instagram::InstagramConversation,
        lead::{ChatSourceType, Lead, LeadChatData, ANONYMOUS_LEAD_NAME},
        plan::Resource,
    },
    services::{limits::{month_start, PlanGate}, metrics::CHAT_LEADS_COUNTER},
};

/// What the chatbot knows about the customer when it asks for a lead.
#[derive(Debug, Clone)]
pub struct LeadDraft {
    pub source_type: ChatSourceType,
    pub intent: Option<String>,
    pub first_message: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub chat_data: LeadChatData,
}

impl LeadDraft {
    pub fn new(source_type: ChatSourceType) -> Self {
        Self {
            source_type,
            intent: None,
            first_message: None,
            name: None,
            phone: None,
            email: None,
            chat_data: LeadChatData::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LeadOutcome {
    Created(Lead),
    /// The conversation already had a lead; it was enriched and returned.
    Existing(Lead),
    /// Creation was suppressed by the per-conversation lock or the spam counter.
    Throttled,
    /// The monthly lead quota is used up.
    LimitReached,
}

impl LeadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadOutcome::Created(_) => "created",
            LeadOutcome::Existing(_) => "existing",
            LeadOutcome::Throttled => "throttled",
            LeadOutcome::LimitReached => "limit_reached",
        }
    }

    pub fn lead(&self) -> Option<&Lead> {
        match self {
            LeadOutcome::Created(lead) | LeadOutcome::Existing(lead) => Some(lead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsPeriod {
    #[default]
    Today,
    Week,
    Month,
}

impl StatsPeriod {
    pub fn start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        match self {
            StatsPeriod::Today => midnight,
            StatsPeriod::Week => {
                midnight - Duration::days(i64::from(now.weekday().num_days_from_monday()))
            }
            StatsPeriod::Month => month_start(now),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LeadStats {
    pub total: usize,
    pub by_source_type: BTreeMap<String, usize>,
    pub by_intent: BTreeMap<String, usize>,
    pub period: StatsPeriod,
}

pub struct TicketService;

impl TicketService {
    /// Get-or-create the lead of a chatbot conversation.
    ///
    /// At most one lead exists per conversation. Creation is throttled by a
    /// per-conversation lock and a per-business counter held in the cache; a
    /// cache outage disables the throttle but never the uniqueness.
    pub async fn create_from_chatbot(
        store: &dyn Store,
        cache: &dyn Cache,
        config: &Config,
        conversation: &InstagramConversation,
        draft: LeadDraft,
    ) -> Result<LeadOutcome, AppError> {
        let outcome = Self::get_or_create(store, cache, config, conversation, draft).await?;
        CHAT_LEADS_COUNTER.with_label_values(&[outcome.as_str()]).inc();
        Ok(outcome)
    }

    async fn get_or_create(
        store: &dyn Store,
        cache: &dyn Cache,
        config: &Config,
        conversation: &InstagramConversation,
        draft: LeadDraft,
    ) -> Result<LeadOutcome, AppError> {
        let scope = TenantScope::for_business(conversation.business_id);

        if let Some(lead) = store.find_lead_by_conversation(&scope, conversation.id).await? {
            let lead = Self::enrich_and_save(store, &scope, lead, &draft).await?;
            return Ok(LeadOutcome::Existing(lead));
        }

        let lock_key = format!("lead_creation_lock:{}", conversation.id);
        match cache.acquire(&lock_key, config.lead_dedup_seconds).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Duplicate lead prevented for conversation {}", conversation.id);
                return Ok(match store.find_lead_by_conversation(&scope, conversation.id).await? {
                    Some(lead) => LeadOutcome::Existing(lead),
                    None => LeadOutcome::Throttled,
                });
            }
            Err(e) => warn!("Lead lock unavailable for conversation {}: {e}", conversation.id),
        }

        let counter_key = format!("lead_counter:{}", conversation.business_id);
        match cache.increment(&counter_key, 60).await {
            Ok(count) if count > config.leads_per_minute => {
                warn!(
                    "Spam protection: business {} created {count} chatbot leads this minute",
                    conversation.business_id
                );
                let _ = cache.release(&lock_key).await;
                return Ok(LeadOutcome::Throttled);
            }
            Ok(_) => {}
            Err(e) => warn!("Lead counter unavailable: {e}"),
        }

        match PlanGate::check_quota(store, conversation.business_id, Resource::MonthlyLeads, 1).await {
            Ok(_) => {}
            Err(AppError::LimitExceeded(_) | AppError::NoActiveSubscription) => {
                let _ = cache.release(&lock_key).await;
                return Ok(LeadOutcome::LimitReached);
            }
            Err(e) => return Err(e),
        }

        let outcome = Self::insert(store, &scope, conversation, draft).await;
        if outcome.is_err() {
            let _ = cache.release(&lock_key).await;
        }
        outcome
    }

    /// Creates the conversation's lead regardless of the throttle. The
    /// monthly quota and the one-lead-per-conversation rule still apply.
    pub async fn force_create(
        store: &dyn Store,
        conversation: &InstagramConversation,
        draft: LeadDraft,
    ) -> Result<LeadOutcome, AppError> {
        let scope = TenantScope::for_business(conversation.business_id);
        if let Some(lead) = store.find_lead_by_conversation(&scope, conversation.id).await? {
            let lead = Self::enrich_and_save(store, &scope, lead, &draft).await?;
            return Ok(LeadOutcome::Existing(lead));
        }
        PlanGate::check_quota(store, conversation.business_id, Resource::MonthlyLeads, 1).await?;
        let outcome = Self::insert(store, &scope, conversation, draft).await?;
        CHAT_LEADS_COUNTER.with_label_values(&[outcome.as_str()]).inc();
        Ok(outcome)
    }

    async fn insert(
        store: &dyn Store,
        scope: &TenantScope,
        conversation: &InstagramConversation,
        draft: LeadDraft,
    ) -> Result<LeadOutcome, AppError> {
        let lead = build_lead(conversation, draft.clone());
        let (lead, created) = store.insert_lead_once(scope, lead).await?;
        if created {
            info!(
                "Lead {} created from chatbot (business {}, conversation {}, intent {:?})",
                lead.id, lead.business_id, conversation.id, lead.chatbot_detected_intent
            );
            Ok(LeadOutcome::Created(lead))
        } else {
            // Lost the race to a concurrent delivery, or the lead is trashed.
            if lead.deleted_at.is_some() {
                return Ok(LeadOutcome::Existing(lead));
            }
            let lead = Self::enrich_and_save(store, scope, lead, &draft).await?;
            Ok(LeadOutcome::Existing(lead))
        }
    }

    async fn enrich_and_save(
        store: &dyn Store,
        scope: &TenantScope,
        mut lead: Lead,
        draft: &LeadDraft,
    ) -> Result<Lead, AppError> {
        if !enrich(&mut lead, draft) {
            return Ok(lead);
        }
        lead.updated_at = Utc::now();
        Ok(Repository::<Lead>::update(store, scope, lead).await?)
    }

    pub async fn lead_stats(
        store: &dyn Store,
        scope: &TenantScope,
        period: StatsPeriod,
    ) -> Result<LeadStats, AppError> {
        let since = period.start(Utc::now());
        let leads = Repository::<Lead>::list(store, scope, Trashed::Exclude).await?;

        let mut stats = LeadStats {
            total: 0,
            by_source_type: BTreeMap::new(),
            by_intent: BTreeMap::new(),
            period,
        };
        for lead in leads
            .iter()
            .filter(|l| l.instagram_conversation_id.is_some() && l.created_at >= since)
        {
            stats.total += 1;
            let source = lead.chatbot_source_type.clone().unwrap_or_else(|| "unknown".into());
            *stats.by_source_type.entry(source).or_default() += 1;
            let intent = lead.chatbot_detected_intent.clone().unwrap_or_else(|| "unknown".into());
            *stats.by_intent.entry(intent).or_default() += 1;
        }
        Ok(stats)
    }
}

/// Draft name, then the Instagram profile name, then `@username`.
pub fn resolve_name(conversation: &InstagramConversation, draft: &LeadDraft) -> String {
    let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);
    non_empty(&draft.name)
        .or_else(|| non_empty(&conversation.participant_name))
        .or_else(|| non_empty(&conversation.participant_username).map(|u| format!("@{u}")))
        .unwrap_or_else(|| ANONYMOUS_LEAD_NAME.to_string())
}

fn build_lead(conversation: &InstagramConversation, draft: LeadDraft) -> Lead {
    let source = match (draft.source_type, draft.intent.as_deref()) {
        (_, Some("human_handoff")) => ChatSourceType::Handoff,
        (other, _) => other,
    };
    let mut lead = Lead::new(resolve_name(conversation, &draft), source.source_code());
    lead.business_id = conversation.business_id;
    lead.phone = draft.phone;
    lead.email = draft.email;
    lead.instagram_conversation_id = Some(conversation.id);
    lead.chatbot_source_type = Some(draft.source_type.as_str().to_string());
    lead.chatbot_detected_intent = draft.intent;
    lead.chatbot_first_message = draft.first_message;
    lead.chatbot_data = draft.chat_data;
    lead
}

/// Fills in what the existing lead lacks. Returns whether anything changed.
pub fn enrich(lead: &mut Lead, draft: &LeadDraft) -> bool {
    let mut changed = false;
    let present = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.trim().is_empty());

    if present(&draft.phone) && !present(&lead.phone) {
        lead.phone = draft.phone.clone();
        changed = true;
    }
    if present(&draft.email) && !present(&lead.email) {
        lead.email = draft.email.clone();
        changed = true;
    }
    if present(&draft.name) && lead.has_placeholder_name() {
        if let Some(name) = &draft.name {
            lead.name = name.trim().to_string();
            changed = true;
        }
    }
    if draft.chat_data != LeadChatData::default() {
        let before = lead.chatbot_data.clone();
        lead.chatbot_data.merge(draft.chat_data.clone());
        changed |= lead.chatbot_data != before;
    }
    if present(&draft.intent) && !present(&lead.chatbot_detected_intent) {
        lead.chatbot_detected_intent = draft.intent.clone();
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn conversation() -> InstagramConversation {
        InstagramConversation::new(Uuid::new_v4(), Uuid::new_v4(), "17841400000")
    }

    #[test]
    fn name_falls_back_to_username_then_placeholder() {
        let mut conv = conversation();
        let draft = LeadDraft::new(ChatSourceType::Dm);
        assert_eq!(resolve_name(&conv, &draft), ANONYMOUS_LEAD_NAME);

        conv.participant_username = Some("dilnoza_shop".into());
        assert_eq!(resolve_name(&conv, &draft), "@dilnoza_shop");

        conv.participant_name = Some("Dilnoza".into());
        assert_eq!(resolve_name(&conv, &draft), "Dilnoza");

        let named = LeadDraft { name: Some("Jasur".into()), ..draft };
        assert_eq!(resolve_name(&conv, &named), "Jasur");
    }

    #[test]
    fn enrich_only_fills_gaps() {
        let mut lead = Lead::new(ANONYMOUS_LEAD_NAME, "instagram_chatbot_auto");
        lead.phone = Some("+998901112233".into());
        lead.chatbot_detected_intent = Some("price_inquiry".into());

        let draft = LeadDraft {
            name: Some("Jasur".into()),
            phone: Some("+998909999999".into()),
            email: Some("jasur@example.uz".into()),
            intent: Some("order".into()),
            ..LeadDraft::new(ChatSourceType::Dm)
        };
        assert!(enrich(&mut lead, &draft));
        assert_eq!(lead.name, "Jasur");
        assert_eq!(lead.phone.as_deref(), Some("+998901112233"));
        assert_eq!(lead.email.as_deref(), Some("jasur@example.uz"));
        assert_eq!(lead.chatbot_detected_intent.as_deref(), Some("price_inquiry"));

        assert!(!enrich(&mut lead, &draft));
    }

    #[test]
    fn handoff_intent_uses_handoff_source() {
        let conv = conversation();
        let draft = LeadDraft {
            intent: Some("human_handoff".into()),
            ..LeadDraft::new(ChatSourceType::Dm)
        };
        let lead = build_lead(&conv, draft);
        assert_eq!(lead.source, "instagram_chatbot_handoff");
        assert_eq!(lead.instagram_conversation_id, Some(conv.id));
        assert_eq!(lead.business_id, conv.business_id);
    }

    #[test]
    fn period_starts() {
        // Thursday
        let now = Utc.with_ymd_and_hms(2025, 3, 13, 15, 30, 0).unwrap();
        assert_eq!(StatsPeriod::Today.start(now), Utc.with_ymd_and_hms(2025, 3, 13, 0, 0, 0).unwrap());
        assert_eq!(StatsPeriod::Week.start(now), Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(StatsPeriod::Month.start(now), Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
    }
}
