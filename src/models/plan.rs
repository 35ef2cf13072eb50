use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A metered resource a plan puts a ceiling on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    TeamMembers,
    MonthlyLeads,
    AudioMinutes,
    InstagramAccounts,
}

/// How usage of a resource is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageWindow {
    /// Current count of live rows.
    Live,
    /// Consumption since the first instant of the current UTC month.
    CalendarMonth,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::TeamMembers,
        Resource::MonthlyLeads,
        Resource::AudioMinutes,
        Resource::InstagramAccounts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::TeamMembers => "team_members",
            Resource::MonthlyLeads => "monthly_leads",
            Resource::AudioMinutes => "audio_minutes",
            Resource::InstagramAccounts => "instagram_accounts",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Resource::TeamMembers => "Team member limit",
            Resource::MonthlyLeads => "Monthly lead limit",
            Resource::AudioMinutes => "Audio minutes limit",
            Resource::InstagramAccounts => "Instagram account limit",
        }
    }

    pub fn window(self) -> UsageWindow {
        match self {
            Resource::TeamMembers | Resource::InstagramAccounts => UsageWindow::Live,
            Resource::MonthlyLeads | Resource::AudioMinutes => UsageWindow::CalendarMonth,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan ceilings. `None` (or a stored negative value) means unlimited,
/// `Some(0)` means the feature is not part of the plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PlanLimits {
    pub team_member_limit: Option<i32>,
    pub lead_limit: Option<i32>,
    pub audio_minutes_limit: Option<i32>,
    pub chatbot_channel_limit: Option<i32>,
    pub telegram_bot_limit: Option<i32>,
    pub ai_requests_limit: Option<i32>,
    pub storage_limit_mb: Option<i32>,
    pub instagram_account_limit: Option<i32>,
}

impl PlanLimits {
    pub fn ceiling(&self, resource: Resource) -> Option<i64> {
        let raw = match resource {
            Resource::TeamMembers => self.team_member_limit,
            Resource::MonthlyLeads => self.lead_limit,
            Resource::AudioMinutes => self.audio_minutes_limit,
            Resource::InstagramAccounts => self.instagram_account_limit,
        };
        raw.filter(|v| *v >= 0).map(i64::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    HrTasks,
    HrBot,
    AntiFraud,
    Instagram,
    Amocrm,
}

impl Feature {
    pub fn label(self) -> &'static str {
        match self {
            Feature::HrTasks => "HR tasks",
            Feature::HrBot => "HR bot",
            Feature::AntiFraud => "Anti-fraud",
            Feature::Instagram => "Instagram chatbot",
            Feature::Amocrm => "amoCRM integration",
        }
    }
}

/// Boolean feature flags plus marketing highlights, stored as JSONB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanFeatures {
    #[serde(default)]
    pub hr_tasks: bool,
    #[serde(default)]
    pub hr_bot: bool,
    #[serde(default)]
    pub anti_fraud: bool,
    #[serde(default)]
    pub instagram: bool,
    #[serde(default)]
    pub amocrm: bool,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl PlanFeatures {
    pub fn has(&self, feature: Feature) -> bool {
        match feature {
            Feature::HrTasks => self.hr_tasks,
            Feature::HrBot => self.hr_bot,
            Feature::AntiFraud => self.anti_fraud,
            Feature::Instagram => self.instagram,
            Feature::Amocrm => self.amocrm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub price_monthly: i64,
    pub price_yearly: i64,
    #[sqlx(flatten)]
    pub limits: PlanLimits,
    #[sqlx(json)]
    pub features: PlanFeatures,
    pub is_active: bool,
    pub sort_order: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Unknown subscription status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub business_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub amount: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> Option<SubscriptionStatus> {
        self.status.parse().ok()
    }

    /// Paid period still running, or trial period still running.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self.status() {
            Some(SubscriptionStatus::Active) => self.ends_at.is_some_and(|end| end >= now),
            Some(SubscriptionStatus::Trialing) => {
                self.trial_ends_at.is_some_and(|end| end >= now)
                    || self.ends_at.is_some_and(|end| end >= now)
            }
            _ => false,
        }
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitDecision {
    pub resource: Resource,
    pub used: i64,
    pub requested: i64,
    /// `None` when unlimited.
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    pub allowed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageStat {
    pub resource: Resource,
    pub label: &'static str,
    pub current: i64,
    pub limit: Option<i64>,
    pub percentage: f64,
    pub is_unlimited: bool,
    pub is_exceeded: bool,
}

/// A resource whose current usage would not fit under a target plan.
#[derive(Debug, Clone, Serialize)]
pub struct DowngradeIssue {
    pub resource: Resource,
    pub label: &'static str,
    pub used: i64,
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription(status: &str, ends_at: Option<DateTime<Utc>>, trial: Option<DateTime<Utc>>) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            status: status.into(),
            starts_at: now,
            ends_at,
            trial_ends_at: trial,
            amount: 0,
            currency: "UZS".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn negative_ceiling_means_unlimited() {
        let limits = PlanLimits {
            team_member_limit: Some(-1),
            lead_limit: Some(0),
            audio_minutes_limit: None,
            instagram_account_limit: Some(3),
            ..Default::default()
        };
        assert_eq!(limits.ceiling(Resource::TeamMembers), None);
        assert_eq!(limits.ceiling(Resource::MonthlyLeads), Some(0));
        assert_eq!(limits.ceiling(Resource::AudioMinutes), None);
        assert_eq!(limits.ceiling(Resource::InstagramAccounts), Some(3));
    }

    #[test]
    fn active_window_rules() {
        let now = Utc::now();
        let later = now + Duration::days(3);
        let earlier = now - Duration::days(3);

        assert!(subscription("active", Some(later), None).is_active_at(now));
        assert!(!subscription("active", Some(earlier), None).is_active_at(now));
        assert!(!subscription("active", None, None).is_active_at(now));
        assert!(subscription("trialing", None, Some(later)).is_active_at(now));
        assert!(!subscription("trialing", None, Some(earlier)).is_active_at(now));
        assert!(!subscription("cancelled", Some(later), Some(later)).is_active_at(now));
        assert!(!subscription("expired", Some(later), None).is_active_at(now));
    }
}
